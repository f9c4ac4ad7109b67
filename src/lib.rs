#![forbid(unsafe_code)]

//! KQML agent shell for the Companions cognitive architecture.
//!
//! An [`Agent`](agent::Agent) finds or launches a Companions host, listens
//! for inbound performatives, answers pings, routes everything else to a
//! [`MessageHandler`](dispatch::MessageHandler), and sends its own messages
//! to the facilitator one connection at a time.

pub mod agent;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod dispatch;
pub mod errors;
pub mod kqml;
pub mod launch;

pub use agent::Agent;
pub use config::AgentConfig;
pub use errors::{AppError, Result};
