//! Sockets to and from the Companions host.
//!
//! Outbound traffic uses one short-lived connection per message; inbound
//! traffic arrives on a single listening socket handed to the dispatcher.

pub mod listener;
pub mod outbound;

pub use listener::{open_listener, ListenerHandle, LISTEN_BACKLOG};
pub use outbound::{connect_out, send_once, Connection, Outbound, FACILITATOR};
