//! KQML wire syntax: terms, performatives, line framing, and the marshalling
//! layer between native values and terms.
//!
//! - `term`: [`Term`] tree plus its S-expression reader and writer.
//! - `performative`: [`Performative`] messages and the known-verb catalogue.
//! - `codec`: newline framing that survives bad lines.
//! - `marshal`: [`Value`] to [`Term`] conversion rules.
//! - `query`: query reply construction in pattern or bind mode.

pub mod codec;
pub mod marshal;
pub mod performative;
pub mod query;
pub mod term;

pub use marshal::{from_term, to_term, Value};
pub use performative::{parse_message, Performative};
pub use query::{build_query_reply, ResponseMode};
pub use term::Term;
