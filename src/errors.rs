//! Error types shared across the agent shell.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all agent failure modes.
///
/// A missing or malformed port registry file is not an error: readers return
/// `Ok(None)` for those so callers can keep polling.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Port record pid does not match the expected process under `verify`.
    PortVerificationFailed(String),
    /// Outbound socket could not be opened or written.
    Connection(String),
    /// Inbound listener could not be bound.
    Bind(String),
    /// Inbound payload is not a valid performative or term.
    MalformedMessage(String),
    /// Inbound verb is not a known performative.
    UnexpectedPerformative(String),
    /// Query reply could not be built from the supplied results.
    Query(String),
    /// Host executable could not be launched or terminated.
    Launch(String),
    /// Host executable did not publish its port record in time.
    LaunchTimeout(String),
    /// Application-level message handler failure.
    Handler(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::PortVerificationFailed(msg) => write!(f, "port verification failed: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::MalformedMessage(msg) => write!(f, "malformed message: {msg}"),
            Self::UnexpectedPerformative(msg) => write!(f, "unexpected performative: {msg}"),
            Self::Query(msg) => write!(f, "query: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::LaunchTimeout(msg) => write!(f, "launch timeout: {msg}"),
            Self::Handler(msg) => write!(f, "handler: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
