//! Agent configuration parsing, validation, and port-strategy selection.

use std::fmt::{Display, Formatter};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Canonical loopback host name.
pub const LOCALHOST: &str = "localhost";

/// Host spellings treated as "this machine" when deciding whether to run
/// discovery.
pub const LOCALHOST_DEFS: &[&str] = &[LOCALHOST, "127.0.0.1", "::1"];

/// Port the host listens on when nothing better is known.
pub const DEFAULT_PORT: u16 = 9000;

/// Port this agent's listener binds when not configured.
pub const DEFAULT_LISTENER_PORT: u16 = 8950;

/// Host executable launched when `[launch]` does not name one.
pub const DEFAULT_EXE_NAME: &str = "CompanionsMicroServer64.exe";

/// Returns `true` when `host` is a loopback alias or an IPv4/IPv6 literal.
#[must_use]
pub fn is_valid_host(host: &str) -> bool {
    LOCALHOST_DEFS.contains(&host) || host.parse::<IpAddr>().is_ok()
}

/// Returns `true` when `port` lies strictly between 1024 and 65535.
#[must_use]
pub fn is_valid_port(port: u16) -> bool {
    1024 < port && port < 65535
}

/// Validate a host string.
///
/// # Errors
///
/// Returns `AppError::Config` if `host` is neither a loopback alias nor an
/// IP literal.
pub fn validate_host(host: &str) -> Result<()> {
    if is_valid_host(host) {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "{host} is not a valid host (ip address)"
        )))
    }
}

/// Validate a port number.
///
/// # Errors
///
/// Returns `AppError::Config` if `port` is outside (1024, 65535).
pub fn validate_port(port: u16) -> Result<()> {
    if is_valid_port(port) {
        Ok(())
    } else {
        Err(AppError::Config(format!("{port} is not a valid port number")))
    }
}

/// A validated host/port pair. Construction is the only validation point;
/// every socket operation takes an `Endpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Build an endpoint after validating both halves.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the host or port is invalid.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        validate_host(&host)?;
        validate_port(port)?;
        Ok(Self { host, port })
    }

    /// Host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the host refers to this machine.
    #[must_use]
    pub fn is_local(&self) -> bool {
        LOCALHOST_DEFS.contains(&self.host.as_str())
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn default_name() -> String {
    "CompanionsKQMLModule".into()
}

fn default_host() -> String {
    LOCALHOST.into()
}

fn default_listener_port() -> u16 {
    DEFAULT_LISTENER_PORT
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

fn default_exe_name() -> String {
    DEFAULT_EXE_NAME.into()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// Settings for launching and owning a host executable.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LaunchConfig {
    /// Directory containing the executable; the port file appears here too.
    pub exe_dir: PathBuf,
    /// Executable file name inside `exe_dir`.
    #[serde(default = "default_exe_name")]
    pub exe_name: String,
    /// Interval between checks for the port file.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on the wait for the port file; absent waits forever.
    #[serde(default)]
    pub max_wait_ms: Option<u64>,
    /// Require the port record pid to match the spawned child.
    #[serde(default = "default_true")]
    pub verify_port: bool,
}

impl LaunchConfig {
    /// Launch settings with defaults for everything but the directory.
    #[must_use]
    pub fn new(exe_dir: impl Into<PathBuf>) -> Self {
        Self {
            exe_dir: exe_dir.into(),
            exe_name: default_exe_name(),
            poll_interval_ms: default_poll_interval_ms(),
            max_wait_ms: None,
            verify_port: true,
        }
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Maximum wait as a [`Duration`], if bounded.
    #[must_use]
    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.map(Duration::from_millis)
    }
}

/// How the agent learns which port the host is listening on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortStrategy {
    /// Use the given port as-is.
    Fixed(u16),
    /// Look for an already-running host on this machine; fall back to
    /// [`DEFAULT_PORT`] when nothing is found.
    DiscoverExisting {
        /// Require the port record's pid to match the discovered process.
        verify: bool,
    },
    /// Spawn the host executable and own it for the agent's lifetime.
    LaunchOwned {
        /// What to launch and how long to wait.
        launch: LaunchConfig,
        /// Require the port record's pid to match the spawned child.
        verify: bool,
    },
}

/// Agent configuration, typically parsed from `agent.toml` and then
/// overridden from the command line.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Symbolic agent name used in `:sender` and registration.
    #[serde(default = "default_name")]
    pub name: String,
    /// Host the Companions facilitator runs on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Facilitator port; `None` lets the strategy resolve it.
    #[serde(default)]
    pub port: Option<u16>,
    /// Port this agent listens on for inbound messages.
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,
    /// Enable debug-level logging.
    #[serde(default)]
    pub debug: bool,
    /// Verify the port record pid against the host process.
    #[serde(default)]
    pub verify_port: bool,
    /// How long shutdown waits for in-flight dispatch units.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Launch an owned host executable instead of discovering one.
    #[serde(default)]
    pub launch: Option<LaunchConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: None,
            listener_port: default_listener_port(),
            debug: false,
            verify_port: false,
            drain_timeout_ms: default_drain_timeout_ms(),
            launch: None,
        }
    }
}

impl AgentConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check host, ports, and launch settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(AppError::Config(
                "name must be a non-empty symbol without whitespace".into(),
            ));
        }
        validate_host(&self.host)?;
        if let Some(port) = self.port {
            validate_port(port)?;
        }
        validate_port(self.listener_port)?;
        if let Some(ref launch) = self.launch {
            if launch.poll_interval_ms == 0 {
                return Err(AppError::Config(
                    "launch.poll_interval_ms must be greater than zero".into(),
                ));
            }
            if launch.exe_name.is_empty() {
                return Err(AppError::Config("launch.exe_name must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Drain timeout as a [`Duration`].
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Pick the port strategy implied by this configuration.
    ///
    /// A `[launch]` table always selects [`PortStrategy::LaunchOwned`]: the
    /// launched host's port record decides the port, so a configured port is
    /// ignored. Otherwise an explicit port wins. Discovery only makes sense
    /// when the host is this machine, so a remote host without a port gets
    /// the default port.
    #[must_use]
    pub fn port_strategy(&self) -> PortStrategy {
        if let Some(ref launch) = self.launch {
            return PortStrategy::LaunchOwned {
                launch: launch.clone(),
                verify: launch.verify_port || self.verify_port,
            };
        }
        if let Some(port) = self.port {
            return PortStrategy::Fixed(port);
        }
        if LOCALHOST_DEFS.contains(&self.host.as_str()) {
            PortStrategy::DiscoverExisting {
                verify: self.verify_port,
            }
        } else {
            PortStrategy::Fixed(DEFAULT_PORT)
        }
    }
}
