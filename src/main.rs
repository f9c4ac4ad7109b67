#![forbid(unsafe_code)]

//! `companions-agent`: a KQML agent that joins a Companions facilitator.
//!
//! Resolves the facilitator port (fixed, discovered or launched), registers
//! its listener, answers pings, and runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use companions_agent::config::LaunchConfig;
use companions_agent::dispatch::NoopHandler;
use companions_agent::{Agent, AgentConfig, AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "companions-agent", about = "KQML agent for the Companions architecture", version, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host the facilitator runs on.
    #[arg(short = 'u', long = "url")]
    host: Option<String>,

    /// Facilitator port. Skips discovery when given.
    #[arg(short, long)]
    port: Option<u16>,

    /// Port to listen on for inbound messages.
    #[arg(short, long)]
    listener_port: Option<u16>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Check that the port record was written by the expected process.
    #[arg(short, long)]
    verify_port: bool,

    /// Directory holding a host executable to launch and own. The launched
    /// host's port record overrides `--port`.
    #[arg(short, long)]
    exe_path: Option<PathBuf>,

    /// Executable name inside `--exe-path`.
    #[arg(short = 'n', long, requires = "exe_path")]
    exe_name: Option<String>,

    /// Agent name used when registering.
    #[arg(long)]
    name: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn into_config(self) -> Result<(AgentConfig, LogFormat)> {
        let mut config = match self.config {
            Some(ref path) => AgentConfig::load_from_path(path)?,
            None => AgentConfig::default(),
        };

        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(host) = self.host {
            config.host = host;
        }
        if self.port.is_some() {
            config.port = self.port;
        }
        if let Some(listener_port) = self.listener_port {
            config.listener_port = listener_port;
        }
        config.debug |= self.debug;
        config.verify_port |= self.verify_port;
        if let Some(exe_dir) = self.exe_path {
            let mut launch = LaunchConfig::new(exe_dir);
            if let Some(exe_name) = self.exe_name {
                launch.exe_name = exe_name;
            }
            config.launch = Some(launch);
        }

        config.validate()?;
        Ok((config, self.log_format))
    }
}

fn main() -> Result<()> {
    let (config, log_format) = Cli::parse().into_config()?;
    init_tracing(log_format, config.debug)?;
    info!("companions-agent bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

async fn run(config: AgentConfig) -> Result<()> {
    let agent = Agent::start(config, Arc::new(NoopHandler)).await?;
    info!(
        name = agent.name(),
        endpoint = %agent.endpoint(),
        listener_port = agent.listener_port(),
        "agent ready"
    );

    shutdown_signal().await;
    info!("shutdown signal received");
    agent.shutdown().await;
    info!("companions-agent shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
