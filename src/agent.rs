//! The agent shell: wires port resolution, the listener, the dispatcher and
//! registration together, and tears them down again.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{AgentConfig, Endpoint, PortStrategy, DEFAULT_PORT};
use crate::connection::{open_listener, Outbound};
use crate::discovery::discover;
use crate::discovery::probe::{HostSystem, SystemProbe};
use crate::dispatch::{
    spawn_dispatcher, AgentIdentity, AgentState, DispatchContext, MessageHandler, StateTracker,
};
use crate::kqml::Performative;
use crate::launch::{launch_and_resolve, SupervisedHost};
use crate::{AppError, Result};

/// A running agent.
///
/// Created by [`Agent::start`]; stopped by [`Agent::shutdown`]. Dropping an
/// agent without shutting it down cancels the dispatcher and kills an owned
/// host, but does not wait for either.
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
    outbound: Outbound,
    identity: Arc<AgentIdentity>,
    state: Arc<StateTracker>,
    cancel: CancellationToken,
    accept_loop: Mutex<Option<JoinHandle<()>>>,
    host: Mutex<Option<SupervisedHost>>,
}

impl Agent {
    /// Start an agent with the OS-backed process probe.
    ///
    /// # Errors
    ///
    /// See [`Agent::start_with_probe`].
    pub async fn start(config: AgentConfig, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        Self::start_with_probe(config, handler, &HostSystem).await
    }

    /// Resolve the facilitator port, open the listener, start dispatching and
    /// register with the facilitator.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` for an invalid configuration.
    /// - `AppError::PortVerificationFailed` when a port record fails pid
    ///   verification.
    /// - `AppError::Bind` when the listener cannot be opened.
    /// - `AppError::Connection` when registration cannot be delivered; the
    ///   agent is shut down first.
    pub async fn start_with_probe(
        config: AgentConfig,
        handler: Arc<dyn MessageHandler>,
        probe: &dyn SystemProbe,
    ) -> Result<Self> {
        config.validate()?;

        let (port, mut host) = resolve_port(config.port_strategy(), probe).await?;
        let prepared = Endpoint::new(config.host.clone(), port)
            .and_then(|endpoint| Ok((endpoint, open_listener(config.listener_port)?)));
        let (endpoint, listener) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                if let Some(ref mut host) = host {
                    if let Err(term_err) = host.terminate().await {
                        warn!(%term_err, "failed to terminate companions after startup error");
                    }
                }
                return Err(err);
            }
        };
        info!(name = %config.name, %endpoint, listener_port = listener.port(), "agent starting");

        let identity = Arc::new(AgentIdentity::now(config.name.clone()));
        let outbound = Outbound::new(endpoint, config.name.clone());
        let state = Arc::new(StateTracker::default());
        let cancel = CancellationToken::new();
        let ctx = DispatchContext {
            outbound: outbound.clone(),
            identity: Arc::clone(&identity),
        };
        let accept_loop = spawn_dispatcher(
            listener,
            handler,
            ctx,
            Arc::clone(&state),
            cancel.clone(),
            config.drain_timeout(),
        );

        let agent = Self {
            config,
            outbound,
            identity,
            state,
            cancel,
            accept_loop: Mutex::new(Some(accept_loop)),
            host: Mutex::new(host),
        };

        if let Err(err) = agent.register().await {
            error!(%err, "registration failed, shutting down");
            agent.shutdown().await;
            return Err(err);
        }
        Ok(agent)
    }

    /// Agent name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the agent was started with.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Resolved facilitator endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        self.outbound.endpoint()
    }

    /// Port the agent listens on.
    #[must_use]
    pub fn listener_port(&self) -> u16 {
        self.config.listener_port
    }

    /// Name, start time and machine reported in ping replies.
    #[must_use]
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.state.state()
    }

    /// Sending side, for application messages.
    #[must_use]
    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    /// Pid of the host this agent launched, if any.
    pub async fn owned_host_pid(&self) -> Option<u32> {
        self.host.lock().await.as_ref().map(|host| host.handle().pid)
    }

    /// (Re)announce the listener to the facilitator.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connection` if the message cannot be delivered.
    pub async fn register(&self) -> Result<()> {
        self.outbound.register(self.config.listener_port).await?;
        info!(name = %self.config.name, "registered with facilitator");
        Ok(())
    }

    /// Send an application message to the facilitator.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connection` if the message cannot be delivered.
    pub async fn send(&self, msg: &Performative) -> Result<()> {
        self.outbound.send(msg).await
    }

    /// Stop listening, drain dispatch units and terminate an owned host.
    ///
    /// Safe to call more than once; only the first call does any work.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let accept_loop = self.accept_loop.lock().await.take();
        if let Some(accept_loop) = accept_loop {
            info!(name = %self.config.name, "shutting down");
            if let Err(err) = accept_loop.await {
                warn!(%err, "accept loop ended abnormally");
            }
        }

        let mut host = self.host.lock().await;
        if let Some(ref mut owned) = *host {
            if let Err(err) = owned.terminate().await {
                warn!(%err, "failed to terminate companions");
            }
        }
        *host = None;
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Turn a port strategy into a concrete facilitator port.
///
/// Discovery and launch failures fall back to [`DEFAULT_PORT`]; a failed pid
/// verification does not.
async fn resolve_port(
    strategy: PortStrategy,
    probe: &dyn SystemProbe,
) -> Result<(u16, Option<SupervisedHost>)> {
    match strategy {
        PortStrategy::Fixed(port) => Ok((port, None)),
        PortStrategy::DiscoverExisting { verify } => match discover(probe, verify) {
            Ok(Some(port)) => Ok((port, None)),
            Ok(None) => {
                info!(port = DEFAULT_PORT, "no running companions found, using default port");
                Ok((DEFAULT_PORT, None))
            }
            Err(err @ AppError::PortVerificationFailed(_)) => Err(err),
            Err(err) => {
                warn!(%err, port = DEFAULT_PORT, "discovery failed, using default port");
                Ok((DEFAULT_PORT, None))
            }
        },
        PortStrategy::LaunchOwned { launch, verify } => {
            match launch_and_resolve(&launch, verify).await {
                Ok((host, port)) => Ok((port, Some(host))),
                Err(err @ AppError::PortVerificationFailed(_)) => Err(err),
                Err(err) => {
                    warn!(%err, port = DEFAULT_PORT, "launch failed, using default port");
                    Ok((DEFAULT_PORT, None))
                }
            }
        }
    }
}
