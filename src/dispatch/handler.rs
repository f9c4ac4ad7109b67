//! Application hook for inbound performatives.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::connection::Outbound;
use crate::dispatch::status::AgentIdentity;
use crate::kqml::Performative;
use crate::Result;

/// Boxed future returned by [`MessageHandler::handle`].
pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Performative>>> + Send + 'a>>;

/// What a handler can see and use while processing one message.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Sending side of the agent, for replies and follow-up messages.
    pub outbound: Outbound,
    /// Name, start time and machine of the agent.
    pub identity: Arc<AgentIdentity>,
}

/// Receives every well-formed inbound performative except `ping`, which the
/// dispatcher answers itself, and verbs outside the known vocabulary, which
/// are rejected before reaching the handler.
///
/// Returning `Ok(Some(reply))` sends `reply` back to the original sender.
/// Returning an error sends an `error` reply carrying the error text.
///
/// Up to five calls may run concurrently; implementations must be safe to
/// share across tasks.
pub trait MessageHandler: Send + Sync {
    /// Process one message.
    fn handle<'a>(&'a self, msg: &'a Performative, ctx: &'a DispatchContext) -> HandlerFuture<'a>;

    /// Number of active subscriptions, reported in ping replies.
    fn subscription_count(&self) -> usize {
        0
    }
}

/// Handler that accepts everything and replies to nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl MessageHandler for NoopHandler {
    fn handle<'a>(&'a self, msg: &'a Performative, _ctx: &'a DispatchContext) -> HandlerFuture<'a> {
        Box::pin(async move {
            tracing::debug!(verb = msg.verb(), "no handler installed, ignoring");
            Ok(None)
        })
    }
}
