//! Inbound dispatch: the accept loop and its bounded pool of dispatch units.
//!
//! One task accepts connections and spawns a dispatch unit per connection.
//! A unit waits for one of [`MAX_WORKERS`] permits before it reads anything,
//! so at most five connections are processed at once and the rest queue in
//! arrival order. Each unit reads newline-framed performatives until the
//! peer closes or shutdown is requested:
//!
//! - `ping` is answered on the same connection with a status `update`.
//! - Verbs outside the KQML vocabulary get an `error` reply via the
//!   facilitator.
//! - Everything else goes to the installed [`MessageHandler`].
//!
//! On cancellation the listener closes, units finish the message in hand,
//! and anything still running after the drain timeout is aborted.

pub mod handler;
pub mod state;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::connection::ListenerHandle;
use crate::kqml::codec::KqmlCodec;
use crate::kqml::performative::is_known_performative;
use crate::kqml::{parse_message, Performative, Term};
use crate::AppError;

pub use handler::{DispatchContext, HandlerFuture, MessageHandler, NoopHandler};
pub use state::{AgentState, StateTracker};
pub use status::{status_update, uptime_components, AgentIdentity};

/// Maximum number of connections processed concurrently.
pub const MAX_WORKERS: usize = 5;

/// Pause after a failed `accept` so a persistent error (EMFILE) does not
/// spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type ReplySink = FramedWrite<OwnedWriteHalf, KqmlCodec>;

struct Shared {
    handler: Arc<dyn MessageHandler>,
    ctx: DispatchContext,
    state: Arc<StateTracker>,
    permits: Arc<Semaphore>,
}

/// Spawn the accept loop over `listener`.
///
/// The task ends after `cancel` fires and every dispatch unit has finished or
/// been aborted; `state` reads [`AgentState::Stopped`] from then on.
#[must_use]
pub fn spawn_dispatcher(
    listener: ListenerHandle,
    handler: Arc<dyn MessageHandler>,
    ctx: DispatchContext,
    state: Arc<StateTracker>,
    cancel: CancellationToken,
    drain_timeout: Duration,
) -> JoinHandle<()> {
    let port = listener.port();
    let shared = Arc::new(Shared {
        handler,
        ctx,
        state,
        permits: Arc::new(Semaphore::new(MAX_WORKERS)),
    });

    tokio::spawn(
        async move {
            let mut units = JoinSet::new();
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("dispatcher shutting down");
                        break;
                    }
                    Some(joined) = units.join_next(), if !units.is_empty() => log_unit_exit(joined),
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "accepted connection");
                            let unit = run_unit(stream, Arc::clone(&shared), cancel.clone())
                                .instrument(info_span!("dispatch_unit", %peer));
                            units.spawn(unit);
                        }
                        Err(err) => {
                            warn!(%err, "accept failed");
                            accept_backoff(&cancel).await;
                        }
                    },
                }
            }

            listener.close();
            drain(&mut units, drain_timeout).await;
            shared.state.stop();
            info!("dispatcher stopped");
        }
        .instrument(info_span!("dispatcher", port)),
    )
}

async fn run_unit(stream: TcpStream, shared: Arc<Shared>, cancel: CancellationToken) {
    let permit = tokio::select! {
        () = cancel.cancelled() => {
            debug!("shutdown before dispatch, dropping connection");
            return;
        }
        permit = Arc::clone(&shared.permits).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };
    let _unit = shared.state.enter();

    let (read, write) = stream.into_split();
    let mut lines = FramedRead::new(read, KqmlCodec::new());
    let mut replies = FramedWrite::new(write, KqmlCodec::new());

    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => {
                debug!("stop requested, closing connection");
                break;
            }
            next = lines.next() => next,
        };
        match next {
            None => break,
            Some(Ok(Ok(line))) => shared.process_line(&line, &mut replies).await,
            Some(Ok(Err(reason))) => warn!(%reason, "discarding inbound line"),
            Some(Err(err)) => {
                warn!(%err, "read failed, closing connection");
                break;
            }
        }
        if cancel.is_cancelled() {
            debug!("stop requested, closing connection");
            break;
        }
    }

    if let Err(err) = replies.close().await {
        debug!(%err, "connection shutdown failed");
    }
    drop(permit);
    debug!("connection finished");
}

impl Shared {
    async fn process_line(&self, line: &str, replies: &mut ReplySink) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let msg = match parse_message(line) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, line, "malformed inbound message");
                self.reject_malformed(line, &err).await;
                return;
            }
        };
        debug!(verb = msg.verb(), "received");

        if msg.is("ping") {
            self.answer_ping(&msg, replies).await;
            return;
        }

        if !is_known_performative(msg.verb()) {
            warn!(verb = msg.verb(), "unexpected performative");
            let comment = AppError::UnexpectedPerformative(msg.to_string()).to_string();
            if let Err(err) = self.ctx.outbound.error_reply(&msg, &comment).await {
                warn!(%err, "failed to send error reply");
            }
            return;
        }

        match self.handler.handle(&msg, &self.ctx).await {
            Ok(Some(reply)) => {
                if let Err(err) = self.ctx.outbound.reply(&msg, reply).await {
                    warn!(%err, verb = msg.verb(), "failed to send reply");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, verb = msg.verb(), "handler failed");
                if let Err(send_err) = self.ctx.outbound.error_reply(&msg, &err.to_string()).await {
                    warn!(err = %send_err, "failed to send error reply");
                }
            }
        }
    }

    async fn answer_ping(&self, ping: &Performative, replies: &mut ReplySink) {
        let mut update = status_update(
            &self.ctx.identity,
            Local::now().naive_local(),
            self.state.state(),
            self.handler.subscription_count(),
        );
        update.address_reply_to(ping);
        if let Err(err) = replies.send(update.to_string()).await {
            warn!(%err, "failed to answer ping");
        }
    }

    /// Send an error reply for a line that did not parse as a performative,
    /// provided its sender can still be made out.
    async fn reject_malformed(&self, line: &str, err: &AppError) {
        let Some(original) = salvage_reply_address(line) else {
            debug!("malformed message has no identifiable sender, not replying");
            return;
        };
        if let Err(send_err) = self.ctx.outbound.error_reply(&original, &err.to_string()).await {
            warn!(err = %send_err, "failed to send error reply");
        }
    }
}

/// Recover `:sender` and `:reply-with` from a line that parses as a term but
/// not as a performative.
fn salvage_reply_address(line: &str) -> Option<Performative> {
    let term = Term::parse(line).ok()?;
    let items = term.as_list()?;
    let find = |key: &str| {
        items
            .windows(2)
            .find(|pair| pair[0].as_atom().is_some_and(|k| k.eq_ignore_ascii_case(key)))
            .map(|pair| pair[1].clone())
    };

    let sender = find(":sender")?;
    let verb = term.head().unwrap_or("unknown").to_owned();
    let mut original = Performative::new(verb).with("sender", sender);
    if let Some(reply_with) = find(":reply-with") {
        original.set("reply-with", reply_with);
    }
    Some(original)
}

async fn accept_backoff(cancel: &CancellationToken) {
    tokio::select! {
        () = cancel.cancelled() => {}
        () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
    }
}

async fn drain(units: &mut JoinSet<()>, timeout: Duration) {
    if units.is_empty() {
        return;
    }
    info!(pending = units.len(), "waiting for dispatch units");
    let finished = tokio::time::timeout(timeout, async {
        while let Some(joined) = units.join_next().await {
            log_unit_exit(joined);
        }
    })
    .await;

    if finished.is_err() {
        warn!(remaining = units.len(), "drain timeout elapsed, aborting dispatch units");
        units.abort_all();
        while units.join_next().await.is_some() {}
    }
}

fn log_unit_exit(joined: std::result::Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!(%err, "dispatch unit panicked");
        }
    }
}
