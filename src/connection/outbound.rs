//! Outbound messages to the facilitator.
//!
//! The host expects every message on its own connection: open, write one
//! `\n`-terminated performative, flush, shut down. [`send_once`] does exactly
//! that and never reuses a socket. [`Outbound`] layers the agent's identity
//! and the usual reply/announce helpers on top.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::Endpoint;
use crate::kqml::{build_query_reply, to_term, Performative, ResponseMode, Term, Value};
use crate::{AppError, Result};

/// Receiver name of the host's message router.
pub const FACILITATOR: &str = "facilitator";

/// An open outbound socket. Dropping it closes the socket.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: Endpoint,
}

impl Connection {
    /// Endpoint this connection was opened to.
    #[must_use]
    pub fn peer(&self) -> &Endpoint {
        &self.peer
    }

    /// Write one performative followed by `\n` and flush.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connection` on any write failure.
    pub async fn write_message(&mut self, msg: &Performative) -> Result<()> {
        let mut line = msg.to_string();
        line.push('\n');
        self.stream
            .write_all(line.as_bytes())
            .await
            .map_err(|err| AppError::Connection(format!("write to {} failed: {err}", self.peer)))?;
        self.stream
            .flush()
            .await
            .map_err(|err| AppError::Connection(format!("flush to {} failed: {err}", self.peer)))
    }

    /// Shut down both directions and release the socket.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Connection` if the shutdown fails; the socket is
    /// released either way.
    pub async fn close(mut self) -> Result<()> {
        let result = self.stream.shutdown().await;
        drop(self.stream);
        result.map_err(|err| AppError::Connection(format!("shutdown of {} failed: {err}", self.peer)))
    }
}

/// Open a fresh socket to `endpoint`.
///
/// # Errors
///
/// Returns `AppError::Connection` on any OS-level connect failure.
pub async fn connect_out(endpoint: &Endpoint) -> Result<Connection> {
    let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
        .await
        .map_err(|err| AppError::Connection(format!("connect to {endpoint} failed: {err}")))?;
    Ok(Connection {
        stream,
        peer: endpoint.clone(),
    })
}

/// Send one message on its own connection.
///
/// The connection is shut down and closed on every path. A write failure is
/// reported in preference to a shutdown failure.
///
/// # Errors
///
/// Returns `AppError::Connection` if connecting, writing, or shutting down
/// fails.
pub async fn send_once(endpoint: &Endpoint, msg: &Performative) -> Result<()> {
    debug!(%endpoint, %msg, "sending");
    let mut conn = connect_out(endpoint).await?;
    let written = conn.write_message(msg).await;
    let closed = conn.close().await;
    written.and(closed)
}

/// Sending side of an agent: where to send, who is sending, and the
/// `reply-with` id counter. Cheap to clone; clones share the counter.
#[derive(Debug, Clone)]
pub struct Outbound {
    endpoint: Endpoint,
    name: Arc<str>,
    reply_ids: Arc<AtomicU64>,
}

impl Outbound {
    /// Outbound handle for agent `name` talking to `endpoint`.
    #[must_use]
    pub fn new(endpoint: Endpoint, name: impl Into<Arc<str>>) -> Self {
        Self {
            endpoint,
            name: name.into(),
            reply_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Facilitator endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Agent name used as `:sender`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next `reply-with` id: `id1`, `id2`, ...
    #[must_use]
    pub fn next_reply_id(&self) -> String {
        format!("id{}", self.reply_ids.fetch_add(1, Ordering::Relaxed))
    }

    /// Send `msg` to the facilitator.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn send(&self, msg: &Performative) -> Result<()> {
        send_once(&self.endpoint, msg).await
    }

    /// Address `reply` back to the sender of `original` and send it.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn reply(&self, original: &Performative, mut reply: Performative) -> Result<()> {
        if reply.get("sender").is_none() {
            reply.set("sender", Term::token(&*self.name));
        }
        reply.address_reply_to(original);
        self.send(&reply).await
    }

    /// Reply to `original` with an `error` performative carrying `comment`.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn error_reply(&self, original: &Performative, comment: &str) -> Result<()> {
        let reply = Performative::new("error")
            .with("sender", Term::token(&*self.name))
            .with("comment", Term::string(comment));
        self.reply(original, reply).await
    }

    /// Announce this agent's listener to the facilitator.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn register(&self, listener_port: u16) -> Result<()> {
        let address = format!("socket://{}:{listener_port}", self.endpoint.host());
        let msg = Performative::new("register")
            .with("sender", Term::token(&*self.name))
            .with("receiver", Term::token(FACILITATOR))
            .with(
                "content",
                Term::List(vec![
                    Term::string(address),
                    Term::nil(),
                    Term::nil(),
                    Term::token(listener_port.to_string()),
                ]),
            );
        self.send(&msg).await
    }

    /// Answer a query with its results in the requested response mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Query` if the reply cannot be built, or a send
    /// error from [`send_once`].
    pub async fn respond_to_query(
        &self,
        original: &Performative,
        query: &Term,
        results: &Value,
        mode: ResponseMode,
    ) -> Result<()> {
        let reply = build_query_reply(&self.name, original, query, results, mode)?;
        self.send(&reply).await
    }

    /// Insert `data` into the receiver's knowledge base, or only its
    /// working memory when `wm_only` is set.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn insert_data(&self, receiver: &str, data: &Value, wm_only: bool) -> Result<()> {
        let mut msg = Performative::new("insert")
            .with("sender", Term::token(&*self.name))
            .with("receiver", Term::token(receiver));
        if wm_only {
            msg.set("wm-only?", Term::token("t"));
        }
        msg.set("content", to_term(data));
        self.send(&msg).await
    }

    /// Insert `fact` into microtheory `mt_name` via `ist-Information`.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn insert_to_microtheory(
        &self,
        receiver: &str,
        fact: &Value,
        mt_name: &str,
        wm_only: bool,
    ) -> Result<()> {
        let wrapped = Value::Seq(vec![
            Value::from("ist-Information"),
            Value::from(mt_name),
            fact.clone(),
        ]);
        self.insert_data(receiver, &wrapped, wm_only).await
    }

    /// Insert every fact of `facts` into microtheory `mt_name`, one message
    /// per fact. Stops at the first failed send.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn insert_microtheory(
        &self,
        receiver: &str,
        facts: &[Value],
        mt_name: &str,
        wm_only: bool,
    ) -> Result<()> {
        for fact in facts {
            self.insert_to_microtheory(receiver, fact, mt_name, wm_only)
                .await?;
        }
        Ok(())
    }

    /// Ask `receiver` to achieve `data`.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn achieve_on_agent(&self, receiver: &str, data: &Value) -> Result<()> {
        let msg = Performative::new("achieve")
            .with("sender", Term::token(&*self.name))
            .with("receiver", Term::token(receiver))
            .with("content", to_term(data));
        self.send(&msg).await
    }

    /// Advertise that this agent answers `ask-all` queries matching
    /// `pattern`. Returns the `reply-with` id used.
    ///
    /// # Errors
    ///
    /// See [`send_once`].
    pub async fn advertise(&self, pattern: &Term) -> Result<String> {
        let reply_id = self.next_reply_id();
        let ask = Performative::new("ask-all")
            .with("receiver", Term::token(&*self.name))
            .with("in-reply-to", Term::token(reply_id.clone()))
            .with("content", pattern.clone());
        let msg = Performative::new("advertise")
            .with("sender", Term::token(&*self.name))
            .with("receiver", Term::token(FACILITATOR))
            .with("reply-with", Term::token(reply_id.clone()))
            .with("content", ask.to_term());
        self.send(&msg).await?;
        Ok(reply_id)
    }

    /// Send and log instead of failing; used on paths where a lost reply
    /// must not stop the caller.
    pub async fn send_logged(&self, msg: &Performative) {
        if let Err(err) = self.send(msg).await {
            warn!(%err, verb = msg.verb(), "outbound send failed");
        }
    }
}
