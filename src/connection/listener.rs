//! Inbound listening socket.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info};

use crate::config::is_valid_port;
use crate::{AppError, Result};

/// Pending-connection backlog requested from the OS.
pub const LISTEN_BACKLOG: u32 = 10;

/// A bound, listening socket on all IPv4 interfaces.
#[derive(Debug)]
pub struct ListenerHandle {
    inner: TcpListener,
    port: u16,
}

impl ListenerHandle {
    /// Port the socket is bound to.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the next inbound connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` when the OS reports an accept failure.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        Ok(self.inner.accept().await?)
    }

    /// Stop listening. Connections already accepted are unaffected.
    pub fn close(self) {
        debug!(port = self.port, "listener closed");
        drop(self.inner);
    }
}

/// Bind and listen on `listener_port` with address reuse enabled.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `AppError::Bind` if the port is outside the allowed range, already
/// in use, or the socket cannot be created.
pub fn open_listener(listener_port: u16) -> Result<ListenerHandle> {
    if !is_valid_port(listener_port) {
        return Err(AppError::Bind(format!(
            "listener port {listener_port} outside 1025..=65534"
        )));
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], listener_port));
    let bind_err = |err: std::io::Error| AppError::Bind(format!("{addr}: {err}"));

    let socket = TcpSocket::new_v4().map_err(bind_err)?;
    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    let inner = socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

    info!(port = listener_port, "listening for kqml messages");
    Ok(ListenerHandle {
        inner,
        port: listener_port,
    })
}
