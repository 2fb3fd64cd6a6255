use super::stream::SniffedStream;
use crate::error::RouterError;
use std::io;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) type Routed = (SniffedStream, SocketAddr);

/// The per-route side of the shared listening socket.
///
/// Yields only connections the router assigned to this route. Once the
/// router stops, [`RouteListener::accept`] returns
/// [`RouterError::ListenerClosed`].
#[derive(Debug)]
pub struct RouteListener {
    name: String,
    local_addr: SocketAddr,
    rx: mpsc::Receiver<Routed>,
    shutdown: CancellationToken,
}

impl RouteListener {
    pub(crate) fn new(
        name: String,
        local_addr: SocketAddr,
        rx: mpsc::Receiver<Routed>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name,
            local_addr,
            rx,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token cancelled when the router asks its handlers to stop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn accept(&mut self) -> Result<Routed, RouterError> {
        self.rx.recv().await.ok_or(RouterError::ListenerClosed)
    }
}

impl axum::serve::Listener for RouteListener {
    type Io = SniffedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(conn) => conn,
            // axum has no way to stop on a closed listener; it stops through
            // its graceful shutdown signal instead.
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}
