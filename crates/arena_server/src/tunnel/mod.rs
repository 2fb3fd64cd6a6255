//! Websocket to UDP bridge for browser game clients.
//!
//! Every upgraded websocket connection gets its own ephemeral UDP socket
//! that talks to the game server. Binary and text frames are forwarded as
//! datagrams and every datagram from the game server is sent back as one
//! binary frame, in order, without batching.

mod session;

pub use session::{SessionStats, KEEPALIVE_PREFIX, RECV_BUFFER, SEND_TIMEOUT};

use crate::error::{RouterError, TunnelError};
use crate::net::{resolve_loopback, split_host_port};
use crate::router::{RouteListener, Service, SniffedStream};
use async_trait::async_trait;
use session::Session;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tracing::{debug, info, warn};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_DRAIN: Duration = Duration::from_secs(2);

/// Bridges websocket clients to a single UDP game server.
#[derive(Debug, Clone)]
pub struct WebSocketUdpProxy {
    target: SocketAddr,
}

impl WebSocketUdpProxy {
    /// Resolves `target` (`host:port`) once. An unspecified host such as
    /// `0.0.0.0` is replaced with loopback, keeping the port.
    pub async fn open(target: &str) -> Result<Self, TunnelError> {
        let (host, port) = split_host_port(target)
            .map_err(|e| TunnelError::InvalidTarget(target.to_string(), e))?;
        let host = if host.is_empty() { "0.0.0.0" } else { host.as_str() };

        let resolved = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TunnelError::Resolve(target.to_string(), e))?
            .next()
            .ok_or_else(|| {
                TunnelError::InvalidTarget(target.to_string(), "no addresses found".to_string())
            })?;

        let target = resolve_loopback(resolved);
        info!("🌉 Tunnel forwarding websocket clients to {}", target);
        Ok(Self { target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    async fn handshake(
        &self,
        stream: SniffedStream,
    ) -> Result<tokio_tungstenite::WebSocketStream<SniffedStream>, TunnelError> {
        let echo_protocol = |req: &Request, mut resp: Response| {
            if let Some(protocol) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                resp.headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
            }
            Ok::<Response, ErrorResponse>(resp)
        };

        match tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::accept_hdr_async(stream, echo_protocol),
        )
        .await
        {
            Ok(result) => result.map_err(TunnelError::Handshake),
            Err(_) => Err(TunnelError::Handshake(
                tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "handshake timed out",
                )),
            )),
        }
    }
}

#[async_trait]
impl Service for WebSocketUdpProxy {
    async fn serve(&self, mut listener: RouteListener) -> Result<(), RouterError> {
        let shutdown = listener.shutdown_token();
        let mut sessions = JoinSet::new();

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => break Err(e),
                    };
                    let proxy = self.clone();
                    let cancel = shutdown.child_token();
                    sessions.spawn(async move {
                        let ws = match proxy.handshake(stream).await {
                            Ok(ws) => ws,
                            Err(e) => {
                                warn!("Tunnel handshake with {} failed: {}", peer, e);
                                return;
                            }
                        };
                        debug!("Tunnel session opened for {}", peer);
                        let session = Session { ws, peer, target: proxy.target };
                        // Closures and failures are logged by the session.
                        let _ = session.run(cancel).await;
                    });
                }
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        };

        // Cancelled sessions still get to send their close frames.
        if shutdown.is_cancelled() && !sessions.is_empty() {
            debug!("Closing {} tunnel session(s)", sessions.len());
            let _ = tokio::time::timeout(SESSION_DRAIN, async {
                while sessions.join_next().await.is_some() {}
            })
            .await;
        }
        sessions.shutdown().await;
        result
    }
}
