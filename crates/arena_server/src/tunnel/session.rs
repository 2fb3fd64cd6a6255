//! One websocket client bridged to one datagram socket.

use crate::error::TunnelError;
use crate::net::bind_datagram;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Client info probe sent by browser clients. Never forwarded.
pub const KEEPALIVE_PREFIX: &[u8] = b"\xff\xff\xff\xffport";

/// Deadline for handing one frame to the datagram socket.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Datagram receive buffer, both the read buffer and the socket's
/// `SO_RCVBUF` request.
pub const RECV_BUFFER: usize = 1024 * 1024;

const CLOSE_GRACE: Duration = Duration::from_secs(1);
const MAX_CLOSE_REASON: usize = 123;

/// Per-session counters, logged when the session ends.
#[derive(Debug, Default)]
pub struct SessionStats {
    pub frames_up: AtomicU64,
    pub datagrams_down: AtomicU64,
    pub keepalives_dropped: AtomicU64,
}

pub(crate) struct Session<S> {
    pub ws: WebSocketStream<S>,
    pub peer: SocketAddr,
    pub target: SocketAddr,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Pumps both directions until either fails or `cancel` fires, then
    /// closes the websocket and drops the datagram socket.
    ///
    /// The datagram socket stays unconnected so the session survives the
    /// game server restarting underneath it.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), TunnelError> {
        let udp = bind_datagram(self.target, RECV_BUFFER).map_err(TunnelError::Datagram)?;
        let udp = Arc::new(udp);

        let stats = Arc::new(SessionStats::default());
        let (sink, stream) = self.ws.split();
        let (err_tx, mut err_rx) = mpsc::channel::<TunnelError>(1);
        let (close_tx, close_rx) = oneshot::channel::<CloseFrame>();

        let mut pumps = JoinSet::new();
        let up = pumps.spawn(client_to_server(stream, udp.clone(), self.target, stats.clone(), err_tx.clone()));
        pumps.spawn(server_to_client(sink, udp, self.target, stats.clone(), close_rx, err_tx));

        let first = tokio::select! {
            _ = cancel.cancelled() => None,
            err = err_rx.recv() => err,
        };

        let frame = close_frame(first.as_ref());
        log_close(self.peer, first.as_ref());

        // The downstream pump owns the sink and sends the close frame.
        up.abort();
        let _ = close_tx.send(frame);
        let _ = tokio::time::timeout(CLOSE_GRACE, async {
            while pumps.join_next().await.is_some() {}
        })
        .await;
        pumps.abort_all();

        debug!(
            "Tunnel session {} ended: {} frames up, {} datagrams down, {} keepalives dropped",
            self.peer,
            stats.frames_up.load(Ordering::Relaxed),
            stats.datagrams_down.load(Ordering::Relaxed),
            stats.keepalives_dropped.load(Ordering::Relaxed),
        );

        match first {
            None => Ok(()),
            Some(TunnelError::Closed { code, .. }) if is_protocol_close(code) => Ok(()),
            Some(e) => Err(e),
        }
    }
}

async fn client_to_server<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    udp: Arc<UdpSocket>,
    target: SocketAddr,
    stats: Arc<SessionStats>,
    err_tx: mpsc::Sender<TunnelError>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let err = loop {
        let payload: Bytes = match stream.next().await {
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Some(Ok(Message::Close(frame))) => {
                break match frame {
                    Some(f) => TunnelError::Closed {
                        code: u16::from(f.code),
                        reason: f.reason.as_str().to_string(),
                    },
                    None => TunnelError::Closed {
                        code: u16::from(CloseCode::Status),
                        reason: String::new(),
                    },
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => break TunnelError::WebSocket(e),
            None => {
                break TunnelError::Closed {
                    code: u16::from(CloseCode::Abnormal),
                    reason: "connection dropped".to_string(),
                }
            }
        };

        if payload.starts_with(KEEPALIVE_PREFIX) {
            stats.keepalives_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        match tokio::time::timeout(SEND_TIMEOUT, udp.send_to(&payload, target)).await {
            Ok(Ok(_)) => {
                stats.frames_up.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) if is_peer_unreachable(&e) => {
                debug!("Game server {} unreachable: {}", target, e);
            }
            Ok(Err(e)) => break TunnelError::Datagram(e),
            Err(_) => break TunnelError::SendTimeout(SEND_TIMEOUT),
        }
    };
    let _ = err_tx.try_send(err);
}

async fn server_to_client<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    udp: Arc<UdpSocket>,
    target: SocketAddr,
    stats: Arc<SessionStats>,
    mut close_rx: oneshot::Receiver<CloseFrame>,
    err_tx: mpsc::Sender<TunnelError>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RECV_BUFFER];
    let failed = loop {
        tokio::select! {
            frame = &mut close_rx => {
                if let Ok(frame) = frame {
                    // Fails harmlessly when a close reply is already queued.
                    let _ = sink.send(Message::Close(Some(frame))).await;
                }
                let _ = sink.close().await;
                return;
            }
            received = udp.recv_from(&mut buf) => {
                let n = match received {
                    Ok((n, from)) if from == target => n,
                    Ok((_, from)) => {
                        debug!("Dropping datagram from unexpected peer {}", from);
                        continue;
                    }
                    Err(e) if is_peer_unreachable(&e) => continue,
                    Err(e) => break TunnelError::Datagram(e),
                };
                let msg = Message::Binary(Bytes::copy_from_slice(&buf[..n]));
                if let Err(e) = sink.send(msg).await {
                    break TunnelError::WebSocket(e);
                }
                stats.datagrams_down.fetch_add(1, Ordering::Relaxed);
            }
        }
    };
    let _ = err_tx.try_send(failed);

    if let Ok(frame) = close_rx.await {
        let _ = sink.send(Message::Close(Some(frame))).await;
    }
    let _ = sink.close().await;
}

/// Close frame sent to the client after the session's first error.
///
/// A client close is echoed with its own code unless it carried no status;
/// every other failure is reported as a normal close carrying the error text.
pub(crate) fn close_frame(first: Option<&TunnelError>) -> CloseFrame {
    match first {
        None => CloseFrame {
            code: CloseCode::Away,
            reason: "server shutting down".into(),
        },
        Some(TunnelError::Closed { code, reason })
            if *code != u16::from(CloseCode::Status) =>
        {
            CloseFrame {
                code: CloseCode::from(*code),
                reason: truncate_reason(reason).into(),
            }
        }
        Some(e) => CloseFrame {
            code: CloseCode::Normal,
            reason: truncate_reason(&e.to_string()).into(),
        },
    }
}

/// ICMP unreachable reports surfaced on the socket while the game server
/// is down (Windows reports them on unconnected sockets too).
fn is_peer_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

fn is_protocol_close(code: u16) -> bool {
    code != u16::from(CloseCode::Abnormal)
}

fn log_close(peer: SocketAddr, first: Option<&TunnelError>) {
    match first {
        None => debug!("Tunnel session {} cancelled", peer),
        Some(TunnelError::Closed { code, reason }) if is_protocol_close(*code) => {
            debug!("Tunnel session {} closed by client ({}): {}", peer, code, reason)
        }
        Some(e) => warn!("Tunnel session {} failed: {}", peer, e),
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
