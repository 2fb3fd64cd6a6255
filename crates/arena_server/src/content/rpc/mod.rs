//! Binary RPC surface of a content origin.
//!
//! A client opens a TCP connection, sends [`PREFACE`] so the router can tell
//! it apart from HTTP, then exchanges one request frame for one response
//! frame until it disconnects.

mod wire;

pub use wire::{read_frame, write_frame, DEFAULT_MAX_FRAME_LEN};

use super::{read_manifest, store_upload, ManifestEntry, UploadResponse};
use crate::error::{ContentError, RouterError, RpcError};
use crate::query::{GameQuery, QueryKind};
use crate::router::{RouteListener, Service, SniffedStream};
use crate::run;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// First bytes sent by every RPC client.
pub const PREFACE: &[u8] = b"ARENA-RPC/1\n";

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    Upload { name: String, data: Vec<u8> },
    GetManifest,
    Health,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    Uploaded(UploadResponse),
    Manifest(Vec<ManifestEntry>),
    Health { serving: bool },
    Error(String),
}

/// Serves uploads, manifests and health over the RPC protocol.
#[derive(Clone)]
pub struct ContentRpcService {
    root: Arc<PathBuf>,
    game: Option<Arc<dyn GameQuery>>,
    serving: Arc<AtomicBool>,
    max_frame_len: usize,
}

impl ContentRpcService {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: Arc::new(root),
            game: None,
            serving: Arc::new(AtomicBool::new(true)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Caps the size of one request, and with it the largest upload.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Reports health from periodic info queries against `game`.
    pub fn with_health_check(mut self, game: Arc<dyn GameQuery>) -> Self {
        self.game = Some(game);
        self
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::Relaxed)
    }

    async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let root = self.root.clone();
        let result = match request {
            RpcRequest::Upload { name, data } => {
                info!("📤 Upload {} ({} bytes)", name, data.len());
                blocking(move || store_upload(&root, &name, &data))
                    .await
                    .map(RpcResponse::Uploaded)
            }
            RpcRequest::GetManifest => blocking(move || read_manifest(&root))
                .await
                .map(RpcResponse::Manifest),
            RpcRequest::Health => Ok(RpcResponse::Health {
                serving: self.is_serving(),
            }),
        };
        result.unwrap_or_else(|e| {
            warn!("RPC request failed: {}", e);
            RpcResponse::Error(e.to_string())
        })
    }

    async fn serve_connection(
        self,
        mut stream: SniffedStream,
        peer: SocketAddr,
    ) -> Result<(), RpcError> {
        let mut preface = [0u8; PREFACE.len()];
        stream.read_exact(&mut preface).await?;
        if &preface[..] != PREFACE {
            return Err(RpcError::Preface);
        }

        while let Some(request) = read_frame::<_, RpcRequest>(&mut stream, self.max_frame_len).await? {
            let response = self.handle(request).await;
            write_frame(&mut stream, &response).await?;
        }
        debug!("RPC client {} disconnected", peer);
        Ok(())
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ContentError>
where
    F: FnOnce() -> Result<T, ContentError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ContentError::io(PathBuf::new(), std::io::Error::other(e)))?
}

#[async_trait]
impl Service for ContentRpcService {
    async fn serve(&self, mut listener: RouteListener) -> Result<(), RouterError> {
        let shutdown = listener.shutdown_token();
        let mut tasks = JoinSet::new();

        if let Some(game) = self.game.clone() {
            let serving = self.serving.clone();
            let cancel = shutdown.clone();
            tasks.spawn(async move {
                run::until(HEALTH_CHECK_INTERVAL, &cancel, || {
                    let game = game.clone();
                    let serving = serving.clone();
                    async move {
                        match game.query(QueryKind::Info, HEALTH_CHECK_TIMEOUT).await {
                            Ok(_) => serving.store(true, Ordering::Relaxed),
                            Err(e) => {
                                warn!("Game server unhealthy: {}", e);
                                serving.store(false, Ordering::Relaxed);
                            }
                        }
                    }
                })
                .await;
            });
        }

        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => break Err(e),
                    };
                    let service = self.clone();
                    tasks.spawn(async move {
                        if let Err(e) = service.serve_connection(stream, peer).await {
                            warn!("RPC connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };

        tasks.shutdown().await;
        result
    }
}

/// Client side of the content RPC protocol.
pub struct RpcClient {
    stream: TcpStream,
}

impl RpcClient {
    /// Connects to `addr` (`host:port`; an empty host means localhost) and
    /// sends the preface.
    pub async fn connect(addr: &str) -> Result<Self, RpcError> {
        let target = match addr.strip_prefix(':') {
            Some(port) => format!("127.0.0.1:{port}"),
            None => addr.to_string(),
        };
        let mut stream = TcpStream::connect(&target).await?;
        stream.set_nodelay(true)?;
        stream.write_all(PREFACE).await?;
        Ok(Self { stream })
    }

    pub async fn call(&mut self, request: &RpcRequest) -> Result<RpcResponse, RpcError> {
        write_frame(&mut self.stream, request).await?;
        match read_frame(&mut self.stream, DEFAULT_MAX_FRAME_LEN).await? {
            Some(RpcResponse::Error(msg)) => Err(RpcError::Remote(msg)),
            Some(response) => Ok(response),
            None => Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            ))),
        }
    }

    pub async fn upload(&mut self, name: &str, data: Vec<u8>) -> Result<UploadResponse, RpcError> {
        let request = RpcRequest::Upload {
            name: name.to_string(),
            data,
        };
        match self.call(&request).await? {
            RpcResponse::Uploaded(resp) => Ok(resp),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub async fn manifest(&mut self) -> Result<Vec<ManifestEntry>, RpcError> {
        match self.call(&RpcRequest::GetManifest).await? {
            RpcResponse::Manifest(entries) => Ok(entries),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }

    pub async fn health(&mut self) -> Result<bool, RpcError> {
        match self.call(&RpcRequest::Health).await? {
            RpcResponse::Health { serving } => Ok(serving),
            _ => Err(RpcError::UnexpectedResponse),
        }
    }
}
