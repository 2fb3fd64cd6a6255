//! Error types for the arena server components.
//!
//! Each component owns one error enum so callers can tell a configuration
//! problem (fatal at startup) from a transient network failure or a
//! protocol/data error that only aborts the current operation.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the single-port connection router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A route was registered but never given a matcher.
    #[error("match not defined for route: {0}")]
    MissingMatcher(String),

    /// A route follows a catch-all route and can never be selected.
    #[error("route {0} is registered after a catch-all route and can never match")]
    UnreachableRoute(String),

    /// The router stopped dispatching connections to this route.
    #[error("listener closed")]
    ListenerClosed,

    /// Accepting from the shared listening socket failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// A route's service failed while serving.
    #[error("service {name} failed: {source}")]
    Service {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RouterError {
    /// Wraps any service failure with the name of the route that produced it.
    pub fn service<E>(name: &str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Service {
            name: name.to_string(),
            source: source.into(),
        }
    }
}

/// Errors produced by the websocket to datagram tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("invalid tunnel target {0:?}: {1}")]
    InvalidTarget(String, String),

    #[error("cannot resolve tunnel target {0:?}: {1}")]
    Resolve(String, #[source] io::Error),

    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[source] tokio_tungstenite::tungstenite::Error),

    /// The client closed the websocket with a close frame.
    #[error("websocket closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("datagram socket error: {0}")]
    Datagram(#[source] io::Error),

    #[error("datagram send timed out after {0:?}")]
    SendTimeout(std::time::Duration),
}

/// Errors produced by the game server process supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("invalid listen address {0:?}: {1}")]
    InvalidAddress(String, String),

    #[error("executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("cannot bind game server address {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot write config file {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot stop game server process: {0}")]
    Kill(#[source] io::Error),

    #[error("game server process exited: {0}")]
    ProcessExited(String),
}

/// Errors produced while reading, serving or mirroring game content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("cannot get url {url:?}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot get url {url:?}: {status}")]
    Status { url: String, status: String },

    #[error("not available: {0:?}")]
    Unavailable(String),

    #[error("cannot unmarshal manifest from {url}: {source}")]
    Manifest {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot extract archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("File {0} did not contain any map pack files.")]
    NoMapPacks(String),

    #[error("invalid upload name {0:?}")]
    InvalidName(String),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ContentError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors produced by the game query collaborator.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query socket error: {0}")]
    Io(#[from] io::Error),

    #[error("no response from {0} within {1:?}")]
    Timeout(std::net::SocketAddr, std::time::Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("command rejected: {0}")]
    Rejected(String),
}

/// Errors produced by the content RPC surface.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc io error: {0}")]
    Io(#[from] io::Error),

    #[error("rpc encode error: {0}")]
    Encode(#[source] bincode::Error),

    #[error("rpc decode error: {0}")]
    Decode(#[source] bincode::Error),

    #[error("rpc frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("rpc preface mismatch")]
    Preface,

    #[error("unexpected rpc response")]
    UnexpectedResponse,

    #[error("remote error: {0}")]
    Remote(String),
}
