//! Interface to the game process's query port.
//!
//! The supervisor, the health checks and the client-facing HTTP surface only
//! ever talk to the game through [`GameQuery`], so tests can substitute a
//! scripted implementation.

mod udp;

pub use udp::UdpQueryClient;

use crate::error::QueryError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Which query to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Server info key/value pairs.
    Info,
    /// Server configuration plus the connected player list.
    Status,
}

/// One connected player as reported by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Player {
    pub name: String,
    pub score: i64,
    pub ping: i64,
}

/// Parsed query reply. `players` is empty for [`QueryKind::Info`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    #[serde(rename = "configuration")]
    pub values: BTreeMap<String, String>,
    pub players: Vec<Player>,
}

impl QueryResponse {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

#[async_trait]
pub trait GameQuery: Send + Sync {
    /// Sends one query and waits at most `timeout` for the reply.
    async fn query(&self, kind: QueryKind, timeout: Duration) -> Result<QueryResponse, QueryError>;

    /// Sends a remote console command and returns the server's reply text.
    async fn send_command(&self, password: &str, command: &str) -> Result<String, QueryError>;
}
