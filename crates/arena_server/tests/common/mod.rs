#![allow(dead_code)]

use arena_server::content::http::content_router;
use arena_server::error::QueryError;
use arena_server::query::{GameQuery, Player, QueryKind, QueryResponse};
use arena_server::router::{HttpService, Matcher, Router};
use arena_server::ContentRpcService;
use async_trait::async_trait;
use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Scripted game server: records every console command and answers
/// queries with a fixed player list.
#[derive(Default)]
pub struct FakeGame {
    pub players: Vec<Player>,
    pub commands: Mutex<Vec<String>>,
    pub down: bool,
}

impl FakeGame {
    pub fn with_players(names: &[&str]) -> Self {
        Self {
            players: names
                .iter()
                .map(|name| Player {
                    name: name.to_string(),
                    score: 0,
                    ping: 50,
                })
                .collect(),
            ..Self::default()
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl GameQuery for FakeGame {
    async fn query(&self, kind: QueryKind, _timeout: Duration) -> Result<QueryResponse, QueryError> {
        if self.down {
            return Err(QueryError::Timeout(([127, 0, 0, 1], 27960).into(), Duration::from_secs(1)));
        }
        let mut response = QueryResponse::default();
        response.values.insert("mapname".into(), "q3dm17".into());
        if kind == QueryKind::Status {
            response.players = self.players.clone();
        }
        Ok(response)
    }

    async fn send_command(&self, _password: &str, command: &str) -> Result<String, QueryError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(String::new())
    }
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in files {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A content origin on an ephemeral port: RPC by preface, HTTP for the rest.
pub struct Origin {
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<Result<(), arena_server::RouterError>>,
}

impl Origin {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

pub async fn start_origin(root: PathBuf) -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();

    let mut router = Router::new(listener, cancel.clone());
    router
        .register("rpc", Arc::new(ContentRpcService::new(root.clone())))
        .matches(Matcher::rpc_preface());
    router
        .register("content", Arc::new(HttpService::new("content", content_router(root))))
        .any();

    let handle = tokio::spawn(router.serve_and_wait());
    Origin {
        addr,
        cancel,
        handle,
    }
}
