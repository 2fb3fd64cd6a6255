//! `arena server`: game server fed by a separate content server.

use super::{bind, ensure_eula, game_query, mirror, spawn_signal_handler, spawn_supervisor};
use crate::config::RunSettings;
use anyhow::Context;
use arena_server::content::{wait_until_reachable, MANIFEST_PATH};
use arena_server::net::http_client;
use arena_server::router::{HttpService, Matcher, Router};
use arena_server::{web_router, ServerMetrics, Supervisor, WebSocketUdpProxy, WebState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn execute(settings: &RunSettings) -> anyhow::Result<()> {
    ensure_eula(settings)?;

    let cancel = CancellationToken::new();
    let game = game_query(&settings.server_addr)?;
    let metrics = Arc::new(ServerMetrics::new());
    let supervisor = Arc::new(Supervisor::new(
        settings.to_supervisor_config(),
        game.clone(),
        metrics.clone(),
    ));
    let signals = spawn_signal_handler(cancel.clone(), Some(supervisor.clone()));

    let origin = settings.content_server.trim_end_matches('/');
    let client = http_client()?;
    let manifest_url = format!("{origin}{MANIFEST_PATH}");
    info!("⏳ Waiting for content server {}", origin);
    wait_until_reachable(&client, &manifest_url, &cancel).await?;

    let root = settings.assets_dir();
    tokio::fs::create_dir_all(&root)
        .await
        .with_context(|| format!("Failed to create assets directory {}", root.display()))?;
    mirror(origin, &root, &cancel).await?;

    let listener = bind(&settings.client_addr)?;
    let tunnel = WebSocketUdpProxy::open(&settings.server_addr).await?;
    let web = WebState::new(game, metrics)
        .with_process_state(supervisor.subscribe())
        .with_content_proxy(client, origin);

    let front = CancellationToken::new();
    let mut router = Router::new(listener, front.clone());
    router.register("tunnel", Arc::new(tunnel)).matches(Matcher::websocket());
    router
        .register("web", Arc::new(HttpService::new("web", web_router(web))))
        .any();

    let supervised = spawn_supervisor(supervisor, cancel.clone(), front);
    info!("🚀 Serving clients on {}", settings.client_addr);

    let served = router.serve_and_wait().await;
    cancel.cancel();
    let supervised = supervised.await?;
    signals.abort();

    served?;
    supervised
}
