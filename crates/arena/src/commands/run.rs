//! `arena run`: game server, content, tunnel and web on one port.

use super::{bind, ensure_eula, game_query, prepare_assets, spawn_signal_handler, spawn_supervisor};
use crate::config::RunSettings;
use arena_server::content::http::content_router;
use arena_server::router::{HttpService, Matcher, Router};
use arena_server::{
    web_router, ContentRpcService, ServerMetrics, Supervisor, WebSocketUdpProxy, WebState,
};
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

    let root = settings.assets_dir();
    prepare_assets(&root, settings.seed_content_url.as_deref(), &cancel).await?;

    let listener = bind(&settings.client_addr)?;
    let tunnel = WebSocketUdpProxy::open(&settings.server_addr).await?;
    let rpc = ContentRpcService::new(root.clone()).with_health_check(game.clone());
    let web = WebState::new(game, metrics).with_process_state(supervisor.subscribe());

    let front = CancellationToken::new();
    let mut router = Router::new(listener, front.clone());
    router.register("rpc", Arc::new(rpc)).matches(Matcher::rpc_preface());
    router
        .register("content", Arc::new(HttpService::new("content", content_router(root))))
        .matches(Matcher::prefix("GET /assets/"));
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
