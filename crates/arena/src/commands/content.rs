//! `arena content`: standalone content server.

use super::{bind, prepare_assets, spawn_signal_handler};
use crate::config::ContentSettings;
use arena_server::content::http::content_router;
use arena_server::router::{HttpService, Matcher, Router};
use arena_server::ContentRpcService;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn execute(settings: &ContentSettings) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let signals = spawn_signal_handler(cancel.clone(), None);

    let root = PathBuf::from(&settings.assets_dir);
    prepare_assets(&root, settings.seed_content_url.as_deref(), &cancel).await?;

    let listener = bind(&settings.addr)?;
    let mut router = Router::new(listener, cancel.clone());
    router
        .register("rpc", Arc::new(ContentRpcService::new(root.clone())))
        .matches(Matcher::rpc_preface());
    router
        .register("content", Arc::new(HttpService::new("content", content_router(root))))
        .any();

    info!("📦 Serving content on {}", settings.addr);
    let served = router.serve_and_wait().await;
    signals.abort();
    Ok(served?)
}
