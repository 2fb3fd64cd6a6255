//! Subcommand implementations and the wiring they share.

pub mod content;
pub mod run;
pub mod server;
pub mod upload;

use crate::config::RunSettings;
use crate::signals::handle_signals;
use anyhow::{anyhow, bail, Context};
use arena_server::content::download_assets;
use arena_server::net::{bind_listener, parse_listen_addr};
use arena_server::{GameQuery, Supervisor, UdpQueryClient};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// License terms of the game data the supervised server runs.
pub const EULA: &str = include_str!("EULA.txt");

/// Refuses to start the game server without an explicit EULA agreement,
/// printing the agreement so the operator can read what they accept.
pub fn ensure_eula(settings: &RunSettings) -> anyhow::Result<()> {
    if !settings.agree_eula {
        println!("{EULA}");
        bail!("You must agree to the EULA to continue (--agree-eula)");
    }
    Ok(())
}

pub fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let sock_addr = parse_listen_addr(addr).map_err(|e| anyhow!("Invalid address {addr:?}: {e}"))?;
    bind_listener(sock_addr).with_context(|| format!("Failed to listen on {sock_addr}"))
}

/// Query client for the game server at `addr`.
pub fn game_query(addr: &str) -> anyhow::Result<Arc<dyn GameQuery>> {
    let sock_addr = parse_listen_addr(addr).map_err(|e| anyhow!("Invalid address {addr:?}: {e}"))?;
    Ok(Arc::new(UdpQueryClient::new(sock_addr)))
}

/// Creates `root` and optionally mirrors `seed` into it.
pub async fn prepare_assets(
    root: &Path,
    seed: Option<&str>,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("Failed to create assets directory {}", root.display()))?;

    if let Some(seed) = seed {
        mirror(seed, root, cancel).await?;
    }
    Ok(())
}

/// Downloads every asset of `origin` missing under `root`.
pub async fn mirror(origin: &str, root: &Path, cancel: &CancellationToken) -> anyhow::Result<()> {
    let client = arena_server::net::http_client()?;
    info!("🔄 Syncing content from {}", origin);
    let report = tokio::select! {
        result = download_assets(&client, origin, root) => result?,
        _ = cancel.cancelled() => bail!("Interrupted while syncing content from {origin}"),
    };
    info!(
        "✅ Content synced: {} downloaded, {} already present, {} extracted",
        report.downloaded.len(),
        report.skipped,
        report.extracted.len()
    );
    Ok(())
}

/// Spawns the signal handler. A second signal kills the game server's
/// process group when one is supervised.
pub fn spawn_signal_handler(
    cancel: CancellationToken,
    supervisor: Option<Arc<Supervisor>>,
) -> JoinHandle<()> {
    tokio::spawn(handle_signals(cancel, move || {
        if let Some(supervisor) = supervisor {
            if let Err(e) = supervisor.hard_stop() {
                error!("Failed to stop game server: {}", e);
            }
        }
    }))
}

/// Runs the supervisor until `root` is cancelled or the game server stops
/// for good, then cancels `front`.
///
/// The front end outlives the game server so tunnel clients still receive
/// the shutdown countdown.
pub fn spawn_supervisor(
    supervisor: Arc<Supervisor>,
    root: CancellationToken,
    front: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let result = supervisor.start(root.clone()).await;
        if let Err(e) = &result {
            error!("❌ Game server stopped: {}", e);
        }
        root.cancel();
        front.cancel();
        result.map_err(Into::into)
    })
}
