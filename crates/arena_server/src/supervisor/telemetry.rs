use crate::metrics::ServerMetrics;
use crate::query::{GameQuery, QueryKind};
use crate::run;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub(crate) const TELEMETRY_INTERVAL: Duration = Duration::from_secs(5);
const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(2);

/// Copies player counts, scores and pings from status queries into
/// `metrics` until cancelled. Failed polls leave the gauges untouched.
pub(crate) async fn poll_telemetry(
    game: Arc<dyn GameQuery>,
    metrics: Arc<ServerMetrics>,
    cancel: CancellationToken,
) {
    run::until(TELEMETRY_INTERVAL, &cancel, || {
        let game = game.clone();
        let metrics = metrics.clone();
        async move {
            match game.query(QueryKind::Status, TELEMETRY_TIMEOUT).await {
                Ok(status) => metrics.record_status(status.get("mapname"), &status.players),
                Err(e) => warn!("Telemetry poll failed: {}", e),
            }
        }
    })
    .await;
}
