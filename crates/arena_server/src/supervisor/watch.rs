use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Polls the modification time of `path` every `period` and sends one
/// signal per newer timestamp. The send is awaited, so a change observed
/// while a reload is still pending waits for that reload to be picked up.
pub(crate) async fn watch_config(
    path: PathBuf,
    mut last_seen: SystemTime,
    period: Duration,
    reload: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let modified = match tokio::fs::metadata(&path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Cannot stat config file {}: {}", path.display(), e);
                continue;
            }
        };
        if modified <= last_seen {
            continue;
        }
        last_seen = modified;
        debug!("Config file {} changed", path.display());

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            sent = reload.send(()) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[tokio::test]
    async fn test_signals_once_per_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "frag_limit = 10").unwrap();
        let initial = std::fs::metadata(&path).unwrap().modified().unwrap();

        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_config(
            path.clone(),
            initial,
            Duration::from_millis(20),
            tx,
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(initial + Duration::from_secs(5))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap();
    }
}
