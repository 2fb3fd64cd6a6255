//! Periodic task helper.

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Runs `task` every `period` until `cancel` fires.
///
/// The first run happens one full period after the call. A slow run delays
/// the next tick instead of bursting to catch up, and the loop never starts
/// a new run once cancellation is observed.
pub async fn until<F, Fut>(period: Duration, cancel: &CancellationToken, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => task().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_until_runs_each_period() {
        let cancel = CancellationToken::new();
        let count = Arc::new(AtomicUsize::new(0));

        let handle = {
            let cancel = cancel.clone();
            let count = count.clone();
            tokio::spawn(async move {
                until(Duration::from_secs(5), &cancel, || {
                    let count = count.clone();
                    async move {
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10_200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();
    }
}
