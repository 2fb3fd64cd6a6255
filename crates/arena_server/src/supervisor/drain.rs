//! Player-visible countdown before the game server is stopped.

use crate::query::{GameQuery, QueryKind};
use std::time::Duration;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{info, warn};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);
const STATUS_TIMEOUT: Duration = Duration::from_secs(1);
const FAREWELL_LINGER: Duration = Duration::from_secs(1);

/// Warns connected players, counts down once per second, then says
/// goodbye and kicks everyone still connected.
///
/// With a delay of `D` seconds the countdown says `D-1` down to `1`; the
/// farewell is sent at `D`. Undeliverable commands are logged and skipped.
pub async fn drain(game: &dyn GameQuery, password: &str, delay: Duration) {
    let start = Instant::now();
    let deadline = start + delay;
    info!("⏳ Draining game server for {}", humanize(delay));

    say(
        game,
        password,
        &format!(
            "SERVER WILL BE SHUTTING DOWN IN {}",
            humanize(delay).to_uppercase()
        ),
    )
    .await;

    let mut ticker = interval_at(start + COUNTDOWN_TICK, COUNTDOWN_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    for remaining in (1..delay.as_secs()).rev() {
        ticker.tick().await;
        say(game, password, &remaining.to_string()).await;
    }
    sleep_until(deadline).await;

    say(game, password, "GOODBYE").await;
    match game.query(QueryKind::Status, STATUS_TIMEOUT).await {
        Ok(status) => {
            for player in &status.players {
                send(game, password, &format!("kick {}", player.name)).await;
            }
        }
        Err(e) => warn!("Cannot list players to kick: {}", e),
    }

    sleep(FAREWELL_LINGER).await;
}

async fn say(game: &dyn GameQuery, password: &str, message: &str) {
    send(game, password, &format!("say {message}")).await;
}

async fn send(game: &dyn GameQuery, password: &str, command: &str) {
    if let Err(e) = game.send_command(password, command).await {
        warn!("Drain command {:?} failed: {}", command, e);
    }
}

/// Formats a duration as e.g. `1 minute 30 seconds`.
pub fn humanize(duration: Duration) -> String {
    const UNITS: [(u64, &str); 4] = [(86_400, "day"), (3_600, "hour"), (60, "minute"), (1, "second")];

    let mut secs = duration.as_secs();
    let mut parts = Vec::new();
    for (size, unit) in UNITS {
        let n = secs / size;
        secs %= size;
        if n > 0 {
            let plural = if n == 1 { "" } else { "s" };
            parts.push(format!("{n} {unit}{plural}"));
        }
    }
    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(" ")
    }
}
