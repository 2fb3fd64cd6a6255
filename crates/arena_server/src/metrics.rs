//! Game server telemetry.
//!
//! One [`ServerMetrics`] value is created per supervisor and shared with the
//! HTTP surface that renders it. Counters are atomics; labelled gauges live in
//! `DashMap`s so the telemetry poll and the reload path can update them from
//! different tasks.

use crate::query::Player;
use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ServerMetrics {
    active_players: AtomicI64,
    player_scores: DashMap<(String, String), i64>,
    player_pings: DashMap<String, i64>,
    config_reloads: AtomicU64,
    process_restarts: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the player gauges with the result of one status poll.
    ///
    /// Scores are only recorded when the map name is known.
    pub fn record_status(&self, map: Option<&str>, players: &[Player]) {
        self.active_players
            .store(players.len() as i64, Ordering::Relaxed);

        self.player_pings.clear();
        self.player_scores.clear();
        for player in players {
            if let Some(map) = map {
                self.player_scores
                    .insert((player.name.clone(), map.to_string()), player.score);
            }
            self.player_pings.insert(player.name.clone(), player.ping);
        }
    }

    pub fn inc_config_reloads(&self) {
        self.config_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_process_restarts(&self) {
        self.process_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_players(&self) -> i64 {
        self.active_players.load(Ordering::Relaxed)
    }

    pub fn config_reloads(&self) -> u64 {
        self.config_reloads.load(Ordering::Relaxed)
    }

    pub fn process_restarts(&self) -> u64 {
        self.process_restarts.load(Ordering::Relaxed)
    }

    pub fn player_score(&self, player: &str, map: &str) -> Option<i64> {
        self.player_scores
            .get(&(player.to_string(), map.to_string()))
            .map(|v| *v)
    }

    pub fn player_ping(&self, player: &str) -> Option<i64> {
        self.player_pings.get(player).map(|v| *v)
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        write_header(&mut out, "arena_active_players", "The current number of active players", "gauge");
        let _ = writeln!(out, "arena_active_players {}", self.active_players());

        write_header(&mut out, "arena_player_scores", "Current scores by player, by map", "gauge");
        let mut scores: Vec<_> = self
            .player_scores
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        scores.sort();
        for ((player, map), score) in scores {
            let _ = writeln!(
                out,
                "arena_player_scores{{player=\"{}\",map=\"{}\"}} {}",
                escape_label(&player),
                escape_label(&map),
                score
            );
        }

        write_header(&mut out, "arena_player_pings", "Current ping by player", "gauge");
        let mut pings: Vec<_> = self
            .player_pings
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        pings.sort();
        for (player, ping) in pings {
            let _ = writeln!(
                out,
                "arena_player_pings{{player=\"{}\"}} {}",
                escape_label(&player),
                ping
            );
        }

        write_header(&mut out, "arena_config_reloads", "Config file reload count", "counter");
        let _ = writeln!(out, "arena_config_reloads {}", self.config_reloads());

        write_header(&mut out, "arena_process_restarts", "Game server process restarts after a crash", "counter");
        let _ = writeln!(out, "arena_process_restarts {}", self.process_restarts());

        out
    }
}

/// Renders the supervisor state as a one-hot gauge.
pub fn render_state(current: &str, all: &[&str]) -> String {
    let mut out = String::new();
    write_header(&mut out, "arena_server_state", "Current game server process state", "gauge");
    for state in all {
        let _ = writeln!(
            out,
            "arena_server_state{{state=\"{}\"}} {}",
            state,
            u8::from(*state == current)
        );
    }
    out
}

fn write_header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str, score: i64, ping: i64) -> Player {
        Player {
            name: name.to_string(),
            score,
            ping,
        }
    }

    #[test]
    fn test_record_status_replaces_previous_poll() {
        let metrics = ServerMetrics::new();
        metrics.record_status(Some("q3dm17"), &[player("grunt", 12, 40), player("sarge", 3, 80)]);
        assert_eq!(metrics.active_players(), 2);
        assert_eq!(metrics.player_score("grunt", "q3dm17"), Some(12));
        assert_eq!(metrics.player_ping("sarge"), Some(80));

        metrics.record_status(Some("q3dm6"), &[player("grunt", 1, 35)]);
        assert_eq!(metrics.active_players(), 1);
        assert_eq!(metrics.player_score("grunt", "q3dm17"), None);
        assert_eq!(metrics.player_ping("sarge"), None);
    }

    #[test]
    fn test_scores_need_map_name() {
        let metrics = ServerMetrics::new();
        metrics.record_status(None, &[player("grunt", 12, 40)]);
        assert_eq!(metrics.player_score("grunt", ""), None);
        assert_eq!(metrics.player_ping("grunt"), Some(40));
    }

    #[test]
    fn test_render_exposition() {
        let metrics = ServerMetrics::new();
        metrics.record_status(Some("q3dm17"), &[player("the \"doctor\"", 5, 20)]);
        metrics.inc_config_reloads();
        metrics.inc_config_reloads();

        let text = metrics.render();
        assert!(text.contains("# TYPE arena_active_players gauge"));
        assert!(text.contains("arena_active_players 1\n"));
        assert!(text.contains(r#"arena_player_scores{player="the \"doctor\"",map="q3dm17"} 5"#));
        assert!(text.contains("arena_config_reloads 2\n"));
        assert!(text.contains("arena_process_restarts 0\n"));
    }

    #[test]
    fn test_render_state_one_hot() {
        let text = render_state("running", &["stopped", "running"]);
        assert!(text.contains("arena_server_state{state=\"stopped\"} 0"));
        assert!(text.contains("arena_server_state{state=\"running\"} 1"));
    }
}
