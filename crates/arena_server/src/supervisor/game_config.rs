//! Game server configuration and its rendering into the engine's
//! `server.cfg` script.

use crate::error::SupervisorError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Game modes understood by the engine, rendered as `g_gametype`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameType {
    #[default]
    FreeForAll,
    Tournament,
    SinglePlayer,
    TeamDeathmatch,
    CaptureTheFlag,
}

impl GameType {
    pub fn code(self) -> u8 {
        match self {
            Self::FreeForAll => 0,
            Self::Tournament => 1,
            Self::SinglePlayer => 2,
            Self::TeamDeathmatch => 3,
            Self::CaptureTheFlag => 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub min_players: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSettings {
    #[serde(rename = "type")]
    pub game_type: GameType,
    pub motd: String,
    pub force_respawn: bool,
    /// Seconds before an idle player is kicked, 0 disables.
    pub inactivity: u32,
    pub quad_factor: u32,
    pub weapon_respawn: u32,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            game_type: GameType::FreeForAll,
            motd: "Welcome to the arena".to_string(),
            force_respawn: false,
            inactivity: 600,
            quad_factor: 3,
            weapon_respawn: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub hostname: String,
    pub max_clients: u32,
    /// Remote console password, also used for drain notifications.
    pub password: String,
    /// Password required to join, empty for a public server.
    pub join_password: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            hostname: "arena".to_string(),
            max_clients: 12,
            password: String::new(),
            join_password: String::new(),
        }
    }
}

/// One entry of the map rotation. Unset limits fall back to the global ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapEntry {
    pub name: String,
    #[serde(rename = "type", default)]
    pub game_type: GameType,
    #[serde(default)]
    pub capture_limit: Option<u32>,
    #[serde(default)]
    pub frag_limit: Option<u32>,
    /// Minutes.
    #[serde(default)]
    pub time_limit: Option<u32>,
}

/// Structured game server configuration, read from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub frag_limit: u32,
    /// Minutes.
    pub time_limit: u32,
    pub bot: BotConfig,
    pub game: GameSettings,
    pub server: ServerSettings,
    /// Console commands appended verbatim.
    pub commands: Vec<String>,
    pub maps: Vec<MapEntry>,
}

impl Default for GameConfig {
    fn default() -> Self {
        let map = |name: &str, game_type| MapEntry {
            name: name.to_string(),
            game_type,
            capture_limit: None,
            frag_limit: None,
            time_limit: None,
        };
        Self {
            frag_limit: 25,
            time_limit: 15,
            bot: BotConfig::default(),
            game: GameSettings::default(),
            server: ServerSettings::default(),
            commands: Vec::new(),
            maps: vec![
                map("q3dm7", GameType::FreeForAll),
                map("q3dm17", GameType::FreeForAll),
                map("q3tourney2", GameType::Tournament),
            ],
        }
    }
}

impl GameConfig {
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Renders the engine script executed with `+exec server.cfg`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut seta = |key: &str, value: String| {
            let _ = writeln!(out, "seta {key} {value}");
        };

        seta("sv_hostname", quote(&self.server.hostname));
        seta("sv_maxclients", self.server.max_clients.to_string());
        seta("g_password", quote(&self.server.join_password));
        seta("g_motd", quote(&self.game.motd));
        seta("g_forcerespawn", u8::from(self.game.force_respawn).to_string());
        seta("g_inactivity", self.game.inactivity.to_string());
        seta("g_quadfactor", self.game.quad_factor.to_string());
        seta("g_weaponrespawn", self.game.weapon_respawn.to_string());
        seta("g_gametype", self.game.game_type.code().to_string());
        seta("bot_minplayers", self.bot.min_players.to_string());
        seta("fraglimit", self.frag_limit.to_string());
        seta("timelimit", self.time_limit.to_string());
        if !self.server.password.is_empty() {
            seta("rconpassword", quote(&self.server.password));
        }

        for command in &self.commands {
            let _ = writeln!(out, "{command}");
        }

        if !self.maps.is_empty() {
            let count = self.maps.len();
            for (i, map) in self.maps.iter().enumerate() {
                let mut steps = vec![format!("set g_gametype {}", map.game_type.code())];
                steps.push(format!("set fraglimit {}", map.frag_limit.unwrap_or(self.frag_limit)));
                steps.push(format!("set timelimit {}", map.time_limit.unwrap_or(self.time_limit)));
                if let Some(limit) = map.capture_limit {
                    steps.push(format!("set capturelimit {limit}"));
                }
                steps.push(format!("map {}", map.name));
                steps.push(format!("set nextmap vstr d{}", (i + 1) % count));
                let _ = writeln!(out, "set d{i} \"{}\"", steps.join(" ; "));
            }
            let _ = writeln!(out, "vstr d0");
        }
        out
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "'"))
}

/// A parsed config file together with the modification time it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub modified: SystemTime,
    pub config: GameConfig,
}

impl ConfigSnapshot {
    pub fn load(path: &Path) -> Result<Self, SupervisorError> {
        let read_err = |source| SupervisorError::ConfigRead {
            path: path.to_path_buf(),
            source,
        };
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(read_err)?;
        let text = std::fs::read_to_string(path).map_err(read_err)?;
        let config = GameConfig::parse(&text).map_err(|source| SupervisorError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { modified, config })
    }
}

/// Path of the rendered engine script inside the content directory.
pub fn server_cfg_path(dir: &Path) -> PathBuf {
    dir.join("baseq3").join("server.cfg")
}

pub fn write_server_cfg(dir: &Path, config: &GameConfig) -> Result<(), SupervisorError> {
    let path = server_cfg_path(dir);
    let write_err = |source| SupervisorError::ConfigWrite {
        path: path.clone(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(&path, config.render()).map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
frag_limit = 30
time_limit = 20
commands = ["addbot crash 1"]

[bot]
min_players = 2

[game]
type = "FreeForAll"
motd = "Frag responsibly"

[server]
hostname = "arena-1"
max_clients = 8
password = "changeme"

[[maps]]
name = "q3dm17"

[[maps]]
name = "q3wctf1"
type = "CaptureTheFlag"
capture_limit = 8
time_limit = 10
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = GameConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.frag_limit, 30);
        assert_eq!(config.server.password, "changeme");
        assert_eq!(config.server.join_password, "");
        assert_eq!(config.game.quad_factor, 3);
        assert_eq!(config.maps[1].game_type, GameType::CaptureTheFlag);
        assert_eq!(config.maps[0].game_type, GameType::FreeForAll);
    }

    #[test]
    fn test_render_settings_and_rotation() {
        let rendered = GameConfig::parse(SAMPLE).unwrap().render();
        assert!(rendered.contains("seta sv_hostname \"arena-1\"\n"));
        assert!(rendered.contains("seta sv_maxclients 8\n"));
        assert!(rendered.contains("seta g_motd \"Frag responsibly\"\n"));
        assert!(rendered.contains("seta bot_minplayers 2\n"));
        assert!(rendered.contains("seta rconpassword \"changeme\"\n"));
        assert!(rendered.contains("addbot crash 1\n"));
        assert!(rendered.contains(
            "set d0 \"set g_gametype 0 ; set fraglimit 30 ; set timelimit 20 ; map q3dm17 ; set nextmap vstr d1\"\n"
        ));
        assert!(rendered.contains(
            "set d1 \"set g_gametype 4 ; set fraglimit 30 ; set timelimit 10 ; set capturelimit 8 ; map q3wctf1 ; set nextmap vstr d0\"\n"
        ));
        assert!(rendered.ends_with("vstr d0\n"));
    }

    #[test]
    fn test_no_rcon_password_without_password() {
        let rendered = GameConfig::default().render();
        assert!(!rendered.contains("rconpassword"));
        assert!(rendered.contains("vstr d0"));
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "frag_limit = \"lots\"").unwrap();
        assert!(matches!(
            ConfigSnapshot::load(&path),
            Err(SupervisorError::ConfigParse { .. })
        ));
        assert!(matches!(
            ConfigSnapshot::load(&dir.path().join("missing.toml")),
            Err(SupervisorError::ConfigRead { .. })
        ));
    }

    #[test]
    fn test_write_server_cfg_creates_game_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_server_cfg(dir.path(), &GameConfig::default()).unwrap();
        let text = std::fs::read_to_string(server_cfg_path(dir.path())).unwrap();
        assert!(text.starts_with("seta sv_hostname"));
    }
}
