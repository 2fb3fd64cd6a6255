//! Configuration management for the arena front end.
//!
//! Settings are loaded from a TOML file (written out with defaults when it
//! does not exist yet), overridden by command-line flags and validated
//! before any component starts.

use arena_server::net::parse_listen_addr;
use arena_server::supervisor::SupervisorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_client_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_server_addr() -> String {
    arena_server::supervisor::DEFAULT_GAME_ADDR.to_string()
}

fn default_content_server() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_content_addr() -> String {
    ":9090".to_string()
}

fn default_assets_dir() -> String {
    "assets".to_string()
}

fn default_watch_interval_secs() -> u64 {
    15
}

fn default_shutdown_delay_secs() -> u64 {
    60
}

fn default_executable() -> String {
    arena_server::supervisor::DEFAULT_EXECUTABLE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub content: ContentSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Settings shared by `arena run` and `arena server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Single port for browsers, tunnels and (with `run`) content.
    #[serde(default = "default_client_addr")]
    pub client_addr: String,
    /// Address the game server process listens on.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Content origin used by `arena server`.
    #[serde(default = "default_content_server")]
    pub content_server: String,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    /// Game config file to render and watch.
    #[serde(default)]
    pub server_config: Option<String>,
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
    /// Player drain before shutdown, 0 disables.
    #[serde(default = "default_shutdown_delay_secs")]
    pub shutdown_delay_secs: u64,
    #[serde(default)]
    pub seed_content_url: Option<String>,
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default)]
    pub agree_eula: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            client_addr: default_client_addr(),
            server_addr: default_server_addr(),
            content_server: default_content_server(),
            assets_dir: default_assets_dir(),
            server_config: None,
            watch_interval_secs: default_watch_interval_secs(),
            shutdown_delay_secs: default_shutdown_delay_secs(),
            seed_content_url: None,
            executable: default_executable(),
            agree_eula: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSettings {
    #[serde(default = "default_content_addr")]
    pub addr: String,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
    #[serde(default)]
    pub seed_content_url: Option<String>,
}

impl Default for ContentSettings {
    fn default() -> Self {
        Self {
            addr: default_content_addr(),
            assets_dir: default_assets_dir(),
            seed_content_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads `path`, or writes the defaults there when it does not exist.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if tokio::fs::try_exists(path).await? {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, addr) in [
            ("client address", &self.run.client_addr),
            ("server address", &self.run.server_addr),
            ("content address", &self.content.addr),
        ] {
            parse_listen_addr(addr).map_err(|e| format!("Invalid {name} {addr:?}: {e}"))?;
        }

        let urls = [
            Some(&self.run.content_server),
            self.run.seed_content_url.as_ref(),
            self.content.seed_content_url.as_ref(),
        ];
        for url in urls.into_iter().flatten() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("Invalid content URL: {url}"));
            }
        }

        if self.run.watch_interval_secs == 0 {
            return Err("watch_interval_secs must be greater than zero".to_string());
        }
        if self.run.assets_dir.is_empty() || self.content.assets_dir.is_empty() {
            return Err("Assets directory cannot be empty".to_string());
        }
        if self.run.executable.is_empty() {
            return Err("Executable cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

impl RunSettings {
    pub fn assets_dir(&self) -> PathBuf {
        PathBuf::from(&self.assets_dir)
    }

    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            addr: self.server_addr.clone(),
            dir: self.assets_dir(),
            config_file: self.server_config.as_ref().map(PathBuf::from),
            watch_interval: Duration::from_secs(self.watch_interval_secs),
            shutdown_delay: Duration::from_secs(self.shutdown_delay_secs),
            executable: self.executable.clone(),
            restart_on_crash: true,
        }
    }
}
