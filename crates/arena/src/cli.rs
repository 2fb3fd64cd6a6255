//! Command-line interface for the arena binary.
//!
//! Flags override values loaded from the configuration file; anything left
//! unset keeps the file's value.

use crate::config::AppConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "arena",
    version,
    about = "Hosts an arena game server, its content and a websocket tunnel behind one port"
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE", default_value = "arena.toml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the game server with content, tunnel and web on one port
    Run(RunArgs),
    /// Run the game server, mirroring content from a content server
    Server(RunArgs),
    /// Run a standalone content server
    Content(ContentArgs),
    /// Upload a map pack or archive to a content server
    Upload {
        /// File to upload
        file: PathBuf,
        /// Content server RPC address
        #[arg(long, default_value = "127.0.0.1:9090")]
        addr: String,
    },
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Address browsers and tunnel clients connect to
    #[arg(long, value_name = "ADDR")]
    pub client_addr: Option<String>,
    /// Address the game server process listens on
    #[arg(long, value_name = "ADDR")]
    pub server_addr: Option<String>,
    /// Content server URL used by `server`
    #[arg(long, value_name = "URL")]
    pub content_server: Option<String>,
    #[arg(long, value_name = "DIR")]
    pub assets_dir: Option<String>,
    /// Game config file, watched for changes
    #[arg(long, value_name = "FILE")]
    pub config_file: Option<String>,
    #[arg(long, value_name = "SECS")]
    pub watch_interval: Option<u64>,
    /// Seconds of warning before players are kicked on shutdown
    #[arg(long, value_name = "SECS")]
    pub shutdown_delay: Option<u64>,
    /// Mirror content from this URL before starting
    #[arg(long, value_name = "URL")]
    pub seed_content_url: Option<String>,
    /// Game server executable
    #[arg(long, value_name = "PATH")]
    pub executable: Option<String>,
    /// Agree to the game's end user license agreement
    #[arg(long)]
    pub agree_eula: bool,
}

#[derive(Debug, Default, Args)]
pub struct ContentArgs {
    #[arg(long, value_name = "ADDR")]
    pub addr: Option<String>,
    #[arg(long, value_name = "DIR")]
    pub assets_dir: Option<String>,
    #[arg(long, value_name = "URL")]
    pub seed_content_url: Option<String>,
}

impl Cli {
    /// Applies flag overrides on top of `config`.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }

        match &self.command {
            Command::Run(args) | Command::Server(args) => args.apply(config),
            Command::Content(args) => args.apply(config),
            Command::Upload { .. } => {}
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut AppConfig) {
        let run = &mut config.run;
        if let Some(v) = &self.client_addr {
            run.client_addr = v.clone();
        }
        if let Some(v) = &self.server_addr {
            run.server_addr = v.clone();
        }
        if let Some(v) = &self.content_server {
            run.content_server = v.clone();
        }
        if let Some(v) = &self.assets_dir {
            run.assets_dir = v.clone();
        }
        if let Some(v) = &self.config_file {
            run.server_config = Some(v.clone());
        }
        if let Some(v) = self.watch_interval {
            run.watch_interval_secs = v;
        }
        if let Some(v) = self.shutdown_delay {
            run.shutdown_delay_secs = v;
        }
        if let Some(v) = &self.seed_content_url {
            run.seed_content_url = Some(v.clone());
        }
        if let Some(v) = &self.executable {
            run.executable = v.clone();
        }
        if self.agree_eula {
            run.agree_eula = true;
        }
    }
}

impl ContentArgs {
    fn apply(&self, config: &mut AppConfig) {
        let content = &mut config.content;
        if let Some(v) = &self.addr {
            content.addr = v.clone();
        }
        if let Some(v) = &self.assets_dir {
            content.assets_dir = v.clone();
        }
        if let Some(v) = &self.seed_content_url {
            content.seed_content_url = Some(v.clone());
        }
    }
}
