//! Life cycle of the external game server process.
//!
//! [`Supervisor::start`] owns the process for as long as it runs. With a
//! config file it also watches that file, re-renders `server.cfg` and
//! restarts the process on every change, polls telemetry and respawns the
//! process after a crash. On cancellation it drains connected players
//! (when a shutdown delay is configured) and kills the process group.

mod drain;
mod game_config;
mod process;
mod state;
mod telemetry;
mod watch;

pub use drain::{drain, humanize};
pub use game_config::{
    server_cfg_path, write_server_cfg, BotConfig, ConfigSnapshot, GameConfig, GameSettings,
    GameType, MapEntry, ServerSettings,
};
pub use process::{kill_group, resolve_executable, ManagedProcess, ProcessGroup, ProcessSpec};
pub use state::ServerProcessState;

use crate::error::SupervisorError;
use crate::metrics::ServerMetrics;
use crate::net::{parse_listen_addr, split_host_port};
use crate::query::GameQuery;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch as state_watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_GAME_ADDR: &str = "0.0.0.0:27960";
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_EXECUTABLE: &str = "ioq3ded";
const CRASH_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Address the game server listens on, `host:port`.
    pub addr: String,
    /// Content directory, used as the engine's home path.
    pub dir: PathBuf,
    /// Game config file to render and watch. Without one a default config
    /// is rendered once and nothing is watched.
    pub config_file: Option<PathBuf>,
    pub watch_interval: Duration,
    /// Length of the player drain on shutdown, zero disables it.
    pub shutdown_delay: Duration,
    /// Program name looked up on `PATH`, or a path.
    pub executable: String,
    /// Respawn the process when it exits on its own while watched.
    pub restart_on_crash: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_GAME_ADDR.to_string(),
            dir: PathBuf::from("."),
            config_file: None,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            shutdown_delay: Duration::ZERO,
            executable: DEFAULT_EXECUTABLE.to_string(),
            restart_on_crash: true,
        }
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    game: Arc<dyn GameQuery>,
    metrics: Arc<ServerMetrics>,
    state: state_watch::Sender<ServerProcessState>,
    snapshot: state_watch::Sender<Option<Arc<ConfigSnapshot>>>,
    group: ProcessGroup,
    /// Cancelled by [`Supervisor::hard_stop`] to cut a running drain short.
    force: CancellationToken,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, game: Arc<dyn GameQuery>, metrics: Arc<ServerMetrics>) -> Self {
        let (state, _) = state_watch::channel(ServerProcessState::Stopped);
        let (snapshot, _) = state_watch::channel(None);
        Self {
            config,
            game,
            metrics,
            state,
            snapshot,
            group: ProcessGroup::default(),
            force: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    pub fn state(&self) -> ServerProcessState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> state_watch::Receiver<ServerProcessState> {
        self.state.subscribe()
    }

    /// The config most recently applied, if a config file is in use.
    pub fn snapshot(&self) -> Option<Arc<ConfigSnapshot>> {
        self.snapshot.borrow().clone()
    }

    pub fn reloads(&self) -> u64 {
        self.metrics.config_reloads()
    }

    fn set_state(&self, state: ServerProcessState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("🎮 Game server {} -> {}", previous, state);
        }
    }

    /// Runs the game server until it exits or `cancel` fires.
    ///
    /// Configuration problems (bad address, missing executable, unreadable
    /// config, address in use) fail before anything is spawned.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), SupervisorError> {
        let addr = &self.config.addr;
        let (host, port) = split_host_port(addr)
            .map_err(|reason| SupervisorError::InvalidAddress(addr.clone(), reason))?;
        let program = resolve_executable(&self.config.executable)?;
        check_bind(addr)?;

        let spec = ProcessSpec::engine(program, &host, port, &self.config.dir);
        match self.config.config_file.clone() {
            Some(path) => self.supervise(path, spec, cancel).await,
            None => self.run_once(spec, cancel).await,
        }
    }

    async fn run_once(&self, spec: ProcessSpec, cancel: CancellationToken) -> Result<(), SupervisorError> {
        write_server_cfg(&self.config.dir, &GameConfig::default())?;

        self.set_state(ServerProcessState::Starting);
        let mut process = ManagedProcess::spawn(spec, self.group.clone())?;
        self.set_state(ServerProcessState::Running);

        tokio::select! {
            status = process.wait() => {
                let status = match status {
                    Ok(status) => status,
                    Err(e) => {
                        self.set_state(ServerProcessState::Crashed);
                        return Err(e);
                    }
                };
                if status.success() {
                    self.set_state(ServerProcessState::Stopped);
                    Ok(())
                } else {
                    error!("💥 Game server exited unexpectedly: {}", status);
                    self.set_state(ServerProcessState::Crashed);
                    Err(SupervisorError::ProcessExited(status.to_string()))
                }
            }
            _ = cancel.cancelled() => self.shutdown(&mut process).await,
        }
    }

    async fn supervise(
        &self,
        path: PathBuf,
        spec: ProcessSpec,
        cancel: CancellationToken,
    ) -> Result<(), SupervisorError> {
        let snapshot = ConfigSnapshot::load(&path)?;
        write_server_cfg(&self.config.dir, &snapshot.config)?;
        let last_seen = snapshot.modified;
        self.snapshot.send_replace(Some(Arc::new(snapshot)));

        self.set_state(ServerProcessState::Starting);
        let mut process = ManagedProcess::spawn(spec, self.group.clone())?;
        self.set_state(ServerProcessState::Running);

        let (reload_tx, mut reload_rx) = mpsc::channel(1);
        let mut tasks = JoinSet::new();
        tasks.spawn(watch::watch_config(
            path.clone(),
            last_seen,
            self.config.watch_interval,
            reload_tx,
            cancel.child_token(),
        ));
        tasks.spawn(telemetry::poll_telemetry(
            self.game.clone(),
            self.metrics.clone(),
            cancel.child_token(),
        ));

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break self.shutdown(&mut process).await,
                Some(()) = reload_rx.recv() => {
                    if let Err(e) = self.reload(&path, &mut process).await {
                        break Err(e);
                    }
                }
                status = process.wait() => {
                    let status = match status {
                        Ok(status) => status.to_string(),
                        Err(e) => break Err(e),
                    };
                    if !self.config.restart_on_crash {
                        self.set_state(ServerProcessState::Crashed);
                        break Err(SupervisorError::ProcessExited(status));
                    }
                    error!("💥 Game server exited unexpectedly: {}", status);
                    self.set_state(ServerProcessState::Crashed);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.set_state(ServerProcessState::Stopped);
                            break Ok(());
                        }
                        _ = tokio::time::sleep(CRASH_BACKOFF) => {}
                    }
                    self.set_state(ServerProcessState::Starting);
                    if let Err(e) = process.respawn().await {
                        self.set_state(ServerProcessState::Stopped);
                        break Err(e);
                    }
                    self.metrics.inc_process_restarts();
                    self.set_state(ServerProcessState::Running);
                }
            }
        };

        tasks.shutdown().await;
        result
    }

    /// Re-renders the config and restarts the process. A config that no
    /// longer parses is logged and the running process is left alone.
    async fn reload(&self, path: &Path, process: &mut ManagedProcess) -> Result<(), SupervisorError> {
        self.set_state(ServerProcessState::Reloading);
        let snapshot = match ConfigSnapshot::load(path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Keeping current game config: {}", e);
                self.set_state(ServerProcessState::Running);
                return Ok(());
            }
        };
        write_server_cfg(&self.config.dir, &snapshot.config)?;
        self.snapshot.send_replace(Some(Arc::new(snapshot)));

        process.respawn().await?;
        self.metrics.inc_config_reloads();
        info!("🔄 Reloaded game config from {}", path.display());
        self.set_state(ServerProcessState::Running);
        Ok(())
    }

    async fn shutdown(&self, process: &mut ManagedProcess) -> Result<(), SupervisorError> {
        self.set_state(ServerProcessState::Draining);
        self.graceful_stop().await;
        let result = process.kill().await;
        self.set_state(ServerProcessState::Stopped);
        result
    }

    /// Drains connected players for the configured shutdown delay. Does
    /// nothing when no delay is set.
    pub async fn graceful_stop(&self) {
        let delay = self.config.shutdown_delay;
        if delay.is_zero() {
            return;
        }
        let password = self
            .snapshot()
            .map(|s| s.config.server.password.clone())
            .unwrap_or_default();
        tokio::select! {
            _ = drain(self.game.as_ref(), &password, delay) => {}
            _ = self.force.cancelled() => warn!("Player drain interrupted"),
        }
    }

    /// Kills the game server's process group right away and ends any drain
    /// in progress.
    pub fn hard_stop(&self) -> Result<(), SupervisorError> {
        self.force.cancel();
        if let Some(pgid) = self.group.get() {
            warn!("🛑 Killing game server process group {}", pgid);
        }
        kill_group(&self.group)
    }
}

fn check_bind(addr: &str) -> Result<(), SupervisorError> {
    let bind_err = |source| SupervisorError::Bind {
        addr: addr.to_string(),
        source,
    };
    let sock_addr = parse_listen_addr(addr).map_err(|reason| {
        bind_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, reason))
    })?;
    std::net::UdpSocket::bind(sock_addr).map(drop).map_err(bind_err)
}
