//! Supervisor life cycle against shell-script stand-ins for the engine.
#![cfg(unix)]

mod common;

use arena_server::supervisor::{server_cfg_path, ServerProcessState, Supervisor, SupervisorConfig};
use arena_server::{ServerMetrics, SupervisorError};
use common::FakeGame;
use std::fs::{File, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// Scripts are written and executed one test at a time so no concurrent
/// fork inherits a script that is still open for writing.
static SPAWN_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

const CONFIG: &str = r#"
[server]
hostname = "first"
password = "secret"
"#;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ioq3ded");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, Permissions::from_mode(0o755)).unwrap();
    path
}

/// Swaps in new config contents with a given modification time in one
/// rename, so the watcher never sees an intermediate state.
fn replace_config(path: &Path, contents: &str, modified: SystemTime) {
    let staged = path.with_extension("staged");
    std::fs::write(&staged, contents).unwrap();
    File::options()
        .write(true)
        .open(&staged)
        .unwrap()
        .set_modified(modified)
        .unwrap();
    std::fs::rename(&staged, path).unwrap();
}

fn starts(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("starts.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

async fn wait_for(what: &str, mut ready: impl FnMut() -> bool) {
    for _ in 0..500 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

fn supervisor(dir: &Path, executable: &Path, config_file: Option<PathBuf>) -> Arc<Supervisor> {
    let config = SupervisorConfig {
        addr: "127.0.0.1:0".to_string(),
        dir: dir.to_path_buf(),
        config_file,
        watch_interval: Duration::from_millis(100),
        executable: executable.to_string_lossy().into_owned(),
        ..SupervisorConfig::default()
    };
    Arc::new(Supervisor::new(
        config,
        Arc::new(FakeGame::default()),
        Arc::new(ServerMetrics::new()),
    ))
}

#[tokio::test]
async fn test_config_change_restarts_once() {
    let _guard = SPAWN_LOCK.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo \"$$\" >> starts.log\nexec sleep 600");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    let initial = std::fs::metadata(&config_path).unwrap().modified().unwrap();

    let supervisor = supervisor(dir.path(), &script, Some(config_path.clone()));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        async move { supervisor.start(cancel).await }
    });

    wait_for("first start", || starts(dir.path()) == 1).await;
    assert_eq!(supervisor.state(), ServerProcessState::Running);
    let rendered = std::fs::read_to_string(server_cfg_path(dir.path())).unwrap();
    assert!(rendered.contains("seta sv_hostname \"first\""));

    replace_config(
        &config_path,
        &CONFIG.replace("first", "second"),
        initial + Duration::from_secs(10),
    );

    wait_for("reload", || supervisor.reloads() == 1 && starts(dir.path()) == 2).await;
    let rendered = std::fs::read_to_string(server_cfg_path(dir.path())).unwrap();
    assert!(rendered.contains("seta sv_hostname \"second\""));
    assert_eq!(
        supervisor.snapshot().unwrap().config.server.hostname,
        "second"
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(supervisor.reloads(), 1);
    assert_eq!(starts(dir.path()), 2);

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(supervisor.state(), ServerProcessState::Stopped);
}

#[tokio::test]
async fn test_unparseable_reload_keeps_process() {
    let _guard = SPAWN_LOCK.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo \"$$\" >> starts.log\nexec sleep 600");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    let initial = std::fs::metadata(&config_path).unwrap().modified().unwrap();

    let supervisor = supervisor(dir.path(), &script, Some(config_path.clone()));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        async move { supervisor.start(cancel).await }
    });
    wait_for("first start", || starts(dir.path()) == 1).await;

    replace_config(
        &config_path,
        "frag_limit = \"many\"",
        initial + Duration::from_secs(10),
    );

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(supervisor.reloads(), 0);
    assert_eq!(starts(dir.path()), 1);
    assert_eq!(supervisor.state(), ServerProcessState::Running);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_crash_is_respawned_while_watching() {
    let _guard = SPAWN_LOCK.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo \"$$\" >> starts.log\nsleep 0.2\nexit 3");
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, CONFIG).unwrap();

    let supervisor = supervisor(dir.path(), &script, Some(config_path));
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        async move { supervisor.start(cancel).await }
    });

    wait_for("respawn", || supervisor.metrics().process_restarts() >= 1).await;
    assert!(starts(dir.path()) >= 2);

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(supervisor.state(), ServerProcessState::Stopped);
}

#[tokio::test]
async fn test_exit_without_watch_is_fatal() {
    let _guard = SPAWN_LOCK.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "exit 3");

    let supervisor = supervisor(dir.path(), &script, None);
    let result = supervisor.start(CancellationToken::new()).await;
    assert!(matches!(result, Err(SupervisorError::ProcessExited(_))));
    assert!(server_cfg_path(dir.path()).exists());
    assert_eq!(supervisor.state(), ServerProcessState::Crashed);
}

#[tokio::test]
async fn test_clean_exit_without_watch_is_stopped() {
    let _guard = SPAWN_LOCK.lock().await;
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "exit 0");

    let supervisor = supervisor(dir.path(), &script, None);
    supervisor.start(CancellationToken::new()).await.unwrap();
    assert_eq!(supervisor.state(), ServerProcessState::Stopped);
}

#[tokio::test]
async fn test_startup_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = supervisor(dir.path(), Path::new("/nonexistent/ioq3ded"), None);
    assert!(matches!(
        missing.start(CancellationToken::new()).await,
        Err(SupervisorError::ExecutableNotFound(_))
    ));

    let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let config = SupervisorConfig {
        addr: taken.local_addr().unwrap().to_string(),
        dir: dir.path().to_path_buf(),
        executable: "sh".to_string(),
        ..SupervisorConfig::default()
    };
    let busy = Supervisor::new(
        config,
        Arc::new(FakeGame::default()),
        Arc::new(ServerMetrics::new()),
    );
    assert!(matches!(
        busy.start(CancellationToken::new()).await,
        Err(SupervisorError::Bind { .. })
    ));

    let unreadable = supervisor(
        dir.path(),
        Path::new("/bin/sh"),
        Some(dir.path().join("missing.toml")),
    );
    assert!(matches!(
        unreadable.start(CancellationToken::new()).await,
        Err(SupervisorError::ConfigRead { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_drain_countdown_order() {
    let game = Arc::new(FakeGame::with_players(&["alice", "bob"]));
    let config = SupervisorConfig {
        shutdown_delay: Duration::from_secs(5),
        ..SupervisorConfig::default()
    };
    let supervisor = Supervisor::new(config, game.clone(), Arc::new(ServerMetrics::new()));

    let start = tokio::time::Instant::now();
    supervisor.graceful_stop().await;
    let elapsed = start.elapsed();

    assert_eq!(
        game.commands(),
        vec![
            "say SERVER WILL BE SHUTTING DOWN IN 5 SECONDS",
            "say 4",
            "say 3",
            "say 2",
            "say 1",
            "say GOODBYE",
            "kick alice",
            "kick bob",
        ]
    );
    assert!(elapsed >= Duration::from_secs(6));
    assert!(elapsed < Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_drain_disabled_without_delay() {
    let game = Arc::new(FakeGame::with_players(&["alice"]));
    let supervisor = Supervisor::new(
        SupervisorConfig::default(),
        game.clone(),
        Arc::new(ServerMetrics::new()),
    );
    supervisor.graceful_stop().await;
    assert!(game.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hard_stop_interrupts_drain() {
    let game = Arc::new(FakeGame::with_players(&["alice"]));
    let config = SupervisorConfig {
        shutdown_delay: Duration::from_secs(60),
        ..SupervisorConfig::default()
    };
    let supervisor = Supervisor::new(config, game.clone(), Arc::new(ServerMetrics::new()));

    let start = tokio::time::Instant::now();
    tokio::join!(supervisor.graceful_stop(), async {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        supervisor.hard_stop().unwrap();
    });

    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(
        game.commands(),
        vec![
            "say SERVER WILL BE SHUTTING DOWN IN 1 MINUTE",
            "say 59",
            "say 58",
        ]
    );
}
