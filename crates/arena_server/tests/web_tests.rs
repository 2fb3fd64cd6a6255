mod common;

use arena_server::query::Player;
use arena_server::router::{HttpService, Router};
use arena_server::supervisor::ServerProcessState;
use arena_server::{web_router, ServerMetrics, WebState};
use common::{start_origin, FakeGame};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

async fn get_json(url: String) -> serde_json::Value {
    let body = reqwest::get(url).await.unwrap().text().await.unwrap();
    serde_json::from_str(&body).unwrap()
}

async fn serve(state: WebState) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();
    let mut router = Router::new(listener, cancel.clone());
    router
        .register("web", Arc::new(HttpService::new("web", web_router(state))))
        .any();
    tokio::spawn(router.serve());
    (addr, cancel)
}

#[tokio::test]
async fn test_health_info_and_status() {
    let game = Arc::new(FakeGame::with_players(&["alice"]));
    let (addr, cancel) = serve(WebState::new(game, Arc::new(ServerMetrics::new()))).await;

    let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let info: serde_json::Value = get_json(format!("http://{addr}/info")).await;
    assert_eq!(info["mapname"], "q3dm17");

    let status: serde_json::Value = get_json(format!("http://{addr}/status")).await;
    assert_eq!(status["players"][0]["name"], "alice");
    assert_eq!(status["configuration"]["mapname"], "q3dm17");

    cancel.cancel();
}

#[tokio::test]
async fn test_health_reports_unreachable_game() {
    let game = Arc::new(FakeGame {
        down: true,
        ..FakeGame::default()
    });
    let (addr, cancel) = serve(WebState::new(game, Arc::new(ServerMetrics::new()))).await;

    let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(health.status(), 503);

    cancel.cancel();
}

#[tokio::test]
async fn test_metrics_include_process_state() {
    let metrics = Arc::new(ServerMetrics::new());
    metrics.record_status(
        Some("q3dm17"),
        &[Player {
            name: "alice".into(),
            score: 12,
            ping: 40,
        }],
    );
    metrics.inc_config_reloads();
    let (_state_tx, state_rx) = watch::channel(ServerProcessState::Running);
    let state = WebState::new(Arc::new(FakeGame::default()), metrics).with_process_state(state_rx);
    let (addr, cancel) = serve(state).await;

    let body = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("arena_active_players 1"));
    assert!(body.contains("arena_config_reloads 1"));
    assert!(body.contains("arena_server_state{state=\"running\"} 1"));
    assert!(body.contains("arena_server_state{state=\"draining\"} 0"));

    cancel.cancel();
}

#[tokio::test]
async fn test_assets_are_proxied_to_content_server() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("baseq3")).unwrap();
    std::fs::write(root.path().join("baseq3/pak0.pk3"), b"base pak").unwrap();
    let origin = start_origin(root.path().to_path_buf()).await;

    let state = WebState::new(Arc::new(FakeGame::default()), Arc::new(ServerMetrics::new()))
        .with_content_proxy(reqwest::Client::new(), &origin.url());
    let (addr, cancel) = serve(state).await;

    let manifest: serde_json::Value = get_json(format!("http://{addr}/assets/manifest.json")).await;
    assert_eq!(manifest[0]["name"], "baseq3/pak0.pk3");

    let pak = reqwest::get(format!("http://{addr}/assets/baseq3/pak0.pk3"))
        .await
        .unwrap();
    assert_eq!(pak.status(), 200);
    assert_eq!(pak.bytes().await.unwrap().as_ref(), b"base pak");

    let missing = reqwest::get(format!("http://{addr}/assets/baseq3/nope.pk3"))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    cancel.cancel();
    origin.stop().await;
}
