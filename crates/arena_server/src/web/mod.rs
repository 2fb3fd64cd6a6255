//! Client-facing HTTP surface: health, game info, metrics and the asset
//! proxy that lets browser clients fetch content through the front end.

use crate::content::http::{internal_error, pretty_json};
use crate::metrics::{render_state, ServerMetrics};
use crate::query::{GameQuery, QueryKind};
use crate::supervisor::ServerProcessState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

const QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Headers copied from the content server's response.
const PROXIED_HEADERS: [header::HeaderName; 5] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::LAST_MODIFIED,
    header::ETAG,
    header::CACHE_CONTROL,
];

#[derive(Clone)]
pub struct WebState {
    game: Arc<dyn GameQuery>,
    metrics: Arc<ServerMetrics>,
    process: Option<watch::Receiver<ServerProcessState>>,
    content: Option<ContentProxy>,
}

#[derive(Clone)]
struct ContentProxy {
    client: reqwest::Client,
    origin: String,
}

impl WebState {
    pub fn new(game: Arc<dyn GameQuery>, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            game,
            metrics,
            process: None,
            content: None,
        }
    }

    /// Reports the supervisor's process state on `/metrics`.
    pub fn with_process_state(mut self, process: watch::Receiver<ServerProcessState>) -> Self {
        self.process = Some(process);
        self
    }

    /// Forwards `/assets/*` to the content server at `origin`.
    pub fn with_content_proxy(mut self, client: reqwest::Client, origin: &str) -> Self {
        self.content = Some(ContentProxy {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        });
        self
    }
}

/// Routes:
///
/// * `GET /health` - `OK` when the game answers a status query
/// * `GET /info` - server info key/values
/// * `GET /status` - server configuration and connected players
/// * `GET /metrics` - Prometheus text
/// * `GET /assets/{*path}` - proxied to the content server, if configured
pub fn web_router(state: WebState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler));
    if state.content.is_some() {
        router = router.route("/assets/{*path}", get(assets_handler));
    }
    router
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT]),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<WebState>) -> Response {
    match state.game.query(QueryKind::Status, QUERY_TIMEOUT).await {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn info_handler(State(state): State<WebState>) -> Response {
    match state.game.query(QueryKind::Info, QUERY_TIMEOUT).await {
        Ok(info) => pretty_json(&info.values),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn status_handler(State(state): State<WebState>) -> Response {
    match state.game.query(QueryKind::Status, QUERY_TIMEOUT).await {
        Ok(status) => pretty_json(&status),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

async fn metrics_handler(State(state): State<WebState>) -> Response {
    let mut body = state.metrics.render();
    if let Some(process) = &state.process {
        let current = *process.borrow();
        let all: Vec<&str> = ServerProcessState::ALL.iter().map(|s| s.as_str()).collect();
        body.push_str(&render_state(current.as_str(), &all));
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

async fn assets_handler(State(state): State<WebState>, request: Request) -> Response {
    let Some(proxy) = state.content else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", proxy.origin, path_and_query);

    let upstream = match proxy.client.get(&url).send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("Asset proxy request to {} failed: {}", url, e);
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = HeaderMap::new();
    for name in PROXIED_HEADERS {
        if let Some(value) = upstream.headers().get(&name) {
            match header::HeaderValue::from_bytes(value.as_bytes()) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(e) => return internal_error(e),
            }
        }
    }
    let body = Body::from_stream(upstream.bytes_stream().map_err(std::io::Error::other));
    (status, headers, body).into_response()
}
