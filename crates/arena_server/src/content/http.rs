//! HTTP surface of a content origin.

use super::{read_manifest, read_maps, safe_join, trim_asset_name};
use crate::error::ContentError;
use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
struct ContentState {
    root: Arc<PathBuf>,
}

/// Routes:
///
/// * `GET /assets/manifest.json` - manifest of `root`, pretty printed
/// * `GET /assets/{*path}` - one asset, addressed with or without its
///   checksum prefix
/// * `GET /maps` - maps found in the map packs under `root`
pub fn content_router(root: PathBuf) -> Router {
    Router::new()
        .route("/assets/manifest.json", get(manifest_handler))
        .route("/assets/{*path}", get(asset_handler))
        .route("/maps", get(maps_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT]),
        )
        .with_state(ContentState {
            root: Arc::new(root),
        })
}

async fn manifest_handler(State(state): State<ContentState>) -> Response {
    let root = state.root.clone();
    match tokio::task::spawn_blocking(move || read_manifest(&root)).await {
        Ok(Ok(manifest)) => pretty_json(&manifest),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(e),
    }
}

async fn maps_handler(State(state): State<ContentState>) -> Response {
    let root = state.root.clone();
    match tokio::task::spawn_blocking(move || read_maps(&root)).await {
        Ok(Ok(maps)) => pretty_json(&maps),
        Ok(Err(e)) => internal_error(e),
        Err(e) => internal_error(e),
    }
}

async fn asset_handler(
    State(state): State<ContentState>,
    UrlPath(address): UrlPath<String>,
) -> Response {
    let not_found = || (StatusCode::NOT_FOUND, "file not found").into_response();

    let path = match safe_join(&state.root, &trim_asset_name(&address)) {
        Ok(path) => path,
        Err(ContentError::InvalidName(_)) => return not_found(),
        Err(e) => return internal_error(e),
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return not_found(),
        Err(e) => return internal_error(ContentError::io(&path, e)),
    };
    let len = match file.metadata().await {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return not_found(),
        Err(e) => return internal_error(ContentError::io(&path, e)),
    };

    let mut resp = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    resp
}

pub(crate) fn pretty_json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_string_pretty(value) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

pub(crate) fn internal_error<E: std::fmt::Display>(e: E) -> Response {
    error!("Content request failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}
