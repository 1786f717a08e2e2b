//! LL-HLS HTTP routes.
//!
//! Handlers translate path and query parameters into muxer lookups and map
//! [`MuxerError`](llhls_muxer::MuxerError) kinds onto status codes. Blocking
//! reloads and part requests wait inside the muxer, bounded by its timeouts.

pub mod error;

use axum::{
    extract::{Path, Query, State},
    http::{header, Method},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use llhls_muxer::{MuxerStats, SourceRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::container::{ContainerWriter, RawContainerWriter};

pub use error::{AppError, AppResult};

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SourceRegistry>,
    pub writer: Arc<dyn ContainerWriter>,
}

impl AppState {
    #[must_use]
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self {
            registry,
            writer: Arc::new(RawContainerWriter),
        }
    }

    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn ContainerWriter>) -> Self {
        self.writer = writer;
        self
    }
}

/// `_HLS_msn` / `_HLS_part` query parameters.
///
/// Missing or malformed values are treated as absent, which is `-1`.
#[derive(Debug, Default, Deserialize)]
pub struct BlockingReload {
    #[serde(rename = "_HLS_msn")]
    msn: Option<String>,
    #[serde(rename = "_HLS_part")]
    part: Option<String>,
}

impl BlockingReload {
    fn parse(value: Option<&str>) -> i64 {
        value
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v >= 0)
            .unwrap_or(-1)
    }

    #[must_use]
    pub fn msn(&self) -> i64 {
        Self::parse(self.msn.as_deref())
    }

    #[must_use]
    pub fn part(&self) -> i64 {
        Self::parse(self.part.as_deref())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sources: Vec<MuxerStats>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/play/hls/{source}/index.m3u8", get(serve_index))
        .route("/play/hls/{source}/init.mp4", get(serve_init))
        .route("/play/hls/{source}/segment/{sequence}/{file}", get(serve_segment))
        .route(
            "/play/hls/{source}/fragment/{sequence}/{index}/{file}",
            get(serve_fragment),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sources: state.registry.list(),
    })
}

/// Serve the playlist, blocking while `_HLS_msn`/`_HLS_part` is not published yet.
async fn serve_index(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
    Query(reload): Query<BlockingReload>,
) -> AppResult<Response> {
    let source = state.registry.get(&source_id)?;
    let playlist = source
        .muxer()
        .wait_index(reload.msn(), reload.part())
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Bytes::copy_from_slice(playlist.as_bytes()),
    )
        .into_response())
}

async fn serve_init(
    State(state): State<AppState>,
    Path(source_id): Path<String>,
) -> AppResult<Response> {
    let source = state.registry.get(&source_id)?;
    let codec = source
        .codec_parameters()
        .ok_or_else(|| AppError::service_unavailable("Codec parameters not available yet"))?;
    let body = state.writer.init_segment(&codec)?;

    Ok(media_response(state.writer.content_type(), body))
}

async fn serve_segment(
    State(state): State<AppState>,
    Path((source_id, sequence, _file)): Path<(String, u64, String)>,
) -> AppResult<Response> {
    let source = state.registry.get(&source_id)?;
    let packets = source.muxer().segment(sequence)?;
    let body = state.writer.media_segment(sequence, &packets)?;

    Ok(media_response(state.writer.content_type(), body))
}

/// Serve a part, waiting for it to finish if it is still being written.
async fn serve_fragment(
    State(state): State<AppState>,
    Path((source_id, sequence, index, _file)): Path<(String, u64, usize, String)>,
) -> AppResult<Response> {
    let source = state.registry.get(&source_id)?;
    let packets = source.muxer().wait_fragment(sequence, index).await?;
    let body = state.writer.media_segment(sequence, &packets)?;

    Ok(media_response(state.writer.content_type(), body))
}

fn media_response(content_type: &'static str, body: Bytes) -> Response {
    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}
