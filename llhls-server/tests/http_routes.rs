//! HTTP route tests for the LL-HLS server.
//!
//! Requests go through the full router with `tower::ServiceExt::oneshot`;
//! sources are created and fed directly through the registry.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use llhls_muxer::{CodecParameters, LiveSource, MuxerConfig, Packet, SourceRegistry, VideoCodecType};
use llhls_server::{create_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn create_test_app() -> (Router, Arc<SourceRegistry>) {
    let registry = Arc::new(SourceRegistry::new(MuxerConfig::default()));
    let app = create_router(AppState::new(Arc::clone(&registry)));
    (app, registry)
}

/// Write packets `range` with a keyframe every 100 packets.
fn feed(source: &LiveSource, range: std::ops::Range<usize>) {
    for i in range {
        let payload = Bytes::from(vec![0x41, (i % 256) as u8]);
        let packet = Packet::new(i % 100 == 0, Duration::from_millis(40), payload);
        source.muxer().write_packet(packet).unwrap();
    }
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_to_string(response: axum::response::Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_lists_sources() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");
    feed(&source, 0..12);

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body_to_string(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["sources"][0]["source_id"], "lobby");
    assert_eq!(json["sources"][0]["current_part"], 2);
}

#[tokio::test]
async fn test_index_unknown_source_is_not_found() {
    let (app, _registry) = create_test_app();

    let response = get(&app, "/play/hls/missing/index.m3u8").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json: serde_json::Value = serde_json::from_str(&body_to_string(response).await).unwrap();
    assert_eq!(json["status"], 404);
    assert_eq!(json["error"], "Source not found: missing");
}

#[tokio::test]
async fn test_index_without_query_is_immediate() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");
    feed(&source, 0..7);

    let response = get(&app, "/play/hls/lobby/index.m3u8").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let playlist = body_to_string(response).await;
    assert!(playlist.starts_with("#EXTM3U\n"));
    assert!(playlist.contains("fragment/0/0/lobby.0.0.m4s"));
}

#[tokio::test]
async fn test_malformed_reload_query_is_ignored() {
    let (app, registry) = create_test_app();
    registry.new_instance("lobby");

    let response = get(&app, "/play/hls/lobby/index.m3u8?_HLS_msn=abc&_HLS_part=x").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blocking_reload_returns_once_part_is_published() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");
    feed(&source, 0..3);

    let request = {
        let app = app.clone();
        tokio::spawn(async move { get(&app, "/play/hls/lobby/index.m3u8?_HLS_msn=0&_HLS_part=1").await })
    };
    while source.muxer().index_session_count() == 0 {
        tokio::task::yield_now().await;
    }

    feed(&source, 3..10);

    let response = request.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let playlist = body_to_string(response).await;
    assert!(playlist.contains("#EXT-X-PART:DURATION=0.20000,URI=\"fragment/0/1/lobby.0.1.m4s\""));
    assert_eq!(source.muxer().index_session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_blocking_reload_timeout_is_unavailable() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");

    let response = get(&app, "/play/hls/lobby/index.m3u8?_HLS_msn=999&_HLS_part=0").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(source.muxer().index_session_count(), 0);
}

#[tokio::test]
async fn test_closed_source_is_gone() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");
    source.muxer().close();

    let response = get(&app, "/play/hls/lobby/index.m3u8").await;
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn test_segment_route() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");
    feed(&source, 0..3);

    let response = get(&app, "/play/hls/lobby/segment/0/lobby.0.m4s").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/octet-stream"
    );
    assert_eq!(
        &body_bytes(response).await[..],
        &[0, 0, 0, 1, 0x41, 0, 0, 0, 0, 1, 0x41, 1, 0, 0, 0, 1, 0x41, 2]
    );

    let response = get(&app, "/play/hls/lobby/segment/5/lobby.5.m4s").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&app, "/play/hls/lobby/segment/abc/lobby.abc.m4s").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fragment_route_waits_for_open_part() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");
    feed(&source, 0..7);

    let response = get(&app, "/play/hls/lobby/fragment/0/0/lobby.0.0.m4s").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), 5 * 6);

    let request = {
        let app = app.clone();
        tokio::spawn(async move { get(&app, "/play/hls/lobby/fragment/0/1/lobby.0.1.m4s").await })
    };
    while source.muxer().fragment_session_count() == 0 {
        tokio::task::yield_now().await;
    }
    feed(&source, 7..10);

    let response = request.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), 5 * 6);

    let response = get(&app, "/play/hls/lobby/fragment/0/9/lobby.0.9.m4s").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_init_requires_codec_parameters() {
    let (app, registry) = create_test_app();
    let source = registry.new_instance("lobby");

    let response = get(&app, "/play/hls/lobby/init.mp4").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    source.set_codec_parameters(CodecParameters::new(
        VideoCodecType::H264,
        vec![Bytes::from_static(&[0x67]), Bytes::from_static(&[0x68])],
    ));

    let response = get(&app, "/play/hls/lobby/init.mp4").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(&body_bytes(response).await[..], &[0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x68]);
}

#[tokio::test]
async fn test_cors_headers() {
    let (app, registry) = create_test_app();
    registry.new_instance("lobby");

    let response = app
        .oneshot(
            Request::get("/play/hls/lobby/index.m3u8")
                .header(header::ORIGIN, "https://player.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
