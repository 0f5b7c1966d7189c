#![forbid(unsafe_code)]

// Signaling module - WebSocket signaling plus the HTTP broadcaster API

pub mod channel;
pub mod connection;
pub mod protocol;

pub use channel::{NewConsumer, Notification, PeerChannel, ServerRequest, SignalingError};

use crate::metrics::ServerMetrics;
use crate::room::{api, CodecFlags, RoomOptions, RoomRegistry};
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// WebSocket frames larger than this are refused
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Signaling server state
#[derive(Clone)]
pub struct SignalingServer {
    registry: Arc<RoomRegistry>,
    metrics: ServerMetrics,
    connection_semaphore: Arc<Semaphore>,
}

impl SignalingServer {
    pub fn new(registry: Arc<RoomRegistry>, metrics: ServerMetrics, max_connections: usize) -> Self {
        info!("Max connections: {}", max_connections);
        Self {
            registry,
            metrics,
            connection_semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    pub fn room_registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Creates the Axum router for the signaling server
    pub fn router(self) -> Router {
        let broadcaster = "/rooms/{roomId}/broadcasters/{broadcasterId}";
        let transport = "/rooms/{roomId}/broadcasters/{broadcasterId}/transports/{transportId}";

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/rooms/{roomId}", get(api::get_room_capabilities))
            .route("/rooms/{roomId}/broadcasters", post(api::create_broadcaster))
            .route(broadcaster, delete(api::delete_broadcaster))
            .route(&format!("{broadcaster}/transports"), post(api::create_broadcaster_transport))
            .route(&format!("{transport}/connect"), post(api::connect_broadcaster_transport))
            .route(&format!("{transport}/producers"), post(api::create_broadcaster_producer))
            .route(&format!("{transport}/consume"), post(api::create_broadcaster_consumer))
            .with_state(self)
            .layer(CorsLayer::permissive())
    }

    /// Starts the signaling server on the specified port
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the port
    pub async fn serve(self, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{port}");
        info!("Starting signaling server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

/// Connection query: `?roomId=&peerId=[&consume=false][&forceH264=true|&forceVP9=true]`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    room_id: Option<String>,
    peer_id: Option<String>,
    consume: Option<String>,
    #[serde(default, rename = "forceH264")]
    force_h264: bool,
    #[serde(default, rename = "forceVP9")]
    force_vp9: bool,
}

async fn health_handler(State(server): State<SignalingServer>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": server.registry.room_count(),
        "peers": server.registry.peer_count(),
    }))
}

/// Prometheus text exposition format
async fn metrics_handler(State(server): State<SignalingServer>) -> Response {
    let body = server
        .metrics
        .render_prometheus(server.registry.room_count(), server.registry.peer_count());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Resolves the room first so a failed room creation is an HTTP error,
/// not a dropped socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(server): State<SignalingServer>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let room_id = params.room_id.filter(|id| !id.is_empty());
    let peer_id = params.peer_id.filter(|id| !id.is_empty());
    let (Some(room_id), Some(peer_id)) = (room_id, peer_id) else {
        return (StatusCode::BAD_REQUEST, "Connection request without roomId and/or peerId").into_response();
    };
    let consume = params.consume.as_deref() != Some("false");

    let permit = match server.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Connection limit reached, rejecting peer {}", peer_id);
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    let options = RoomOptions::from(CodecFlags {
        force_h264: params.force_h264,
        force_vp9: params.force_vp9,
    });
    let room = match server.registry.get_or_create(&room_id, options).await {
        Ok(room) => room,
        Err(e) => {
            warn!("Cannot open room {} for peer {}: {}", room_id, peer_id, e);
            return e.into_response();
        }
    };

    ws.protocols(["protoo"])
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_failed_upgrade(|error| {
            warn!("WebSocket upgrade failed: {}", error);
        })
        .on_upgrade(move |socket| {
            connection::handle_connection(socket, room, peer_id, consume, server.metrics, permit)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomSettings;
    use crate::testing::FakeEngine;
    use axum::body::Body;
    use axum::http::Request;
    use mediasoup::prelude::{MimeTypeVideo, RtpCodecCapability};
    use tower::ServiceExt;

    fn server_with(engine: Arc<FakeEngine>) -> SignalingServer {
        let metrics = ServerMetrics::new();
        let registry = RoomRegistry::new(engine, RoomSettings::default(), metrics.clone());
        SignalingServer::new(Arc::new(registry), metrics, 16)
    }

    async fn send(request: Request<Body>) -> (StatusCode, String) {
        send_to(FakeEngine::new(), request).await
    }

    async fn send_to(engine: Arc<FakeEngine>, request: Request<Body>) -> (StatusCode, String) {
        let response = server_with(engine).router().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_room_capabilities_route() {
        let (status, body) = send(Request::get("/rooms/r1").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let caps: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(caps.get("codecs").is_some());
    }

    #[tokio::test]
    async fn test_create_broadcaster_route_validates() {
        let request = Request::post("/rooms/r1/broadcasters")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"id":"bot","device":{"name":"x"}}"#))
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_unknown_broadcaster_is_not_found() {
        let request = Request::delete("/rooms/r1/broadcasters/ghost").body(Body::empty()).unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_consume_requires_producer_id() {
        let request = Request::post("/rooms/r1/broadcasters/bot/transports/t1/consume")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_consume_route_honours_codec_flags() {
        let engine = FakeEngine::new();
        let request = Request::post("/rooms/r1/broadcasters/bot/transports/t1/consume?producerId=p1&forceH264=true")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send_to(engine.clone(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let video: Vec<_> = engine
            .codecs(0)
            .into_iter()
            .filter_map(|c| match c {
                RtpCodecCapability::Video { mime_type, .. } => Some(mime_type),
                RtpCodecCapability::Audio { .. } => None,
            })
            .collect();
        assert!(!video.is_empty());
        assert!(video.iter().all(|m| *m == MimeTypeVideo::H264));
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["rooms"], 0);
    }
}
