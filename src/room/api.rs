#![forbid(unsafe_code)]

// HTTP surface for rooms and broadcasters

use super::broadcaster::{
    BroadcasterProducerRequest, BroadcasterTransportRequest, ConnectBroadcasterTransportRequest,
    CreateBroadcasterRequest,
};
use super::{CodecFlags, Room, RoomOptions};
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::signaling::SignalingServer;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

impl IntoResponse for OrchestrationError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeParams {
    pub producer_id: Option<String>,
}

fn parse<T: DeserializeOwned>(body: Value) -> OrchestrationResult<T> {
    Ok(serde_json::from_value(body)?)
}

async fn room(server: &SignalingServer, room_id: &str, flags: CodecFlags) -> OrchestrationResult<Arc<Room>> {
    server
        .room_registry()
        .get_or_create(room_id, RoomOptions::from(flags))
        .await
}

/// GET /rooms/{roomId}
pub async fn get_room_capabilities(
    State(server): State<SignalingServer>,
    Path(room_id): Path<String>,
    Query(flags): Query<CodecFlags>,
) -> OrchestrationResult<Json<Value>> {
    let room = room(&server, &room_id, flags).await?;
    Ok(Json(serde_json::to_value(room.rtp_capabilities())?))
}

/// POST /rooms/{roomId}/broadcasters
pub async fn create_broadcaster(
    State(server): State<SignalingServer>,
    Path(room_id): Path<String>,
    Query(flags): Query<CodecFlags>,
    Json(body): Json<Value>,
) -> OrchestrationResult<Json<Value>> {
    let req: CreateBroadcasterRequest = parse(body)?;
    let room = room(&server, &room_id, flags).await?;
    Ok(Json(room.create_broadcaster(req)?))
}

/// DELETE /rooms/{roomId}/broadcasters/{broadcasterId}
pub async fn delete_broadcaster(
    State(server): State<SignalingServer>,
    Path((room_id, broadcaster_id)): Path<(String, String)>,
    Query(flags): Query<CodecFlags>,
) -> OrchestrationResult<&'static str> {
    let room = room(&server, &room_id, flags).await?;
    room.delete_broadcaster(&broadcaster_id)?;
    Ok("broadcaster deleted")
}

/// POST /rooms/{roomId}/broadcasters/{broadcasterId}/transports
pub async fn create_broadcaster_transport(
    State(server): State<SignalingServer>,
    Path((room_id, broadcaster_id)): Path<(String, String)>,
    Query(flags): Query<CodecFlags>,
    Json(body): Json<Value>,
) -> OrchestrationResult<Json<Value>> {
    let req: BroadcasterTransportRequest = parse(body)?;
    let room = room(&server, &room_id, flags).await?;
    Ok(Json(room.create_broadcaster_transport(&broadcaster_id, req).await?))
}

/// POST /rooms/{roomId}/broadcasters/{broadcasterId}/transports/{transportId}/connect
pub async fn connect_broadcaster_transport(
    State(server): State<SignalingServer>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Query(flags): Query<CodecFlags>,
    Json(body): Json<Value>,
) -> OrchestrationResult<Json<Value>> {
    let req: ConnectBroadcasterTransportRequest = parse(body)?;
    let room = room(&server, &room_id, flags).await?;
    room.connect_broadcaster_transport(&broadcaster_id, &transport_id, req)
        .await?;
    Ok(Json(json!({})))
}

/// POST /rooms/{roomId}/broadcasters/{broadcasterId}/transports/{transportId}/producers
pub async fn create_broadcaster_producer(
    State(server): State<SignalingServer>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Query(flags): Query<CodecFlags>,
    Json(body): Json<Value>,
) -> OrchestrationResult<Json<Value>> {
    let req: BroadcasterProducerRequest = parse(body)?;
    let room = room(&server, &room_id, flags).await?;
    Ok(Json(
        room.create_broadcaster_producer(&broadcaster_id, &transport_id, req)
            .await?,
    ))
}

/// POST /rooms/{roomId}/broadcasters/{broadcasterId}/transports/{transportId}/consume?producerId=
pub async fn create_broadcaster_consumer(
    State(server): State<SignalingServer>,
    Path((room_id, broadcaster_id, transport_id)): Path<(String, String, String)>,
    Query(params): Query<ConsumeParams>,
    Query(flags): Query<CodecFlags>,
) -> OrchestrationResult<Json<Value>> {
    let producer_id = params
        .producer_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OrchestrationError::validation("missing producerId"))?;
    let room = room(&server, &room_id, flags).await?;
    Ok(Json(
        room.create_broadcaster_consumer(&broadcaster_id, &transport_id, &producer_id)
            .await?,
    ))
}
