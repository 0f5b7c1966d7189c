#![forbid(unsafe_code)]

// Signaling protocol - request/response/notification envelopes over WebSocket

use super::channel::{Notification, ServerRequest};
use crate::error::OrchestrationError;
use serde::Deserialize;
use serde_json::{json, Value};

/// Messages a client may send
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    Notification(NotificationEnvelope),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    pub request: bool,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub response: bool,
    pub id: u64,
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEnvelope {
    pub notification: bool,
    pub method: String,
    #[serde(default)]
    pub data: Value,
}

/// Serializes a server-initiated request
pub fn request_message(id: u64, request: &ServerRequest) -> serde_json::Result<String> {
    let mut message = serde_json::to_value(request)?;
    message["request"] = Value::Bool(true);
    message["id"] = json!(id);
    serde_json::to_string(&message)
}

pub fn notification_message(notification: &Notification) -> serde_json::Result<String> {
    let mut message = serde_json::to_value(notification)?;
    message["notification"] = Value::Bool(true);
    serde_json::to_string(&message)
}

pub fn success_response(id: u64, data: Value) -> String {
    json!({ "response": true, "id": id, "ok": true, "data": data }).to_string()
}

pub fn error_response(id: u64, error: &OrchestrationError) -> String {
    json!({
        "response": true,
        "id": id,
        "ok": false,
        "errorCode": error.code(),
        "errorReason": error.to_string(),
    })
    .to_string()
}
