#![forbid(unsafe_code)]

// Signaling facade - what a room needs from a peer's signaling connection

use crate::media::{ConsumerScore, ConsumerType, ProducerScore};
use crate::room::Device;
use async_trait::async_trait;
use mediasoup::prelude::{MediaKind, RtpParameters};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Errors from the signaling facade
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("signaling channel closed")]
    Closed,

    #[error("request timed out")]
    Timeout,

    #[error("outbound queue full")]
    Overloaded,

    #[error("request rejected by peer ({code}): {reason}")]
    Rejected { code: u16, reason: String },

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Fire-and-forget messages sent to a peer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    NewPeer {
        id: String,
        display_name: String,
        device: Device,
    },
    #[serde(rename_all = "camelCase")]
    PeerClosed { peer_id: String },
    #[serde(rename_all = "camelCase")]
    PeerDisplayNameChanged {
        peer_id: String,
        display_name: String,
        old_display_name: String,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerClosed { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    ConsumerPaused { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    ConsumerResumed { consumer_id: String },
    #[serde(rename_all = "camelCase")]
    ConsumerScore {
        consumer_id: String,
        score: ConsumerScore,
    },
    #[serde(rename_all = "camelCase")]
    ConsumerLayersChanged {
        consumer_id: String,
        spatial_layer: Option<u8>,
        temporal_layer: Option<u8>,
    },
    #[serde(rename_all = "camelCase")]
    ProducerScore {
        producer_id: String,
        score: Vec<ProducerScore>,
    },
    /// `peer_id` is null when nobody is speaking
    #[serde(rename_all = "camelCase")]
    ActiveSpeaker {
        peer_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<i8>,
    },
}

/// Requests the server sends to a peer and awaits an answer for
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "method", content = "data", rename_all = "camelCase")]
pub enum ServerRequest {
    NewConsumer(NewConsumer),
}

/// Describes a consumer the peer should mirror locally
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsumer {
    /// Owner of the producer being consumed
    pub peer_id: String,
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(rename = "type")]
    pub consumer_type: ConsumerType,
    pub app_data: Value,
    pub producer_paused: bool,
}

/// One peer's end of the signaling transport.
///
/// Inbound requests and the close signal are pushed into the room by whoever
/// owns the connection; this trait only covers the outbound direction.
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Sends a request and waits for the peer's answer
    async fn request(&self, request: ServerRequest) -> Result<Value, SignalingError>;

    /// Queues a notification without waiting for delivery
    fn notify(&self, notification: Notification) -> Result<(), SignalingError>;

    /// Closes the underlying connection; safe to call more than once
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_envelope() {
        let json = serde_json::to_value(Notification::PeerDisplayNameChanged {
            peer_id: "alice".into(),
            display_name: "Alice".into(),
            old_display_name: "A".into(),
        })
        .unwrap();
        assert_eq!(json["method"], "peerDisplayNameChanged");
        assert_eq!(json["data"]["peerId"], "alice");
        assert_eq!(json["data"]["oldDisplayName"], "A");
    }

    #[test]
    fn test_silence_has_null_speaker() {
        let json = serde_json::to_value(Notification::ActiveSpeaker { peer_id: None, volume: None }).unwrap();
        assert_eq!(json["method"], "activeSpeaker");
        assert!(json["data"]["peerId"].is_null());
        assert!(json["data"].get("volume").is_none());
    }
}
