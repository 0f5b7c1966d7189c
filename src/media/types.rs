#![forbid(unsafe_code)]

// Common types and error handling for the media facade

use mediasoup::prelude::ConsumerLayers;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use super::MediaProducer;

/// Error type for media engine operations
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Router error: {0}")]
    Router(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Producer error: {0}")]
    Producer(String),

    #[error("Consumer error: {0}")]
    Consumer(String),

    #[error("Observer error: {0}")]
    Observer(String),

    #[error("Resource closed: {0}")]
    Closed(String),
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

/// Which side of the media flow a peer transport is used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportRole {
    pub producing: bool,
    pub consuming: bool,
}

/// Concrete transport flavour, used to type-check operations like `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[serde(rename = "webrtc")]
    WebRtc,
    Plain,
}

/// Options for a WebRTC transport
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportRequest {
    pub role: TransportRole,
    pub force_tcp: bool,
}

/// Options for a plain (RTP) transport
#[derive(Debug, Clone)]
pub struct PlainTransportRequest {
    pub rtcp_mux: bool,
    pub comedia: bool,
}

/// Audio-level observer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioObserverConfig {
    pub max_entries: u16,
    pub threshold_db: i8,
    pub interval_ms: u16,
}

impl Default for AudioObserverConfig {
    fn default() -> Self {
        Self {
            max_entries: 1,
            threshold_db: -80,
            interval_ms: 800,
        }
    }
}

/// Negotiation type of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    Simple,
    Simulcast,
    Svc,
    Pipe,
}

/// Consumer quality score as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    pub score: u8,
    pub producer_score: u8,
    pub producer_scores: Vec<u8>,
}

/// Per-encoding producer score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScore {
    pub encoding_idx: u32,
    pub ssrc: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    pub score: u8,
}

/// Signals emitted by a consumer for its whole lifetime
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    TransportClose,
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
}

/// Signals emitted by a producer
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    Score(Vec<ProducerScore>),
    /// Informational only
    VideoOrientationChange(String),
}

/// Signals emitted by the room-wide audio-level observer
#[derive(Clone)]
pub enum AudioLevelEvent {
    Volumes {
        producer: Arc<dyn MediaProducer>,
        volume: i8,
    },
    Silence,
}

pub type ConsumerEventHandler = Box<dyn Fn(ConsumerEvent) + Send + Sync>;
pub type ProducerEventHandler = Box<dyn Fn(ProducerEvent) + Send + Sync>;
pub type AudioLevelEventHandler = Box<dyn Fn(AudioLevelEvent) + Send + Sync>;
