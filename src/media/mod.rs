#![forbid(unsafe_code)]

// Media module - facade over the media engine and its mediasoup implementation.
// Rooms only ever talk to the traits below; `MediaServer` is the production engine.

pub mod config;
pub mod router;
pub mod transport;
pub mod types;
pub mod worker_manager;

pub use config::{CodecPreference, MediaConfig, RouterConfig, WebRtcTransportConfig, WorkerConfig};
pub use types::{
    AudioLevelEvent, AudioLevelEventHandler, AudioObserverConfig, ConsumerEvent,
    ConsumerEventHandler, ConsumerScore, ConsumerType, MediaError, MediaResult,
    PlainTransportRequest, ProducerEvent, ProducerEventHandler, ProducerScore, TransportKind,
    TransportRole, WebRtcTransportRequest,
};
pub use worker_manager::WorkerManager;

use async_trait::async_trait;
use mediasoup::prelude::{
    ConsumerLayers, DtlsParameters, MediaKind, RtpCapabilities, RtpCapabilitiesFinalized,
    RtpCodecCapability, RtpParameters,
};
use router::MediasoupRouter;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Creates one router per room.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_router(&self, media_codecs: Vec<RtpCodecCapability>) -> MediaResult<Arc<dyn MediaRouter>>;
}

/// Room-scoped relay: capability snapshot plus transport and observer factories.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn id(&self) -> String;

    fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized;

    /// Whether a session advertising `rtp_capabilities` can decode the producer
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(&self, request: WebRtcTransportRequest) -> MediaResult<Arc<dyn MediaTransport>>;

    async fn create_plain_transport(&self, request: PlainTransportRequest) -> MediaResult<Arc<dyn MediaTransport>>;

    async fn create_audio_level_observer(&self, config: AudioObserverConfig) -> MediaResult<Arc<dyn AudioLevelObserver>>;

    fn close(&self);
}

#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> TransportKind;

    fn role(&self) -> TransportRole;

    /// Connection parameters handed back to the remote endpoint
    fn parameters(&self) -> Value;

    async fn connect(&self, dtls_parameters: DtlsParameters) -> MediaResult<()>;

    /// Returns fresh ICE parameters
    async fn restart_ice(&self) -> MediaResult<Value>;

    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> MediaResult<()>;

    /// `owner_id` is stored as producer metadata so later signals can be attributed
    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        owner_id: &str,
    ) -> MediaResult<Arc<dyn MediaProducer>>;

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn MediaConsumer>>;

    async fn get_stats(&self) -> MediaResult<Value>;

    fn close(&self);
}

#[async_trait]
pub trait MediaProducer: Send + Sync {
    fn id(&self) -> String;

    fn kind(&self) -> MediaKind;

    /// Owner peer or broadcaster id from producer metadata
    fn owner_id(&self) -> Option<String>;

    fn paused(&self) -> bool;

    async fn pause(&self) -> MediaResult<()>;

    async fn resume(&self) -> MediaResult<()>;

    async fn get_stats(&self) -> MediaResult<Value>;

    fn on_event(&self, handler: ProducerEventHandler);

    fn close(&self);
}

#[async_trait]
pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> String;

    fn producer_id(&self) -> String;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn consumer_type(&self) -> ConsumerType;

    fn paused(&self) -> bool;

    fn producer_paused(&self) -> bool;

    fn score(&self) -> ConsumerScore;

    async fn pause(&self) -> MediaResult<()>;

    async fn resume(&self) -> MediaResult<()>;

    async fn set_preferred_layers(&self, layers: ConsumerLayers) -> MediaResult<()>;

    async fn set_priority(&self, priority: u8) -> MediaResult<()>;

    async fn request_key_frame(&self) -> MediaResult<()>;

    async fn get_stats(&self) -> MediaResult<Value>;

    fn on_event(&self, handler: ConsumerEventHandler);

    fn close(&self);
}

#[async_trait]
pub trait AudioLevelObserver: Send + Sync {
    async fn add_producer(&self, producer_id: &str) -> MediaResult<()>;

    fn on_event(&self, handler: AudioLevelEventHandler);
}

/// mediasoup-backed media engine: a pool of workers, one router per room
pub struct MediaServer {
    worker_manager: Arc<WorkerManager>,
    config: Arc<MediaConfig>,
}

impl MediaServer {
    /// Creates a new MediaServer instance with the given configuration
    pub async fn new(config: MediaConfig) -> anyhow::Result<Self> {
        info!("Initializing MediaServer with {} workers", config.worker_config.num_workers);

        let config = Arc::new(config);
        let worker_manager = Arc::new(WorkerManager::new(config.clone()).await?);

        Ok(Self { worker_manager, config })
    }

    /// Gracefully shuts down all workers
    pub async fn shutdown(&self) {
        info!("Shutting down MediaServer");
        self.worker_manager.shutdown().await;
    }
}

#[async_trait]
impl MediaEngine for MediaServer {
    async fn create_router(&self, media_codecs: Vec<RtpCodecCapability>) -> MediaResult<Arc<dyn MediaRouter>> {
        let (worker, worker_id) = self.worker_manager.get_least_loaded_worker().await?;

        let router = worker
            .create_router(mediasoup::prelude::RouterOptions::new(media_codecs))
            .await
            .map_err(|e| MediaError::Router(format!("Failed to create router: {e}")))?;

        debug!("Created router {} on worker {}", router.id(), worker_id);
        Ok(Arc::new(MediasoupRouter::new(
            router,
            worker_id,
            self.worker_manager.clone(),
            self.config.clone(),
        )))
    }
}
