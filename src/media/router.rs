#![forbid(unsafe_code)]

// Per-room mediasoup router and its audio-level observer

use crate::media::config::MediaConfig;
use crate::media::transport::{MediasoupProducer, MediasoupTransport};
use crate::media::types::*;
use crate::media::worker_manager::WorkerManager;
use crate::media::{AudioLevelObserver, MediaRouter, MediaTransport};
use async_trait::async_trait;
use mediasoup::audio_level_observer::{AudioLevelObserver as MsAudioLevelObserver, AudioLevelObserverOptions};
use mediasoup::prelude::*;
use mediasoup::rtp_observer::{RtpObserver, RtpObserverAddProducerOptions};
use mediasoup::worker::WorkerId;
use std::num::NonZeroU16;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A mediasoup router owned by exactly one room.
///
/// The router is closed when the last handle is dropped, so `close` just
/// releases ours and returns the worker slot to the pool.
pub struct MediasoupRouter {
    id: String,
    router: Mutex<Option<Router>>,
    rtp_capabilities: RtpCapabilitiesFinalized,
    worker_id: WorkerId,
    worker_manager: Arc<WorkerManager>,
    config: Arc<MediaConfig>,
}

impl MediasoupRouter {
    pub fn new(
        router: Router,
        worker_id: WorkerId,
        worker_manager: Arc<WorkerManager>,
        config: Arc<MediaConfig>,
    ) -> Self {
        let id = router.id().to_string();

        router
            .on_worker_close({
                let id = id.clone();
                move || {
                    warn!("Worker closed under router {}", id);
                }
            })
            .detach();

        Self {
            id,
            rtp_capabilities: router.rtp_capabilities().clone(),
            router: Mutex::new(Some(router)),
            worker_id,
            worker_manager,
            config,
        }
    }

    fn router(&self) -> MediaResult<Router> {
        self.router
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| MediaError::Closed(format!("router {}", self.id)))
    }
}

#[async_trait]
impl MediaRouter for MediasoupRouter {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized {
        self.rtp_capabilities.clone()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        let Ok(producer_id) = producer_id.parse::<ProducerId>() else {
            return false;
        };
        self.router()
            .map(|router| router.can_consume(&producer_id, rtp_capabilities))
            .unwrap_or(false)
    }

    async fn create_webrtc_transport(&self, request: WebRtcTransportRequest) -> MediaResult<Arc<dyn MediaTransport>> {
        let router = self.router()?;
        let options = self
            .config
            .webrtc_transport_config
            .to_transport_options(request.force_tcp);

        let transport = router
            .create_webrtc_transport(options)
            .await
            .map_err(|e| MediaError::Transport(format!("Failed to create WebRTC transport: {e}")))?;

        Ok(Arc::new(MediasoupTransport::webrtc(transport, request.role)))
    }

    async fn create_plain_transport(&self, request: PlainTransportRequest) -> MediaResult<Arc<dyn MediaTransport>> {
        let router = self.router()?;
        let options = self
            .config
            .webrtc_transport_config
            .to_plain_options(request.rtcp_mux, request.comedia);

        let transport = router
            .create_plain_transport(options)
            .await
            .map_err(|e| MediaError::Transport(format!("Failed to create plain transport: {e}")))?;

        Ok(Arc::new(MediasoupTransport::plain(transport)))
    }

    async fn create_audio_level_observer(&self, config: AudioObserverConfig) -> MediaResult<Arc<dyn AudioLevelObserver>> {
        let router = self.router()?;

        let mut options = AudioLevelObserverOptions::default();
        options.max_entries = NonZeroU16::new(config.max_entries).unwrap_or(NonZeroU16::MIN);
        options.threshold = config.threshold_db;
        options.interval = config.interval_ms;

        let observer = router
            .create_audio_level_observer(options)
            .await
            .map_err(|e| MediaError::Observer(format!("Failed to create audio level observer: {e}")))?;

        Ok(Arc::new(MediasoupAudioObserver { observer }))
    }

    fn close(&self) {
        let router = self.router.lock().unwrap_or_else(|e| e.into_inner()).take();
        if router.is_some() {
            info!("Closing router {}", self.id);
            let worker_manager = self.worker_manager.clone();
            let worker_id = self.worker_id;
            tokio::spawn(async move {
                worker_manager.decrement_worker_load(worker_id).await;
            });
        }
    }
}

/// Room-wide loudest-speaker observer
pub struct MediasoupAudioObserver {
    observer: MsAudioLevelObserver,
}

#[async_trait]
impl AudioLevelObserver for MediasoupAudioObserver {
    async fn add_producer(&self, producer_id: &str) -> MediaResult<()> {
        let producer_id = producer_id
            .parse::<ProducerId>()
            .map_err(|e| MediaError::Observer(format!("Invalid producer id {producer_id}: {e}")))?;

        self.observer
            .add_producer(RtpObserverAddProducerOptions::new(producer_id))
            .await
            .map_err(|e| MediaError::Observer(format!("Failed to add producer to observer: {e}")))
    }

    fn on_event(&self, handler: AudioLevelEventHandler) {
        let handler: Arc<dyn Fn(AudioLevelEvent) + Send + Sync> = Arc::from(handler);

        self.observer
            .on_volumes({
                let handler = handler.clone();
                move |volumes| {
                    // Observer runs with max_entries = 1: the first entry is the loudest
                    if let Some(loudest) = volumes.first() {
                        handler(AudioLevelEvent::Volumes {
                            producer: Arc::new(MediasoupProducer::observed(loudest.producer.clone())),
                            volume: loudest.volume,
                        });
                    }
                }
            })
            .detach();

        self.observer
            .on_silence(move || {
                debug!("Audio level observer reported silence");
                handler(AudioLevelEvent::Silence);
            })
            .detach();
    }
}
