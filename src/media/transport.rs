#![forbid(unsafe_code)]

// mediasoup transports, producers and consumers behind the media facade.
// Every handle closes its engine object by dropping it.

use crate::media::types::{
    ConsumerEvent, ConsumerEventHandler, ConsumerScore, ConsumerType, MediaError, MediaResult,
    ProducerEvent, ProducerEventHandler, ProducerScore, TransportKind, TransportRole,
};
use crate::media::{MediaConsumer, MediaProducer, MediaTransport};
use async_trait::async_trait;
use mediasoup::consumer::ConsumerType as MsConsumerType;
use mediasoup::prelude::{
    AppData, Consumer, ConsumerLayers, ConsumerOptions, DtlsParameters, MediaKind,
    PlainTransport, Producer, ProducerId, ProducerOptions, RtpCapabilities, RtpParameters,
    Transport, TransportGeneric, WebRtcTransport, WebRtcTransportRemoteParameters,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Metadata attached to every producer
#[derive(Debug, Clone)]
struct ProducerAppData {
    owner_id: String,
}

#[derive(Clone)]
enum TransportHandle {
    WebRtc(WebRtcTransport),
    Plain(PlainTransport),
}

fn to_json<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

pub struct MediasoupTransport {
    id: String,
    kind: TransportKind,
    role: TransportRole,
    parameters: Value,
    handle: Mutex<Option<TransportHandle>>,
}

impl MediasoupTransport {
    pub fn webrtc(transport: WebRtcTransport, role: TransportRole) -> Self {
        let id = transport.id().to_string();
        let parameters = json!({
            "id": id,
            "iceParameters": to_json(transport.ice_parameters()),
            "iceCandidates": to_json(transport.ice_candidates()),
            "dtlsParameters": to_json(&transport.dtls_parameters()),
        });

        transport
            .on_dtls_state_change({
                let id = id.clone();
                move |dtls_state| {
                    debug!("DTLS state {:?} for transport {}", dtls_state, id);
                }
            })
            .detach();

        transport
            .on_ice_state_change({
                let id = id.clone();
                move |ice_state| {
                    debug!("ICE state {:?} for transport {}", ice_state, id);
                }
            })
            .detach();

        Self {
            id,
            kind: TransportKind::WebRtc,
            role,
            parameters,
            handle: Mutex::new(Some(TransportHandle::WebRtc(transport))),
        }
    }

    pub fn plain(transport: PlainTransport) -> Self {
        let id = transport.id().to_string();
        let tuple = to_json(&transport.tuple());
        let rtcp_tuple = transport.rtcp_tuple().map(|t| to_json(&t));

        // Field names differ between mediasoup releases
        let local = |tuple: &Value, keys: [&str; 2]| {
            keys.iter().find_map(|k| tuple.get(*k).cloned()).unwrap_or(Value::Null)
        };
        let parameters = json!({
            "id": id,
            "ip": local(&tuple, ["localAddress", "localIp"]),
            "port": local(&tuple, ["localPort", "localPort"]),
            "rtcpPort": rtcp_tuple
                .as_ref()
                .map(|t| local(t, ["localPort", "localPort"]))
                .unwrap_or(Value::Null),
        });

        Self {
            id,
            kind: TransportKind::Plain,
            role: TransportRole { producing: true, consuming: true },
            parameters,
            handle: Mutex::new(Some(TransportHandle::Plain(transport))),
        }
    }

    fn handle(&self) -> MediaResult<TransportHandle> {
        self.handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| MediaError::Closed(format!("transport {}", self.id)))
    }
}

#[async_trait]
impl MediaTransport for MediasoupTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn role(&self) -> TransportRole {
        self.role
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> MediaResult<()> {
        match self.handle()? {
            TransportHandle::WebRtc(transport) => transport
                .connect(WebRtcTransportRemoteParameters { dtls_parameters })
                .await
                .map_err(|e| MediaError::Transport(format!("Failed to connect transport: {e}"))),
            TransportHandle::Plain(_) => Err(MediaError::Transport(format!(
                "transport {} does not take DTLS parameters",
                self.id
            ))),
        }
    }

    async fn restart_ice(&self) -> MediaResult<Value> {
        match self.handle()? {
            TransportHandle::WebRtc(transport) => {
                let ice_parameters = transport
                    .restart_ice()
                    .await
                    .map_err(|e| MediaError::Transport(format!("Failed to restart ICE: {e}")))?;
                Ok(to_json(&ice_parameters))
            }
            TransportHandle::Plain(_) => Err(MediaError::Transport(format!(
                "transport {} has no ICE",
                self.id
            ))),
        }
    }

    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> MediaResult<()> {
        let result = match self.handle()? {
            TransportHandle::WebRtc(transport) => transport.set_max_incoming_bitrate(bitrate).await,
            TransportHandle::Plain(transport) => transport.set_max_incoming_bitrate(bitrate).await,
        };
        result.map_err(|e| MediaError::Transport(format!("Failed to set max incoming bitrate: {e}")))
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        owner_id: &str,
    ) -> MediaResult<Arc<dyn MediaProducer>> {
        let mut options = ProducerOptions::new(kind, rtp_parameters);
        options.app_data = AppData::new(ProducerAppData {
            owner_id: owner_id.to_string(),
        });

        let producer = match self.handle()? {
            TransportHandle::WebRtc(transport) => transport.produce(options).await,
            TransportHandle::Plain(transport) => transport.produce(options).await,
        }
        .map_err(|e| MediaError::Producer(format!("Failed to create producer: {e}")))?;

        info!("Created {:?} producer {} on transport {}", kind, producer.id(), self.id);
        Ok(Arc::new(MediasoupProducer::observed(producer)))
    }

    async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn MediaConsumer>> {
        let producer_id: ProducerId = producer_id
            .parse()
            .map_err(|e| MediaError::Consumer(format!("Invalid producer id {producer_id}: {e}")))?;

        let mut options = ConsumerOptions::new(producer_id, rtp_capabilities);
        options.paused = paused;

        let consumer = match self.handle()? {
            TransportHandle::WebRtc(transport) => transport.consume(options).await,
            TransportHandle::Plain(transport) => transport.consume(options).await,
        }
        .map_err(|e| MediaError::Consumer(format!("Failed to create consumer: {e}")))?;

        Ok(Arc::new(MediasoupConsumer::new(consumer)))
    }

    async fn get_stats(&self) -> MediaResult<Value> {
        let stats = match self.handle()? {
            TransportHandle::WebRtc(transport) => transport.get_stats().await.map(|s| to_json(&s)),
            TransportHandle::Plain(transport) => transport.get_stats().await.map(|s| to_json(&s)),
        };
        stats.map_err(|e| MediaError::Transport(format!("Failed to get transport stats: {e}")))
    }

    fn close(&self) {
        if self.handle.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            debug!("Closed transport {}", self.id);
        }
    }
}

pub struct MediasoupProducer {
    id: String,
    kind: MediaKind,
    producer: Mutex<Option<Producer>>,
}

impl MediasoupProducer {
    /// Wraps a producer handle, either freshly created or delivered by an observer signal
    pub fn observed(producer: Producer) -> Self {
        Self {
            id: producer.id().to_string(),
            kind: producer.kind(),
            producer: Mutex::new(Some(producer)),
        }
    }

    fn producer(&self) -> MediaResult<Producer> {
        self.producer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| MediaError::Closed(format!("producer {}", self.id)))
    }
}

#[async_trait]
impl MediaProducer for MediasoupProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn owner_id(&self) -> Option<String> {
        let producer = self.producer().ok()?;
        producer
            .app_data()
            .downcast_ref::<ProducerAppData>()
            .map(|data| data.owner_id.clone())
    }

    fn paused(&self) -> bool {
        self.producer().map(|p| p.paused()).unwrap_or(false)
    }

    async fn pause(&self) -> MediaResult<()> {
        self.producer()?
            .pause()
            .await
            .map_err(|e| MediaError::Producer(format!("Failed to pause producer: {e}")))
    }

    async fn resume(&self) -> MediaResult<()> {
        self.producer()?
            .resume()
            .await
            .map_err(|e| MediaError::Producer(format!("Failed to resume producer: {e}")))
    }

    async fn get_stats(&self) -> MediaResult<Value> {
        self.producer()?
            .get_stats()
            .await
            .map(|s| to_json(&s))
            .map_err(|e| MediaError::Producer(format!("Failed to get producer stats: {e}")))
    }

    fn on_event(&self, handler: ProducerEventHandler) {
        let Ok(producer) = self.producer() else {
            return;
        };
        let handler: Arc<dyn Fn(ProducerEvent) + Send + Sync> = Arc::from(handler);

        producer
            .on_score({
                let handler = handler.clone();
                move |scores| {
                    let scores = scores
                        .iter()
                        .map(|s| ProducerScore {
                            encoding_idx: s.encoding_idx,
                            ssrc: s.ssrc,
                            rid: s.rid.clone(),
                            score: s.score,
                        })
                        .collect();
                    handler(ProducerEvent::Score(scores));
                }
            })
            .detach();

        producer
            .on_video_orientation_change(move |orientation| {
                handler(ProducerEvent::VideoOrientationChange(format!("{orientation:?}")));
            })
            .detach();
    }

    fn close(&self) {
        if self.producer.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            debug!("Closed producer {}", self.id);
        }
    }
}

pub struct MediasoupConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    consumer_type: ConsumerType,
    consumer: Mutex<Option<Consumer>>,
}

impl MediasoupConsumer {
    fn new(consumer: Consumer) -> Self {
        let consumer_type = match consumer.r#type() {
            MsConsumerType::Simple => ConsumerType::Simple,
            MsConsumerType::Simulcast => ConsumerType::Simulcast,
            MsConsumerType::Svc => ConsumerType::Svc,
            MsConsumerType::Pipe => ConsumerType::Pipe,
        };

        Self {
            id: consumer.id().to_string(),
            producer_id: consumer.producer_id().to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
            consumer_type,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    fn consumer(&self) -> MediaResult<Consumer> {
        self.consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| MediaError::Closed(format!("consumer {}", self.id)))
    }
}

fn to_score(score: &mediasoup::consumer::ConsumerScore) -> ConsumerScore {
    ConsumerScore {
        score: score.score,
        producer_score: score.producer_score,
        producer_scores: score.producer_scores.clone(),
    }
}

#[async_trait]
impl MediaConsumer for MediasoupConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn consumer_type(&self) -> ConsumerType {
        self.consumer_type
    }

    fn paused(&self) -> bool {
        self.consumer().map(|c| c.paused()).unwrap_or(true)
    }

    fn producer_paused(&self) -> bool {
        self.consumer().map(|c| c.producer_paused()).unwrap_or(false)
    }

    fn score(&self) -> ConsumerScore {
        self.consumer().map(|c| to_score(&c.score())).unwrap_or_default()
    }

    async fn pause(&self) -> MediaResult<()> {
        self.consumer()?
            .pause()
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to pause consumer: {e}")))
    }

    async fn resume(&self) -> MediaResult<()> {
        self.consumer()?
            .resume()
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to resume consumer: {e}")))
    }

    async fn set_preferred_layers(&self, layers: ConsumerLayers) -> MediaResult<()> {
        self.consumer()?
            .set_preferred_layers(layers)
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to set preferred layers: {e}")))
    }

    async fn set_priority(&self, priority: u8) -> MediaResult<()> {
        self.consumer()?
            .set_priority(priority)
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to set priority: {e}")))
    }

    async fn request_key_frame(&self) -> MediaResult<()> {
        self.consumer()?
            .request_key_frame()
            .await
            .map_err(|e| MediaError::Consumer(format!("Failed to request key frame: {e}")))
    }

    async fn get_stats(&self) -> MediaResult<Value> {
        self.consumer()?
            .get_stats()
            .await
            .map(|s| to_json(&s))
            .map_err(|e| MediaError::Consumer(format!("Failed to get consumer stats: {e}")))
    }

    fn on_event(&self, handler: ConsumerEventHandler) {
        let Ok(consumer) = self.consumer() else {
            return;
        };
        let handler: Arc<dyn Fn(ConsumerEvent) + Send + Sync> = Arc::from(handler);

        consumer
            .on_transport_close({
                let handler = handler.clone();
                move || handler(ConsumerEvent::TransportClose)
            })
            .detach();

        consumer
            .on_producer_close({
                let handler = handler.clone();
                move || handler(ConsumerEvent::ProducerClose)
            })
            .detach();

        consumer
            .on_producer_pause({
                let handler = handler.clone();
                move || handler(ConsumerEvent::ProducerPause)
            })
            .detach();

        consumer
            .on_producer_resume({
                let handler = handler.clone();
                move || handler(ConsumerEvent::ProducerResume)
            })
            .detach();

        consumer
            .on_score({
                let handler = handler.clone();
                move |score| handler(ConsumerEvent::Score(to_score(score)))
            })
            .detach();

        consumer
            .on_layers_change(move |layers| handler(ConsumerEvent::LayersChange(*layers)))
            .detach();
    }

    fn close(&self) {
        if self.consumer.lock().unwrap_or_else(|e| e.into_inner()).take().is_some() {
            debug!("Closed consumer {}", self.id);
        }
    }
}
