#![forbid(unsafe_code)]

// In-memory media engine and signaling channel for unit tests.
// Engine objects fire their signals synchronously, like the real engine's
// handlers can, so tests catch code that closes things under a lock.

use crate::media::{
    AudioLevelEvent, AudioLevelEventHandler, AudioLevelObserver, AudioObserverConfig, ConsumerEvent,
    ConsumerEventHandler, ConsumerScore, ConsumerType, MediaConsumer, MediaEngine, MediaError, MediaProducer,
    MediaResult, MediaRouter, MediaTransport, PlainTransportRequest, ProducerEvent, ProducerEventHandler,
    ProducerScore, TransportKind, TransportRole, WebRtcTransportRequest,
};
use crate::signaling::{Notification, PeerChannel, ServerRequest, SignalingError};
use async_trait::async_trait;
use mediasoup::prelude::*;
use mediasoup::types::data_structures::{DtlsFingerprint, DtlsRole};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::num::{NonZeroU32, NonZeroU8};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::Notify;
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lets spawned negotiation tasks run to completion
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub fn rtp_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            RtpCodecCapability::Audio {
                mime_type: MimeTypeAudio::Opus,
                preferred_payload_type: Some(100),
                clock_rate: NonZeroU32::new(48000).unwrap(),
                channels: NonZeroU8::new(2).unwrap(),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![RtcpFeedback::TransportCc],
            },
            RtpCodecCapability::Video {
                mime_type: MimeTypeVideo::Vp8,
                preferred_payload_type: Some(101),
                clock_rate: NonZeroU32::new(90000).unwrap(),
                parameters: RtpCodecParametersParameters::default(),
                rtcp_feedback: vec![RtcpFeedback::Nack, RtcpFeedback::NackPli],
            },
        ],
        header_extensions: vec![],
    }
}

pub fn audio_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters::Audio {
            mime_type: MimeTypeAudio::Opus,
            payload_type: 100,
            clock_rate: NonZeroU32::new(48000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![],
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(1111),
            ..RtpEncodingParameters::default()
        }],
        ..RtpParameters::default()
    }
}

pub fn video_parameters() -> RtpParameters {
    RtpParameters {
        mid: Some("1".to_string()),
        codecs: vec![RtpCodecParameters::Video {
            mime_type: MimeTypeVideo::Vp8,
            payload_type: 101,
            clock_rate: NonZeroU32::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![RtcpFeedback::Nack, RtcpFeedback::NackPli],
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(2222),
            ..RtpEncodingParameters::default()
        }],
        ..RtpParameters::default()
    }
}

pub fn dtls_parameters() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Auto,
        fingerprints: vec![DtlsFingerprint::Sha256 { value: [0xAB; 32] }],
    }
}

struct Handlers<E> {
    handlers: Mutex<Vec<Arc<dyn Fn(E) + Send + Sync>>>,
}

impl<E: Clone> Handlers<E> {
    fn new() -> Self {
        Self { handlers: Mutex::new(Vec::new()) }
    }

    fn add(&self, handler: Box<dyn Fn(E) + Send + Sync>) {
        lock(&self.handlers).push(Arc::from(handler));
    }

    fn emit(&self, event: E) {
        let handlers = lock(&self.handlers).clone();
        for handler in handlers {
            handler(event.clone());
        }
    }
}

/// Everything a fake router has created, shared with its children
#[derive(Default)]
struct Objects {
    transports: Mutex<HashMap<String, Arc<FakeTransport>>>,
    producers: Mutex<HashMap<String, Arc<FakeProducer>>>,
    consumers: Mutex<Vec<Arc<FakeConsumer>>>,
}

impl Objects {
    fn consumers_where(&self, pred: impl Fn(&FakeConsumer) -> bool) -> Vec<Arc<FakeConsumer>> {
        lock(&self.consumers).iter().filter(|c| pred(c)).cloned().collect()
    }
}

pub struct FakeEngine {
    routers: Mutex<Vec<Arc<FakeRouter>>>,
    codecs: Mutex<Vec<Vec<RtpCodecCapability>>>,
    fail_next: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routers: Mutex::new(Vec::new()),
            codecs: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
        })
    }

    /// Most recently created router
    pub fn router(&self) -> Arc<FakeRouter> {
        lock(&self.routers).last().cloned().expect("no router created")
    }

    pub fn routers_created(&self) -> usize {
        lock(&self.routers).len()
    }

    pub fn fail_next_router(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Codecs the `index`th router was created with
    pub fn codecs(&self, index: usize) -> Vec<RtpCodecCapability> {
        lock(&self.codecs)[index].clone()
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn create_router(&self, media_codecs: Vec<RtpCodecCapability>) -> MediaResult<Arc<dyn MediaRouter>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(MediaError::Router("injected failure".into()));
        }
        let router = FakeRouter::new();
        lock(&self.routers).push(router.clone());
        lock(&self.codecs).push(media_codecs);
        Ok(router)
    }
}

pub struct FakeRouter {
    id: String,
    objects: Arc<Objects>,
    incompatible: Mutex<HashSet<String>>,
    observer: Mutex<Option<Arc<FakeObserver>>>,
    closed: AtomicBool,
}

impl FakeRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: new_id(),
            objects: Arc::new(Objects::default()),
            incompatible: Mutex::new(HashSet::new()),
            observer: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn transport(&self, transport_id: &str) -> Option<Arc<FakeTransport>> {
        lock(&self.objects.transports).get(transport_id).cloned()
    }

    pub fn transport_closed(&self, transport_id: &str) -> bool {
        self.transport(transport_id).is_some_and(|t| t.closed.load(Ordering::SeqCst))
    }

    pub fn producer(&self, producer_id: &str) -> Option<Arc<FakeProducer>> {
        lock(&self.objects.producers).get(producer_id).cloned()
    }

    /// Producers not yet closed
    pub fn producer_count(&self) -> usize {
        lock(&self.objects.producers)
            .values()
            .filter(|p| !p.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn consumer(&self, consumer_id: &str) -> Option<Arc<FakeConsumer>> {
        self.objects.consumers_where(|c| c.id == consumer_id).pop()
    }

    pub fn consumer_for(&self, producer_id: &str) -> Option<Arc<FakeConsumer>> {
        self.objects.consumers_where(|c| c.producer_id == producer_id).pop()
    }

    /// Live consumers
    pub fn consumer_count(&self) -> usize {
        self.objects.consumers_where(|c| !c.is_closed()).len()
    }

    /// Makes `can_consume` refuse this producer
    pub fn set_incompatible(&self, producer_id: &str) {
        lock(&self.incompatible).insert(producer_id.to_string());
    }

    pub fn observer(&self) -> Arc<FakeObserver> {
        lock(&self.observer).clone().expect("no audio-level observer created")
    }

    fn add_transport(&self, kind: TransportKind, role: TransportRole, plain: Option<(bool, bool)>) -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport {
            id: new_id(),
            kind,
            role,
            plain,
            objects: Arc::downgrade(&self.objects),
            connected: AtomicBool::new(false),
            max_incoming_bitrate: Mutex::new(None),
            produce_gate: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        lock(&self.objects.transports).insert(transport.id.clone(), transport.clone());
        transport
    }
}

#[async_trait]
impl MediaRouter for FakeRouter {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn rtp_capabilities(&self) -> RtpCapabilitiesFinalized {
        RtpCapabilitiesFinalized::default()
    }

    fn can_consume(&self, producer_id: &str, _rtp_capabilities: &RtpCapabilities) -> bool {
        self.producer(producer_id).is_some() && !lock(&self.incompatible).contains(producer_id)
    }

    async fn create_webrtc_transport(&self, request: WebRtcTransportRequest) -> MediaResult<Arc<dyn MediaTransport>> {
        Ok(self.add_transport(TransportKind::WebRtc, request.role, None))
    }

    async fn create_plain_transport(&self, request: PlainTransportRequest) -> MediaResult<Arc<dyn MediaTransport>> {
        let role = TransportRole { producing: true, consuming: true };
        Ok(self.add_transport(TransportKind::Plain, role, Some((request.rtcp_mux, request.comedia))))
    }

    async fn create_audio_level_observer(&self, _config: AudioObserverConfig) -> MediaResult<Arc<dyn AudioLevelObserver>> {
        let observer = Arc::new(FakeObserver {
            objects: Arc::downgrade(&self.objects),
            observed: Mutex::new(HashSet::new()),
            handlers: Handlers::new(),
        });
        *lock(&self.observer) = Some(observer.clone());
        Ok(observer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let transports: Vec<_> = lock(&self.objects.transports).values().cloned().collect();
        for transport in transports {
            MediaTransport::close(transport.as_ref());
        }
    }
}

pub struct FakeTransport {
    id: String,
    kind: TransportKind,
    role: TransportRole,
    plain: Option<(bool, bool)>,
    objects: Weak<Objects>,
    connected: AtomicBool,
    max_incoming_bitrate: Mutex<Option<u32>>,
    produce_gate: Mutex<Option<Arc<Notify>>>,
    closed: AtomicBool,
}

impl FakeTransport {
    /// Parks every later `produce` call after its open check until the
    /// returned gate is notified, like an engine round-trip in flight.
    pub fn hold_produce(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.produce_gate) = Some(gate.clone());
        gate
    }

    pub fn max_incoming_bitrate(&self) -> Option<u32> {
        *lock(&self.max_incoming_bitrate)
    }

    /// `(rtcp_mux, comedia)` for plain transports
    pub fn plain_options(&self) -> Option<(bool, bool)> {
        self.plain
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn objects(&self) -> MediaResult<Arc<Objects>> {
        self.objects
            .upgrade()
            .ok_or_else(|| MediaError::Closed(format!("router of transport {}", self.id)))
    }

    fn check_open(&self) -> MediaResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(MediaError::Closed(format!("transport {}", self.id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
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
        json!({ "id": self.id })
    }

    async fn connect(&self, _dtls_parameters: DtlsParameters) -> MediaResult<()> {
        self.check_open()?;
        if self.kind != TransportKind::WebRtc {
            return Err(MediaError::Transport("plain transports take no DTLS parameters".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn restart_ice(&self) -> MediaResult<Value> {
        self.check_open()?;
        Ok(json!({ "usernameFragment": new_id(), "password": new_id(), "iceLite": true }))
    }

    async fn set_max_incoming_bitrate(&self, bitrate: u32) -> MediaResult<()> {
        self.check_open()?;
        *lock(&self.max_incoming_bitrate) = Some(bitrate);
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        owner_id: &str,
    ) -> MediaResult<Arc<dyn MediaProducer>> {
        self.check_open()?;
        let gate = lock(&self.produce_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let objects = self.objects()?;
        let producer = Arc::new(FakeProducer {
            id: new_id(),
            kind,
            rtp_parameters,
            owner_id: owner_id.to_string(),
            transport_id: self.id.clone(),
            objects: self.objects.clone(),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            handlers: Handlers::new(),
        });
        lock(&objects.producers).insert(producer.id.clone(), producer.clone());
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &str,
        _rtp_capabilities: RtpCapabilities,
        paused: bool,
    ) -> MediaResult<Arc<dyn MediaConsumer>> {
        self.check_open()?;
        let objects = self.objects()?;
        let producer = lock(&objects.producers)
            .get(producer_id)
            .cloned()
            .filter(|p| !p.closed.load(Ordering::SeqCst))
            .ok_or_else(|| MediaError::Consumer(format!("producer {producer_id} not found")))?;

        let consumer = Arc::new(FakeConsumer {
            id: new_id(),
            producer_id: producer.id.clone(),
            transport_id: self.id.clone(),
            kind: producer.kind,
            rtp_parameters: producer.rtp_parameters.clone(),
            created_paused: paused,
            producer_paused: producer.paused.load(Ordering::SeqCst),
            paused: AtomicBool::new(paused),
            resume_calls: AtomicUsize::new(0),
            preferred_layers: Mutex::new(None),
            priority: Mutex::new(None),
            key_frame_requests: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            handlers: Handlers::new(),
        });
        lock(&objects.consumers).push(consumer.clone());
        Ok(consumer)
    }

    async fn get_stats(&self) -> MediaResult<Value> {
        Ok(json!([{ "type": "transport", "transportId": self.id }]))
    }

    /// Cascades like the engine: consumers see a transport close, producers
    /// close and take their remote consumers along.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(objects) = self.objects.upgrade() else {
            return;
        };
        let consumers = objects.consumers_where(|c| c.transport_id == self.id);
        let producers: Vec<_> = lock(&objects.producers)
            .values()
            .filter(|p| p.transport_id == self.id)
            .cloned()
            .collect();

        for consumer in consumers {
            if consumer.mark_closed() {
                consumer.handlers.emit(ConsumerEvent::TransportClose);
            }
        }
        for producer in producers {
            MediaProducer::close(producer.as_ref());
        }
    }
}

pub struct FakeProducer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    owner_id: String,
    transport_id: String,
    objects: Weak<Objects>,
    paused: AtomicBool,
    closed: AtomicBool,
    handlers: Handlers<ProducerEvent>,
}

impl FakeProducer {
    pub fn emit_score(&self, score: u8) {
        self.handlers.emit(ProducerEvent::Score(vec![ProducerScore {
            encoding_idx: 0,
            ssrc: 1111,
            rid: None,
            score,
        }]));
    }

    fn live_consumers(&self) -> Vec<Arc<FakeConsumer>> {
        match self.objects.upgrade() {
            Some(objects) => objects.consumers_where(|c| c.producer_id == self.id && !c.is_closed()),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl MediaProducer for FakeProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn owner_id(&self) -> Option<String> {
        Some(self.owner_id.clone())
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn pause(&self) -> MediaResult<()> {
        if !self.paused.swap(true, Ordering::SeqCst) {
            for consumer in self.live_consumers() {
                consumer.handlers.emit(ConsumerEvent::ProducerPause);
            }
        }
        Ok(())
    }

    async fn resume(&self) -> MediaResult<()> {
        if self.paused.swap(false, Ordering::SeqCst) {
            for consumer in self.live_consumers() {
                consumer.handlers.emit(ConsumerEvent::ProducerResume);
            }
        }
        Ok(())
    }

    async fn get_stats(&self) -> MediaResult<Value> {
        Ok(json!([{ "type": "inbound-rtp", "producerId": self.id }]))
    }

    fn on_event(&self, handler: ProducerEventHandler) {
        self.handlers.add(handler);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for consumer in self.live_consumers() {
            if consumer.mark_closed() {
                consumer.handlers.emit(ConsumerEvent::ProducerClose);
            }
        }
    }
}

pub struct FakeConsumer {
    id: String,
    producer_id: String,
    transport_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    created_paused: bool,
    producer_paused: bool,
    paused: AtomicBool,
    resume_calls: AtomicUsize,
    preferred_layers: Mutex<Option<(u8, Option<u8>)>>,
    priority: Mutex<Option<u8>>,
    key_frame_requests: AtomicUsize,
    closed: AtomicBool,
    handlers: Handlers<ConsumerEvent>,
}

impl FakeConsumer {
    pub fn created_paused(&self) -> bool {
        self.created_paused
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    pub fn preferred_layers(&self) -> Option<(u8, Option<u8>)> {
        *lock(&self.preferred_layers)
    }

    pub fn priority(&self) -> Option<u8> {
        *lock(&self.priority)
    }

    pub fn key_frame_requests(&self) -> usize {
        self.key_frame_requests.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    fn check_open(&self) -> MediaResult<()> {
        if self.is_closed() {
            Err(MediaError::Closed(format!("consumer {}", self.id)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MediaConsumer for FakeConsumer {
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
        ConsumerType::Simple
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn producer_paused(&self) -> bool {
        self.producer_paused
    }

    fn score(&self) -> ConsumerScore {
        ConsumerScore { score: 10, producer_score: 10, producer_scores: vec![10] }
    }

    async fn pause(&self) -> MediaResult<()> {
        self.check_open()?;
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> MediaResult<()> {
        self.check_open()?;
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn set_preferred_layers(&self, layers: ConsumerLayers) -> MediaResult<()> {
        self.check_open()?;
        *lock(&self.preferred_layers) = Some((layers.spatial_layer, layers.temporal_layer));
        Ok(())
    }

    async fn set_priority(&self, priority: u8) -> MediaResult<()> {
        self.check_open()?;
        *lock(&self.priority) = Some(priority);
        Ok(())
    }

    async fn request_key_frame(&self) -> MediaResult<()> {
        self.check_open()?;
        self.key_frame_requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_stats(&self) -> MediaResult<Value> {
        Ok(json!([{ "type": "outbound-rtp", "consumerId": self.id }]))
    }

    fn on_event(&self, handler: ConsumerEventHandler) {
        self.handlers.add(handler);
    }

    fn close(&self) {
        self.mark_closed();
    }
}

pub struct FakeObserver {
    objects: Weak<Objects>,
    observed: Mutex<HashSet<String>>,
    handlers: Handlers<AudioLevelEvent>,
}

impl FakeObserver {
    pub fn observes(&self, producer_id: &str) -> bool {
        lock(&self.observed).contains(producer_id)
    }

    /// Reports `producer_id` as the loudest producer
    pub fn emit_volumes(&self, producer_id: &str, volume: i8) {
        let producer = self
            .objects
            .upgrade()
            .and_then(|objects| lock(&objects.producers).get(producer_id).cloned())
            .expect("unknown producer");
        self.handlers.emit(AudioLevelEvent::Volumes { producer, volume });
    }

    pub fn emit_silence(&self) {
        self.handlers.emit(AudioLevelEvent::Silence);
    }
}

#[async_trait]
impl AudioLevelObserver for FakeObserver {
    async fn add_producer(&self, producer_id: &str) -> MediaResult<()> {
        lock(&self.observed).insert(producer_id.to_string());
        Ok(())
    }

    fn on_event(&self, handler: AudioLevelEventHandler) {
        self.handlers.add(handler);
    }
}

/// Records everything sent to a peer. Requests are acknowledged with `{}`
/// unless `reject_requests` was called.
pub struct FakeChannel {
    requests: Mutex<Vec<ServerRequest>>,
    notifications: Mutex<Vec<Value>>,
    reject: AtomicBool,
    closed: AtomicBool,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            reject: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn requests(&self) -> Vec<ServerRequest> {
        lock(&self.requests).clone()
    }

    /// Number of notifications sent with `method`
    pub fn count(&self, method: &str) -> usize {
        lock(&self.notifications)
            .iter()
            .filter(|n| n["method"] == method)
            .count()
    }

    /// Data of the latest notification sent with `method`
    pub fn last(&self, method: &str) -> Option<Value> {
        lock(&self.notifications)
            .iter()
            .rev()
            .find(|n| n["method"] == method)
            .map(|n| n["data"].clone())
    }

    pub fn reject_requests(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerChannel for FakeChannel {
    async fn request(&self, request: ServerRequest) -> Result<Value, SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        lock(&self.requests).push(request);
        if self.reject.load(Ordering::SeqCst) {
            return Err(SignalingError::Rejected { code: 500, reason: "rejected".into() });
        }
        Ok(json!({}))
    }

    fn notify(&self, notification: Notification) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        let value = serde_json::to_value(&notification).map_err(|e| SignalingError::Malformed(e.to_string()))?;
        lock(&self.notifications).push(value);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
