#![forbid(unsafe_code)]

// Per-participant session state: signaling peers and the media registry
// they share with broadcasters

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::media::{MediaConsumer, MediaProducer, MediaTransport};
use crate::signaling::{Notification, PeerChannel};
use mediasoup::prelude::RtpCapabilities;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Client device descriptor, echoed to other peers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Public view of a session, as listed in join results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    pub display_name: String,
    pub device: Device,
}

/// Transports, producers and consumers owned by one session
#[derive(Default)]
pub struct MediaRegistry {
    transports: RwLock<HashMap<String, Arc<dyn MediaTransport>>>,
    producers: RwLock<HashMap<String, Arc<dyn MediaProducer>>>,
    consumers: RwLock<HashMap<String, Arc<dyn MediaConsumer>>>,
    /// Producer ids with a live or in-flight consumer in this session
    consumed_producers: RwLock<HashSet<String>>,
}

impl MediaRegistry {
    pub fn add_transport(&self, transport: Arc<dyn MediaTransport>) {
        self.transports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(transport.id(), transport);
    }

    pub fn transport(&self, transport_id: &str) -> OrchestrationResult<Arc<dyn MediaTransport>> {
        self.transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(transport_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found("transport", transport_id))
    }

    /// First transport tagged for receiving media
    pub fn consuming_transport(&self) -> Option<Arc<dyn MediaTransport>> {
        self.transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|t| t.role().consuming)
            .cloned()
    }

    pub fn transport_ids(&self) -> Vec<String> {
        self.transports
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn transport_count(&self) -> usize {
        self.transports.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn add_producer(&self, producer: Arc<dyn MediaProducer>) {
        self.producers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(producer.id(), producer);
    }

    pub fn producer(&self, producer_id: &str) -> OrchestrationResult<Arc<dyn MediaProducer>> {
        self.producers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(producer_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found("producer", producer_id))
    }

    pub fn remove_producer(&self, producer_id: &str) -> Option<Arc<dyn MediaProducer>> {
        self.producers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(producer_id)
    }

    /// Snapshot of the current producers
    pub fn producers(&self) -> Vec<Arc<dyn MediaProducer>> {
        self.producers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn add_consumer(&self, consumer: Arc<dyn MediaConsumer>) {
        self.consumers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(consumer.id(), consumer);
    }

    pub fn consumer(&self, consumer_id: &str) -> OrchestrationResult<Arc<dyn MediaConsumer>> {
        self.consumers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(consumer_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found("consumer", consumer_id))
    }

    /// Deregisters a consumer and frees its producer for a later negotiation
    pub fn remove_consumer(&self, consumer_id: &str) -> Option<Arc<dyn MediaConsumer>> {
        let consumer = self
            .consumers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(consumer_id)?;
        self.release_producer(&consumer.producer_id());
        Some(consumer)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Claims `producer_id` for a new consumer. Returns false if this session
    /// already consumes it or a negotiation for it is in flight.
    pub fn reserve_producer(&self, producer_id: &str) -> bool {
        self.consumed_producers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(producer_id.to_string())
    }

    pub fn release_producer(&self, producer_id: &str) {
        self.consumed_producers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(producer_id);
    }

    /// Closes every transport, which takes their producers and consumers with them.
    pub fn close_all(&self) {
        // Engines may fire close signals synchronously; never hold a lock while closing
        let transports: Vec<_> = self
            .transports
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, t)| t)
            .collect();
        let producers: Vec<_> = self
            .producers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, p)| p)
            .collect();
        let consumers: Vec<_> = self
            .consumers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, c)| c)
            .collect();
        self.consumed_producers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        for transport in transports {
            transport.close();
        }
        for producer in producers {
            producer.close();
        }
        for consumer in consumers {
            consumer.close();
        }
    }
}

struct PeerState {
    joined: bool,
    display_name: String,
    device: Device,
    rtp_capabilities: Option<RtpCapabilities>,
}

/// A signaling-connected participant.
///
/// Identity is the `Arc`: a replacement session for the same peer id is a
/// different session, so stale close signals cannot tear it down.
pub struct PeerSession {
    id: String,
    consume: bool,
    channel: Arc<dyn PeerChannel>,
    state: RwLock<PeerState>,
    pub(crate) media: MediaRegistry,
    closed: AtomicBool,
}

impl PeerSession {
    pub fn new(id: String, consume: bool, channel: Arc<dyn PeerChannel>) -> Self {
        Self {
            id,
            consume,
            channel,
            state: RwLock::new(PeerState {
                joined: false,
                display_name: String::new(),
                device: Device::default(),
                rtp_capabilities: None,
            }),
            media: MediaRegistry::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether this peer wants to receive media at all
    pub fn consume(&self) -> bool {
        self.consume
    }

    pub fn joined(&self) -> bool {
        self.state.read().unwrap_or_else(|e| e.into_inner()).joined
    }

    pub fn display_name(&self) -> String {
        self.state.read().unwrap_or_else(|e| e.into_inner()).display_name.clone()
    }

    pub fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).rtp_capabilities.clone()
    }

    pub fn info(&self) -> PeerInfo {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        PeerInfo {
            id: self.id.clone(),
            display_name: state.display_name.clone(),
            device: state.device.clone(),
        }
    }

    pub fn channel(&self) -> &Arc<dyn PeerChannel> {
        &self.channel
    }

    /// Marks the peer joined. Fails if it already is, so only one join ever wins.
    pub(crate) fn mark_joined(
        &self,
        display_name: String,
        device: Device,
        rtp_capabilities: Option<RtpCapabilities>,
    ) -> OrchestrationResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.joined {
            return Err(OrchestrationError::state("peer already joined"));
        }
        state.joined = true;
        state.display_name = display_name;
        state.device = device;
        state.rtp_capabilities = rtp_capabilities;
        Ok(())
    }

    /// Returns the previous display name
    pub(crate) fn set_display_name(&self, display_name: String) -> String {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut state.display_name, display_name)
    }

    pub(crate) fn require_joined(&self) -> OrchestrationResult<()> {
        if self.joined() {
            Ok(())
        } else {
            Err(OrchestrationError::state("peer not yet joined"))
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true for exactly one caller
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Best-effort notification: delivery failures are logged and dropped.
    pub fn notify(&self, notification: Notification) {
        if let Err(e) = self.channel.notify(notification) {
            debug!("Dropped notification for peer {}: {}", self.id, e);
        }
    }
}
