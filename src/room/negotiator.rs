#![forbid(unsafe_code)]

// Two-phase consumer creation: create the consumer (video paused), tell the
// consuming peer about it, and only activate it once the peer acknowledges.

use super::peer::PeerSession;
use crate::media::{ConsumerEvent, MediaConsumer, MediaProducer, MediaRouter};
use crate::metrics::ServerMetrics;
use crate::signaling::{NewConsumer, Notification, ServerRequest};
use mediasoup::prelude::MediaKind;
use serde_json::json;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct ConsumerNegotiator {
    router: Arc<dyn MediaRouter>,
    metrics: ServerMetrics,
}

impl ConsumerNegotiator {
    pub fn new(router: Arc<dyn MediaRouter>, metrics: ServerMetrics) -> Self {
        Self { router, metrics }
    }

    /// Makes `producer` (owned by `owner_id`) visible to `consumer_peer`.
    ///
    /// Never fails: incompatibility is an expected outcome and engine or
    /// signaling failures only cost this one relationship.
    pub async fn negotiate(
        &self,
        consumer_peer: &Arc<PeerSession>,
        owner_id: &str,
        producer: &Arc<dyn MediaProducer>,
    ) {
        if !consumer_peer.consume() {
            return;
        }
        let producer_id = producer.id();

        let Some(rtp_capabilities) = consumer_peer.rtp_capabilities() else {
            return;
        };
        if !self.router.can_consume(&producer_id, &rtp_capabilities) {
            debug!("Peer {} cannot consume producer {}", consumer_peer.id(), producer_id);
            return;
        }
        if !consumer_peer.media.reserve_producer(&producer_id) {
            return;
        }

        let Some(transport) = consumer_peer.media.consuming_transport() else {
            warn!("Peer {} has no consuming transport, skipping producer {}", consumer_peer.id(), producer_id);
            consumer_peer.media.release_producer(&producer_id);
            return;
        };

        let paused = producer.kind() == MediaKind::Video;
        let consumer = match transport.consume(&producer_id, rtp_capabilities, paused).await {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!("Failed to create consumer for peer {}: {}", consumer_peer.id(), e);
                consumer_peer.media.release_producer(&producer_id);
                self.metrics.inc_negotiation_failures();
                return;
            }
        };
        let consumer_id = consumer.id();

        consumer_peer.media.add_consumer(consumer.clone());
        forward_consumer_events(consumer_peer, &consumer);
        self.metrics.inc_consumers_created();

        let request = ServerRequest::NewConsumer(NewConsumer {
            peer_id: owner_id.to_string(),
            producer_id: producer_id.clone(),
            id: consumer_id.clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
            consumer_type: consumer.consumer_type(),
            app_data: json!({ "peerId": owner_id }),
            producer_paused: consumer.producer_paused(),
        });

        if let Err(e) = consumer_peer.channel().request(request).await {
            warn!("newConsumer request to peer {} failed: {}", consumer_peer.id(), e);
            self.abandon(consumer_peer, &consumer);
            return;
        }

        if consumer.kind() == MediaKind::Video {
            // Resuming makes the engine ask the sender for a key frame
            if let Err(e) = consumer.resume().await {
                warn!("Failed to resume consumer {}: {}", consumer_id, e);
                self.abandon(consumer_peer, &consumer);
                return;
            }
        }

        info!("Peer {} consuming producer {} via consumer {}", consumer_peer.id(), producer_id, consumer_id);
        consumer_peer.notify(Notification::ConsumerScore {
            consumer_id,
            score: consumer.score(),
        });
    }

    fn abandon(&self, consumer_peer: &PeerSession, consumer: &Arc<dyn MediaConsumer>) {
        self.metrics.inc_negotiation_failures();
        consumer_peer.media.remove_consumer(&consumer.id());
        consumer.close();
    }
}

/// Forwards the consumer's lifetime signals to its session. Holds only a weak
/// reference so the engine object never keeps the session alive.
fn forward_consumer_events(consumer_peer: &Arc<PeerSession>, consumer: &Arc<dyn MediaConsumer>) {
    let peer: Weak<PeerSession> = Arc::downgrade(consumer_peer);
    let consumer_id = consumer.id();

    consumer.on_event(Box::new(move |event| {
        let Some(peer) = peer.upgrade() else {
            return;
        };
        match event {
            ConsumerEvent::TransportClose => {
                peer.media.remove_consumer(&consumer_id);
            }
            ConsumerEvent::ProducerClose => {
                peer.media.remove_consumer(&consumer_id);
                peer.notify(Notification::ConsumerClosed {
                    consumer_id: consumer_id.clone(),
                });
            }
            ConsumerEvent::ProducerPause => peer.notify(Notification::ConsumerPaused {
                consumer_id: consumer_id.clone(),
            }),
            ConsumerEvent::ProducerResume => peer.notify(Notification::ConsumerResumed {
                consumer_id: consumer_id.clone(),
            }),
            ConsumerEvent::Score(score) => peer.notify(Notification::ConsumerScore {
                consumer_id: consumer_id.clone(),
                score,
            }),
            ConsumerEvent::LayersChange(layers) => peer.notify(Notification::ConsumerLayersChanged {
                consumer_id: consumer_id.clone(),
                spatial_layer: layers.map(|l| l.spatial_layer),
                temporal_layer: layers.and_then(|l| l.temporal_layer),
            }),
        }
    }));
}
