#![forbid(unsafe_code)]

// Signaling request dispatch for joined and joining peers

use super::peer::{Device, PeerInfo, PeerSession};
use super::Room;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::media::{MediaProducer, ProducerEvent, TransportKind, TransportRole, WebRtcTransportRequest};
use crate::signaling::Notification;
use mediasoup::prelude::{ConsumerLayers, DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    display_name: String,
    #[serde(default)]
    device: Device,
    #[serde(default)]
    rtp_capabilities: Option<RtpCapabilities>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct CreateTransportRequest {
    force_tcp: bool,
    producing: bool,
    consuming: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTransportRequest {
    transport_id: String,
    dtls_parameters: DtlsParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransportRef {
    transport_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProduceRequest {
    transport_id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProducerRef {
    producer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumerRef {
    consumer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetLayersRequest {
    consumer_id: String,
    spatial_layer: u8,
    #[serde(default)]
    temporal_layer: Option<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetPriorityRequest {
    consumer_id: String,
    priority: u8,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeDisplayNameRequest {
    display_name: String,
}

fn parse<T: DeserializeOwned>(data: Value) -> OrchestrationResult<T> {
    Ok(serde_json::from_value(data)?)
}

impl Room {
    /// Handles one inbound signaling request from `peer`.
    ///
    /// The returned value is the accept payload; any error becomes a
    /// rejection carrying the error's code.
    pub async fn handle_request(
        self: &Arc<Self>,
        peer: &Arc<PeerSession>,
        method: &str,
        data: Value,
    ) -> OrchestrationResult<Value> {
        debug!("Peer {} request {}", peer.id(), method);
        if peer.is_closed() {
            return Err(OrchestrationError::state("peer session is closed"));
        }

        match method {
            "getRouterRtpCapabilities" => Ok(serde_json::to_value(self.rtp_capabilities())?),
            "join" => self.join(peer, parse(data)?).await,
            "createWebRtcTransport" => self.create_webrtc_transport(peer, parse(data)?).await,
            "connectWebRtcTransport" => {
                let req: ConnectTransportRequest = parse(data)?;
                let transport = peer.media.transport(&req.transport_id)?;
                if transport.kind() != TransportKind::WebRtc {
                    return Err(OrchestrationError::unsupported("transport does not accept DTLS parameters"));
                }
                transport.connect(req.dtls_parameters).await?;
                Ok(json!({}))
            }
            "restartIce" => {
                let req: TransportRef = parse(data)?;
                let transport = peer.media.transport(&req.transport_id)?;
                Ok(transport.restart_ice().await?)
            }
            "produce" => self.produce(peer, parse(data)?).await,
            "closeProducer" => {
                peer.require_joined()?;
                let req: ProducerRef = parse(data)?;
                let producer = peer
                    .media
                    .remove_producer(&req.producer_id)
                    .ok_or_else(|| OrchestrationError::not_found("producer", &req.producer_id))?;
                producer.close();
                Ok(json!({}))
            }
            "pauseProducer" => {
                peer.require_joined()?;
                let req: ProducerRef = parse(data)?;
                peer.media.producer(&req.producer_id)?.pause().await?;
                Ok(json!({}))
            }
            "resumeProducer" => {
                peer.require_joined()?;
                let req: ProducerRef = parse(data)?;
                peer.media.producer(&req.producer_id)?.resume().await?;
                Ok(json!({}))
            }
            "pauseConsumer" => {
                peer.require_joined()?;
                let req: ConsumerRef = parse(data)?;
                peer.media.consumer(&req.consumer_id)?.pause().await?;
                Ok(json!({}))
            }
            "resumeConsumer" => {
                peer.require_joined()?;
                let req: ConsumerRef = parse(data)?;
                peer.media.consumer(&req.consumer_id)?.resume().await?;
                Ok(json!({}))
            }
            "setConsumerPreferedLayers" | "setConsumerPreferredLayers" => {
                peer.require_joined()?;
                let req: SetLayersRequest = parse(data)?;
                let layers = ConsumerLayers {
                    spatial_layer: req.spatial_layer,
                    temporal_layer: req.temporal_layer,
                };
                peer.media.consumer(&req.consumer_id)?.set_preferred_layers(layers).await?;
                Ok(json!({}))
            }
            "setConsumerPriority" => {
                peer.require_joined()?;
                let req: SetPriorityRequest = parse(data)?;
                peer.media.consumer(&req.consumer_id)?.set_priority(req.priority).await?;
                Ok(json!({}))
            }
            "requestConsumerKeyFrame" => {
                peer.require_joined()?;
                let req: ConsumerRef = parse(data)?;
                peer.media.consumer(&req.consumer_id)?.request_key_frame().await?;
                Ok(json!({}))
            }
            "changeDisplayName" => {
                peer.require_joined()?;
                let req: ChangeDisplayNameRequest = parse(data)?;
                let old_display_name = peer.set_display_name(req.display_name.clone());
                self.notify_joined_except(
                    peer.id(),
                    Notification::PeerDisplayNameChanged {
                        peer_id: peer.id().to_string(),
                        display_name: req.display_name,
                        old_display_name,
                    },
                );
                Ok(json!({}))
            }
            "getTransportStats" => {
                let req: TransportRef = parse(data)?;
                Ok(peer.media.transport(&req.transport_id)?.get_stats().await?)
            }
            "getProducerStats" => {
                let req: ProducerRef = parse(data)?;
                Ok(peer.media.producer(&req.producer_id)?.get_stats().await?)
            }
            "getConsumerStats" => {
                let req: ConsumerRef = parse(data)?;
                Ok(peer.media.consumer(&req.consumer_id)?.get_stats().await?)
            }
            other => Err(OrchestrationError::unsupported(format!("unknown request method \"{other}\""))),
        }
    }

    async fn join(self: &Arc<Self>, peer: &Arc<PeerSession>, req: JoinRequest) -> OrchestrationResult<Value> {
        peer.mark_joined(req.display_name, req.device, req.rtp_capabilities)?;
        self.metrics.inc_joins();

        let mut peers: Vec<PeerInfo> = self
            .joined_peers()
            .iter()
            .filter(|other| other.id() != peer.id())
            .map(|other| other.info())
            .collect();
        peers.extend(self.broadcaster_snapshot().iter().map(|b| b.info()));

        let info = peer.info();
        info!("Peer {} joined room {} as {:?}", peer.id(), self.id, info.display_name);
        self.notify_joined_except(
            peer.id(),
            Notification::NewPeer {
                id: info.id,
                display_name: info.display_name,
                device: info.device,
            },
        );

        self.spawn_catch_up(peer.clone());

        Ok(json!({ "peers": peers }))
    }

    async fn create_webrtc_transport(
        &self,
        peer: &PeerSession,
        req: CreateTransportRequest,
    ) -> OrchestrationResult<Value> {
        let role = TransportRole {
            producing: req.producing,
            // Peers that opted out of receiving never get a consuming transport
            consuming: req.consuming && peer.consume(),
        };
        let transport = self
            .router
            .create_webrtc_transport(WebRtcTransportRequest {
                role,
                force_tcp: req.force_tcp,
            })
            .await?;

        if let Some(bitrate) = self.settings.max_incoming_bitrate {
            if let Err(e) = transport.set_max_incoming_bitrate(bitrate).await {
                warn!("Failed to limit incoming bitrate on transport {}: {}", transport.id(), e);
            }
        }

        // The session may have been torn down while the engine was busy
        if peer.is_closed() {
            transport.close();
            return Err(OrchestrationError::state("peer session is closed"));
        }

        let parameters = transport.parameters();
        debug!("Peer {} created transport {} ({:?})", peer.id(), transport.id(), role);
        peer.media.add_transport(transport);
        Ok(parameters)
    }

    async fn produce(self: &Arc<Self>, peer: &Arc<PeerSession>, req: ProduceRequest) -> OrchestrationResult<Value> {
        peer.require_joined()?;
        let transport = peer.media.transport(&req.transport_id)?;

        let producer = transport.produce(req.kind, req.rtp_parameters, peer.id()).await?;
        if peer.is_closed() {
            producer.close();
            return Err(OrchestrationError::state("peer session is closed"));
        }
        let producer_id = producer.id();
        peer.media.add_producer(producer.clone());
        forward_producer_events(peer, &producer);
        self.metrics.inc_producers_created();
        info!("Peer {} producing {:?} as {}", peer.id(), req.kind, producer_id);

        self.audio.add_producer(&producer).await;
        self.spawn_fan_out(peer.id().to_string(), producer);

        Ok(json!({ "id": producer_id }))
    }
}

/// Producer scores go back to the owning peer; orientation changes are only logged.
fn forward_producer_events(peer: &Arc<PeerSession>, producer: &Arc<dyn MediaProducer>) {
    let peer: Weak<PeerSession> = Arc::downgrade(peer);
    let producer_id = producer.id();

    producer.on_event(Box::new(move |event| match event {
        ProducerEvent::Score(score) => {
            if let Some(peer) = peer.upgrade() {
                peer.notify(Notification::ProducerScore {
                    producer_id: producer_id.clone(),
                    score,
                });
            }
        }
        ProducerEvent::VideoOrientationChange(orientation) => {
            debug!("Producer {} video orientation changed: {}", producer_id, orientation);
        }
    }));
}
