#![forbid(unsafe_code)]

// Server-driven participants: same media registries as a peer, but created
// and torn down through explicit API calls instead of a signaling connection.

use super::peer::{Device, MediaRegistry, PeerInfo};
use super::Room;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::media::{
    ConsumerEvent, MediaConsumer, MediaProducer, PlainTransportRequest, ProducerEvent, TransportKind,
    TransportRole, WebRtcTransportRequest,
};
use crate::signaling::Notification;
use mediasoup::prelude::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::hash_map::Entry;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub struct BroadcasterSession {
    id: String,
    display_name: String,
    device: Device,
    rtp_capabilities: Option<RtpCapabilities>,
    pub(crate) media: MediaRegistry,
}

impl BroadcasterSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            device: self.device.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterDevice {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcasterRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub device: BroadcasterDevice,
    #[serde(default)]
    pub rtp_capabilities: Option<RtpCapabilities>,
}

fn default_comedia() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterTransportRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub rtcp_mux: bool,
    #[serde(default = "default_comedia")]
    pub comedia: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectBroadcasterTransportRequest {
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcasterProducerRequest {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProducerInfo {
    id: String,
    kind: MediaKind,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsumablePeer {
    id: String,
    display_name: String,
    device: Device,
    producers: Vec<ProducerInfo>,
}

impl Room {
    fn broadcaster(&self, broadcaster_id: &str) -> OrchestrationResult<Arc<BroadcasterSession>> {
        self.broadcasters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(broadcaster_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::not_found("broadcaster", broadcaster_id))
    }

    fn is_current_broadcaster(&self, broadcaster: &Arc<BroadcasterSession>) -> bool {
        self.broadcasters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(broadcaster.id())
            .is_some_and(|current| Arc::ptr_eq(current, broadcaster))
    }

    /// Registers a broadcaster. With receive capabilities, answers with every
    /// joined peer and the producers the broadcaster is able to consume.
    pub fn create_broadcaster(&self, req: CreateBroadcasterRequest) -> OrchestrationResult<Value> {
        if req.id.is_empty() {
            return Err(OrchestrationError::validation("missing id"));
        }
        if req.display_name.is_empty() {
            return Err(OrchestrationError::validation("missing displayName"));
        }
        if req.device.name.is_empty() {
            return Err(OrchestrationError::validation("missing device.name"));
        }

        let broadcaster = Arc::new(BroadcasterSession {
            id: req.id.clone(),
            display_name: req.display_name,
            device: Device {
                flag: Some("broadcaster".to_string()),
                name: Some(req.device.name),
                version: req.device.version,
            },
            rtp_capabilities: req.rtp_capabilities,
            media: MediaRegistry::default(),
        });

        {
            let mut broadcasters = self.broadcasters.write().unwrap_or_else(|e| e.into_inner());
            if self.is_closed() {
                return Err(OrchestrationError::state(format!("room {} is closed", self.id)));
            }
            match broadcasters.entry(req.id.clone()) {
                Entry::Occupied(_) => {
                    return Err(OrchestrationError::AlreadyExists(format!(
                        "broadcaster with id \"{}\" already exists",
                        req.id
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(broadcaster.clone());
                }
            }
        }
        info!("Broadcaster {} created in room {}", broadcaster.id, self.id);

        let info = broadcaster.info();
        self.notify_joined_except(
            &broadcaster.id,
            Notification::NewPeer {
                id: info.id,
                display_name: info.display_name,
                device: info.device,
            },
        );

        let Some(rtp_capabilities) = &broadcaster.rtp_capabilities else {
            return Ok(json!({ "peers": [] }));
        };

        let peers: Vec<ConsumablePeer> = self
            .joined_peers()
            .iter()
            .map(|peer| {
                let info = peer.info();
                let producers = peer
                    .media
                    .producers()
                    .iter()
                    .filter(|p| self.router.can_consume(&p.id(), rtp_capabilities))
                    .map(|p| ProducerInfo { id: p.id(), kind: p.kind() })
                    .collect();
                ConsumablePeer {
                    id: info.id,
                    display_name: info.display_name,
                    device: info.device,
                    producers,
                }
            })
            .collect();

        Ok(json!({ "peers": peers }))
    }

    pub fn delete_broadcaster(&self, broadcaster_id: &str) -> OrchestrationResult<()> {
        let broadcaster = self
            .broadcasters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(broadcaster_id)
            .ok_or_else(|| OrchestrationError::not_found("broadcaster", broadcaster_id))?;

        broadcaster.media.close_all();
        info!("Broadcaster {} deleted from room {}", broadcaster_id, self.id);

        self.notify_joined_except(
            broadcaster_id,
            Notification::PeerClosed {
                peer_id: broadcaster_id.to_string(),
            },
        );
        Ok(())
    }

    pub async fn create_broadcaster_transport(
        &self,
        broadcaster_id: &str,
        req: BroadcasterTransportRequest,
    ) -> OrchestrationResult<Value> {
        let broadcaster = self.broadcaster(broadcaster_id)?;

        let transport = match req.kind.as_str() {
            "webrtc" => {
                self.router
                    .create_webrtc_transport(WebRtcTransportRequest {
                        role: TransportRole { producing: true, consuming: true },
                        force_tcp: false,
                    })
                    .await?
            }
            "plain" => {
                self.router
                    .create_plain_transport(PlainTransportRequest {
                        rtcp_mux: req.rtcp_mux,
                        comedia: req.comedia,
                    })
                    .await?
            }
            other => return Err(OrchestrationError::validation(format!("invalid type \"{other}\""))),
        };

        if !self.is_current_broadcaster(&broadcaster) {
            transport.close();
            return Err(OrchestrationError::not_found("broadcaster", broadcaster_id));
        }

        let parameters = transport.parameters();
        debug!("Broadcaster {} created {} transport {}", broadcaster_id, req.kind, transport.id());
        broadcaster.media.add_transport(transport);
        Ok(parameters)
    }

    pub async fn connect_broadcaster_transport(
        &self,
        broadcaster_id: &str,
        transport_id: &str,
        req: ConnectBroadcasterTransportRequest,
    ) -> OrchestrationResult<()> {
        let transport = self.broadcaster(broadcaster_id)?.media.transport(transport_id)?;
        if transport.kind() != TransportKind::WebRtc {
            return Err(OrchestrationError::unsupported(format!(
                "transport with id \"{transport_id}\" is not a WebRTC transport"
            )));
        }
        transport.connect(req.dtls_parameters).await?;
        Ok(())
    }

    pub async fn create_broadcaster_producer(
        self: &Arc<Self>,
        broadcaster_id: &str,
        transport_id: &str,
        req: BroadcasterProducerRequest,
    ) -> OrchestrationResult<Value> {
        let broadcaster = self.broadcaster(broadcaster_id)?;
        let transport = broadcaster.media.transport(transport_id)?;

        let producer = transport.produce(req.kind, req.rtp_parameters, broadcaster_id).await?;
        // Deleted while the engine was busy
        if !self.is_current_broadcaster(&broadcaster) {
            producer.close();
            return Err(OrchestrationError::not_found("broadcaster", broadcaster_id));
        }
        let producer_id = producer.id();
        broadcaster.media.add_producer(producer.clone());
        self.metrics.inc_producers_created();

        producer.on_event(Box::new({
            let producer_id = producer_id.clone();
            move |event| match event {
                ProducerEvent::VideoOrientationChange(orientation) => {
                    debug!("Broadcaster producer {} video orientation changed: {}", producer_id, orientation);
                }
                ProducerEvent::Score(_) => {}
            }
        }));

        info!("Broadcaster {} producing {:?} as {}", broadcaster_id, req.kind, producer_id);
        self.audio.add_producer(&producer).await;
        self.spawn_fan_out(broadcaster_id.to_string(), producer);

        Ok(json!({ "id": producer_id }))
    }

    pub async fn create_broadcaster_consumer(
        &self,
        broadcaster_id: &str,
        transport_id: &str,
        producer_id: &str,
    ) -> OrchestrationResult<Value> {
        let broadcaster = self.broadcaster(broadcaster_id)?;
        let Some(rtp_capabilities) = broadcaster.rtp_capabilities.clone() else {
            return Err(OrchestrationError::validation("broadcaster does not have rtpCapabilities"));
        };
        let transport = broadcaster.media.transport(transport_id)?;

        if !self.router.can_consume(producer_id, &rtp_capabilities) {
            return Err(OrchestrationError::validation(format!(
                "cannot consume producer with id \"{producer_id}\""
            )));
        }

        let consumer = transport.consume(producer_id, rtp_capabilities, false).await?;
        if !self.is_current_broadcaster(&broadcaster) {
            consumer.close();
            return Err(OrchestrationError::not_found("broadcaster", broadcaster_id));
        }
        broadcaster.media.add_consumer(consumer.clone());
        deregister_on_close(&broadcaster, &consumer);
        self.metrics.inc_consumers_created();

        Ok(json!({
            "id": consumer.id(),
            "producerId": producer_id,
            "kind": consumer.kind(),
            "rtpParameters": consumer.rtp_parameters(),
            "type": consumer.consumer_type(),
        }))
    }
}

fn deregister_on_close(broadcaster: &Arc<BroadcasterSession>, consumer: &Arc<dyn MediaConsumer>) {
    let broadcaster: Weak<BroadcasterSession> = Arc::downgrade(broadcaster);
    let consumer_id = consumer.id();

    consumer.on_event(Box::new(move |event| {
        if matches!(event, ConsumerEvent::TransportClose | ConsumerEvent::ProducerClose) {
            if let Some(broadcaster) = broadcaster.upgrade() {
                broadcaster.media.remove_consumer(&consumer_id);
            }
        }
    }));
}
