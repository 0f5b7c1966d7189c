#![forbid(unsafe_code)]

// Room module - per-room session registries, lifecycle and notification fan-out

pub mod api;
pub mod audio;
pub mod broadcaster;
pub mod dispatch;
pub mod negotiator;
pub mod peer;
pub mod registry;
pub mod settings;

pub use broadcaster::BroadcasterSession;
pub use peer::{Device, MediaRegistry, PeerInfo, PeerSession};
pub use registry::RoomRegistry;
pub use settings::{CodecFlags, RoomOptions, RoomSettings};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::media::{MediaEngine, MediaProducer, MediaRouter};
use crate::metrics::ServerMetrics;
use crate::signaling::{Notification, PeerChannel};
use audio::AudioActivityBridge;
use futures_util::future::join_all;
use mediasoup::prelude::RtpCapabilitiesFinalized;
use negotiator::ConsumerNegotiator;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};

/// A multi-party session scope: one router, its peers and broadcasters.
pub struct Room {
    id: String,
    router: Arc<dyn MediaRouter>,
    rtp_capabilities: RtpCapabilitiesFinalized,
    audio: AudioActivityBridge,
    negotiator: ConsumerNegotiator,
    peers: RwLock<HashMap<String, Arc<PeerSession>>>,
    broadcasters: RwLock<HashMap<String, Arc<BroadcasterSession>>>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    /// Bumped whenever the room becomes empty; only the newest grace timer may close it
    grace_epoch: AtomicU64,
    settings: Arc<RoomSettings>,
    metrics: ServerMetrics,
}

impl Room {
    /// Creates the room's router (restricted to the preferred video codec
    /// family, if any) and its audio-level observer.
    pub async fn create(
        engine: &dyn MediaEngine,
        room_id: &str,
        options: RoomOptions,
        settings: Arc<RoomSettings>,
        metrics: ServerMetrics,
    ) -> OrchestrationResult<Arc<Self>> {
        let codecs = settings.router_config.codecs_for(options.codec_preference);
        let router = engine.create_router(codecs).await?;

        let observer = match router.create_audio_level_observer(settings.audio_observer).await {
            Ok(observer) => observer,
            Err(e) => {
                router.close();
                return Err(e.into());
            }
        };

        let (closed_tx, _) = watch::channel(false);
        let room = Arc::new_cyclic(|room| Self {
            id: room_id.to_string(),
            rtp_capabilities: router.rtp_capabilities(),
            audio: AudioActivityBridge::bind(observer, room.clone()),
            negotiator: ConsumerNegotiator::new(router.clone(), metrics.clone()),
            router,
            peers: RwLock::new(HashMap::new()),
            broadcasters: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            closed_tx,
            grace_epoch: AtomicU64::new(0),
            settings,
            metrics: metrics.clone(),
        });

        metrics.inc_rooms_created();
        info!("Created room {} ({:?})", room_id, options.codec_preference);
        // A room nobody attaches to must not outlive the grace period
        room.start_grace_timer();
        Ok(room)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rtp_capabilities(&self) -> &RtpCapabilitiesFinalized {
        &self.rtp_capabilities
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves to `true` once the room has closed
    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn broadcaster_count(&self) -> usize {
        self.broadcasters.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn peer(&self, peer_id: &str) -> Option<Arc<PeerSession>> {
        self.peers.read().unwrap_or_else(|e| e.into_inner()).get(peer_id).cloned()
    }

    /// Snapshot of joined, still-open peers
    pub fn joined_peers(&self) -> Vec<Arc<PeerSession>> {
        self.peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|p| p.joined() && !p.is_closed())
            .cloned()
            .collect()
    }

    fn broadcaster_snapshot(&self) -> Vec<Arc<BroadcasterSession>> {
        self.broadcasters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn notify_joined_except(&self, exclude_id: &str, notification: Notification) {
        for peer in self.joined_peers() {
            if peer.id() != exclude_id {
                peer.notify(notification.clone());
            }
        }
    }

    /// Binds a new signaling connection to the room. An existing session with
    /// the same id is evicted first.
    pub fn attach(
        self: &Arc<Self>,
        peer_id: &str,
        consume: bool,
        channel: Arc<dyn PeerChannel>,
    ) -> OrchestrationResult<Arc<PeerSession>> {
        let session = Arc::new(PeerSession::new(peer_id.to_string(), consume, channel));

        let previous = {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            // Checked under the lock so `close` cannot miss this session
            if self.is_closed() {
                return Err(OrchestrationError::state(format!("room {} is closed", self.id)));
            }
            peers.insert(peer_id.to_string(), session.clone())
        };

        if let Some(previous) = previous {
            info!("Peer {} reconnected to room {}, evicting previous session", peer_id, self.id);
            self.teardown_peer(&previous);
        }

        info!("Peer {} attached to room {}", peer_id, self.id);
        Ok(session)
    }

    /// Called when a peer's signaling channel closes.
    pub fn peer_closed(self: &Arc<Self>, session: &Arc<PeerSession>) {
        let now_empty = {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            match peers.get(session.id()) {
                Some(current) if Arc::ptr_eq(current, session) => {
                    peers.remove(session.id());
                    peers.is_empty()
                }
                _ => false,
            }
        };

        self.teardown_peer(session);

        if now_empty && !self.is_closed() {
            self.start_grace_timer();
        }
    }

    fn teardown_peer(&self, session: &Arc<PeerSession>) {
        if !session.mark_closed() {
            return;
        }
        info!("Peer {} left room {}", session.id(), self.id);

        let was_joined = session.joined();
        session.channel().close();
        session.media.close_all();

        if was_joined {
            self.notify_joined_except(
                session.id(),
                Notification::PeerClosed {
                    peer_id: session.id().to_string(),
                },
            );
        }
    }

    /// Closes the room if it is still empty once the grace period elapses.
    fn start_grace_timer(self: &Arc<Self>) {
        let room = Arc::downgrade(self);
        let grace = self.settings.empty_room_grace;
        let epoch = self.grace_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Room {} is empty, closing in {:?} unless someone returns", self.id, grace);

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(room) = room.upgrade() else {
                return;
            };
            let newest = room.grace_epoch.load(Ordering::Acquire) == epoch;
            if newest && !room.is_closed() && room.peer_count() == 0 {
                info!("Room {} stayed empty for {:?}, closing", room.id, grace);
                room.close();
            }
        });
    }

    /// Closes every session and the router. Only the first call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing room {}", self.id);

        let peers: Vec<_> = self
            .peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, p)| p)
            .collect();
        for peer in peers {
            if peer.mark_closed() {
                peer.channel().close();
                peer.media.close_all();
            }
        }

        let broadcasters: Vec<_> = self
            .broadcasters
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, b)| b)
            .collect();
        for broadcaster in broadcasters {
            broadcaster.media.close_all();
        }

        self.router.close();
        self.closed_tx.send_replace(true);
        self.metrics.inc_rooms_closed();
    }

    /// Negotiates `producer` toward every joined peer other than its owner.
    /// Runs in the background; the caller's response does not wait for it.
    fn spawn_fan_out(self: &Arc<Self>, owner_id: String, producer: Arc<dyn MediaProducer>) {
        let room = self.clone();
        tokio::spawn(async move {
            let targets: Vec<_> = room
                .joined_peers()
                .into_iter()
                .filter(|p| p.id() != owner_id)
                .collect();
            join_all(
                targets
                    .iter()
                    .map(|peer| room.negotiator.negotiate(peer, &owner_id, &producer)),
            )
            .await;
        });
    }

    /// Negotiates every existing producer in the room toward a newly joined peer.
    fn spawn_catch_up(self: &Arc<Self>, peer: Arc<PeerSession>) {
        let room = self.clone();
        tokio::spawn(async move {
            let mut sources: Vec<(String, Arc<dyn MediaProducer>)> = Vec::new();
            for other in room.joined_peers() {
                if other.id() == peer.id() {
                    continue;
                }
                for producer in other.media.producers() {
                    sources.push((other.id().to_string(), producer));
                }
            }
            for broadcaster in room.broadcaster_snapshot() {
                for producer in broadcaster.media.producers() {
                    sources.push((broadcaster.id().to_string(), producer));
                }
            }

            join_all(
                sources
                    .iter()
                    .map(|(owner_id, producer)| room.negotiator.negotiate(&peer, owner_id, producer)),
            )
            .await;
        });
    }
}
