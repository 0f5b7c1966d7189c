#![forbid(unsafe_code)]

// Room-wide loudest-speaker signals turned into peer notifications

use super::Room;
use crate::media::{AudioLevelEvent, AudioLevelObserver, MediaProducer};
use crate::signaling::Notification;
use mediasoup::prelude::MediaKind;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

pub struct AudioActivityBridge {
    observer: Arc<dyn AudioLevelObserver>,
}

impl AudioActivityBridge {
    /// Subscribes to the observer for the lifetime of the room
    pub fn bind(observer: Arc<dyn AudioLevelObserver>, room: Weak<Room>) -> Self {
        observer.on_event(Box::new(move |event| {
            let Some(room) = room.upgrade() else {
                return;
            };
            let notification = match event {
                AudioLevelEvent::Volumes { producer, volume } => {
                    let Some(owner_id) = producer.owner_id() else {
                        debug!("Loudest producer {} has no owner", producer.id());
                        return;
                    };
                    Notification::ActiveSpeaker {
                        peer_id: Some(owner_id),
                        volume: Some(volume),
                    }
                }
                AudioLevelEvent::Silence => Notification::ActiveSpeaker {
                    peer_id: None,
                    volume: None,
                },
            };
            for peer in room.joined_peers() {
                peer.notify(notification.clone());
            }
        }));

        Self { observer }
    }

    /// Feeds an audio producer to the observer; other kinds are ignored.
    pub async fn add_producer(&self, producer: &Arc<dyn MediaProducer>) {
        if producer.kind() != MediaKind::Audio {
            return;
        }
        if let Err(e) = self.observer.add_producer(&producer.id()).await {
            warn!("Failed to observe audio producer {}: {}", producer.id(), e);
        }
    }
}
