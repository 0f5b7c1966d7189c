#![forbid(unsafe_code)]

// Process-wide room table with atomic create-on-demand

use super::{Room, RoomOptions, RoomSettings};
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::media::MediaEngine;
use crate::metrics::ServerMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info};

type RoomSlot = Arc<OnceCell<Arc<Room>>>;

/// Maps room ids to open rooms.
///
/// Concurrent lookups of an unknown id share one creation: the first caller
/// builds the room, the rest wait on the same slot.
pub struct RoomRegistry {
    engine: Arc<dyn MediaEngine>,
    settings: Arc<RoomSettings>,
    metrics: ServerMetrics,
    rooms: Arc<Mutex<HashMap<String, RoomSlot>>>,
}

impl RoomRegistry {
    pub fn new(engine: Arc<dyn MediaEngine>, settings: RoomSettings, metrics: ServerMetrics) -> Self {
        Self {
            engine,
            settings: Arc::new(settings),
            metrics,
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the open room for `room_id`, creating it with `options` if needed.
    /// `options` are ignored when the room already exists.
    pub async fn get_or_create(&self, room_id: &str, options: RoomOptions) -> OrchestrationResult<Arc<Room>> {
        loop {
            let slot = self
                .rooms
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(room_id.to_string())
                .or_default()
                .clone();

            let created = slot
                .get_or_try_init(|| async {
                    let room = Room::create(
                        self.engine.as_ref(),
                        room_id,
                        options,
                        self.settings.clone(),
                        self.metrics.clone(),
                    )
                    .await?;
                    self.remove_on_close(&room, slot.clone());
                    Ok::<_, OrchestrationError>(room)
                })
                .await;

            match created {
                Ok(room) if !room.is_closed() => return Ok(room.clone()),
                // Closed but not yet cleaned up: drop the stale slot and retry
                Ok(_) => self.remove_slot(room_id, &slot),
                Err(e) => {
                    if !slot.initialized() {
                        self.remove_slot(room_id, &slot);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Looks up an open room without creating it
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .and_then(|slot| slot.get().cloned())
            .filter(|room| !room.is_closed())
    }

    fn rooms_snapshot(&self) -> Vec<Arc<Room>> {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms_snapshot().iter().filter(|r| !r.is_closed()).count()
    }

    pub fn peer_count(&self) -> usize {
        self.rooms_snapshot().iter().map(|r| r.peer_count()).sum()
    }

    /// Closes every room
    pub fn shutdown(&self) {
        let rooms = self.rooms_snapshot();
        info!("Closing {} rooms", rooms.len());
        for room in rooms {
            room.close();
        }
    }

    fn remove_slot(&self, room_id: &str, slot: &RoomSlot) {
        remove_if_current(&self.rooms, room_id, slot);
    }

    fn remove_on_close(&self, room: &Arc<Room>, slot: RoomSlot) {
        let rooms = self.rooms.clone();
        let room_id = room.id().to_string();
        let mut closed = room.subscribe_closed();

        tokio::spawn(async move {
            // An error means the room was dropped, which also ends its life
            let _ = closed.wait_for(|closed| *closed).await;
            remove_if_current(&rooms, &room_id, &slot);
            debug!("Room {} removed from registry", room_id);
        });
    }
}

fn remove_if_current(rooms: &Mutex<HashMap<String, RoomSlot>>, room_id: &str, slot: &RoomSlot) {
    let mut rooms = rooms.lock().unwrap_or_else(|e| e.into_inner());
    if rooms.get(room_id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
        rooms.remove(room_id);
    }
}
