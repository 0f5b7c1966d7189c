#![forbid(unsafe_code)]

// WebSocket connection handler: one attached peer session per socket

use super::channel::{Notification, PeerChannel, ServerRequest, SignalingError};
use super::protocol::{self, ClientMessage, ResponseEnvelope};
use crate::metrics::ServerMetrics;
use crate::room::Room;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch, OwnedSemaphorePermit};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound queue per peer. A peer that cannot drain this many messages is
/// treated as overloaded and loses notifications.
const CHANNEL_CAPACITY: usize = 256;

/// Close the connection if nothing arrives for this long
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a server-initiated request waits for the peer's answer
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

type PendingResponse = oneshot::Sender<Result<Value, SignalingError>>;

/// Outbound side of a peer's WebSocket, shared with the room
pub struct WsPeerChannel {
    peer_id: String,
    outbound: mpsc::Sender<Arc<String>>,
    pending: Mutex<HashMap<u64, PendingResponse>>,
    next_request_id: AtomicU64,
    closed_tx: watch::Sender<bool>,
}

impl WsPeerChannel {
    pub fn new(peer_id: String, outbound: mpsc::Sender<Arc<String>>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            peer_id,
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            closed_tx,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Queues a pre-serialized message
    pub fn send_raw(&self, message: String) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        self.outbound.try_send(Arc::new(message)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SignalingError::Overloaded,
            mpsc::error::TrySendError::Closed(_) => SignalingError::Closed,
        })
    }

    /// Completes the server request `response.id` refers to
    pub fn resolve(&self, response: ResponseEnvelope) {
        let Some(pending) = self.take_pending(response.id) else {
            debug!("Peer {} answered unknown request {}", self.peer_id, response.id);
            return;
        };
        let result = if response.ok {
            Ok(response.data)
        } else {
            Err(SignalingError::Rejected {
                code: response.error_code.unwrap_or(500),
                reason: response.error_reason.unwrap_or_default(),
            })
        };
        let _ = pending.send(result);
    }

    fn take_pending(&self, id: u64) -> Option<PendingResponse> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).remove(&id)
    }
}

#[async_trait]
impl PeerChannel for WsPeerChannel {
    async fn request(&self, request: ServerRequest) -> Result<Value, SignalingError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let message =
            protocol::request_message(id, &request).map_err(|e| SignalingError::Malformed(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        if let Err(e) = self.send_raw(message) {
            self.take_pending(id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            // Sender dropped without an answer: the connection went away
            Ok(Err(_)) => Err(SignalingError::Closed),
            Err(_) => {
                self.take_pending(id);
                Err(SignalingError::Timeout)
            }
        }
    }

    fn notify(&self, notification: Notification) -> Result<(), SignalingError> {
        let message =
            protocol::notification_message(&notification).map_err(|e| SignalingError::Malformed(e.to_string()))?;
        self.send_raw(message)
    }

    fn close(&self) {
        if self.closed_tx.send_replace(true) {
            return;
        }
        let pending: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        for tx in pending {
            let _ = tx.send(Err(SignalingError::Closed));
        }
    }
}

async fn closed(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

/// Runs one peer's signaling connection until either side closes it
pub async fn handle_connection(
    socket: WebSocket,
    room: Arc<Room>,
    peer_id: String,
    consume: bool,
    metrics: ServerMetrics,
    _permit: OwnedSemaphorePermit,
) {
    metrics.inc_connections_total();
    let _conn_guard = metrics.connection_active_guard();
    let conn_id = Uuid::new_v4();

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<String>>(CHANNEL_CAPACITY);
    let channel = Arc::new(WsPeerChannel::new(peer_id.clone(), tx));

    let peer = match room.attach(&peer_id, consume, channel.clone()) {
        Ok(peer) => peer,
        Err(e) => {
            warn!("Rejecting peer {} in room {}: {}", peer_id, room.id(), e);
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };
    info!("Peer {} connected to room {} (connection {})", peer_id, room.id(), conn_id);

    let send_closed = channel.subscribe_closed();
    let send_peer_id = peer_id.clone();
    let send_task = tokio::spawn(async move {
        let shutdown = closed(send_closed);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(json) = message else { break };
                    if ws_sender.send(Message::Text((*json).clone().into())).await.is_err() {
                        break;
                    }
                }
                _ = &mut shutdown => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        debug!("Send task finished for peer {} (connection {})", send_peer_id, conn_id);
    });

    let shutdown = closed(channel.subscribe_closed());
    tokio::pin!(shutdown);
    loop {
        let message = tokio::select! {
            received = tokio::time::timeout(IDLE_TIMEOUT, ws_receiver.next()) => match received {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(_))) | Ok(None) => break,
                Err(_) => {
                    warn!("Idle timeout for peer {}", peer_id);
                    break;
                }
            },
            // Evicted by a reconnect or the room closed
            _ = &mut shutdown => break,
        };

        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Request(request)) => {
                    metrics.inc_requests();
                    let room = room.clone();
                    let peer = peer.clone();
                    let channel = channel.clone();
                    let metrics = metrics.clone();
                    tokio::spawn(async move {
                        let started = Instant::now();
                        let response = match room.handle_request(&peer, &request.method, request.data).await {
                            Ok(data) => protocol::success_response(request.id, data),
                            Err(e) => {
                                metrics.inc_request_errors();
                                debug!("Request {} from peer {} failed: {}", request.method, peer.id(), e);
                                protocol::error_response(request.id, &e)
                            }
                        };
                        metrics.observe_request_handling(started.elapsed());
                        if let Err(e) = channel.send_raw(response) {
                            debug!("Could not answer peer {}: {}", peer.id(), e);
                        }
                    });
                }
                Ok(ClientMessage::Response(response)) => channel.resolve(response),
                Ok(ClientMessage::Notification(notification)) => {
                    debug!("Ignoring notification {} from peer {}", notification.method, peer_id);
                }
                Err(e) => warn!("Malformed message from peer {}: {}", peer_id, e),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    channel.close();
    room.peer_closed(&peer);
    let _ = send_task.await;
    info!("Peer {} disconnected from room {} (connection {})", peer_id, room.id(), conn_id);
}
