//! Real-time delivery
//!
//! Rooms are named groups of live connections. A job publishes a `typing`
//! event when work starts and exactly one `result` event when it ends.
//! Delivery is best effort: nobody in the room means nobody hears it, and
//! there is no replay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const EVENT_TYPING: &str = "typing";
pub const EVENT_RESULT: &str = "result";

/// Events queued per connection before new ones are dropped.
pub const CONNECTION_QUEUE_CAPACITY: usize = 64;

/// Message pushed to every connection in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub event: String,
    pub room: String,
    pub payload: serde_json::Value,
}

/// Fan-out seam used by the worker; `publish` never fails.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Returns how many connections the event was handed to.
    async fn publish(&self, room: &str, event: &str, payload: serde_json::Value) -> usize;
}

pub type ConnectionId = Uuid;

struct Connection {
    sender: mpsc::Sender<RoomEvent>,
    room: Option<String>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl HubState {
    fn remove_from_room(&mut self, id: ConnectionId, room: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn drop_connection(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.remove(&id) {
            if let Some(room) = connection.room {
                self.remove_from_room(id, &room);
            }
        }
    }
}

/// In-process room registry. Each connection sits in at most one room.
#[derive(Default)]
pub struct RoomHub {
    state: RwLock<HubState>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; events for its room arrive on the receiver.
    pub async fn connect(&self) -> (ConnectionId, mpsc::Receiver<RoomEvent>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_QUEUE_CAPACITY);
        let id = Uuid::new_v4();
        self.state
            .write()
            .await
            .connections
            .insert(id, Connection { sender, room: None });
        debug!(connection = %id, "Connection registered");
        (id, receiver)
    }

    /// Move a connection into `room`, leaving any previous room.
    /// Returns false for unknown connections.
    pub async fn join(&self, id: ConnectionId, room: &str) -> bool {
        let mut state = self.state.write().await;
        let previous = match state.connections.get_mut(&id) {
            Some(connection) => connection.room.replace(room.to_string()),
            None => return false,
        };
        if let Some(previous) = previous {
            state.remove_from_room(id, &previous);
        }
        state.rooms.entry(room.to_string()).or_default().insert(id);
        debug!(connection = %id, room, "Joined room");
        true
    }

    pub async fn leave(&self, id: ConnectionId) {
        let mut state = self.state.write().await;
        let previous = state.connections.get_mut(&id).and_then(|c| c.room.take());
        if let Some(room) = previous {
            state.remove_from_room(id, &room);
            debug!(connection = %id, room = %room, "Left room");
        }
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        self.state.write().await.drop_connection(id);
        debug!(connection = %id, "Connection closed");
    }

    #[cfg(test)]
    async fn room_size(&self, room: &str) -> usize {
        self.state.read().await.rooms.get(room).map_or(0, HashSet::len)
    }

    #[cfg(test)]
    async fn room_of(&self, id: ConnectionId) -> Option<String> {
        self.state.read().await.connections.get(&id).and_then(|c| c.room.clone())
    }
}

#[async_trait]
impl DeliveryChannel for RoomHub {
    async fn publish(&self, room: &str, event: &str, payload: serde_json::Value) -> usize {
        let message = RoomEvent {
            event: event.to_string(),
            room: room.to_string(),
            payload,
        };

        let mut stale = Vec::new();
        let mut delivered = 0;
        {
            let state = self.state.read().await;
            let Some(members) = state.rooms.get(room) else {
                debug!(room, event, "No listeners in room");
                return 0;
            };
            for id in members {
                let Some(connection) = state.connections.get(id) else {
                    stale.push(*id);
                    continue;
                };
                match connection.sender.try_send(message.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        debug!(connection = %id, room, event, "Connection queue full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => stale.push(*id),
                }
            }
        }

        if !stale.is_empty() {
            let mut state = self.state.write().await;
            for id in stale {
                state.drop_connection(id);
            }
        }

        debug!(room, event, delivered, "Event published");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_room_members_only() {
        let hub = RoomHub::new();
        let (a, mut rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.join(a, "farm-1").await;
        hub.join(b, "farm-2").await;

        let delivered = hub.publish("farm-1", EVENT_TYPING, json!({"job_id": "x"})).await;
        assert_eq!(delivered, 1);

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.event, EVENT_TYPING);
        assert_eq!(event.room, "farm-1");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_to_empty_room_is_noop() {
        let hub = RoomHub::new();
        assert_eq!(hub.publish("nobody-here", EVENT_RESULT, json!({})).await, 0);
    }

    #[tokio::test]
    async fn test_join_moves_connection_between_rooms() {
        let hub = RoomHub::new();
        let (id, _rx) = hub.connect().await;
        assert!(hub.join(id, "a").await);
        assert!(hub.join(id, "b").await);

        assert_eq!(hub.room_size("a").await, 0);
        assert_eq!(hub.room_size("b").await, 1);
        assert_eq!(hub.room_of(id).await.as_deref(), Some("b"));

        hub.leave(id).await;
        assert_eq!(hub.room_size("b").await, 0);
        assert_eq!(hub.room_of(id).await, None);
    }

    #[tokio::test]
    async fn test_unknown_connection_cannot_join() {
        let hub = RoomHub::new();
        assert!(!hub.join(Uuid::new_v4(), "a").await);
        assert_eq!(hub.room_size("a").await, 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let hub = RoomHub::new();
        let (id, rx) = hub.connect().await;
        hub.join(id, "farm").await;
        drop(rx);

        assert_eq!(hub.publish("farm", EVENT_RESULT, json!({})).await, 0);
        assert_eq!(hub.room_size("farm").await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_empties_room() {
        let hub = RoomHub::new();
        let (a, _rx_a) = hub.connect().await;
        let (b, mut rx_b) = hub.connect().await;
        hub.join(a, "farm").await;
        hub.join(b, "farm").await;
        hub.disconnect(a).await;

        assert_eq!(hub.publish("farm", EVENT_RESULT, json!({"status": "answered"})).await, 1);
        assert_eq!(rx_b.recv().await.unwrap().payload["status"], "answered");
    }

    #[tokio::test]
    async fn test_stalled_connection_queue_is_capped() {
        let hub = RoomHub::new();
        let (stalled, mut stalled_rx) = hub.connect().await;
        let (live, mut live_rx) = hub.connect().await;
        hub.join(stalled, "farm").await;
        hub.join(live, "farm").await;

        for i in 0..(CONNECTION_QUEUE_CAPACITY * 4) {
            hub.publish("farm", EVENT_TYPING, json!({ "seq": i, "pad": "x".repeat(100) })).await;
            live_rx.recv().await.unwrap();
        }

        let mut queued = 0;
        while stalled_rx.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, CONNECTION_QUEUE_CAPACITY);

        // a full queue is not a dead connection
        assert_eq!(hub.room_size("farm").await, 2);
        assert_eq!(hub.publish("farm", EVENT_RESULT, json!({})).await, 2);
        assert_eq!(stalled_rx.recv().await.unwrap().event, EVENT_RESULT);
    }
}
