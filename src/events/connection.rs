//! WebSocket connection registry.
//!
//! Maps users to their active connections (multiple per user: driver app +
//! web) and tracks room subscriptions. DashMap keeps access lock-free for
//! the broadcast paths.

use std::collections::HashSet;

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::core_types::UserId;

use super::messages::Event;

/// Channel into one client connection.
pub type WsSender = mpsc::UnboundedSender<Event>;

/// Unique connection identifier.
pub type ConnectionId = u64;

pub struct ConnectionManager {
    /// user_id -> list of (connection_id, sender)
    connections: DashMap<UserId, Vec<(ConnectionId, WsSender)>>,
    /// room -> subscribed connection ids
    rooms: DashMap<String, HashSet<ConnectionId>>,
    /// connection_id -> sender, for room fan-out
    by_conn: DashMap<ConnectionId, WsSender>,
    next_conn_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            by_conn: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Register a new connection for a user, returning its id.
    pub fn add_connection(&self, user_id: UserId, tx: WsSender) -> ConnectionId {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

        self.connections
            .entry(user_id)
            .or_default()
            .push((conn_id, tx.clone()));
        self.by_conn.insert(conn_id, tx);

        tracing::info!(user_id, conn_id, "websocket connection added");
        conn_id
    }

    /// Drop a connection and all of its room subscriptions.
    pub fn remove_connection(&self, user_id: UserId, conn_id: ConnectionId) {
        if let Some(mut senders) = self.connections.get_mut(&user_id) {
            senders.retain(|(id, _)| *id != conn_id);
            if senders.is_empty() {
                drop(senders); // Release the shard lock before removing the entry.
                self.connections.remove(&user_id);
            }
        }
        self.by_conn.remove(&conn_id);
        for mut room in self.rooms.iter_mut() {
            room.value_mut().remove(&conn_id);
        }
        tracing::info!(user_id, conn_id, "websocket connection removed");
    }

    pub fn subscribe(&self, conn_id: ConnectionId, room: String) {
        self.rooms.entry(room).or_default().insert(conn_id);
    }

    pub fn unsubscribe(&self, conn_id: ConnectionId, room: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&conn_id);
        }
    }

    /// Send to every connection of one user. Failed sends are logged; the
    /// socket task removes the connection when it closes.
    pub fn send_to_user(&self, user_id: UserId, event: Event) {
        if let Some(senders) = self.connections.get(&user_id) {
            for (_, tx) in senders.iter() {
                if tx.send(event.clone()).is_err() {
                    tracing::warn!(user_id, event = event.name(), "send failed, client gone");
                }
            }
        }
    }

    /// Send to every connection subscribed to a room.
    pub fn send_to_room(&self, room: &str, event: Event) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for conn_id in members.iter() {
            if let Some(tx) = self.by_conn.get(conn_id)
                && tx.send(event.clone()).is_err()
            {
                tracing::warn!(room, conn_id, "room send failed, client gone");
            }
        }
    }

    /// (connected users, total connections)
    pub fn stats(&self) -> (usize, usize) {
        let users = self.connections.len();
        let total: usize = self.connections.iter().map(|e| e.value().len()).sum();
        (users, total)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
