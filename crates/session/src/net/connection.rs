use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::mpsc;

use super::protocol::ServerMessage;
use crate::room::{ConnectionId, RoomId, UserId};

pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: Option<SocketAddr>,
    pub user_id: Option<UserId>,
    /// Room in which this connection currently holds a seat.
    pub room_id: Option<RoomId>,
    pub connected_at: Instant,
    sender: Outbound,
}

impl Connection {
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, Connection>,
    next_connection_id: u64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_id: 1,
        }
    }

    pub fn open(&mut self, addr: Option<SocketAddr>, sender: Outbound) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;

        self.connections.insert(
            id,
            Connection {
                id,
                addr,
                user_id: None,
                room_id: None,
                connected_at: Instant::now(),
                sender,
            },
        );
        id
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Dropped silently when the connection is gone or its writer has stopped.
    pub fn send(&self, id: ConnectionId, message: ServerMessage) {
        match self.connections.get(&id) {
            Some(conn) => {
                if !conn.send(message) {
                    log::debug!("Outbound queue of {} is closed", id);
                }
            }
            None => log::debug!("Dropping message for departed {}", id),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn identified_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.user_id.is_some())
            .count()
    }
}

/// Every open connection of each identified user, for invite fan-out.
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    owners: HashMap<ConnectionId, UserId>,
}

impl ConnectionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, user_id: UserId, connection: ConnectionId) {
        if let Some(previous) = self.owners.insert(connection, user_id) {
            if previous != user_id {
                self.detach(previous, connection);
            }
        }
        self.by_user.entry(user_id).or_default().insert(connection);
    }

    pub fn unregister(&mut self, connection: ConnectionId) {
        if let Some(user_id) = self.owners.remove(&connection) {
            self.detach(user_id, connection);
        }
    }

    pub fn connections_for(&self, user_id: UserId) -> HashSet<ConnectionId> {
        self.by_user.get(&user_id).cloned().unwrap_or_default()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    fn detach(&mut self, user_id: UserId, connection: ConnectionId) {
        if let Some(set) = self.by_user.get_mut(&user_id) {
            set.remove(&connection);
            if set.is_empty() {
                self.by_user.remove(&user_id);
            }
        }
    }
}
