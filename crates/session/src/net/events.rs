use std::net::SocketAddr;

use crate::room::ConnectionId;

#[derive(Debug, Clone)]
pub enum EndpointEvent {
    Listening {
        addr: SocketAddr,
    },
    ClientConnected {
        connection_id: ConnectionId,
        addr: SocketAddr,
    },
    ClientDisconnected {
        connection_id: ConnectionId,
        reason: DisconnectReason,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Dropped,
    Faulted,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Dropped => "dropped",
            DisconnectReason::Faulted => "faulted",
        }
    }
}
