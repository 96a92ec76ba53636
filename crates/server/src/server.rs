use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use coop::{EventSink, RoomInfo, SessionEndpoint, SessionHandler};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStats {
    pub uptime_secs: u64,
    pub resident_rooms: usize,
    pub connections: usize,
    pub identified: usize,
}

/// A running endpoint plus the handler it feeds.
pub struct CoopServer {
    handler: Arc<SessionHandler>,
    local_addr: SocketAddr,
    started_at: Instant,
    endpoint: JoinHandle<io::Result<()>>,
}

impl CoopServer {
    /// Must be called from within the tokio runtime that will drive the server.
    pub async fn start(
        bind_addr: &str,
        config: &ServerConfig,
        events: Option<EventSink>,
    ) -> Result<Self> {
        let store = config.open_store().context("failed to open room store")?;
        let identity = config.load_identity().context("failed to load users")?;
        let handler = Arc::new(SessionHandler::new(config.session.clone(), store, identity));

        let mut endpoint = SessionEndpoint::bind(bind_addr, Arc::clone(&handler))
            .await
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        if let Some(events) = events {
            endpoint = endpoint.with_events(events);
        }
        let local_addr = endpoint.local_addr()?;

        Ok(Self {
            handler,
            local_addr,
            started_at: Instant::now(),
            endpoint: tokio::spawn(endpoint.run()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.endpoint.is_finished()
    }

    pub fn stats(&self) -> ServerStats {
        let session = self.handler.stats();
        ServerStats {
            uptime_secs: self.started_at.elapsed().as_secs(),
            resident_rooms: session.resident_rooms,
            connections: session.connections,
            identified: session.identified,
        }
    }

    pub fn room_infos(&self) -> Vec<RoomInfo> {
        self.handler.registry().room_infos()
    }

    /// Stops accepting connections and waits for queued room writes.
    pub async fn shutdown(self) {
        self.endpoint.abort();
        self.handler.mirror().flush().await;
        log::info!("Pending room writes flushed");
    }
}
