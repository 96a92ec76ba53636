use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::events::{DisconnectReason, EndpointEvent};
use super::protocol::{ClientMessage, ServerMessage};
use crate::room::ConnectionId;
use crate::session::SessionHandler;

pub type EventSink = mpsc::UnboundedSender<EndpointEvent>;

/// WebSocket front door: one JSON text frame per message in either direction.
pub struct SessionEndpoint {
    listener: TcpListener,
    handler: Arc<SessionHandler>,
    events: Option<EventSink>,
}

impl SessionEndpoint {
    pub async fn bind(addr: impl ToSocketAddrs, handler: Arc<SessionHandler>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler,
            events: None,
        })
    }

    /// Mirrors connection lifecycle into `events`, for dashboards.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handler(&self) -> &Arc<SessionHandler> {
        &self.handler
    }

    /// Accepts connections until the task is dropped.
    pub async fn run(self) -> io::Result<()> {
        let addr = self.local_addr()?;
        emit(&self.events, EndpointEvent::Listening { addr });

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Accept failed: {}", e);
                    emit(
                        &self.events,
                        EndpointEvent::Error {
                            message: format!("accept failed: {}", e),
                        },
                    );
                    continue;
                }
            };

            let handler = Arc::clone(&self.handler);
            let events = self.events.clone();
            tokio::spawn(async move {
                serve(stream, addr, handler, events).await;
            });
        }
    }
}

async fn serve(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<SessionHandler>,
    events: Option<EventSink>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            log::debug!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let connection = handler.connect(Some(addr), tx);
    log::info!("{} connected from {}", connection, addr);
    emit(
        &events,
        EndpointEvent::ClientConnected {
            connection_id: connection,
            addr,
        },
    );

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    log::error!("Dropping outbound message: {}", e);
                    continue;
                }
            };
            if write.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let reason = read_loop(&mut read, connection, &handler).await;

    handler.disconnect(connection).await;
    let _ = writer.await;

    log::info!("{} {}", connection, reason.as_str());
    emit(
        &events,
        EndpointEvent::ClientDisconnected {
            connection_id: connection,
            reason,
        },
    );
}

async fn read_loop<S>(
    read: &mut S,
    connection: ConnectionId,
    handler: &SessionHandler,
) -> DisconnectReason
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                handler.send(
                    connection,
                    ServerMessage::malformed_frame("binary frames are not accepted"),
                );
                continue;
            }
            Ok(Message::Close(_)) => return DisconnectReason::Graceful,
            Ok(_) => continue,
            Err(e) => {
                log::debug!("{} read error: {}", connection, e);
                return DisconnectReason::Dropped;
            }
        };

        let message = match ClientMessage::decode(text.as_str()) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("{} sent a malformed message: {}", connection, e);
                handler.send(connection, ServerMessage::malformed(&e));
                continue;
            }
        };

        let outcome = AssertUnwindSafe(handler.handle(connection, message))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            log::error!("Handler panicked serving {}, dropping the connection", connection);
            return DisconnectReason::Faulted;
        }
    }
    DisconnectReason::Dropped
}

fn emit(events: &Option<EventSink>, event: EndpointEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}
