use std::collections::VecDeque;
use std::time::Instant;

use coop::{
    ClientMessage, ObjectId, ObjectState, ProtocolError, PuzzleUpdate, RespawnToken, RoomId, Seat,
    ServerMessage, Transform, UserId,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::ClientConfig;
use crate::event::ClientEvent;
use crate::state::ClientState;
use crate::throttle::MoveThrottle;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("connection closed")]
    Closed,
    #[error("not seated in a room")]
    NotInRoom,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// One WebSocket session with the room server.
///
/// Requests are fire-and-forget; their outcome arrives later through
/// [`NetworkClient::next_event`].
pub struct NetworkClient {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<ServerMessage>,
    state: ClientState,
    throttle: MoveThrottle,
    pending: VecDeque<ClientEvent>,
    disconnected: bool,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl NetworkClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        log::info!("Connecting to {}", config.url);
        let (ws, _response) = tokio_tungstenite::connect_async(config.url.as_str()).await?;
        let (mut write, mut read) = ws.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<ServerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match message.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Dropping request: {}", e);
                        continue;
                    }
                };
                if write.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(message) => {
                            if inbound_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Ignoring server message: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("Connection lost: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outbound,
            inbound,
            state: ClientState::new(),
            throttle: MoveThrottle::new(config.move_interval, config.move_epsilon),
            pending: VecDeque::new(),
            disconnected: false,
            reader,
            writer,
        })
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.state.room_id()
    }

    pub fn seat(&self) -> Option<Seat> {
        self.state.seat()
    }

    pub fn identify(&self, user_id: UserId) -> Result<(), ClientError> {
        self.send(ClientMessage::Identify { user_id })
    }

    pub fn create_room(&mut self) -> Result<(), ClientError> {
        self.throttle.reset();
        self.send(ClientMessage::CreateRoom)
    }

    pub fn join_room(&mut self, room_id: RoomId) -> Result<(), ClientError> {
        self.throttle.reset();
        self.send(ClientMessage::JoinRoom { room_id })
    }

    pub fn invite(&self, target_display_name: impl Into<String>) -> Result<(), ClientError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::Invite {
            room_id,
            target_display_name: target_display_name.into(),
        })
    }

    /// Sends the local player's transform unless the throttle suppresses it.
    /// Returns whether a message went out.
    pub fn send_move(&mut self, transform: Transform) -> Result<bool, ClientError> {
        let room_id = self.current_room()?;
        if !self.throttle.should_send(Instant::now(), transform.position) {
            return Ok(false);
        }
        self.send(ClientMessage::RecordMove { room_id, transform })?;
        Ok(true)
    }

    pub fn update_object(
        &self,
        object_id: impl Into<ObjectId>,
        state: ObjectState,
    ) -> Result<(), ClientError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::UpdateObject {
            room_id,
            object_id: object_id.into(),
            state,
        })
    }

    pub fn update_puzzle(&self, update: PuzzleUpdate) -> Result<(), ClientError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::UpdatePuzzle { room_id, update })
    }

    pub fn report_level(&self, level: u32) -> Result<(), ClientError> {
        self.update_puzzle(PuzzleUpdate::level(level))
    }

    /// Asks both players to respawn at the shared checkpoint with a fresh token.
    pub fn request_respawn(&self) -> Result<RespawnToken, ClientError> {
        let token = RespawnToken(rand::random());
        self.update_puzzle(PuzzleUpdate::respawn(token))?;
        Ok(token)
    }

    pub fn close_room(&self) -> Result<(), ClientError> {
        let room_id = self.current_room()?;
        self.send(ClientMessage::CloseRoom { room_id })
    }

    pub fn list_rooms(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::ListRooms)
    }

    pub fn list_invites(&self) -> Result<(), ClientError> {
        self.send(ClientMessage::ListInvites)
    }

    /// Next event from the server. Yields [`ClientEvent::Disconnected`] once
    /// when the connection ends, then `None`.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.disconnected {
                return None;
            }

            match self.inbound.recv().await {
                Some(message) => self.pending.extend(self.state.observe(message)),
                None => {
                    self.disconnected = true;
                    self.state.leave();
                    return Some(ClientEvent::Disconnected);
                }
            }
        }
    }

    pub async fn close(self) {
        drop(self.outbound);
        let _ = self.writer.await;
        self.reader.abort();
    }

    fn current_room(&self) -> Result<RoomId, ClientError> {
        self.state.room_id().cloned().ok_or(ClientError::NotInRoom)
    }

    fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        log::debug!("Sending {}", message.operation());
        self.outbound.send(message).map_err(|_| ClientError::Closed)
    }
}
