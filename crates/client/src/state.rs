use coop::{PuzzleProgress, RoomId, Seat, SeatInfo, SeatMap, ServerMessage, UserId};

use crate::event::ClientEvent;
use crate::respawn::RespawnWatcher;

/// What this client knows about its identity and current room, folded from
/// server messages.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    user_id: Option<UserId>,
    display_name: Option<String>,
    room_id: Option<RoomId>,
    seat: Option<Seat>,
    seats: Option<SeatMap<SeatInfo>>,
    progress: Option<PuzzleProgress>,
    respawn: RespawnWatcher,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    pub fn seat(&self) -> Option<Seat> {
        self.seat
    }

    pub fn is_host(&self) -> bool {
        self.seat == Some(Seat::Host)
    }

    pub fn seats(&self) -> Option<&SeatMap<SeatInfo>> {
        self.seats.as_ref()
    }

    pub fn progress(&self) -> Option<&PuzzleProgress> {
        self.progress.as_ref()
    }

    /// Applies one server message and returns the events it produces.
    /// Room-scoped messages for a room this client no longer sits in are dropped.
    pub fn observe(&mut self, message: ServerMessage) -> Vec<ClientEvent> {
        match message {
            ServerMessage::Identified {
                user_id,
                display_name,
            } => {
                self.user_id = Some(user_id);
                self.display_name = Some(display_name.clone());
                vec![ClientEvent::Identified {
                    user_id,
                    display_name,
                }]
            }
            ServerMessage::RoomCreated { room_id, seat } => {
                self.enter(room_id.clone(), seat);
                vec![ClientEvent::RoomCreated { room_id }]
            }
            ServerMessage::SeatAssigned { room_id, seat } => {
                self.enter(room_id.clone(), seat);
                vec![ClientEvent::SeatAssigned { room_id, seat }]
            }
            ServerMessage::RoomState { room_id, state } => {
                if !self.in_room(&room_id) {
                    return Vec::new();
                }
                self.respawn.prime(state.puzzle_progress.respawn_token());
                self.progress = Some(state.puzzle_progress.clone());
                vec![ClientEvent::RoomState { room_id, state }]
            }
            ServerMessage::SeatMapChanged { room_id, seats } => {
                if !self.in_room(&room_id) {
                    return Vec::new();
                }
                self.seats = Some(seats);
                vec![ClientEvent::SeatsChanged { seats }]
            }
            ServerMessage::InviteSent {
                room_id,
                target_display_name,
            } => vec![ClientEvent::InviteSent {
                room_id,
                target_display_name,
            }],
            ServerMessage::InviteReceived {
                room_id,
                host_display_name,
            } => vec![ClientEvent::InviteReceived {
                room_id,
                host_display_name,
            }],
            ServerMessage::InviteError {
                room_id,
                reason,
                message,
            } => vec![ClientEvent::InviteFailed {
                room_id,
                reason,
                message,
            }],
            ServerMessage::JoinError {
                room_id,
                reason,
                message,
            } => vec![ClientEvent::JoinFailed {
                room_id,
                reason,
                message,
            }],
            ServerMessage::RemoteTransform {
                room_id,
                seat,
                transform,
            } => {
                if !self.in_room(&room_id) {
                    return Vec::new();
                }
                vec![ClientEvent::RemoteMove { seat, transform }]
            }
            ServerMessage::ObjectChanged {
                room_id,
                object_id,
                state,
            } => {
                if !self.in_room(&room_id) {
                    return Vec::new();
                }
                vec![ClientEvent::ObjectUpdated { object_id, state }]
            }
            ServerMessage::PuzzleProgressChanged { room_id, progress } => {
                if !self.in_room(&room_id) {
                    return Vec::new();
                }
                let mut events = vec![ClientEvent::PuzzleChanged {
                    progress: progress.clone(),
                }];
                if let Some(token) = self.respawn.observe(progress.respawn_token()) {
                    events.push(ClientEvent::Respawn {
                        token,
                        shared_level: progress.shared_level(),
                    });
                }
                self.progress = Some(progress);
                events
            }
            ServerMessage::ParticipantLeft {
                room_id,
                seat,
                seats,
            } => {
                if !self.in_room(&room_id) {
                    return Vec::new();
                }
                self.seats = Some(seats);
                vec![ClientEvent::ParticipantLeft { seat, seats }]
            }
            ServerMessage::SeatTakenOver { room_id, .. } => {
                if !self.in_room(&room_id) {
                    return Vec::new();
                }
                self.leave();
                vec![ClientEvent::SeatTakenOver { room_id }]
            }
            ServerMessage::RoomClosed { room_id } => {
                if self.in_room(&room_id) {
                    self.leave();
                }
                vec![ClientEvent::RoomClosed { room_id }]
            }
            ServerMessage::RoomList { rooms } => vec![ClientEvent::Rooms(rooms)],
            ServerMessage::InviteList { invites } => vec![ClientEvent::Invites(invites)],
            ServerMessage::Error {
                operation,
                reason,
                message,
            } => vec![ClientEvent::Error {
                operation,
                reason,
                message,
            }],
        }
    }

    fn in_room(&self, room_id: &RoomId) -> bool {
        self.room_id.as_ref() == Some(room_id)
    }

    fn enter(&mut self, room_id: RoomId, seat: Seat) {
        if !self.in_room(&room_id) {
            self.leave();
        }
        self.room_id = Some(room_id);
        self.seat = Some(seat);
    }

    /// Forgets the current room, e.g. before creating or joining another one.
    pub fn leave(&mut self) {
        self.room_id = None;
        self.seat = None;
        self.seats = None;
        self.progress = None;
        self.respawn.reset();
    }
}
