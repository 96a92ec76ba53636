use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::{
    ObjectId, ObjectState, PuzzleProgress, PuzzleUpdate, RoomId, RoomSnapshot, RoomStatus, Seat,
    SeatInfo, SeatMap, Transform, UserId,
};
use crate::store::RoomRecord;

pub const DEFAULT_PORT: u16 = 3000;

/// Requests a participant may send. One JSON text frame each, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Identify {
        user_id: UserId,
    },
    CreateRoom,
    Invite {
        room_id: RoomId,
        target_display_name: String,
    },
    JoinRoom {
        room_id: RoomId,
    },
    RecordMove {
        room_id: RoomId,
        transform: Transform,
    },
    UpdateObject {
        room_id: RoomId,
        object_id: ObjectId,
        state: ObjectState,
    },
    UpdatePuzzle {
        room_id: RoomId,
        update: PuzzleUpdate,
    },
    CloseRoom {
        room_id: RoomId,
    },
    ListRooms,
    ListInvites,
}

impl ClientMessage {
    pub fn operation(&self) -> &'static str {
        match self {
            ClientMessage::Identify { .. } => "identify",
            ClientMessage::CreateRoom => "create_room",
            ClientMessage::Invite { .. } => "invite",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::RecordMove { .. } => "record_move",
            ClientMessage::UpdateObject { .. } => "update_object",
            ClientMessage::UpdatePuzzle { .. } => "update_puzzle",
            ClientMessage::CloseRoom { .. } => "close_room",
            ClientMessage::ListRooms => "list_rooms",
            ClientMessage::ListInvites => "list_invites",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    RoomNotFound,
    RoomClosed,
    RoomFull,
    InviteOnlyRejected,
    NotHost,
    RoomNotInWaitingState,
    TargetUserNotFound,
    CannotInviteSelf,
    NotSeated,
    LoginRequired,
    Unavailable,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub status: RoomStatus,
    pub last_level_reached: u32,
    pub host_user_id: UserId,
    pub client_user_id: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

impl From<&RoomRecord> for RoomSummary {
    fn from(record: &RoomRecord) -> Self {
        Self {
            room_id: record.room_id.clone(),
            status: record.status,
            last_level_reached: record.last_level_reached,
            host_user_id: record.host_user_id,
            client_user_id: record.client_user_id,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InviteSummary {
    pub room_id: RoomId,
    pub host_user_id: UserId,
    pub host_display_name: String,
    pub updated_at: DateTime<Utc>,
}

/// Events the server pushes. Replies go to the requesting connection,
/// broadcasts to the room's bound seats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Identified {
        user_id: UserId,
        display_name: String,
    },
    RoomCreated {
        room_id: RoomId,
        seat: Seat,
    },
    RoomState {
        room_id: RoomId,
        state: RoomSnapshot,
    },
    SeatAssigned {
        room_id: RoomId,
        seat: Seat,
    },
    SeatMapChanged {
        room_id: RoomId,
        seats: SeatMap<SeatInfo>,
    },
    InviteSent {
        room_id: RoomId,
        target_display_name: String,
    },
    InviteReceived {
        room_id: RoomId,
        host_display_name: String,
    },
    InviteError {
        room_id: RoomId,
        reason: ErrorCode,
        message: String,
    },
    JoinError {
        room_id: RoomId,
        reason: ErrorCode,
        message: String,
    },
    RemoteTransform {
        room_id: RoomId,
        seat: Seat,
        transform: Transform,
    },
    ObjectChanged {
        room_id: RoomId,
        object_id: ObjectId,
        state: ObjectState,
    },
    PuzzleProgressChanged {
        room_id: RoomId,
        progress: PuzzleProgress,
    },
    ParticipantLeft {
        room_id: RoomId,
        seat: Seat,
        seats: SeatMap<SeatInfo>,
    },
    /// The seat this connection held was rebound to a newer connection of the same user.
    SeatTakenOver {
        room_id: RoomId,
        seat: Seat,
    },
    RoomClosed {
        room_id: RoomId,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    InviteList {
        invites: Vec<InviteSummary>,
    },
    Error {
        operation: String,
        reason: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn malformed(error: &ProtocolError) -> Self {
        Self::malformed_frame(error.to_string())
    }

    pub fn malformed_frame(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            operation: "decode".to_string(),
            reason: ErrorCode::Malformed,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("encoding failed: {0}")]
    Encode(serde_json::Error),
    #[error("malformed message: {0}")]
    Decode(serde_json::Error),
}
