use coop::{
    ErrorCode, InviteSummary, ObjectId, ObjectState, PuzzleProgress, RespawnToken, RoomId,
    RoomSnapshot, RoomSummary, Seat, SeatInfo, SeatMap, Transform, UserId,
};

/// Everything a game front end reacts to. Closed on purpose: adding a server
/// event means adding a variant here and handling it at every match.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Identified {
        user_id: UserId,
        display_name: String,
    },
    RoomCreated {
        room_id: RoomId,
    },
    SeatAssigned {
        room_id: RoomId,
        seat: Seat,
    },
    RoomState {
        room_id: RoomId,
        state: RoomSnapshot,
    },
    SeatsChanged {
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
    InviteFailed {
        room_id: RoomId,
        reason: ErrorCode,
        message: String,
    },
    JoinFailed {
        room_id: RoomId,
        reason: ErrorCode,
        message: String,
    },
    RemoteMove {
        seat: Seat,
        transform: Transform,
    },
    ObjectUpdated {
        object_id: ObjectId,
        state: ObjectState,
    },
    PuzzleChanged {
        progress: PuzzleProgress,
    },
    /// A new respawn token arrived; snap the local player back to the shared checkpoint.
    Respawn {
        token: RespawnToken,
        shared_level: u32,
    },
    ParticipantLeft {
        seat: Seat,
        seats: SeatMap<SeatInfo>,
    },
    SeatTakenOver {
        room_id: RoomId,
    },
    RoomClosed {
        room_id: RoomId,
    },
    Rooms(Vec<RoomSummary>),
    Invites(Vec<InviteSummary>),
    Error {
        operation: String,
        reason: ErrorCode,
        message: String,
    },
    Disconnected,
}
