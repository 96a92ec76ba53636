use crate::net::ErrorCode;
use crate::room::RoomId;

/// Caller-attributable failures of a protocol operation. None of them are
/// fatal: the originating connection gets a typed error event and the room
/// is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("room {0} is closed")]
    RoomClosed(RoomId),
    #[error("room {0} is full")]
    RoomFull(RoomId),
    #[error("room {0} only admits its host and the invited player")]
    InviteOnlyRejected(RoomId),
    #[error("only the host may do that")]
    NotHost,
    #[error("room {0} is not waiting for a partner")]
    RoomNotInWaitingState(RoomId),
    #[error("no user named {0:?}")]
    TargetUserNotFound(String),
    #[error("the host cannot invite themselves")]
    CannotInviteSelf,
    #[error("connection holds no seat in room {0}")]
    NotSeated(RoomId),
    #[error("failed to rehydrate room {room_id}: {reason}")]
    RehydrationFailed { room_id: RoomId, reason: String },
    #[error("no free room code after {0} attempts")]
    RoomIdUnavailable(u32),
    #[error("operation requires an identified caller")]
    LoginRequired,
    #[error("room storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            SessionError::RoomClosed(_) => ErrorCode::RoomClosed,
            SessionError::RoomFull(_) => ErrorCode::RoomFull,
            SessionError::InviteOnlyRejected(_) => ErrorCode::InviteOnlyRejected,
            SessionError::NotHost => ErrorCode::NotHost,
            SessionError::RoomNotInWaitingState(_) => ErrorCode::RoomNotInWaitingState,
            SessionError::TargetUserNotFound(_) => ErrorCode::TargetUserNotFound,
            SessionError::CannotInviteSelf => ErrorCode::CannotInviteSelf,
            SessionError::NotSeated(_) => ErrorCode::NotSeated,
            // Fail closed: callers cannot tell a corrupt room from a missing one.
            SessionError::RehydrationFailed { .. } => ErrorCode::RoomNotFound,
            SessionError::RoomIdUnavailable(_) => ErrorCode::Unavailable,
            SessionError::LoginRequired => ErrorCode::LoginRequired,
            SessionError::StorageUnavailable(_) => ErrorCode::Unavailable,
        }
    }

    /// Message safe to show the caller.
    pub fn public_message(&self) -> String {
        match self {
            SessionError::RehydrationFailed { room_id, .. } => {
                SessionError::RoomNotFound(room_id.clone()).to_string()
            }
            SessionError::StorageUnavailable(_) => "room storage is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}
