pub mod config;
pub mod error;
pub mod identity;
pub mod net;
pub mod registry;
pub mod room;
pub mod session;
pub mod store;

pub use config::SessionConfig;
pub use error::SessionError;
pub use identity::{IdentityError, IdentityProvider, MemoryIdentity, User};
pub use net::{
    ClientMessage, Connection, ConnectionDirectory, ConnectionManager, DEFAULT_PORT,
    DisconnectReason, EndpointEvent, ErrorCode, EventSink, InviteSummary, Outbound, ProtocolError,
    RoomSummary, ServerMessage, SessionEndpoint,
};
pub use registry::{RoomInfo, RoomRegistry, SharedRoom, generate_code};
pub use room::{
    ConnectionId, FIRST_LEVEL, Hole, JoinSeat, ObjectId, ObjectState, PuzzleProgress,
    PuzzleUpdate, RespawnToken, Room, RoomId, RoomSnapshot, RoomStatus, Seat, SeatInfo, SeatMap,
    Transform, UserId, World,
};
pub use session::{SessionHandler, SessionStats};
pub use store::{
    FileStore, MemoryStore, RecordUpdate, RoomRecord, RoomStore, StoreError, StoreMirror,
};
