mod connection;
mod endpoint;
mod events;
mod protocol;

pub use connection::{Connection, ConnectionDirectory, ConnectionManager, Outbound};
pub use endpoint::{EventSink, SessionEndpoint};
pub use events::{DisconnectReason, EndpointEvent};
pub use protocol::{
    ClientMessage, DEFAULT_PORT, ErrorCode, InviteSummary, ProtocolError, RoomSummary,
    ServerMessage,
};
