pub mod client;
pub mod config;
pub mod event;
pub mod respawn;
pub mod state;
pub mod throttle;

pub use client::{ClientError, NetworkClient};
pub use config::ClientConfig;
pub use event::ClientEvent;
pub use respawn::RespawnWatcher;
pub use state::ClientState;
pub use throttle::MoveThrottle;
