use serde::{Deserialize, Serialize};

use super::Seat;

pub const FIRST_LEVEL: u32 = 1;

/// Opaque value whose change tells every participant to reset to the shared checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RespawnToken(pub u64);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level_reached: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respawn_token: Option<RespawnToken>,
}

impl PuzzleUpdate {
    pub fn level(level: u32) -> Self {
        Self {
            level_reached: Some(level),
            respawn_token: None,
        }
    }

    pub fn respawn(token: RespawnToken) -> Self {
        Self {
            level_reached: None,
            respawn_token: Some(token),
        }
    }
}

/// Per-seat checkpoints plus the room-wide level gated by the slower player.
///
/// `shared_level` is never set directly; every mutation recomputes it as the
/// minimum of both seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PuzzleProgress {
    host_level: u32,
    client_level: u32,
    shared_level: u32,
    respawn_token: Option<RespawnToken>,
}

impl Default for PuzzleProgress {
    fn default() -> Self {
        Self {
            host_level: FIRST_LEVEL,
            client_level: FIRST_LEVEL,
            shared_level: FIRST_LEVEL,
            respawn_token: None,
        }
    }
}

impl PuzzleProgress {
    pub fn host_level(&self) -> u32 {
        self.host_level
    }

    pub fn client_level(&self) -> u32 {
        self.client_level
    }

    pub fn shared_level(&self) -> u32 {
        self.shared_level
    }

    pub fn respawn_token(&self) -> Option<RespawnToken> {
        self.respawn_token
    }

    /// Snapshots loaded from storage must already satisfy the gating rule.
    pub fn is_consistent(&self) -> bool {
        self.shared_level == self.host_level.min(self.client_level)
    }

    pub fn report_level(&mut self, seat: Seat, level: u32) {
        match seat {
            Seat::Host => self.host_level = level,
            Seat::Client => self.client_level = level,
        }
        self.recompute();
    }

    /// Returns false when `token` equals the stored one; a repeated token is
    /// the same respawn and must not collapse progress twice.
    pub fn respawn(&mut self, token: RespawnToken) -> bool {
        if self.respawn_token == Some(token) {
            return false;
        }
        self.respawn_token = Some(token);
        self.host_level = self.shared_level;
        self.client_level = self.shared_level;
        true
    }

    pub fn apply(&mut self, seat: Seat, update: &PuzzleUpdate) {
        if let Some(level) = update.level_reached {
            self.report_level(seat, level);
        }
        if let Some(token) = update.respawn_token {
            self.respawn(token);
        }
    }

    fn recompute(&mut self) {
        self.shared_level = self.host_level.min(self.client_level);
    }
}
