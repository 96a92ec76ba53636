use coop::RespawnToken;

/// Detects respawn requests by change of token.
///
/// Each distinct token fires once. Tokens already present when the room
/// state is first loaded are recorded without firing.
#[derive(Debug, Clone, Default)]
pub struct RespawnWatcher {
    seen: Option<RespawnToken>,
}

impl RespawnWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prime(&mut self, token: Option<RespawnToken>) {
        self.seen = token;
    }

    pub fn observe(&mut self, token: Option<RespawnToken>) -> Option<RespawnToken> {
        let token = token?;
        if self.seen == Some(token) {
            return None;
        }
        self.seen = Some(token);
        Some(token)
    }

    pub fn reset(&mut self) {
        self.seen = None;
    }
}
