use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    /// Moves closer together than this are candidates for suppression.
    pub move_interval: Duration,
    /// Distance under which a move inside `move_interval` is dropped.
    pub move_epsilon: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: format!("ws://127.0.0.1:{}", coop::DEFAULT_PORT),
            move_interval: Duration::from_millis(50),
            move_epsilon: 0.001,
        }
    }
}

impl ClientConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}
