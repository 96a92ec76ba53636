#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub code_length: usize,
    pub max_code_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            code_length: 5,
            max_code_attempts: 16,
        }
    }
}
