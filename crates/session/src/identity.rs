use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::room::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("display name must not be empty")]
    EmptyName,
    #[error("display name {0:?} is taken")]
    NameTaken(String),
    #[error("no user ids left to assign")]
    IdsExhausted,
    #[error("failed to read users file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse users file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Opaque source of user identities. Credentials live elsewhere; the session
/// layer only resolves ids and display names.
pub trait IdentityProvider: Send + Sync {
    fn lookup_by_id(&self, id: UserId) -> Option<User>;

    /// Display names match case-insensitively.
    fn lookup_by_name(&self, display_name: &str) -> Option<User>;

    fn register(&self, display_name: &str) -> Result<User, IdentityError>;
}

#[derive(Debug)]
pub struct MemoryIdentity {
    users: RwLock<HashMap<UserId, User>>,
    next_id: AtomicU64,
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let identity = Self::new();
        let mut max_id = 0;
        {
            let mut map = identity.users.write();
            for user in users {
                max_id = max_id.max(user.id.0);
                map.insert(user.id, user);
            }
        }
        identity.next_id.store(max_id.saturating_add(1), Ordering::SeqCst);
        identity
    }

    /// Seeds from a JSON array of `{"id": .., "display_name": ..}` objects.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IdentityError> {
        let text = std::fs::read_to_string(path)?;
        let users: Vec<User> = serde_json::from_str(&text)?;
        Ok(Self::with_users(users))
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl IdentityProvider for MemoryIdentity {
    fn lookup_by_id(&self, id: UserId) -> Option<User> {
        self.users.read().get(&id).cloned()
    }

    fn lookup_by_name(&self, display_name: &str) -> Option<User> {
        let wanted = display_name.trim();
        self.users
            .read()
            .values()
            .find(|u| u.display_name.eq_ignore_ascii_case(wanted))
            .cloned()
    }

    fn register(&self, display_name: &str) -> Result<User, IdentityError> {
        let name = display_name.trim();
        if name.is_empty() {
            return Err(IdentityError::EmptyName);
        }

        let mut users = self.users.write();
        if users.values().any(|u| u.display_name.eq_ignore_ascii_case(name)) {
            return Err(IdentityError::NameTaken(name.to_string()));
        }

        // Saturates at the top of the range; the last id is handed out once.
        let id = UserId(self.next_id.load(Ordering::SeqCst));
        if users.contains_key(&id) {
            return Err(IdentityError::IdsExhausted);
        }
        self.next_id.store(id.0.saturating_add(1), Ordering::SeqCst);
        let user = User {
            id,
            display_name: name.to_string(),
        };
        users.insert(id, user.clone());
        Ok(user)
    }
}
