use std::path::PathBuf;
use std::sync::Arc;

use coop::{
    FileStore, IdentityError, IdentityProvider, MemoryIdentity, MemoryStore, RoomStore,
    SessionConfig, StoreError,
};

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Room records are kept in memory when unset.
    pub data_dir: Option<PathBuf>,
    pub users_file: Option<PathBuf>,
    /// Display names registered on top of the users file.
    pub extra_users: Vec<String>,
    pub session: SessionConfig,
}

impl ServerConfig {
    pub fn open_store(&self) -> Result<Arc<dyn RoomStore>, StoreError> {
        match &self.data_dir {
            Some(dir) => Ok(Arc::new(FileStore::open(dir)?)),
            None => {
                log::warn!("No data directory given, rooms will not survive a restart");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    pub fn load_identity(&self) -> Result<Arc<dyn IdentityProvider>, IdentityError> {
        let identity = match &self.users_file {
            Some(path) => MemoryIdentity::load(path)?,
            None => MemoryIdentity::new(),
        };

        for name in &self.extra_users {
            match identity.register(name) {
                Ok(user) => log::info!("Registered {} as {}", user.display_name, user.id),
                Err(IdentityError::NameTaken(name)) => {
                    log::warn!("User {:?} already exists, skipping", name)
                }
                Err(e) => return Err(e),
            }
        }

        log::info!("{} known users", identity.len());
        Ok(Arc::new(identity))
    }
}

#[cfg(test)]
mod tests {
    use coop::{RoomId, UserId};

    use super::*;

    #[test]
    fn test_memory_store_by_default() {
        let config = ServerConfig::default();
        let store = config.open_store().unwrap();
        assert!(store.get(&RoomId::new("ab12c")).unwrap().is_none());
    }

    #[test]
    fn test_file_store_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: Some(dir.path().join("rooms")),
            ..Default::default()
        };
        config.open_store().unwrap();
        assert!(dir.path().join("rooms").is_dir());
    }

    #[test]
    fn test_users_file_and_extra_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, r#"[{"id": 7, "display_name": "alice"}]"#).unwrap();

        let config = ServerConfig {
            users_file: Some(path),
            extra_users: vec!["bob".to_string(), "ALICE".to_string()],
            ..Default::default()
        };
        let identity = config.load_identity().unwrap();

        assert_eq!(identity.lookup_by_id(UserId(7)).unwrap().display_name, "alice");
        assert_eq!(identity.lookup_by_name("bob").unwrap().id, UserId(8));
    }

    #[test]
    fn test_empty_extra_user_is_rejected() {
        let config = ServerConfig {
            extra_users: vec!["  ".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.load_identity(), Err(IdentityError::EmptyName)));
    }
}
