use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    RecordUpdate, RoomRecord, RoomStore, StoreError, close_record, select_active, select_invites,
};
use crate::room::{RoomId, UserId};

const RECORD_EXTENSION: &str = "json";

/// One pretty-printed JSON file per room under `dir`.
///
/// Writes go to a temporary sibling and are renamed into place, so a crash
/// mid-write leaves the previous record intact.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        log::info!("Room records stored under {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, room_id: &RoomId) -> Option<PathBuf> {
        let id = room_id.as_str();
        let safe = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric());
        safe.then(|| self.dir.join(format!("{}.{}", id, RECORD_EXTENSION)))
    }

    fn read(&self, path: &Path) -> Result<Option<RoomRecord>, StoreError> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &Path, record: &RoomRecord) -> Result<(), StoreError> {
        let text = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn modify(
        &self,
        room_id: &RoomId,
        change: impl FnOnce(&mut RoomRecord),
    ) -> Result<(), StoreError> {
        let path = self
            .path_for(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.clone()))?;
        let _guard = self.write_lock.lock();
        let mut record = self
            .read(&path)?
            .ok_or_else(|| StoreError::NotFound(room_id.clone()))?;
        change(&mut record);
        self.write(&path, &record)
    }

    fn all_records(&self) -> Result<Vec<RoomRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match self.read(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping unreadable record {}: {}", path.display(), e),
            }
        }
        Ok(records)
    }
}

impl RoomStore for FileStore {
    fn create(&self, record: RoomRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.room_id).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("room id {:?} is not a valid file name", record.room_id.as_str()),
            ))
        })?;
        let _guard = self.write_lock.lock();
        if path.exists() {
            return Err(StoreError::AlreadyExists(record.room_id));
        }
        self.write(&path, &record)
    }

    fn get(&self, room_id: &RoomId) -> Result<Option<RoomRecord>, StoreError> {
        match self.path_for(room_id) {
            Some(path) => self.read(&path),
            None => Ok(None),
        }
    }

    fn update(&self, room_id: &RoomId, update: RecordUpdate) -> Result<(), StoreError> {
        self.modify(room_id, |record| update.apply(record, Utc::now()))
    }

    fn close(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.modify(room_id, |record| close_record(record, at))
    }

    fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(select_active(self.all_records()?.into_iter(), user_id))
    }

    fn list_invites_for_user(&self, user_id: UserId) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(select_invites(self.all_records()?.into_iter(), user_id))
    }
}
