use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    RecordUpdate, RoomRecord, RoomStore, StoreError, close_record, select_active, select_invites,
};
use crate::room::{RoomId, UserId};

/// Volatile engine; records last as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RoomId, RoomRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Overwrites a record verbatim, bypassing the partial-update rules.
    pub fn put_raw(&self, record: RoomRecord) {
        self.records.write().insert(record.room_id.clone(), record);
    }
}

impl RoomStore for MemoryStore {
    fn create(&self, record: RoomRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&record.room_id) {
            return Err(StoreError::AlreadyExists(record.room_id));
        }
        records.insert(record.room_id.clone(), record);
        Ok(())
    }

    fn get(&self, room_id: &RoomId) -> Result<Option<RoomRecord>, StoreError> {
        Ok(self.records.read().get(room_id).cloned())
    }

    fn update(&self, room_id: &RoomId, update: RecordUpdate) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.clone()))?;
        update.apply(record, Utc::now());
        Ok(())
    }

    fn close(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let record = records
            .get_mut(room_id)
            .ok_or_else(|| StoreError::NotFound(room_id.clone()))?;
        close_record(record, at);
        Ok(())
    }

    fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(select_active(self.records.read().values().cloned(), user_id))
    }

    fn list_invites_for_user(&self, user_id: UserId) -> Result<Vec<RoomRecord>, StoreError> {
        Ok(select_invites(self.records.read().values().cloned(), user_id))
    }
}
