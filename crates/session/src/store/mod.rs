//! Durable room records.
//!
//! One record per room: lifecycle status, participant identities, the
//! furthest shared level and the JSON state snapshot. Engines are synchronous;
//! the session layer only reaches them through [`StoreMirror`], which applies
//! writes in order on a background task, and through blocking reads during
//! rehydration.

mod file;
mod memory;
mod mirror;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::room::{RoomId, RoomStatus, UserId};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use mirror::StoreMirror;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("room {0} already has a record")]
    AlreadyExists(RoomId),
    #[error("room {0} has no record")]
    NotFound(RoomId),
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub host_user_id: UserId,
    pub client_user_id: Option<UserId>,
    pub invited_user_id: Option<UserId>,
    pub status: RoomStatus,
    pub last_level_reached: u32,
    pub state_snapshot: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl RoomRecord {
    pub fn is_closed(&self) -> bool {
        self.status == RoomStatus::Closed
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.host_user_id == user_id || self.client_user_id == Some(user_id)
    }
}

/// Partial update; `None` fields leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub client_user_id: Option<UserId>,
    pub invited_user_id: Option<UserId>,
    pub status: Option<RoomStatus>,
    pub last_level_reached: Option<u32>,
    pub state_snapshot: Option<String>,
}

impl RecordUpdate {
    /// Every mutable field of `record`, as produced by `Room::to_record`.
    pub fn from_record(record: RoomRecord) -> Self {
        Self {
            client_user_id: record.client_user_id,
            invited_user_id: record.invited_user_id,
            status: Some(record.status),
            last_level_reached: Some(record.last_level_reached),
            state_snapshot: record.state_snapshot,
        }
    }

    pub fn apply(self, record: &mut RoomRecord, now: DateTime<Utc>) {
        if let Some(client) = self.client_user_id {
            record.client_user_id = Some(client);
        }
        if let Some(invited) = self.invited_user_id {
            record.invited_user_id = Some(invited);
        }
        if let Some(status) = self.status {
            // Soft-closed records stay closed.
            if !record.is_closed() {
                record.status = status;
            }
        }
        if let Some(level) = self.last_level_reached {
            record.last_level_reached = record.last_level_reached.max(level);
        }
        if let Some(snapshot) = self.state_snapshot {
            record.state_snapshot = Some(snapshot);
        }
        record.updated_at = now;
    }
}

pub trait RoomStore: Send + Sync {
    fn create(&self, record: RoomRecord) -> Result<(), StoreError>;

    fn get(&self, room_id: &RoomId) -> Result<Option<RoomRecord>, StoreError>;

    fn update(&self, room_id: &RoomId, update: RecordUpdate) -> Result<(), StoreError>;

    /// Marks the record closed; it is never deleted.
    fn close(&self, room_id: &RoomId, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Non-closed rooms where `user_id` holds the host or client seat, newest first.
    fn list_active_for_user(&self, user_id: UserId) -> Result<Vec<RoomRecord>, StoreError>;

    /// Rooms with a pending invite addressed to `user_id`, newest first.
    fn list_invites_for_user(&self, user_id: UserId) -> Result<Vec<RoomRecord>, StoreError>;
}

pub(crate) fn close_record(record: &mut RoomRecord, at: DateTime<Utc>) {
    record.status = RoomStatus::Closed;
    record.closed_at = Some(at);
    record.updated_at = at;
}

pub(crate) fn select_active(
    records: impl Iterator<Item = RoomRecord>,
    user_id: UserId,
) -> Vec<RoomRecord> {
    let mut rooms: Vec<RoomRecord> = records
        .filter(|r| !r.is_closed() && r.involves(user_id))
        .collect();
    rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    rooms
}

pub(crate) fn select_invites(
    records: impl Iterator<Item = RoomRecord>,
    user_id: UserId,
) -> Vec<RoomRecord> {
    let mut rooms: Vec<RoomRecord> = records
        .filter(|r| r.status == RoomStatus::Invited && r.invited_user_id == Some(user_id))
        .collect();
    rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    rooms
}
