use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::room::{ConnectionId, Room, RoomId, RoomStatus, SeatInfo, SeatMap, UserId};
use crate::store::StoreMirror;

const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A resident room. Holding the lock is the only way to read or mutate it,
/// which serializes every operation against one room.
pub type SharedRoom = Arc<tokio::sync::Mutex<Room>>;

#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub status: RoomStatus,
    pub seats: SeatMap<SeatInfo>,
    pub shared_level: u32,
}

/// Live rooms by id, backed by the durable store for rooms that were evicted
/// while their record stayed open.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<RoomId, SharedRoom>>,
    mirror: StoreMirror,
    config: SessionConfig,
}

impl RoomRegistry {
    pub fn new(config: SessionConfig, mirror: StoreMirror) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            mirror,
            config,
        }
    }

    pub fn get(&self, room_id: &RoomId) -> Result<SharedRoom, SessionError> {
        self.rooms
            .lock()
            .get(room_id)
            .cloned()
            .ok_or_else(|| SessionError::RoomNotFound(room_id.clone()))
    }

    pub async fn get_or_rehydrate(&self, room_id: &RoomId) -> Result<SharedRoom, SessionError> {
        if let Ok(room) = self.get(room_id) {
            return Ok(room);
        }

        // Pending writes (including the final save of an eviction) must land
        // before the record is read back.
        self.mirror.flush().await;

        let store = Arc::clone(self.mirror.store());
        let key = room_id.clone();
        let record = match tokio::task::spawn_blocking(move || store.get(&key)).await {
            Ok(Ok(Some(record))) => record,
            Ok(Ok(None)) => return Err(SessionError::RoomNotFound(room_id.clone())),
            Ok(Err(e)) => return Err(self.rehydration_failed(room_id, e.to_string())),
            Err(e) => return Err(self.rehydration_failed(room_id, e.to_string())),
        };

        let room = match Room::from_record(&record) {
            Ok(room) => room,
            Err(SessionError::RehydrationFailed { reason, .. }) => {
                return Err(self.rehydration_failed(room_id, reason));
            }
            Err(e) => return Err(e),
        };

        let mut rooms = self.rooms.lock();
        let shared = rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                log::info!("Rehydrated room {} from storage", room_id);
                Arc::new(tokio::sync::Mutex::new(room))
            })
            .clone();
        Ok(shared)
    }

    /// Allocates a fresh code, registers the room with the host seated and
    /// queues its durable record.
    pub async fn create(
        &self,
        host_user_id: UserId,
        host_connection: ConnectionId,
    ) -> Result<(RoomId, SharedRoom), SessionError> {
        for _ in 0..self.config.max_code_attempts {
            let room_id = RoomId::new(generate_code(self.config.code_length));
            let resident = self.contains(&room_id);
            if resident || self.is_stored(&room_id).await {
                log::debug!("Room code {} already taken, retrying", room_id);
                continue;
            }

            let mut room = Room::new(room_id.clone(), host_user_id, host_connection);
            let record = room.to_record();

            let mut rooms = self.rooms.lock();
            if rooms.contains_key(&room_id) {
                continue;
            }
            let shared = Arc::new(tokio::sync::Mutex::new(room));
            rooms.insert(room_id.clone(), Arc::clone(&shared));
            drop(rooms);

            self.mirror.create(record);
            return Ok((room_id, shared));
        }

        Err(SessionError::RoomIdUnavailable(self.config.max_code_attempts))
    }

    /// Drops `room` from memory once neither seat is bound. The durable record
    /// stays open, so a later join rehydrates it.
    pub fn evict_if_empty(&self, room: &mut Room) -> bool {
        if !room.is_empty() || room.is_evicted() {
            return false;
        }

        if room.has_unsaved_moves() {
            self.mirror.save(room.to_record());
        }
        room.mark_evicted();
        self.rooms.lock().remove(room.id());
        log::info!("Evicted empty room {}", room.id());
        true
    }

    pub fn remove(&self, room: &mut Room) {
        room.mark_evicted();
        self.rooms.lock().remove(room.id());
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.lock().contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }

    /// Best-effort listing for dashboards; rooms busy with an operation are skipped.
    pub fn room_infos(&self) -> Vec<RoomInfo> {
        let rooms: Vec<SharedRoom> = self.rooms.lock().values().cloned().collect();
        let mut infos: Vec<RoomInfo> = rooms
            .iter()
            .filter_map(|shared| {
                let room = shared.try_lock().ok()?;
                Some(RoomInfo {
                    room_id: room.id().clone(),
                    status: room.status(),
                    seats: room.seat_map(),
                    shared_level: room.puzzle().shared_level(),
                })
            })
            .collect();
        infos.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        infos
    }

    async fn is_stored(&self, room_id: &RoomId) -> bool {
        let store = Arc::clone(self.mirror.store());
        let key = room_id.clone();
        match tokio::task::spawn_blocking(move || store.get(&key)).await {
            Ok(Ok(found)) => found.is_some(),
            Ok(Err(e)) => {
                log::warn!("Could not check room code {} against storage: {}", room_id, e);
                false
            }
            Err(e) => {
                log::warn!("Room code lookup for {} panicked: {}", room_id, e);
                false
            }
        }
    }

    fn rehydration_failed(&self, room_id: &RoomId, reason: String) -> SessionError {
        log::warn!("Rehydration of room {} failed: {}", room_id, reason);
        SessionError::RehydrationFailed {
            room_id: room_id.clone(),
            reason,
        }
    }
}

pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
