mod puzzle;
mod world;

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Index, IndexMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::store::RoomRecord;

pub use puzzle::{FIRST_LEVEL, PuzzleProgress, PuzzleUpdate, RespawnToken};
pub use world::{Hole, ObjectId, ObjectState, Transform, World, merge_state, position_state};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seat {
    Host,
    Client,
}

impl Seat {
    pub fn other(self) -> Seat {
        match self {
            Seat::Host => Seat::Client,
            Seat::Client => Seat::Host,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Seat::Host => "host",
            Seat::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatMap<T> {
    pub host: T,
    pub client: T,
}

impl<T> SeatMap<T> {
    pub fn new(host: T, client: T) -> Self {
        Self { host, client }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Seat, &T)> {
        [(Seat::Host, &self.host), (Seat::Client, &self.client)].into_iter()
    }
}

impl<T> Index<Seat> for SeatMap<T> {
    type Output = T;

    fn index(&self, seat: Seat) -> &T {
        match seat {
            Seat::Host => &self.host,
            Seat::Client => &self.client,
        }
    }
}

impl<T> IndexMut<Seat> for SeatMap<T> {
    fn index_mut(&mut self, seat: Seat) -> &mut T {
        match seat {
            Seat::Host => &mut self.host,
            Seat::Client => &mut self.client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Invited,
    Active,
    Closed,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Waiting => "waiting",
            RoomStatus::Invited => "invited",
            RoomStatus::Active => "active",
            RoomStatus::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatInfo {
    pub user_id: Option<UserId>,
    pub connected: bool,
}

/// Shared state sent to participants and persisted as the record's JSON snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub world: World,
    pub objects: BTreeMap<ObjectId, ObjectState>,
    pub puzzle_progress: PuzzleProgress,
    pub player_positions: SeatMap<Transform>,
}

/// How a joining identity lands in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSeat {
    Returning(Seat),
    NewClient,
}

#[derive(Debug)]
pub struct Room {
    id: RoomId,
    status: RoomStatus,
    connections: SeatMap<Option<ConnectionId>>,
    host_user_id: UserId,
    client_user_id: Option<UserId>,
    invited_user_id: Option<UserId>,
    world: World,
    objects: BTreeMap<ObjectId, ObjectState>,
    puzzle: PuzzleProgress,
    player_positions: SeatMap<Transform>,
    last_level_reached: u32,
    created_at: DateTime<Utc>,
    last_mutated_at: DateTime<Utc>,
    unsaved_moves: bool,
    evicted: bool,
}

impl Room {
    pub fn new(id: RoomId, host_user_id: UserId, host_connection: ConnectionId) -> Self {
        let world = World::default();
        let now = Utc::now();

        Self {
            id,
            status: RoomStatus::Waiting,
            connections: SeatMap::new(Some(host_connection), None),
            host_user_id,
            client_user_id: None,
            invited_user_id: None,
            objects: world.initial_objects(),
            player_positions: world.spawn_transforms(),
            world,
            puzzle: PuzzleProgress::default(),
            last_level_reached: FIRST_LEVEL,
            created_at: now,
            last_mutated_at: now,
            unsaved_moves: false,
            evicted: false,
        }
    }

    /// Rebuilds a room from its durable record with both seats unbound.
    pub fn from_record(record: &RoomRecord) -> Result<Self, SessionError> {
        let failed = |reason: String| SessionError::RehydrationFailed {
            room_id: record.room_id.clone(),
            reason,
        };

        if record.status == RoomStatus::Closed {
            return Err(SessionError::RoomClosed(record.room_id.clone()));
        }

        let json = record
            .state_snapshot
            .as_deref()
            .ok_or_else(|| failed("record has no state snapshot".to_string()))?;
        let snapshot: RoomSnapshot =
            serde_json::from_str(json).map_err(|e| failed(format!("corrupt snapshot: {}", e)))?;

        if !snapshot.puzzle_progress.is_consistent() {
            return Err(failed("shared level does not match seat levels".to_string()));
        }
        if record.status == RoomStatus::Invited
            && (record.invited_user_id.is_none() || record.client_user_id.is_some())
        {
            return Err(failed("invited room without a pending invite".to_string()));
        }

        Ok(Self {
            id: record.room_id.clone(),
            status: record.status,
            connections: SeatMap::default(),
            host_user_id: record.host_user_id,
            client_user_id: record.client_user_id,
            invited_user_id: record.invited_user_id,
            world: snapshot.world,
            objects: snapshot.objects,
            puzzle: snapshot.puzzle_progress,
            player_positions: snapshot.player_positions,
            last_level_reached: record.last_level_reached,
            created_at: record.created_at,
            last_mutated_at: record.updated_at,
            unsaved_moves: false,
            evicted: false,
        })
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn host_user_id(&self) -> UserId {
        self.host_user_id
    }

    pub fn client_user_id(&self) -> Option<UserId> {
        self.client_user_id
    }

    pub fn invited_user_id(&self) -> Option<UserId> {
        self.invited_user_id
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn objects(&self) -> &BTreeMap<ObjectId, ObjectState> {
        &self.objects
    }

    pub fn object(&self, object_id: &str) -> Option<&ObjectState> {
        self.objects.get(object_id)
    }

    pub fn puzzle(&self) -> &PuzzleProgress {
        &self.puzzle
    }

    pub fn player_position(&self, seat: Seat) -> Transform {
        self.player_positions[seat]
    }

    pub fn last_level_reached(&self) -> u32 {
        self.last_level_reached
    }

    pub fn connection(&self, seat: Seat) -> Option<ConnectionId> {
        self.connections[seat]
    }

    pub fn bound_connections(&self) -> impl Iterator<Item = (Seat, ConnectionId)> + '_ {
        self.connections
            .iter()
            .filter_map(|(seat, conn)| conn.map(|c| (seat, c)))
    }

    pub fn seat_of_connection(&self, connection: ConnectionId) -> Option<Seat> {
        self.connections
            .iter()
            .find(|(_, bound)| **bound == Some(connection))
            .map(|(seat, _)| seat)
    }

    pub fn seat_of_user(&self, user_id: UserId) -> Option<Seat> {
        if user_id == self.host_user_id {
            Some(Seat::Host)
        } else if self.client_user_id == Some(user_id) {
            Some(Seat::Client)
        } else {
            None
        }
    }

    pub fn seat_map(&self) -> SeatMap<SeatInfo> {
        SeatMap::new(
            SeatInfo {
                user_id: Some(self.host_user_id),
                connected: self.connections.host.is_some(),
            },
            SeatInfo {
                user_id: self.client_user_id,
                connected: self.connections.client.is_some(),
            },
        )
    }

    pub fn is_empty(&self) -> bool {
        self.connections.host.is_none() && self.connections.client.is_none()
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    pub fn has_unsaved_moves(&self) -> bool {
        self.unsaved_moves
    }

    /// Resolves the seat `user_id` would occupy without mutating anything.
    pub fn join_seat_for(&self, user_id: UserId) -> Result<JoinSeat, SessionError> {
        match self.status {
            RoomStatus::Closed => return Err(SessionError::RoomClosed(self.id.clone())),
            RoomStatus::Invited
                if user_id != self.host_user_id && self.invited_user_id != Some(user_id) =>
            {
                return Err(SessionError::InviteOnlyRejected(self.id.clone()));
            }
            _ => {}
        }

        if let Some(seat) = self.seat_of_user(user_id) {
            return Ok(JoinSeat::Returning(seat));
        }
        if self.client_user_id.is_none() {
            return Ok(JoinSeat::NewClient);
        }
        Err(SessionError::RoomFull(self.id.clone()))
    }

    /// Checks the host-only, waiting-only preconditions of an invite.
    pub fn check_invite(&self, caller: UserId) -> Result<(), SessionError> {
        if caller != self.host_user_id {
            return Err(SessionError::NotHost);
        }
        if self.status != RoomStatus::Waiting {
            return Err(SessionError::RoomNotInWaitingState(self.id.clone()));
        }
        Ok(())
    }

    pub fn invite(&mut self, user_id: UserId) {
        self.status = RoomStatus::Invited;
        self.invited_user_id = Some(user_id);
        self.touch();
    }

    /// Takes the client seat's identity; set exactly once per room.
    pub fn accept_client(&mut self, user_id: UserId) {
        debug_assert!(self.client_user_id.is_none());
        self.client_user_id = Some(user_id);
        self.status = RoomStatus::Active;
        self.touch();
    }

    /// Returns the connection previously bound to `seat`, if any.
    pub fn bind(&mut self, seat: Seat, connection: ConnectionId) -> Option<ConnectionId> {
        self.connections[seat].replace(connection)
    }

    pub fn unbind(&mut self, connection: ConnectionId) -> Option<Seat> {
        let seat = self.seat_of_connection(connection)?;
        self.connections[seat] = None;
        Some(seat)
    }

    pub fn close(&mut self) {
        self.status = RoomStatus::Closed;
        self.touch();
    }

    pub fn record_move(&mut self, seat: Seat, transform: Transform) {
        self.player_positions[seat] = transform;
        self.unsaved_moves = true;
    }

    pub fn merge_object(&mut self, object_id: &str, partial: &ObjectState) -> ObjectState {
        let state = self.objects.entry(object_id.to_string()).or_default();
        merge_state(state, partial);
        let merged = state.clone();
        self.touch();
        merged
    }

    pub fn update_puzzle(&mut self, seat: Seat, update: &PuzzleUpdate) -> &PuzzleProgress {
        self.puzzle.apply(seat, update);
        self.last_level_reached = self.last_level_reached.max(self.puzzle.shared_level());
        self.touch();
        &self.puzzle
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            world: self.world.clone(),
            objects: self.objects.clone(),
            puzzle_progress: self.puzzle.clone(),
            player_positions: self.player_positions,
        }
    }

    /// Produces the durable record and clears the unsaved-moves marker.
    pub fn to_record(&mut self) -> RoomRecord {
        self.unsaved_moves = false;
        let state_snapshot = match serde_json::to_string(&self.snapshot()) {
            Ok(json) => Some(json),
            Err(e) => {
                log::warn!("Failed to encode snapshot of room {}: {}", self.id, e);
                None
            }
        };

        RoomRecord {
            room_id: self.id.clone(),
            host_user_id: self.host_user_id,
            client_user_id: self.client_user_id,
            invited_user_id: self.invited_user_id,
            status: self.status,
            last_level_reached: self.last_level_reached,
            state_snapshot,
            created_at: self.created_at,
            updated_at: self.last_mutated_at,
            closed_at: None,
        }
    }

    fn touch(&mut self) {
        self.last_mutated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use serde_json::json;

    use super::*;

    const HOST: UserId = UserId(1);
    const GUEST: UserId = UserId(2);
    const STRANGER: UserId = UserId(3);

    fn room() -> Room {
        Room::new(RoomId::new("ab12c"), HOST, ConnectionId(10))
    }

    #[test]
    fn test_new_room_defaults() {
        let room = room();

        assert_eq!(room.status(), RoomStatus::Waiting);
        assert_eq!(room.connection(Seat::Host), Some(ConnectionId(10)));
        assert_eq!(room.connection(Seat::Client), None);
        assert_eq!(room.puzzle().shared_level(), 1);
        assert_eq!(room.objects().len(), room.world().blocks.len());
        assert_eq!(
            room.player_position(Seat::Client).position,
            Vec3::new(2.0, 0.5, 0.0)
        );
    }

    #[test]
    fn test_join_gating_while_invited() {
        let mut room = room();
        room.invite(GUEST);

        assert!(matches!(
            room.join_seat_for(STRANGER),
            Err(SessionError::InviteOnlyRejected(_))
        ));
        assert_eq!(room.join_seat_for(HOST).unwrap(), JoinSeat::Returning(Seat::Host));
        assert_eq!(room.join_seat_for(GUEST).unwrap(), JoinSeat::NewClient);
    }

    #[test]
    fn test_join_full_room() {
        let mut room = room();
        room.accept_client(GUEST);

        assert_eq!(room.status(), RoomStatus::Active);
        assert_eq!(room.join_seat_for(GUEST).unwrap(), JoinSeat::Returning(Seat::Client));
        assert!(matches!(
            room.join_seat_for(STRANGER),
            Err(SessionError::RoomFull(_))
        ));
    }

    #[test]
    fn test_invite_preconditions() {
        let mut room = room();
        assert!(matches!(room.check_invite(GUEST), Err(SessionError::NotHost)));
        assert!(room.check_invite(HOST).is_ok());

        room.invite(GUEST);
        assert!(matches!(
            room.check_invite(HOST),
            Err(SessionError::RoomNotInWaitingState(_))
        ));
    }

    #[test]
    fn test_unbind_only_matching_connection() {
        let mut room = room();
        room.accept_client(GUEST);
        room.bind(Seat::Client, ConnectionId(11));

        assert_eq!(room.unbind(ConnectionId(99)), None);
        assert_eq!(room.unbind(ConnectionId(11)), Some(Seat::Client));
        assert!(!room.is_empty());
        assert_eq!(room.unbind(ConnectionId(10)), Some(Seat::Host));
        assert!(room.is_empty());
    }

    #[test]
    fn test_record_round_trip_keeps_progress() {
        let mut room = room();
        room.accept_client(GUEST);
        room.update_puzzle(Seat::Host, &PuzzleUpdate::level(3));
        room.merge_object("block_1", json!({"broken": true}).as_object().unwrap());
        room.record_move(Seat::Host, Transform::at(Vec3::new(5.0, 0.5, 1.0)));

        let record = room.to_record();
        assert!(!room.has_unsaved_moves());

        let restored = Room::from_record(&record).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.client_user_id(), Some(GUEST));
        assert_eq!(restored.puzzle().host_level(), 3);
        assert_eq!(restored.object("block_1").unwrap()["broken"], json!(true));
        assert_eq!(
            restored.player_position(Seat::Host).position,
            Vec3::new(5.0, 0.5, 1.0)
        );
    }

    #[test]
    fn test_corrupt_snapshot_fails_rehydration() {
        let mut record = room().to_record();
        record.state_snapshot = Some("{not json".to_string());

        assert!(matches!(
            Room::from_record(&record),
            Err(SessionError::RehydrationFailed { .. })
        ));

        record.state_snapshot = None;
        assert!(matches!(
            Room::from_record(&record),
            Err(SessionError::RehydrationFailed { .. })
        ));
    }

    #[test]
    fn test_closed_record_is_not_rehydrated() {
        let mut room = room();
        room.close();
        let record = room.to_record();

        assert!(matches!(
            Room::from_record(&record),
            Err(SessionError::RoomClosed(_))
        ));
    }

    #[test]
    fn test_last_level_only_grows() {
        let mut room = room();
        room.accept_client(GUEST);
        room.update_puzzle(Seat::Host, &PuzzleUpdate::level(3));
        room.update_puzzle(Seat::Client, &PuzzleUpdate::level(3));
        assert_eq!(room.last_level_reached(), 3);

        room.update_puzzle(Seat::Client, &PuzzleUpdate::level(1));
        assert_eq!(room.puzzle().shared_level(), 1);
        assert_eq!(room.last_level_reached(), 3);
    }
}
