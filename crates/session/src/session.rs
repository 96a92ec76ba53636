//! Protocol operations against rooms.
//!
//! Every operation follows the same shape: resolve the caller, lock the room
//! (rehydrating it when the operation may target a non-resident room),
//! validate, mutate, emit events, then queue the durable write. Validation
//! always happens before the first mutation, so a rejected operation leaves
//! the room untouched.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::identity::{IdentityProvider, User};
use crate::net::{
    ClientMessage, ConnectionDirectory, ConnectionManager, InviteSummary, Outbound, RoomSummary,
    ServerMessage,
};
use crate::registry::RoomRegistry;
use crate::room::{
    ConnectionId, JoinSeat, ObjectId, ObjectState, PuzzleProgress, PuzzleUpdate, Room, RoomId,
    RoomStatus, Seat, Transform, UserId,
};
use crate::store::{RoomRecord, RoomStore, StoreError, StoreMirror};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub resident_rooms: usize,
    pub connections: usize,
    pub identified: usize,
}

enum ErrorRoute {
    Invite(RoomId),
    Join(RoomId),
    Generic,
}

pub struct SessionHandler {
    registry: RoomRegistry,
    connections: Mutex<ConnectionManager>,
    directory: Mutex<ConnectionDirectory>,
    identity: Arc<dyn IdentityProvider>,
    mirror: StoreMirror,
}

impl SessionHandler {
    /// Must be called from within a tokio runtime; starts the persistence mirror.
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn RoomStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let mirror = StoreMirror::spawn(store);
        Self {
            registry: RoomRegistry::new(config, mirror.clone()),
            connections: Mutex::new(ConnectionManager::new()),
            directory: Mutex::new(ConnectionDirectory::new()),
            identity,
            mirror,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn mirror(&self) -> &StoreMirror {
        &self.mirror
    }

    pub fn stats(&self) -> SessionStats {
        let (connections, identified) = {
            let manager = self.connections.lock();
            (manager.connected_count(), manager.identified_count())
        };
        SessionStats {
            resident_rooms: self.registry.len(),
            connections,
            identified,
        }
    }

    pub fn connect(&self, addr: Option<SocketAddr>, sender: Outbound) -> ConnectionId {
        let id = self.connections.lock().open(addr, sender);
        log::debug!("{} opened from {:?}", id, addr);
        id
    }

    /// Releases whatever seat the connection held. Durable identities,
    /// positions and progress stay with the room.
    pub async fn disconnect(&self, connection: ConnectionId) {
        let removed = self.connections.lock().remove(connection);
        self.directory.lock().unregister(connection);

        let Some(conn) = removed else {
            return;
        };
        log::debug!("{} closed", connection);

        if let Some(room_id) = conn.room_id {
            self.leave_room(connection, &room_id).await;
        }
    }

    /// Runs one client request; failures become an error event for the sender only.
    pub async fn handle(&self, connection: ConnectionId, message: ClientMessage) {
        let operation = message.operation();
        log::debug!("{} -> {}", connection, operation);

        let route = match &message {
            ClientMessage::Invite { room_id, .. } => ErrorRoute::Invite(room_id.clone()),
            ClientMessage::JoinRoom { room_id } => ErrorRoute::Join(room_id.clone()),
            _ => ErrorRoute::Generic,
        };

        let outcome = match message {
            ClientMessage::Identify { user_id } => {
                self.identify(connection, user_id).await.map(drop)
            }
            ClientMessage::CreateRoom => self.create_room(connection).await.map(drop),
            ClientMessage::Invite {
                room_id,
                target_display_name,
            } => self.invite(connection, &room_id, &target_display_name).await,
            ClientMessage::JoinRoom { room_id } => {
                self.join_room(connection, &room_id).await.map(drop)
            }
            ClientMessage::RecordMove { room_id, transform } => {
                self.record_move(connection, &room_id, transform).await
            }
            ClientMessage::UpdateObject {
                room_id,
                object_id,
                state,
            } => self
                .update_object(connection, &room_id, object_id, state)
                .await
                .map(drop),
            ClientMessage::UpdatePuzzle { room_id, update } => self
                .update_puzzle(connection, &room_id, update)
                .await
                .map(drop),
            ClientMessage::CloseRoom { room_id } => self.close_room(connection, &room_id).await,
            ClientMessage::ListRooms => self.list_rooms(connection).await.map(drop),
            ClientMessage::ListInvites => self.list_invites(connection).await.map(drop),
        };

        if let Err(error) = outcome {
            self.report(connection, operation, route, error);
        }
    }

    pub async fn identify(
        &self,
        connection: ConnectionId,
        user_id: UserId,
    ) -> Result<User, SessionError> {
        let user = self
            .identity
            .lookup_by_id(user_id)
            .ok_or(SessionError::LoginRequired)?;

        let previous = self.connections.lock().get(connection).and_then(|c| c.user_id);
        if previous.is_some_and(|p| p != user_id) {
            self.release_seat(connection, None).await;
        }

        if let Some(conn) = self.connections.lock().get_mut(connection) {
            conn.user_id = Some(user_id);
        }
        self.directory.lock().register(user_id, connection);

        self.send(
            connection,
            ServerMessage::Identified {
                user_id,
                display_name: user.display_name.clone(),
            },
        );
        log::info!("{} identified as {} ({})", connection, user.display_name, user_id);
        Ok(user)
    }

    pub async fn create_room(&self, connection: ConnectionId) -> Result<RoomId, SessionError> {
        let user_id = self.caller(connection)?;
        let (room_id, shared) = self.registry.create(user_id, connection).await?;
        self.release_seat(connection, Some(&room_id)).await;

        let room = shared.lock().await;
        self.set_room(connection, Some(room_id.clone()));

        self.send(
            connection,
            ServerMessage::RoomCreated {
                room_id: room_id.clone(),
                seat: Seat::Host,
            },
        );
        self.send(
            connection,
            ServerMessage::RoomState {
                room_id: room_id.clone(),
                state: room.snapshot(),
            },
        );
        self.send(
            connection,
            ServerMessage::SeatAssigned {
                room_id: room_id.clone(),
                seat: Seat::Host,
            },
        );

        log::info!("Room {} created by {}", room_id, user_id);
        Ok(room_id)
    }

    pub async fn invite(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
        target_display_name: &str,
    ) -> Result<(), SessionError> {
        let user_id = self.caller(connection)?;
        let mut room = self.lock_room(room_id, true).await?;

        let result = self.apply_invite(&mut room, connection, user_id, target_display_name);
        self.registry.evict_if_empty(&mut room);
        result
    }

    fn apply_invite(
        &self,
        room: &mut Room,
        connection: ConnectionId,
        user_id: UserId,
        target_display_name: &str,
    ) -> Result<(), SessionError> {
        room.check_invite(user_id)?;
        let target = self
            .identity
            .lookup_by_name(target_display_name)
            .ok_or_else(|| SessionError::TargetUserNotFound(target_display_name.to_string()))?;
        if target.id == user_id {
            return Err(SessionError::CannotInviteSelf);
        }

        room.invite(target.id);
        self.mirror.save(room.to_record());

        let room_id = room.id().clone();
        self.send(
            connection,
            ServerMessage::InviteSent {
                room_id: room_id.clone(),
                target_display_name: target.display_name.clone(),
            },
        );

        let host_display_name = self.display_name(user_id);
        let targets = self.directory.lock().connections_for(target.id);
        {
            let connections = self.connections.lock();
            for target_connection in &targets {
                connections.send(
                    *target_connection,
                    ServerMessage::InviteReceived {
                        room_id: room_id.clone(),
                        host_display_name: host_display_name.clone(),
                    },
                );
            }
        }

        log::info!(
            "Room {}: {} invited {} ({} live connections)",
            room_id,
            user_id,
            target.id,
            targets.len()
        );
        Ok(())
    }

    pub async fn join_room(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
    ) -> Result<Seat, SessionError> {
        let user_id = self.caller(connection)?;

        // The current seat is only given up once the target would accept the
        // caller. One room lock at a time: the check guard is dropped before
        // the old room is locked.
        {
            let mut room = self.lock_room(room_id, true).await?;
            if let Err(e) = room.join_seat_for(user_id) {
                self.registry.evict_if_empty(&mut room);
                return Err(e);
            }
        }
        self.release_seat(connection, Some(room_id)).await;

        let mut room = self.lock_room(room_id, true).await?;
        let seat = match room.join_seat_for(user_id) {
            Ok(JoinSeat::Returning(seat)) => seat,
            Ok(JoinSeat::NewClient) => {
                room.accept_client(user_id);
                self.mirror.save(room.to_record());
                Seat::Client
            }
            Err(e) => {
                self.registry.evict_if_empty(&mut room);
                return Err(e);
            }
        };

        if let Some(previous) = room.bind(seat, connection) {
            if previous != connection {
                self.detach(previous, room_id);
                self.send(
                    previous,
                    ServerMessage::SeatTakenOver {
                        room_id: room_id.clone(),
                        seat,
                    },
                );
            }
        }
        self.set_room(connection, Some(room_id.clone()));

        self.send(
            connection,
            ServerMessage::SeatAssigned {
                room_id: room_id.clone(),
                seat,
            },
        );
        self.broadcast(
            &room,
            ServerMessage::SeatMapChanged {
                room_id: room_id.clone(),
                seats: room.seat_map(),
            },
        );
        self.broadcast(
            &room,
            ServerMessage::RoomState {
                room_id: room_id.clone(),
                state: room.snapshot(),
            },
        );

        log::info!(
            "Room {}: {} joined as {} ({})",
            room_id,
            user_id,
            seat.as_str(),
            room.status().as_str()
        );
        Ok(seat)
    }

    /// High-frequency path: relayed to the other seat and kept in memory only.
    pub async fn record_move(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
        transform: Transform,
    ) -> Result<(), SessionError> {
        let mut room = self.lock_room(room_id, false).await?;
        let seat = seat_in(&room, connection)?;

        room.record_move(seat, transform);
        self.send_to_seat(
            &room,
            seat.other(),
            ServerMessage::RemoteTransform {
                room_id: room_id.clone(),
                seat,
                transform,
            },
        );
        Ok(())
    }

    pub async fn update_object(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
        object_id: ObjectId,
        partial: ObjectState,
    ) -> Result<ObjectState, SessionError> {
        let mut room = self.lock_room(room_id, false).await?;
        let seat = seat_in(&room, connection)?;

        let merged = room.merge_object(&object_id, &partial);
        self.send_to_seat(
            &room,
            seat.other(),
            ServerMessage::ObjectChanged {
                room_id: room_id.clone(),
                object_id,
                state: merged.clone(),
            },
        );
        self.mirror.save(room.to_record());
        Ok(merged)
    }

    pub async fn update_puzzle(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
        update: PuzzleUpdate,
    ) -> Result<PuzzleProgress, SessionError> {
        let mut room = self.lock_room(room_id, false).await?;
        let seat = seat_in(&room, connection)?;

        let progress = room.update_puzzle(seat, &update).clone();
        self.broadcast(
            &room,
            ServerMessage::PuzzleProgressChanged {
                room_id: room_id.clone(),
                progress: progress.clone(),
            },
        );
        self.mirror.save(room.to_record());

        log::debug!(
            "Room {}: levels host={} client={} shared={}",
            room_id,
            progress.host_level(),
            progress.client_level(),
            progress.shared_level()
        );
        Ok(progress)
    }

    pub async fn close_room(
        &self,
        connection: ConnectionId,
        room_id: &RoomId,
    ) -> Result<(), SessionError> {
        let user_id = self.caller(connection)?;
        let mut room = self.lock_room(room_id, true).await?;

        if room.host_user_id() != user_id {
            self.registry.evict_if_empty(&mut room);
            return Err(SessionError::NotHost);
        }

        room.close();
        let closed = ServerMessage::RoomClosed {
            room_id: room_id.clone(),
        };
        self.broadcast(&room, closed.clone());
        if room.seat_of_connection(connection).is_none() {
            self.send(connection, closed);
        }

        // Queued before removal: a rehydration racing this close flushes the
        // mirror first and then sees the closed record.
        self.mirror.save(room.to_record());
        self.mirror.close(room_id.clone(), Utc::now());
        self.registry.remove(&mut room);

        for (_, bound) in room.bound_connections() {
            self.detach(bound, room_id);
        }

        log::info!("Room {} closed by {}", room_id, user_id);
        Ok(())
    }

    pub async fn list_rooms(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<RoomSummary>, SessionError> {
        let user_id = self.caller(connection)?;
        let records = self
            .query_store(move |store| store.list_active_for_user(user_id))
            .await?;

        let rooms: Vec<RoomSummary> = records.iter().map(RoomSummary::from).collect();
        self.send(
            connection,
            ServerMessage::RoomList {
                rooms: rooms.clone(),
            },
        );
        Ok(rooms)
    }

    pub async fn list_invites(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<InviteSummary>, SessionError> {
        let user_id = self.caller(connection)?;
        let records = self
            .query_store(move |store| store.list_invites_for_user(user_id))
            .await?;

        let invites: Vec<InviteSummary> = records
            .iter()
            .map(|record| InviteSummary {
                room_id: record.room_id.clone(),
                host_user_id: record.host_user_id,
                host_display_name: self.display_name(record.host_user_id),
                updated_at: record.updated_at,
            })
            .collect();
        self.send(
            connection,
            ServerMessage::InviteList {
                invites: invites.clone(),
            },
        );
        Ok(invites)
    }

    async fn leave_room(&self, connection: ConnectionId, room_id: &RoomId) {
        let Ok(mut room) = self.lock_room(room_id, false).await else {
            return;
        };
        let Some(seat) = room.unbind(connection) else {
            return;
        };
        log::info!("Room {}: {} left the {} seat", room_id, connection, seat.as_str());

        if !self.registry.evict_if_empty(&mut room) {
            self.broadcast(
                &room,
                ServerMessage::ParticipantLeft {
                    room_id: room_id.clone(),
                    seat,
                    seats: room.seat_map(),
                },
            );
        }
    }

    /// Gives up the seat the connection holds, unless it is in `keep`.
    async fn release_seat(&self, connection: ConnectionId, keep: Option<&RoomId>) {
        let current = self
            .connections
            .lock()
            .get(connection)
            .and_then(|c| c.room_id.clone());

        if let Some(room_id) = current {
            if Some(&room_id) != keep {
                self.set_room(connection, None);
                self.leave_room(connection, &room_id).await;
            }
        }
    }

    async fn lock_room(
        &self,
        room_id: &RoomId,
        rehydrate: bool,
    ) -> Result<OwnedMutexGuard<Room>, SessionError> {
        loop {
            let shared = if rehydrate {
                self.registry.get_or_rehydrate(room_id).await?
            } else {
                self.registry.get(room_id)?
            };

            let room = shared.lock_owned().await;
            if !room.is_evicted() {
                return Ok(room);
            }
            if room.status() == RoomStatus::Closed {
                return Err(SessionError::RoomClosed(room_id.clone()));
            }
            // Evicted between lookup and lock; resolve again.
        }
    }

    async fn query_store<F>(&self, query: F) -> Result<Vec<RoomRecord>, SessionError>
    where
        F: FnOnce(&dyn RoomStore) -> Result<Vec<RoomRecord>, StoreError> + Send + 'static,
    {
        self.mirror.flush().await;
        let store = Arc::clone(self.mirror.store());
        match tokio::task::spawn_blocking(move || query(&*store)).await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(e)) => {
                log::warn!("Room listing failed: {}", e);
                Err(SessionError::StorageUnavailable(e.to_string()))
            }
            Err(e) => {
                log::error!("Room listing task panicked: {}", e);
                Err(SessionError::StorageUnavailable(e.to_string()))
            }
        }
    }

    fn caller(&self, connection: ConnectionId) -> Result<UserId, SessionError> {
        self.connections
            .lock()
            .get(connection)
            .and_then(|c| c.user_id)
            .ok_or(SessionError::LoginRequired)
    }

    fn display_name(&self, user_id: UserId) -> String {
        self.identity
            .lookup_by_id(user_id)
            .map(|u| u.display_name)
            .unwrap_or_else(|| user_id.to_string())
    }

    fn set_room(&self, connection: ConnectionId, room_id: Option<RoomId>) {
        if let Some(conn) = self.connections.lock().get_mut(connection) {
            conn.room_id = room_id;
        }
    }

    /// Forgets `room_id` on a connection that no longer holds a seat there.
    fn detach(&self, connection: ConnectionId, room_id: &RoomId) {
        if let Some(conn) = self.connections.lock().get_mut(connection) {
            if conn.room_id.as_ref() == Some(room_id) {
                conn.room_id = None;
            }
        }
    }

    /// Queues `message` for one connection; dropped if it has gone away.
    pub fn send(&self, connection: ConnectionId, message: ServerMessage) {
        self.connections.lock().send(connection, message);
    }

    fn send_to_seat(&self, room: &Room, seat: Seat, message: ServerMessage) {
        if let Some(connection) = room.connection(seat) {
            self.send(connection, message);
        }
    }

    fn broadcast(&self, room: &Room, message: ServerMessage) {
        let connections = self.connections.lock();
        for (_, connection) in room.bound_connections() {
            connections.send(connection, message.clone());
        }
    }

    fn report(
        &self,
        connection: ConnectionId,
        operation: &str,
        route: ErrorRoute,
        error: SessionError,
    ) {
        match &error {
            SessionError::RehydrationFailed { room_id, reason } => {
                log::warn!(
                    "{} {} on room {}: rehydration failed: {}",
                    connection,
                    operation,
                    room_id,
                    reason
                );
            }
            other => log::debug!("{} {} rejected: {}", connection, operation, other),
        }

        let reason = error.code();
        let message = error.public_message();
        let event = match route {
            ErrorRoute::Invite(room_id) => ServerMessage::InviteError {
                room_id,
                reason,
                message,
            },
            ErrorRoute::Join(room_id) => ServerMessage::JoinError {
                room_id,
                reason,
                message,
            },
            ErrorRoute::Generic => ServerMessage::Error {
                operation: operation.to_string(),
                reason,
                message,
            },
        };
        self.send(connection, event);
    }
}

fn seat_in(room: &Room, connection: ConnectionId) -> Result<Seat, SessionError> {
    room.seat_of_connection(connection)
        .ok_or_else(|| SessionError::NotSeated(room.id().clone()))
}
