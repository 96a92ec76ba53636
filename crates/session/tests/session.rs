use std::sync::Arc;

use glam::Vec3;
use serde_json::json;
use tokio::sync::mpsc;

use coop::{
    ClientMessage, ConnectionId, ErrorCode, MemoryIdentity, MemoryStore, ObjectState, PuzzleUpdate,
    RespawnToken, Room, RoomId, RoomStatus, RoomStore, Seat, ServerMessage, SessionConfig,
    SessionError, SessionHandler, Transform, User, UserId,
};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);

struct Peer {
    id: ConnectionId,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Peer {
    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

fn setup() -> (Arc<SessionHandler>, Arc<MemoryStore>) {
    setup_with(SessionConfig::default())
}

fn setup_with(config: SessionConfig) -> (Arc<SessionHandler>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let identity = Arc::new(MemoryIdentity::with_users([
        user(ALICE, "alice"),
        user(BOB, "bob"),
        user(CAROL, "carol"),
    ]));
    let handler = SessionHandler::new(config, store.clone(), identity);
    (Arc::new(handler), store)
}

fn user(id: UserId, name: &str) -> User {
    User {
        id,
        display_name: name.to_string(),
    }
}

fn state(value: serde_json::Value) -> ObjectState {
    value.as_object().unwrap().clone()
}

async fn connect(handler: &SessionHandler, user_id: UserId) -> Peer {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = handler.connect(None, tx);
    handler.identify(id, user_id).await.unwrap();
    let mut peer = Peer { id, rx };
    peer.drain();
    peer
}

/// Alice hosts, Bob is invited and seated as client.
async fn active_room(handler: &SessionHandler) -> (RoomId, Peer, Peer) {
    let mut host = connect(handler, ALICE).await;
    let mut client = connect(handler, BOB).await;

    let room_id = handler.create_room(host.id).await.unwrap();
    handler.invite(host.id, &room_id, "bob").await.unwrap();
    assert_eq!(handler.join_room(client.id, &room_id).await.unwrap(), Seat::Client);

    host.drain();
    client.drain();
    (room_id, host, client)
}

async fn levels(handler: &SessionHandler, room_id: &RoomId) -> (u32, u32, u32) {
    let shared = handler.registry().get(room_id).unwrap();
    let room = shared.lock().await;
    let puzzle = room.puzzle();
    (puzzle.host_level(), puzzle.client_level(), puzzle.shared_level())
}

#[tokio::test]
async fn test_create_room_starts_waiting_at_first_level() {
    let (handler, store) = setup();
    let mut host = connect(&handler, ALICE).await;

    let room_id = handler.create_room(host.id).await.unwrap();
    assert_eq!(room_id.as_str().len(), 5);

    let messages = host.drain();
    assert!(matches!(&messages[0], ServerMessage::RoomCreated { seat: Seat::Host, .. }));
    assert!(matches!(&messages[1], ServerMessage::RoomState { .. }));
    assert!(matches!(&messages[2], ServerMessage::SeatAssigned { seat: Seat::Host, .. }));

    {
        let shared = handler.registry().get(&room_id).unwrap();
        let room = shared.lock().await;
        assert_eq!(room.status(), RoomStatus::Waiting);
        assert_eq!(room.connection(Seat::Host), Some(host.id));
    }
    assert_eq!(levels(&handler, &room_id).await, (1, 1, 1));

    handler.mirror().flush().await;
    let record = store.get(&room_id).unwrap().unwrap();
    assert_eq!(record.status, RoomStatus::Waiting);
    assert_eq!(record.host_user_id, ALICE);
}

#[tokio::test]
async fn test_invite_gates_the_client_seat() {
    let (handler, _store) = setup();
    let mut host = connect(&handler, ALICE).await;
    let mut bob = connect(&handler, BOB).await;
    let mut carol = connect(&handler, CAROL).await;

    let room_id = handler.create_room(host.id).await.unwrap();
    host.drain();

    handler
        .handle(
            host.id,
            ClientMessage::Invite {
                room_id: room_id.clone(),
                target_display_name: "Bob".to_string(),
            },
        )
        .await;
    assert!(matches!(&host.drain()[..], [ServerMessage::InviteSent { .. }]));
    match &bob.drain()[..] {
        [ServerMessage::InviteReceived { room_id: invited, host_display_name }] => {
            assert_eq!(invited, &room_id);
            assert_eq!(host_display_name, "alice");
        }
        other => panic!("Expected InviteReceived, got {:?}", other),
    }

    handler
        .handle(carol.id, ClientMessage::JoinRoom { room_id: room_id.clone() })
        .await;
    match &carol.drain()[..] {
        [ServerMessage::JoinError { reason, .. }] => {
            assert_eq!(*reason, ErrorCode::InviteOnlyRejected)
        }
        other => panic!("Expected JoinError, got {:?}", other),
    }

    assert_eq!(handler.join_room(bob.id, &room_id).await.unwrap(), Seat::Client);
    let shared = handler.registry().get(&room_id).unwrap();
    let room = shared.lock().await;
    assert_eq!(room.status(), RoomStatus::Active);
    assert_eq!(room.client_user_id(), Some(BOB));
    assert_eq!(room.invited_user_id(), Some(BOB));
}

#[tokio::test]
async fn test_invite_preconditions() {
    let (handler, _store) = setup();
    let mut host = connect(&handler, ALICE).await;
    let mut bob = connect(&handler, BOB).await;
    let room_id = handler.create_room(host.id).await.unwrap();
    host.drain();

    let invite = |target: &str| ClientMessage::Invite {
        room_id: room_id.clone(),
        target_display_name: target.to_string(),
    };

    handler.handle(bob.id, invite("carol")).await;
    assert!(matches!(
        &bob.drain()[..],
        [ServerMessage::InviteError { reason: ErrorCode::NotHost, .. }]
    ));

    handler.handle(host.id, invite("nobody")).await;
    assert!(matches!(
        &host.drain()[..],
        [ServerMessage::InviteError { reason: ErrorCode::TargetUserNotFound, .. }]
    ));

    handler.handle(host.id, invite("alice")).await;
    assert!(matches!(
        &host.drain()[..],
        [ServerMessage::InviteError { reason: ErrorCode::CannotInviteSelf, .. }]
    ));

    handler.handle(host.id, invite("bob")).await;
    host.drain();
    handler.handle(host.id, invite("carol")).await;
    assert!(matches!(
        &host.drain()[..],
        [ServerMessage::InviteError { reason: ErrorCode::RoomNotInWaitingState, .. }]
    ));
}

#[tokio::test]
async fn test_invite_reaches_every_connection_of_the_target() {
    let (handler, _store) = setup();
    let host = connect(&handler, ALICE).await;
    let mut laptop = connect(&handler, BOB).await;
    let mut phone = connect(&handler, BOB).await;

    let room_id = handler.create_room(host.id).await.unwrap();
    handler.invite(host.id, &room_id, "bob").await.unwrap();

    for peer in [&mut laptop, &mut phone] {
        assert!(matches!(&peer.drain()[..], [ServerMessage::InviteReceived { .. }]));
    }
}

#[tokio::test]
async fn test_shared_level_requires_both_seats() {
    let (handler, _store) = setup();
    let (room_id, mut host, mut client) = active_room(&handler).await;

    handler
        .update_puzzle(host.id, &room_id, PuzzleUpdate::level(2))
        .await
        .unwrap();
    assert_eq!(levels(&handler, &room_id).await, (2, 1, 1));

    handler
        .update_puzzle(client.id, &room_id, PuzzleUpdate::level(2))
        .await
        .unwrap();
    assert_eq!(levels(&handler, &room_id).await, (2, 2, 2));

    for peer in [&mut host, &mut client] {
        let messages = peer.drain();
        assert_eq!(messages.len(), 2);
        match messages.last() {
            Some(ServerMessage::PuzzleProgressChanged { progress, .. }) => {
                assert_eq!(progress.shared_level(), 2);
            }
            other => panic!("Expected PuzzleProgressChanged, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_respawn_collapses_levels() {
    let (handler, store) = setup();
    let (room_id, host, client) = active_room(&handler).await;

    handler
        .update_puzzle(host.id, &room_id, PuzzleUpdate::level(3))
        .await
        .unwrap();
    assert_eq!(levels(&handler, &room_id).await, (3, 1, 1));

    let progress = handler
        .update_puzzle(client.id, &room_id, PuzzleUpdate::respawn(RespawnToken(77)))
        .await
        .unwrap();
    assert_eq!(progress.respawn_token(), Some(RespawnToken(77)));
    assert_eq!(levels(&handler, &room_id).await, (1, 1, 1));

    handler.mirror().flush().await;
    let record = store.get(&room_id).unwrap().unwrap();
    assert_eq!(record.last_level_reached, 1);
}

#[tokio::test]
async fn test_repeated_respawn_token_is_ignored() {
    let (handler, _store) = setup();
    let (room_id, host, _client) = active_room(&handler).await;

    handler
        .update_puzzle(host.id, &room_id, PuzzleUpdate::respawn(RespawnToken(5)))
        .await
        .unwrap();
    handler
        .update_puzzle(host.id, &room_id, PuzzleUpdate::level(2))
        .await
        .unwrap();
    handler
        .update_puzzle(host.id, &room_id, PuzzleUpdate::respawn(RespawnToken(5)))
        .await
        .unwrap();

    assert_eq!(levels(&handler, &room_id).await, (2, 1, 1));
}

#[tokio::test]
async fn test_moves_are_relayed_to_the_other_seat_only() {
    let (handler, _store) = setup();
    let (room_id, mut host, mut client) = active_room(&handler).await;
    let transform = Transform::at(Vec3::new(1.0, 0.5, -3.0));

    handler.record_move(host.id, &room_id, transform).await.unwrap();

    assert!(host.drain().is_empty());
    match &client.drain()[..] {
        [ServerMessage::RemoteTransform { seat, transform: relayed, .. }] => {
            assert_eq!(*seat, Seat::Host);
            assert_eq!(*relayed, transform);
        }
        other => panic!("Expected RemoteTransform, got {:?}", other),
    }

    let shared = handler.registry().get(&room_id).unwrap();
    let room = shared.lock().await;
    assert_eq!(room.player_position(Seat::Host), transform);
    assert!(room.has_unsaved_moves());
}

#[tokio::test]
async fn test_update_object_is_idempotent() {
    let (handler, _store) = setup();
    let (room_id, mut host, mut client) = active_room(&handler).await;
    let partial = state(json!({"broken": true}));

    let first = handler
        .update_object(client.id, &room_id, "block_1".to_string(), partial.clone())
        .await
        .unwrap();
    let second = handler
        .update_object(client.id, &room_id, "block_1".to_string(), partial)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first["broken"], json!(true));
    assert_eq!(first["x"], json!(0.0));
    assert_eq!(host.drain().len(), 2);
    assert!(client.drain().is_empty());
}

#[tokio::test]
async fn test_unseated_connection_cannot_mutate() {
    let (handler, _store) = setup();
    let (room_id, _host, _client) = active_room(&handler).await;
    let mut carol = connect(&handler, CAROL).await;

    handler
        .handle(
            carol.id,
            ClientMessage::UpdatePuzzle {
                room_id: room_id.clone(),
                update: PuzzleUpdate::level(9),
            },
        )
        .await;

    assert!(matches!(
        &carol.drain()[..],
        [ServerMessage::Error { reason: ErrorCode::NotSeated, .. }]
    ));
    assert_eq!(levels(&handler, &room_id).await, (1, 1, 1));
}

#[tokio::test]
async fn test_room_full_for_third_identity() {
    let (handler, _store) = setup();
    let (room_id, _host, _client) = active_room(&handler).await;
    let carol = connect(&handler, CAROL).await;

    assert!(matches!(
        handler.join_room(carol.id, &room_id).await,
        Err(SessionError::RoomFull(_))
    ));
}

#[tokio::test]
async fn test_rejoin_keeps_seat_and_progress() {
    let (handler, _store) = setup();
    let (room_id, host, mut client) = active_room(&handler).await;

    handler
        .update_puzzle(host.id, &room_id, PuzzleUpdate::level(3))
        .await
        .unwrap();
    client.drain();

    handler.disconnect(host.id).await;
    match &client.drain()[..] {
        [ServerMessage::ParticipantLeft { seat, seats, .. }] => {
            assert_eq!(*seat, Seat::Host);
            assert!(!seats.host.connected);
            assert_eq!(seats.host.user_id, Some(ALICE));
        }
        other => panic!("Expected ParticipantLeft, got {:?}", other),
    }

    let mut host = connect(&handler, ALICE).await;
    assert_eq!(handler.join_room(host.id, &room_id).await.unwrap(), Seat::Host);
    assert_eq!(levels(&handler, &room_id).await, (3, 1, 1));

    let messages = host.drain();
    assert!(messages.iter().any(|m| matches!(
        m,
        ServerMessage::RoomState { state, .. } if state.puzzle_progress.host_level() == 3
    )));
}

#[tokio::test]
async fn test_second_connection_takes_over_seat() {
    let (handler, _store) = setup();
    let (room_id, mut host, _client) = active_room(&handler).await;
    let mut replacement = connect(&handler, ALICE).await;

    handler.join_room(replacement.id, &room_id).await.unwrap();

    assert!(matches!(
        &host.drain()[..],
        [ServerMessage::SeatTakenOver { seat: Seat::Host, .. }]
    ));
    assert!(matches!(replacement.drain()[0], ServerMessage::SeatAssigned { seat: Seat::Host, .. }));

    // The stale connection no longer holds the seat.
    handler.disconnect(host.id).await;
    let shared = handler.registry().get(&room_id).unwrap();
    assert_eq!(shared.lock().await.connection(Seat::Host), Some(replacement.id));
}

#[tokio::test]
async fn test_empty_room_is_evicted_and_rehydrated() {
    let (handler, store) = setup();
    let (room_id, host, client) = active_room(&handler).await;

    handler
        .update_object(host.id, &room_id, "block_1".to_string(), state(json!({"x": 5.0})))
        .await
        .unwrap();
    let moved = Transform::at(Vec3::new(4.0, 0.5, 4.0));
    handler.record_move(client.id, &room_id, moved).await.unwrap();

    handler.disconnect(host.id).await;
    handler.disconnect(client.id).await;
    assert!(!handler.registry().contains(&room_id));

    handler.mirror().flush().await;
    let record = store.get(&room_id).unwrap().unwrap();
    assert_eq!(record.status, RoomStatus::Active);

    let mut client = connect(&handler, BOB).await;
    assert_eq!(handler.join_room(client.id, &room_id).await.unwrap(), Seat::Client);
    client.drain();

    let shared = handler.registry().get(&room_id).unwrap();
    let room = shared.lock().await;
    assert_eq!(room.object("block_1").unwrap()["x"], json!(5.0));
    assert_eq!(room.player_position(Seat::Client), moved);
    assert_eq!(room.connection(Seat::Host), None);
}

#[tokio::test]
async fn test_close_is_terminal() {
    let (handler, store) = setup();
    let (room_id, mut host, mut client) = active_room(&handler).await;

    handler
        .handle(client.id, ClientMessage::CloseRoom { room_id: room_id.clone() })
        .await;
    assert!(matches!(
        &client.drain()[..],
        [ServerMessage::Error { reason: ErrorCode::NotHost, .. }]
    ));

    handler.close_room(host.id, &room_id).await.unwrap();
    for peer in [&mut host, &mut client] {
        assert!(matches!(&peer.drain()[..], [ServerMessage::RoomClosed { .. }]));
    }
    assert!(!handler.registry().contains(&room_id));

    handler.mirror().flush().await;
    let record = store.get(&room_id).unwrap().unwrap();
    assert_eq!(record.status, RoomStatus::Closed);
    assert!(record.closed_at.is_some());

    handler
        .handle(client.id, ClientMessage::JoinRoom { room_id: room_id.clone() })
        .await;
    assert!(matches!(
        &client.drain()[..],
        [ServerMessage::JoinError { reason: ErrorCode::RoomClosed, .. }]
    ));
}

#[tokio::test]
async fn test_creating_a_room_releases_the_previous_seat() {
    let (handler, _store) = setup();
    let (first, host, mut client) = active_room(&handler).await;

    let second = handler.create_room(host.id).await.unwrap();
    assert_ne!(first, second);

    assert!(matches!(
        &client.drain()[..],
        [ServerMessage::ParticipantLeft { seat: Seat::Host, .. }]
    ));
}

#[tokio::test]
async fn test_unidentified_connection_is_rejected() {
    let (handler, _store) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection = handler.connect(None, tx);

    handler.handle(connection, ClientMessage::CreateRoom).await;
    assert!(matches!(
        rx.try_recv(),
        Ok(ServerMessage::Error { reason: ErrorCode::LoginRequired, .. })
    ));

    handler
        .handle(connection, ClientMessage::Identify { user_id: UserId(404) })
        .await;
    assert!(matches!(
        rx.try_recv(),
        Ok(ServerMessage::Error { reason: ErrorCode::LoginRequired, .. })
    ));
    assert!(handler.registry().is_empty());
}

#[tokio::test]
async fn test_listing_rooms_and_invites() {
    let (handler, _store) = setup();
    let mut host = connect(&handler, ALICE).await;
    let mut bob = connect(&handler, BOB).await;

    let room_id = handler.create_room(host.id).await.unwrap();
    handler.invite(host.id, &room_id, "bob").await.unwrap();

    let rooms = handler.list_rooms(host.id).await.unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].room_id, room_id);
    assert_eq!(rooms[0].status, RoomStatus::Invited);

    let invites = handler.list_invites(bob.id).await.unwrap();
    assert_eq!(invites.len(), 1);
    assert_eq!(invites[0].host_display_name, "alice");
    assert!(handler.list_rooms(bob.id).await.unwrap().is_empty());

    assert!(matches!(host.drain().last(), Some(ServerMessage::RoomList { .. })));
    assert!(matches!(bob.drain().last(), Some(ServerMessage::RoomList { .. })));
}

#[tokio::test]
async fn test_room_code_alone_activates_a_waiting_room() {
    let (handler, store) = setup();
    let mut host = connect(&handler, ALICE).await;
    let mut bob = connect(&handler, BOB).await;

    let room_id = handler.create_room(host.id).await.unwrap();
    host.drain();

    handler
        .handle(bob.id, ClientMessage::JoinRoom { room_id: room_id.clone() })
        .await;
    assert!(matches!(bob.drain()[0], ServerMessage::SeatAssigned { seat: Seat::Client, .. }));
    assert!(host.drain().iter().any(|m| matches!(
        m,
        ServerMessage::SeatMapChanged { seats, .. }
            if seats.client.connected && seats.client.user_id == Some(BOB)
    )));

    {
        let shared = handler.registry().get(&room_id).unwrap();
        let room = shared.lock().await;
        assert_eq!(room.status(), RoomStatus::Active);
        assert_eq!(room.connection(Seat::Client), Some(bob.id));
    }

    handler.mirror().flush().await;
    let record = store.get(&room_id).unwrap().unwrap();
    assert_eq!(record.status, RoomStatus::Active);
    assert_eq!(record.client_user_id, Some(BOB));
    assert_eq!(record.invited_user_id, None);
}

#[tokio::test]
async fn test_failed_join_keeps_the_current_seat() {
    let (handler, _store) = setup();
    let (room_id, host, mut client) = active_room(&handler).await;

    assert!(matches!(
        handler.join_room(host.id, &RoomId::new("zzzzz")).await,
        Err(SessionError::RoomNotFound(_))
    ));
    assert!(client.drain().is_empty());

    let mut carol = connect(&handler, CAROL).await;
    let own_room = handler.create_room(carol.id).await.unwrap();
    carol.drain();
    handler
        .handle(carol.id, ClientMessage::JoinRoom { room_id: room_id.clone() })
        .await;
    assert!(matches!(
        &carol.drain()[..],
        [ServerMessage::JoinError { reason: ErrorCode::RoomFull, .. }]
    ));

    let shared = handler.registry().get(&room_id).unwrap();
    assert_eq!(shared.lock().await.connection(Seat::Host), Some(host.id));
    let shared = handler.registry().get(&own_room).unwrap();
    assert_eq!(shared.lock().await.connection(Seat::Host), Some(carol.id));

    handler
        .record_move(host.id, &room_id, Transform::default())
        .await
        .unwrap();
    assert!(matches!(&client.drain()[..], [ServerMessage::RemoteTransform { .. }]));
}

#[tokio::test]
async fn test_failed_create_keeps_the_current_seat() {
    let config = SessionConfig {
        code_length: 1,
        ..Default::default()
    };
    let (handler, store) = setup_with(config);
    for code in "abcdefghijklmnopqrstuvwxyz0123456789".chars() {
        let mut room = Room::new(RoomId::new(code.to_string()), ALICE, ConnectionId(0));
        store.put_raw(room.to_record());
    }

    let host = connect(&handler, ALICE).await;
    let room_id = RoomId::new("a");
    assert_eq!(handler.join_room(host.id, &room_id).await.unwrap(), Seat::Host);

    assert!(matches!(
        handler.create_room(host.id).await,
        Err(SessionError::RoomIdUnavailable(_))
    ));
    assert_eq!(handler.registry().len(), 1);
    let shared = handler.registry().get(&room_id).unwrap();
    assert_eq!(shared.lock().await.connection(Seat::Host), Some(host.id));
}

#[tokio::test]
async fn test_join_queued_behind_close_sees_closed_room() {
    let (handler, _store) = setup();
    let (room_id, host, _client) = active_room(&handler).await;
    let host_id = host.id;
    let returning_id = connect(&handler, BOB).await.id;

    // Both operations resolve the same resident room and queue on its lock.
    let shared = handler.registry().get(&room_id).unwrap();
    let guard = shared.lock().await;

    let closer = {
        let handler = Arc::clone(&handler);
        let room_id = room_id.clone();
        tokio::spawn(async move { handler.close_room(host_id, &room_id).await })
    };
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    let joiner = {
        let handler = Arc::clone(&handler);
        let room_id = room_id.clone();
        tokio::spawn(async move { handler.join_room(returning_id, &room_id).await })
    };
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    drop(guard);

    closer.await.unwrap().unwrap();
    assert!(matches!(joiner.await.unwrap(), Err(SessionError::RoomClosed(_))));
    assert!(!handler.registry().contains(&room_id));

    let room = shared.lock().await;
    assert!(room.is_evicted());
    assert_eq!(room.status(), RoomStatus::Closed);
}

#[tokio::test]
async fn test_corrupt_room_is_reported_as_not_found() {
    let (handler, store) = setup();
    let mut record = Room::new(RoomId::new("bad01"), ALICE, ConnectionId(0)).to_record();
    record.state_snapshot = Some("[]".to_string());
    store.put_raw(record);

    let mut bob = connect(&handler, BOB).await;
    handler
        .handle(bob.id, ClientMessage::JoinRoom { room_id: RoomId::new("bad01") })
        .await;

    match &bob.drain()[..] {
        [ServerMessage::JoinError { room_id, reason, message }] => {
            assert_eq!(room_id.as_str(), "bad01");
            assert_eq!(*reason, ErrorCode::RoomNotFound);
            assert_eq!(message, "room bad01 not found");
        }
        other => panic!("Expected JoinError, got {:?}", other),
    }
    assert!(handler.registry().is_empty());
}
