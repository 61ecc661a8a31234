//! End-to-end tests: a real registry, a real lobby, scripted clients.

use std::time::Duration;

use quadra_lobby::{Lobby, LobbyOptions};
use quadra_registry::Registry;
use quadra_wire::{split_verb, Fields, FrameStream};
use tokio::time::timeout;

/// A running registry + lobby pair on random ports.
struct Stack {
    lobby_addr: String,
    registry_addr: String,
    _state_dir: tempfile::TempDir,
}

async fn start_stack() -> Stack {
    let state_dir = tempfile::tempdir().unwrap();

    let registry = Registry::bind("127.0.0.1:0", state_dir.path().join("state.txt"))
        .await
        .unwrap();
    let registry_addr = registry.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let _ = registry.run_until(std::future::pending()).await;
    });

    let lobby = Lobby::bind(LobbyOptions {
        bind: "127.0.0.1:0".to_string(),
        registry_addr: registry_addr.clone(),
        game_bind_ip: "127.0.0.1".to_string(),
        game_port_min: 21_000,
        game_port_max: 22_000,
    })
    .await
    .unwrap();
    let lobby_addr = lobby.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let _ = lobby.run_until(std::future::pending()).await;
    });

    Stack {
        lobby_addr,
        registry_addr,
        _state_dir: state_dir,
    }
}

/// A scripted lobby client.
struct Client {
    pipe: FrameStream,
}

impl Client {
    /// Connects and consumes the `WELCOME LOBBY` greeting.
    async fn connect(stack: &Stack) -> Self {
        let pipe = FrameStream::connect(&stack.lobby_addr).await.unwrap();
        let mut client = Self { pipe };
        assert_eq!(client.recv().await, "WELCOME LOBBY");
        client
    }

    /// Logs in a fresh account.
    async fn login_as(stack: &Stack, user: &str) -> Self {
        let mut client = Self::connect(stack).await;
        let reg = client.request(&format!("REGISTER {user} pw")).await;
        assert!(reg.starts_with("OK"), "register failed: {reg}");
        assert_eq!(client.request(&format!("LOGIN {user} pw")).await, "OK LOGIN");
        client
    }

    async fn recv(&mut self) -> String {
        timeout(Duration::from_secs(5), self.pipe.recv())
            .await
            .expect("frame in time")
            .unwrap()
            .expect("lobby closed the pipe")
    }

    /// Reads frames until one with the wanted verb, skipping pushes.
    async fn recv_verb(&mut self, verb: &str) -> String {
        loop {
            let frame = self.recv().await;
            if split_verb(&frame).0 == verb {
                return frame;
            }
        }
    }

    async fn request(&mut self, body: &str) -> String {
        self.pipe.send(body).await.unwrap();
        self.recv().await
    }
}

/// Asks the registry directly, bypassing the lobby — for assertions about
/// authoritative state.
async fn registry_query(stack: &Stack, body: &str) -> String {
    let mut pipe = FrameStream::connect(&stack.registry_addr).await.unwrap();
    pipe.send(body).await.unwrap();
    pipe.recv().await.unwrap().unwrap()
}

/// Polls the registry until `check` passes or two seconds elapse.
async fn registry_eventually(stack: &Stack, body: &str, check: impl Fn(&str) -> bool) {
    for _ in 0..40 {
        let reply = registry_query(stack, body).await;
        if check(&reply) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("registry never reached expected state for: {body}");
}

// =========================================================================
// Account flows
// =========================================================================

#[tokio::test]
async fn test_register_login_logout_cycle() {
    let stack = start_stack().await;
    let mut c1 = Client::connect(&stack).await;

    assert_eq!(c1.request("REGISTER alice secret").await, "OK user=alice");
    assert_eq!(c1.request("REGISTER alice other").await, "ERR exists");
    assert_eq!(c1.request("LOGIN alice wrong").await, "ERR bad_credentials");
    assert_eq!(c1.request("LOGIN ghost x").await, "ERR not_found");
    assert_eq!(c1.request("LOGIN alice secret").await, "OK LOGIN");

    // A second connection cannot take the same account.
    let mut c2 = Client::connect(&stack).await;
    assert_eq!(c2.request("LOGIN alice secret").await, "ERR already_online");

    // Logout frees it.
    assert_eq!(c1.request("LOGOUT").await, "OK LOGOUT");
    assert_eq!(c2.request("LOGIN alice secret").await, "OK LOGIN");
}

#[tokio::test]
async fn test_unauthenticated_verbs_are_gated() {
    let stack = start_stack().await;
    let mut c = Client::connect(&stack).await;

    assert_eq!(c.request("CREATE_ROOM Den public").await, "ERR not_logged_in");
    assert_eq!(c.request("START_GAME").await, "ERR not_logged_in");
    assert_eq!(c.request("INVITE bob").await, "ERR not_logged_in");
    // The public listings work without login.
    assert_eq!(c.request("LIST_ROOMS").await, "OK");
    assert_eq!(c.request("LIST_ONLINE").await, "OK");
    assert_eq!(c.request("FROBNICATE").await, "ERR unknown_command");
}

#[tokio::test]
async fn test_list_online_tracks_sessions() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let _bob = Client::login_as(&stack, "bob").await;

    assert_eq!(alice.request("LIST_ONLINE").await, "OK alice,bob");
}

// =========================================================================
// Room flows
// =========================================================================

#[tokio::test]
async fn test_private_room_invite_flow() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let mut bob = Client::login_as(&stack, "bob").await;

    assert_eq!(
        alice.request("CREATE_ROOM Den private").await,
        "OK roomId=1"
    );
    assert_eq!(
        bob.request("JOIN_ROOM 1").await,
        "ERR private_room_not_invited"
    );

    assert_eq!(alice.request("INVITE bob").await, "OK invited=bob");
    // The unsolicited push lands on bob's pipe.
    assert_eq!(bob.recv().await, "ROOM_INVITE roomId=1 name=Den host=alice");

    assert_eq!(bob.request("LIST_INVITES").await, "OK 1:Den:alice;");
    assert_eq!(bob.request("JOIN_ROOM 1").await, "OK joined");
    // The invite was consumed.
    assert_eq!(bob.request("LIST_INVITES").await, "OK");
}

#[tokio::test]
async fn test_leave_room_flows() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let mut bob = Client::login_as(&stack, "bob").await;

    assert_eq!(alice.request("CREATE_ROOM Den public").await, "OK roomId=1");
    assert!(alice.request("LIST_ROOMS").await.contains("Den"));

    assert_eq!(bob.request("JOIN_ROOM 1").await, "OK joined");
    assert_eq!(bob.request("LEAVE_ROOM").await, "OK");
    assert_eq!(bob.request("LEAVE_ROOM").await, "ERR not_in_room");

    // Host alone in the room: leaving closes it.
    assert_eq!(alice.request("LEAVE_ROOM").await, "OK closed");
    assert_eq!(alice.request("LIST_ROOMS").await, "OK");
}

#[tokio::test]
async fn test_host_leave_hands_over_room() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let mut bob = Client::login_as(&stack, "bob").await;

    alice.request("CREATE_ROOM Den public").await;
    bob.request("JOIN_ROOM 1").await;
    assert_eq!(alice.request("LEAVE_ROOM").await, "OK");

    // Bob discovers his promotion via the room query.
    let room = registry_query(&stack, "Room get roomId=1").await;
    let fields = Fields::parse(split_verb(&room).1);
    assert_eq!(fields.get("host"), Some("bob"));
    assert_eq!(fields.get("p1"), Some("bob"));
    assert_eq!(fields.get("status"), Some("idle"));
}

#[tokio::test]
async fn test_join_invalid_arguments() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;

    assert_eq!(alice.request("JOIN_ROOM potato").await, "ERR invalid_room");
    assert_eq!(alice.request("JOIN_ROOM 99").await, "ERR not_found");
}

// =========================================================================
// Match lifecycle
// =========================================================================

#[tokio::test]
async fn test_start_game_error_paths() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let mut bob = Client::login_as(&stack, "bob").await;
    let mut carol = Client::login_as(&stack, "carol").await;

    assert_eq!(carol.request("START_GAME").await, "ERR not_in_room");

    alice.request("CREATE_ROOM Den public").await;
    assert_eq!(alice.request("START_GAME").await, "ERR need_2_players");

    bob.request("JOIN_ROOM 1").await;
    assert_eq!(bob.request("START_GAME").await, "ERR not_host");
}

#[tokio::test]
async fn test_spectate_guards() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let mut carol = Client::login_as(&stack, "carol").await;

    alice.request("CREATE_ROOM Den public").await;

    assert_eq!(carol.request("SPECTATE 0").await, "ERR invalid_room");
    assert_eq!(carol.request("SPECTATE 1").await, "ERR not_playing");
    assert_eq!(carol.request("UNSPECTATE").await, "ERR not_spectating");
    // A seated player must leave before spectating anything.
    assert_eq!(alice.request("SPECTATE 1").await, "ERR must_leave_room");
}

/// The full arc: start, play, spectate, disconnect, completion write-back.
#[tokio::test]
async fn test_match_start_spectate_and_completion() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let mut bob = Client::login_as(&stack, "bob").await;
    let mut carol = Client::login_as(&stack, "carol").await;

    assert_eq!(alice.request("CREATE_ROOM Arena public").await, "OK roomId=1");
    assert_eq!(bob.request("JOIN_ROOM 1").await, "OK joined");

    // Start: both players get the same announcement.
    alice.pipe.send("START_GAME").await.unwrap();
    let ready_a = alice.recv_verb("GAME_READY").await;
    let ready_b = bob.recv_verb("GAME_READY").await;
    assert_eq!(ready_a, ready_b);
    let ready = Fields::parse(split_verb(&ready_a).1);
    let port: u16 = ready.get("port").unwrap().parse().unwrap();
    let token = ready.get("token").unwrap().to_string();
    assert!((21_000..=22_000).contains(&port));
    assert!(token.len() >= 16, "token carries at least 64 bits: {token}");

    // The registry agrees the room is mid-match with that token.
    let room = registry_query(&stack, "Room get roomId=1").await;
    let fields = Fields::parse(split_verb(&room).1);
    assert_eq!(fields.get("status"), Some("playing"));
    assert_eq!(fields.get("token"), Some(token.as_str()));

    // Players join the match runtime.
    let game_addr = format!("127.0.0.1:{port}");
    let mut game_a = FrameStream::connect(&game_addr).await.unwrap();
    game_a
        .send(&format!("HELLO username=alice token={token}"))
        .await
        .unwrap();
    assert!(game_a.recv().await.unwrap().unwrap().contains("role=P1"));
    let mut game_b = FrameStream::connect(&game_addr).await.unwrap();
    game_b
        .send(&format!("HELLO username=bob token={token}"))
        .await
        .unwrap();
    assert!(game_b.recv().await.unwrap().unwrap().contains("role=P2"));

    // Carol spectates through the lobby, then attaches to the match.
    assert_eq!(carol.request("SPECTATE 1").await, "OK SPECTATE");
    let spec_ready = carol.recv_verb("SPECTATE_READY").await;
    let spec_fields = Fields::parse(split_verb(&spec_ready).1);
    assert_eq!(spec_fields.get("port"), Some(format!("{port}").as_str()));
    assert_eq!(spec_fields.get("role"), Some("SPEC"));

    let mut game_c = FrameStream::connect(&game_addr).await.unwrap();
    game_c
        .send(&format!("HELLO username=carol token={token} role=SPEC"))
        .await
        .unwrap();
    let welcome = game_c.recv().await.unwrap().unwrap();
    assert!(welcome.contains("role=SPEC"));
    assert!(welcome.contains("gravity=500"));

    // The spectator sees the live snapshot stream.
    loop {
        let frame = timeout(Duration::from_secs(5), game_c.recv())
            .await
            .expect("snapshot in time")
            .unwrap()
            .unwrap();
        if let ("SNAPSHOT", rest) = split_verb(&frame) {
            assert_eq!(Fields::parse(rest).get("board").unwrap().len(), 200);
            break;
        }
    }

    // Alice's game pipe drops: the match ends for everyone.
    drop(game_a);
    loop {
        let frame = timeout(Duration::from_secs(5), game_b.recv())
            .await
            .expect("game over in time")
            .unwrap()
            .unwrap();
        if split_verb(&frame).0 == "GAME_OVER" {
            break;
        }
    }

    // Completion: exactly one game log, room back to idle, token cleared.
    registry_eventually(&stack, "GameLog list", |reply| {
        reply.starts_with("OK id=1 room=1 p1=alice")
    })
    .await;
    registry_eventually(&stack, "Room get roomId=1", |reply| {
        reply.contains("status=idle") && reply.ends_with("token=")
    })
    .await;

    // With the match gone, a fresh spectate is rejected again.
    let mut dave = Client::login_as(&stack, "dave").await;
    assert_eq!(dave.request("SPECTATE 1").await, "ERR not_playing");
}

// =========================================================================
// Disconnect handling
// =========================================================================

#[tokio::test]
async fn test_disconnect_scrubs_session() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    assert_eq!(alice.request("CREATE_ROOM Den public").await, "OK roomId=1");

    drop(alice);

    // The scrub flips the online flag and the host-leave closes the room.
    registry_eventually(&stack, "User read username=alice", |reply| {
        reply.ends_with("online=0")
    })
    .await;
    registry_eventually(&stack, "Room get roomId=1", |reply| reply == "ERR not_found").await;

    // The account is usable again immediately.
    let mut again = Client::connect(&stack).await;
    assert_eq!(again.request("LOGIN alice pw").await, "OK LOGIN");
}

#[tokio::test]
async fn test_spectator_disconnect_clears_spectator_set() {
    let stack = start_stack().await;
    let mut alice = Client::login_as(&stack, "alice").await;
    let mut bob = Client::login_as(&stack, "bob").await;
    let mut carol = Client::login_as(&stack, "carol").await;

    alice.request("CREATE_ROOM Arena public").await;
    bob.request("JOIN_ROOM 1").await;
    alice.pipe.send("START_GAME").await.unwrap();
    alice.recv_verb("GAME_READY").await;

    assert_eq!(carol.request("SPECTATE 1").await, "OK SPECTATE");
    carol.recv_verb("SPECTATE_READY").await;
    drop(carol);

    // carol disappears from the spectator set; the room stays mid-match.
    registry_eventually(&stack, "Room unspectate roomId=1 user=carol", |reply| {
        reply == "ERR not_spectating"
    })
    .await;
    let room = registry_query(&stack, "Room get roomId=1").await;
    assert!(room.contains("status=playing"));
    registry_eventually(&stack, "User read username=carol", |reply| {
        reply.ends_with("online=0")
    })
    .await;
}
