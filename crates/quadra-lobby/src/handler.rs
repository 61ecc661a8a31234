//! The client verb surface: one handler task per connection.
//!
//! Every verb follows the same two-step shape: call the registry, then on
//! an `OK` mutate local session state and confirm — otherwise forward the
//! `ERR` unchanged. The sessions lock is never held across a registry
//! round-trip; handlers snapshot what they need, call out, then re-lock to
//! mutate. Side-effect pushes to other connections (`ROOM_INVITE`,
//! `GAME_READY`) are best-effort: a failed push is logged, never surfaced,
//! because the primary acknowledgement already went out.

use std::sync::Arc;

use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use quadra_match::MatchConfig;
use quadra_wire::{redact, split_verb, ConnId, FrameStream};

use crate::server::LobbyState;
use crate::LobbyError;

/// Generates a fresh match admission token: 128 bits from the thread-local
/// CSPRNG, hex-encoded. Never reused across matches.
fn generate_token() -> String {
    let mut rng = rand::rng();
    format!("{:016x}{:016x}", rng.random::<u64>(), rng.random::<u64>())
}

/// What a handler needs to know about its own session, snapshotted under
/// the lock and used outside it.
#[derive(Debug, Clone)]
struct SessionView {
    username: String,
    authed: bool,
    room_id: u64,
    spectate_room_id: u64,
}

/// Serves one client connection from accept to scrub.
pub(crate) async fn handle_connection(state: Arc<LobbyState>, conn: ConnId, stream: TcpStream) {
    let (mut reader, mut writer) = FrameStream::new(stream).into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    // Writer task: everything for this socket funnels through one channel,
    // so replies stay FIFO and pushes from other tasks interleave safely.
    let writer_task = tokio::spawn(async move {
        while let Some(body) = outbound_rx.recv().await {
            if writer.send(&body).await.is_err() {
                break;
            }
        }
    });

    {
        let mut sessions = state.sessions.lock().await;
        sessions.insert(conn, outbound_tx.clone());
    }
    let _ = outbound_tx.send("WELCOME LOBBY".to_string());
    tracing::info!(%conn, "client connected");

    loop {
        let body = match reader.recv().await {
            Ok(Some(body)) => body,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%conn, error = %e, "client read failed");
                break;
            }
        };
        tracing::trace!(%conn, rx = %redact(&body), "client frame");

        if let Err(e) = dispatch(&state, conn, &body).await {
            // Losing the registry is fatal for the whole lobby, not just
            // this connection.
            tracing::error!(%conn, error = %e, "registry call failed");
            reply(&state, conn, "ERR db").await;
            state.fatal.notify_one();
            break;
        }
    }

    scrub_session(&state, conn).await;
    writer_task.abort();
    tracing::info!(%conn, "client disconnected");
}

/// Sends one frame to this handler's own client.
async fn reply(state: &LobbyState, conn: ConnId, body: &str) {
    let sessions = state.sessions.lock().await;
    if let Some(session) = sessions.get(conn) {
        session.push(body);
    }
}

async fn view(state: &LobbyState, conn: ConnId) -> SessionView {
    let sessions = state.sessions.lock().await;
    let session = sessions.get(conn);
    SessionView {
        username: session.map(|s| s.username.clone()).unwrap_or_default(),
        authed: session.map(|s| s.authed).unwrap_or(false),
        room_id: session.map(|s| s.room_id).unwrap_or(0),
        spectate_room_id: session.map(|s| s.spectate_room_id).unwrap_or(0),
    }
}

/// Routes one client frame. `Err` only for a dead registry pipe.
async fn dispatch(
    state: &Arc<LobbyState>,
    conn: ConnId,
    body: &str,
) -> Result<(), LobbyError> {
    let (verb, rest) = split_verb(body);
    let session = view(state, conn).await;

    // Everything beyond registration, login, and the public listings
    // requires an authenticated session.
    let needs_auth = !matches!(verb, "REGISTER" | "LOGIN" | "LIST_ONLINE" | "LIST_ROOMS");
    if needs_auth && !session.authed {
        reply(state, conn, "ERR not_logged_in").await;
        return Ok(());
    }

    match verb {
        "REGISTER" => register(state, conn, rest).await,
        "LOGIN" => login(state, conn, rest).await,
        "LOGOUT" => logout(state, conn, &session).await,
        "LIST_ONLINE" => forward(state, conn, "User listOnline").await,
        "CREATE_ROOM" => create_room(state, conn, &session, rest).await,
        "LIST_ROOMS" => forward(state, conn, "Room list").await,
        "JOIN_ROOM" => join_room(state, conn, &session, rest).await,
        "LEAVE_ROOM" => leave_room(state, conn, &session).await,
        "SPECTATE" => spectate(state, conn, &session, rest).await,
        "UNSPECTATE" => unspectate(state, conn, &session).await,
        "INVITE" => invite(state, conn, &session, rest).await,
        "LIST_INVITES" => {
            forward(state, conn, &format!("Room listInvites user={}", session.username)).await
        }
        "START_GAME" => start_game(state, conn, &session).await,
        _ => {
            reply(state, conn, "ERR unknown_command").await;
            Ok(())
        }
    }
}

/// Forwards a registry verb and relays the reply verbatim.
async fn forward(state: &LobbyState, conn: ConnId, request: &str) -> Result<(), LobbyError> {
    let rs = state.registry.request(request).await?;
    reply(state, conn, rs.raw()).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Account verbs
// ---------------------------------------------------------------------------

async fn register(state: &LobbyState, conn: ConnId, rest: &str) -> Result<(), LobbyError> {
    let mut args = rest.split_whitespace();
    let username = args.next().unwrap_or_default();
    let pass = args.next().unwrap_or_default();
    forward(
        state,
        conn,
        &format!("User create username={username} pass={pass}"),
    )
    .await
}

/// The login sequence: read, guard, verify, then compare-and-set.
///
/// The CAS is what makes concurrent logins safe — both racers pass the
/// read-side checks, exactly one wins `expect=0 value=1`, the loser is
/// told `already_online`.
async fn login(state: &LobbyState, conn: ConnId, rest: &str) -> Result<(), LobbyError> {
    let mut args = rest.split_whitespace();
    let username = args.next().unwrap_or_default().to_string();
    let pass = args.next().unwrap_or_default();

    let user = state
        .registry
        .request(&format!("User read username={username}"))
        .await?;
    if !user.is_ok() {
        reply(state, conn, user.raw()).await;
        return Ok(());
    }
    let fields = user.fields();

    let already_online = fields.get("online") == Some("1") || {
        let sessions = state.sessions.lock().await;
        sessions.is_username_authed(&username)
    };
    if already_online {
        reply(state, conn, "ERR already_online").await;
        tracing::info!(user = %username, "login rejected: already online");
        return Ok(());
    }

    if fields.get_or_empty("pass") != pass {
        reply(state, conn, "ERR bad_credentials").await;
        tracing::info!(user = %username, "login rejected: bad credentials");
        return Ok(());
    }

    let cas = state
        .registry
        .request(&format!(
            "User compareSetOnline username={username} expect=0 value=1"
        ))
        .await?;
    if !cas.is_ok() {
        if cas.raw().starts_with("ERR mismatch") {
            // Someone else won the flag between our read and the CAS.
            reply(state, conn, "ERR already_online").await;
            tracing::info!(user = %username, "login rejected: lost the race");
        } else {
            reply(state, conn, cas.raw()).await;
        }
        return Ok(());
    }

    {
        let mut sessions = state.sessions.lock().await;
        if let Some(session) = sessions.get_mut(conn) {
            session.username = username.clone();
            session.authed = true;
        }
    }
    reply(state, conn, "OK LOGIN").await;
    tracing::info!(user = %username, %conn, "login ok");
    Ok(())
}

async fn logout(
    state: &LobbyState,
    conn: ConnId,
    session: &SessionView,
) -> Result<(), LobbyError> {
    release_registry_state(state, session).await?;
    {
        let mut sessions = state.sessions.lock().await;
        if let Some(s) = sessions.get_mut(conn) {
            s.reset();
        }
    }
    reply(state, conn, "OK LOGOUT").await;
    tracing::info!(user = %session.username, "logout");
    Ok(())
}

/// Reverts a session's registry-side footprint: online flag, room seat,
/// spectator slot. Shared by logout and the disconnect scrub.
async fn release_registry_state(
    state: &LobbyState,
    session: &SessionView,
) -> Result<(), LobbyError> {
    state
        .registry
        .request(&format!(
            "User setOnline username={} online=0",
            session.username
        ))
        .await?;
    if session.room_id != 0 {
        state
            .registry
            .request(&format!(
                "Room leave roomId={} user={}",
                session.room_id, session.username
            ))
            .await?;
    }
    if session.spectate_room_id != 0 {
        state
            .registry
            .request(&format!(
                "Room unspectate roomId={} user={}",
                session.spectate_room_id, session.username
            ))
            .await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Room verbs
// ---------------------------------------------------------------------------

/// Releases a lingering spectator slot before the user takes a seat
/// somewhere. Keeps the registry's spectator sets in step with the
/// session's, which otherwise drift when a spectator creates or joins a
/// room.
async fn drop_spectate(
    state: &LobbyState,
    conn: ConnId,
    session: &SessionView,
) -> Result<(), LobbyError> {
    if session.spectate_room_id == 0 {
        return Ok(());
    }
    state
        .registry
        .request(&format!(
            "Room unspectate roomId={} user={}",
            session.spectate_room_id, session.username
        ))
        .await?;
    let mut sessions = state.sessions.lock().await;
    if let Some(s) = sessions.get_mut(conn) {
        s.spectate_room_id = 0;
    }
    Ok(())
}

async fn create_room(
    state: &LobbyState,
    conn: ConnId,
    session: &SessionView,
    rest: &str,
) -> Result<(), LobbyError> {
    let mut args = rest.split_whitespace();
    let name = args.next().unwrap_or_default();
    let visibility = args.next().unwrap_or("public");
    drop_spectate(state, conn, session).await?;

    let rs = state
        .registry
        .request(&format!(
            "Room create name={name} host={} visibility={visibility}",
            session.username
        ))
        .await?;

    match rs.fields().get("roomId").and_then(|v| v.parse::<u64>().ok()) {
        Some(room_id) if rs.is_ok() => {
            {
                let mut sessions = state.sessions.lock().await;
                if let Some(s) = sessions.get_mut(conn) {
                    s.room_id = room_id;
                    s.spectate_room_id = 0;
                }
            }
            reply(state, conn, rs.raw()).await;
            tracing::info!(room_id, host = %session.username, "room created");
        }
        _ if !rs.is_ok() => reply(state, conn, rs.raw()).await,
        _ => reply(state, conn, "ERR create_failed").await,
    }
    Ok(())
}

async fn join_room(
    state: &LobbyState,
    conn: ConnId,
    session: &SessionView,
    rest: &str,
) -> Result<(), LobbyError> {
    let Ok(room_id) = rest.split_whitespace().next().unwrap_or_default().parse::<u64>()
    else {
        reply(state, conn, "ERR invalid_room").await;
        return Ok(());
    };
    drop_spectate(state, conn, session).await?;

    let rs = state
        .registry
        .request(&format!("Room join roomId={room_id} user={}", session.username))
        .await?;
    if rs.is_ok() {
        {
            let mut sessions = state.sessions.lock().await;
            if let Some(s) = sessions.get_mut(conn) {
                s.room_id = room_id;
                s.spectate_room_id = 0;
            }
        }
        reply(state, conn, "OK joined").await;
        tracing::info!(room_id, user = %session.username, "joined room");
    } else {
        reply(state, conn, rs.raw()).await;
    }
    Ok(())
}

async fn leave_room(
    state: &LobbyState,
    conn: ConnId,
    session: &SessionView,
) -> Result<(), LobbyError> {
    if session.room_id == 0 {
        reply(state, conn, "ERR not_in_room").await;
        return Ok(());
    }

    let rs = state
        .registry
        .request(&format!(
            "Room leave roomId={} user={}",
            session.room_id, session.username
        ))
        .await?;
    if rs.is_ok() {
        let mut sessions = state.sessions.lock().await;
        if let Some(s) = sessions.get_mut(conn) {
            s.room_id = 0;
            s.spectate_room_id = 0;
        }
    }
    // Forward either way: "OK", "OK closed", or the error.
    reply(state, conn, rs.raw()).await;
    Ok(())
}

async fn spectate(
    state: &Arc<LobbyState>,
    conn: ConnId,
    session: &SessionView,
    rest: &str,
) -> Result<(), LobbyError> {
    let room_id = rest
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .parse::<u64>()
        .unwrap_or(0);
    if room_id == 0 {
        reply(state, conn, "ERR invalid_room").await;
        return Ok(());
    }
    if session.room_id != 0 {
        reply(state, conn, "ERR must_leave_room").await;
        return Ok(());
    }
    // One room as spectator at a time; switching requires UNSPECTATE.
    if session.spectate_room_id != 0 {
        reply(state, conn, "ERR already_spectating").await;
        return Ok(());
    }

    let rs = state
        .registry
        .request(&format!(
            "Room spectate roomId={room_id} user={}",
            session.username
        ))
        .await?;
    if !rs.is_ok() {
        reply(state, conn, rs.raw()).await;
        return Ok(());
    }

    let entry = {
        let matches = state.matches.lock().await;
        matches.get(room_id).cloned()
    };
    let Some(entry) = entry else {
        // The room says playing but no match is registered here; undo the
        // registry-side spectate before reporting.
        reply(state, conn, "ERR no_active_game").await;
        state
            .registry
            .request(&format!(
                "Room unspectate roomId={room_id} user={}",
                session.username
            ))
            .await?;
        return Ok(());
    };

    {
        let mut sessions = state.sessions.lock().await;
        if let Some(s) = sessions.get_mut(conn) {
            s.spectate_room_id = room_id;
        }
    }
    reply(state, conn, "OK SPECTATE").await;
    reply(
        state,
        conn,
        &format!(
            "SPECTATE_READY port={} token={} role=SPEC",
            entry.port, entry.token
        ),
    )
    .await;
    tracing::info!(room_id, user = %session.username, "spectating");
    Ok(())
}

async fn unspectate(
    state: &LobbyState,
    conn: ConnId,
    session: &SessionView,
) -> Result<(), LobbyError> {
    if session.spectate_room_id == 0 {
        reply(state, conn, "ERR not_spectating").await;
        return Ok(());
    }

    let rs = state
        .registry
        .request(&format!(
            "Room unspectate roomId={} user={}",
            session.spectate_room_id, session.username
        ))
        .await?;
    if rs.is_ok() {
        {
            let mut sessions = state.sessions.lock().await;
            if let Some(s) = sessions.get_mut(conn) {
                s.spectate_room_id = 0;
            }
        }
        reply(state, conn, "OK UNSPECTATE").await;
    } else {
        reply(state, conn, rs.raw()).await;
    }
    Ok(())
}

async fn invite(
    state: &LobbyState,
    conn: ConnId,
    session: &SessionView,
    rest: &str,
) -> Result<(), LobbyError> {
    let target = rest.split_whitespace().next().unwrap_or_default();
    if session.room_id == 0 {
        reply(state, conn, "ERR not_in_room").await;
        return Ok(());
    }

    let rs = state
        .registry
        .request(&format!(
            "Room invite roomId={} user={target} host={}",
            session.room_id, session.username
        ))
        .await?;
    reply(state, conn, rs.raw()).await;
    if !rs.is_ok() {
        return Ok(());
    }

    // Best-effort push to the invitee, if they are connected here.
    let info = state
        .registry
        .request(&format!("Room get roomId={}", session.room_id))
        .await?;
    if info.is_ok() {
        let name = info.fields().get_or_empty("name").to_string();
        let sessions = state.sessions.lock().await;
        if let Some(invitee) = sessions.find_by_username(target) {
            invitee.push(&format!(
                "ROOM_INVITE roomId={} name={name} host={}",
                session.room_id, session.username
            ));
            tracing::info!(room_id = session.room_id, to = target, "invite pushed");
        } else {
            tracing::debug!(to = target, "invitee not connected, no push");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// START_GAME
// ---------------------------------------------------------------------------

/// Validates the room, allocates a port and token, flips the registry
/// state, announces `GAME_READY`, and hands the listener to a supervised
/// match runtime.
async fn start_game(
    state: &Arc<LobbyState>,
    conn: ConnId,
    session: &SessionView,
) -> Result<(), LobbyError> {
    if session.room_id == 0 {
        reply(state, conn, "ERR not_in_room").await;
        return Ok(());
    }
    let room_id = session.room_id;

    let info = state
        .registry
        .request(&format!("Room get roomId={room_id}"))
        .await?;
    if !info.is_ok() {
        reply(state, conn, "ERR no_such_room").await;
        return Ok(());
    }
    let fields = info.fields();
    let p1 = fields.get_or_empty("p1").to_string();
    let p2 = fields.get_or_empty("p2").to_string();

    if fields.get_or_empty("host") != session.username {
        reply(state, conn, "ERR not_host").await;
        return Ok(());
    }
    if p1.is_empty() || p2.is_empty() {
        reply(state, conn, "ERR need_2_players").await;
        return Ok(());
    }
    if fields.get_or_empty("status") != "idle" {
        reply(state, conn, "ERR already_playing").await;
        return Ok(());
    }

    let allocated = {
        let mut ports = state.ports.lock().await;
        ports.allocate(&state.game_bind_ip).await
    };
    let Some((listener, port)) = allocated else {
        reply(state, conn, "ERR cannot_start_game_port").await;
        tracing::warn!(room_id, "start rejected: no free game port");
        return Ok(());
    };

    let token = generate_token();
    state
        .registry
        .request(&format!("Room setStatus roomId={room_id} status=playing"))
        .await?;
    state
        .registry
        .request(&format!("Room setToken roomId={room_id} token={token}"))
        .await?;

    {
        let mut matches = state.matches.lock().await;
        matches.insert(room_id, port, &token);
    }

    {
        let sessions = state.sessions.lock().await;
        let ready = format!("GAME_READY port={port} token={token}");
        for player in [&p1, &p2] {
            match sessions.find_by_username(player) {
                Some(s) => s.push(&ready),
                None => tracing::warn!(room_id, player = %player, "player not connected for GAME_READY"),
            }
        }
    }
    tracing::info!(room_id, port, p1 = %p1, p2 = %p2, "match starting");

    let config = MatchConfig::new(room_id, &p1, &p2, &token);
    let supervisor_state = Arc::clone(state);
    tokio::spawn(async move {
        let outcome = quadra_match::run_match(listener, config).await;
        crate::server::finish_match(&supervisor_state, outcome).await;
    });

    Ok(())
}

// ---------------------------------------------------------------------------
// Disconnect scrub
// ---------------------------------------------------------------------------

/// Undoes a vanished client's footprint: session entry, online flag, room
/// seat, spectator slot. Nothing is pushed to the dead socket.
async fn scrub_session(state: &LobbyState, conn: ConnId) {
    let session = {
        let mut sessions = state.sessions.lock().await;
        sessions.remove(conn)
    };
    let Some(session) = session else { return };
    if !session.authed {
        return;
    }

    let scrub = SessionView {
        username: session.username.clone(),
        authed: true,
        room_id: session.room_id,
        spectate_room_id: session.spectate_room_id,
    };
    if let Err(e) = release_registry_state(state, &scrub).await {
        tracing::warn!(user = %scrub.username, error = %e, "scrub incomplete");
        state.fatal.notify_one();
    }
    tracing::info!(user = %scrub.username, %conn, "session scrubbed");
}
