//! Per-connection session state.
//!
//! A session is everything the lobby remembers about one client pipe: who
//! they authenticated as, the room they sit in, the room they spectate,
//! and the outbound channel that reaches their socket. Sessions live in a
//! plain map owned behind one lock at a higher level — nothing here locks.

use std::collections::HashMap;

use tokio::sync::mpsc;

use quadra_wire::ConnId;

/// The lobby's record of one connected client.
#[derive(Debug)]
pub struct Session {
    /// The connection this session belongs to.
    pub conn: ConnId,
    /// Channel into the connection's writer task. Replies and unsolicited
    /// pushes both travel through here, keeping them ordered per pipe.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Authenticated username; empty until login.
    pub username: String,
    /// Whether login completed on this connection.
    pub authed: bool,
    /// Room the user sits in as a player (0 = none).
    pub room_id: u64,
    /// Room the user spectates (0 = none).
    pub spectate_room_id: u64,
}

impl Session {
    fn new(conn: ConnId, outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            conn,
            outbound,
            username: String::new(),
            authed: false,
            room_id: 0,
            spectate_room_id: 0,
        }
    }

    /// Drops all authenticated state, returning the session to the
    /// just-connected shape.
    pub fn reset(&mut self) {
        self.username.clear();
        self.authed = false;
        self.room_id = 0;
        self.spectate_room_id = 0;
    }

    /// Queues one frame for this session's socket.
    ///
    /// A send failure means the writer task is gone; the reader side will
    /// surface the disconnect, so the failure is ignorable here.
    pub fn push(&self, body: &str) {
        let _ = self.outbound.send(body.to_string());
    }
}

/// All sessions, keyed by connection id.
#[derive(Debug, Default)]
pub struct SessionMap {
    sessions: HashMap<ConnId, Session>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh, unauthenticated session.
    pub fn insert(&mut self, conn: ConnId, outbound: mpsc::UnboundedSender<String>) {
        self.sessions.insert(conn, Session::new(conn, outbound));
    }

    /// Removes and returns a session (connection closed).
    pub fn remove(&mut self, conn: ConnId) -> Option<Session> {
        self.sessions.remove(&conn)
    }

    pub fn get(&self, conn: ConnId) -> Option<&Session> {
        self.sessions.get(&conn)
    }

    pub fn get_mut(&mut self, conn: ConnId) -> Option<&mut Session> {
        self.sessions.get_mut(&conn)
    }

    /// Whether any session holds `username` as its authenticated user.
    ///
    /// Local duplicate-login guard; the registry's compare-and-set is the
    /// authoritative one.
    pub fn is_username_authed(&self, username: &str) -> bool {
        self.sessions
            .values()
            .any(|s| s.authed && s.username == username)
    }

    /// The session currently authenticated as `username`, for pushes.
    pub fn find_by_username(&self, username: &str) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.authed && s.username == username)
    }

    /// Number of connected sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =========================================================================
// Tests
// =========================================================================
