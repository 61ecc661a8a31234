//! The typed entity store and its state-machine rules.
//!
//! Everything the registry knows lives here: users, rooms, and game logs,
//! plus the id counters for rooms and logs. The store is plain data behind
//! plain methods — it is owned by a single task (see `server`), so there is
//! no interior locking. All room/membership rules are enforced at this
//! layer; the text protocol in `verbs` only translates.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Field enums
// ---------------------------------------------------------------------------

/// Who may join a room without an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Anyone authenticated may take the open seat.
    Public,
    /// Joining requires an entry in the room's invite list.
    Private,
}

impl Visibility {
    /// Parses a visibility field, tolerating case and falling back to
    /// `Public` for anything unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        if s.eq_ignore_ascii_case("private") {
            Self::Private
        } else {
            Self::Public
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// Whether a room currently hosts a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStatus {
    /// No match running; the room can be joined and started.
    Idle,
    /// A match is live; joins are rejected, spectating is allowed.
    Playing,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Playing => write!(f, "playing"),
        }
    }
}

impl FromStr for RoomStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "idle" => Ok(Self::Idle),
            "playing" => Ok(Self::Playing),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One registered account.
#[derive(Debug, Clone)]
pub struct UserRec {
    /// Globally unique, case-sensitive.
    pub username: String,
    /// Opaque credential hash; the registry only compares it.
    pub pass: String,
    /// Whether the user holds an authenticated lobby session right now.
    pub online: bool,
}

/// One room: up to two seated players, an invite list, and a spectator set.
#[derive(Debug, Clone)]
pub struct RoomRec {
    pub id: u64,
    pub name: String,
    /// Username of the host; always seated as `p1` or `p2`.
    pub host: String,
    pub visibility: Visibility,
    pub status: RoomStatus,
    /// First seat. Never empty while the room exists.
    pub p1: String,
    /// Second seat, or empty.
    pub p2: String,
    /// Per-match admission token; empty while idle.
    pub token: String,
    /// Users invited into a private room. Transient per match.
    pub invites: BTreeSet<String>,
    /// Users currently watching. Transient per match.
    pub spectators: BTreeSet<String>,
}

impl RoomRec {
    fn is_seated(&self, user: &str) -> bool {
        self.p1 == user || (!self.p2.is_empty() && self.p2 == user)
    }

    /// Clears everything that only makes sense while a match is live.
    fn clear_transient(&mut self) {
        self.token.clear();
        self.invites.clear();
        self.spectators.clear();
    }
}

/// One finished match, immutable once appended.
#[derive(Debug, Clone)]
pub struct GameLogRec {
    pub id: u64,
    pub room_id: u64,
    pub user1: String,
    pub user2: String,
    pub score1: u32,
    pub score2: u32,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Domain rejections raised by store operations.
///
/// Each variant maps 1:1 onto a wire `ERR` code via
/// [`wire_code`](Self::wire_code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("username already registered")]
    UserExists,
    #[error("no such user")]
    UserNotFound,
    #[error("online flag did not match the expected value")]
    OnlineMismatch,
    #[error("no such room")]
    RoomNotFound,
    #[error("room is mid-match")]
    RoomPlaying,
    #[error("both seats are taken")]
    RoomFull,
    #[error("user is already seated in this room")]
    AlreadyInRoom,
    #[error("private room requires an invitation")]
    NotInvited,
    #[error("only the host may do this")]
    NotHost,
    #[error("user is not in this room")]
    NotInRoom,
    #[error("room is not mid-match")]
    NotPlaying,
    #[error("user is not spectating this room")]
    NotSpectating,
}

impl StoreError {
    /// The `ERR` reason token this rejection travels as.
    pub fn wire_code(self) -> &'static str {
        match self {
            Self::UserExists => "exists",
            Self::UserNotFound | Self::RoomNotFound => "not_found",
            Self::OnlineMismatch => "mismatch",
            Self::RoomPlaying => "playing",
            Self::RoomFull => "full",
            Self::AlreadyInRoom => "already_in_room",
            Self::NotInvited => "private_room_not_invited",
            Self::NotHost => "not_host",
            Self::NotInRoom => "not_in_room",
            Self::NotPlaying => "not_playing",
            Self::NotSpectating => "not_spectating",
        }
    }
}

/// How a `leave` resolved; the wire layer words the two outcomes
/// differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The user left; the room still exists (possibly under a new host).
    Left,
    /// The host left an otherwise empty room, destroying it.
    Closed,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The in-memory entity store.
///
/// Ordered maps keep listings and the snapshot file deterministic.
#[derive(Debug, Default)]
pub struct Store {
    users: BTreeMap<String, UserRec>,
    rooms: BTreeMap<u64, RoomRec>,
    game_logs: Vec<GameLogRec>,
    next_room_id: u64,
    next_game_id: u64,
}

impl Store {
    /// Creates an empty store with id counters starting at 1.
    pub fn new() -> Self {
        Self {
            users: BTreeMap::new(),
            rooms: BTreeMap::new(),
            game_logs: Vec::new(),
            next_room_id: 1,
            next_game_id: 1,
        }
    }

    /// Rebuilds a store from loaded records.
    ///
    /// Id counters are derived from the maxima; every user's online flag is
    /// forced off because no session survives a restart.
    pub fn from_records(
        users: Vec<UserRec>,
        rooms: Vec<RoomRec>,
        game_logs: Vec<GameLogRec>,
    ) -> Self {
        let next_room_id = rooms.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        let next_game_id = game_logs.iter().map(|g| g.id).max().unwrap_or(0) + 1;
        Self {
            users: users
                .into_iter()
                .map(|mut u| {
                    u.online = false;
                    (u.username.clone(), u)
                })
                .collect(),
            rooms: rooms.into_iter().map(|r| (r.id, r)).collect(),
            game_logs,
            next_room_id,
            next_game_id,
        }
    }

    // -- Users --------------------------------------------------------------

    /// Registers a new user. The username must be unused.
    pub fn create_user(&mut self, username: &str, pass: &str) -> Result<(), StoreError> {
        if self.users.contains_key(username) {
            return Err(StoreError::UserExists);
        }
        self.users.insert(
            username.to_string(),
            UserRec {
                username: username.to_string(),
                pass: pass.to_string(),
                online: false,
            },
        );
        tracing::debug!(user = username, "user created");
        Ok(())
    }

    /// Looks up one user.
    pub fn user(&self, username: &str) -> Option<&UserRec> {
        self.users.get(username)
    }

    /// Atomically flips a user's online flag, conditional on its prior
    /// value. This is the anchor of duplicate-login rejection.
    pub fn compare_set_online(
        &mut self,
        username: &str,
        expect: bool,
        value: bool,
    ) -> Result<(), StoreError> {
        let user = self.users.get_mut(username).ok_or(StoreError::UserNotFound)?;
        if user.online != expect {
            return Err(StoreError::OnlineMismatch);
        }
        user.online = value;
        Ok(())
    }

    /// Unconditionally sets a user's online flag.
    pub fn set_online(&mut self, username: &str, online: bool) -> Result<(), StoreError> {
        let user = self.users.get_mut(username).ok_or(StoreError::UserNotFound)?;
        user.online = online;
        Ok(())
    }

    /// Usernames currently flagged online, in sorted order.
    pub fn list_online(&self) -> Vec<&str> {
        self.users
            .values()
            .filter(|u| u.online)
            .map(|u| u.username.as_str())
            .collect()
    }

    /// Iterates all users (persistence).
    pub fn users(&self) -> impl Iterator<Item = &UserRec> {
        self.users.values()
    }

    // -- Rooms --------------------------------------------------------------

    /// Creates a room with the host seated as `p1`, returning the room id.
    pub fn create_room(&mut self, name: &str, host: &str, visibility: Visibility) -> u64 {
        let id = self.next_room_id;
        self.next_room_id += 1;
        self.rooms.insert(
            id,
            RoomRec {
                id,
                name: name.to_string(),
                host: host.to_string(),
                visibility,
                status: RoomStatus::Idle,
                p1: host.to_string(),
                p2: String::new(),
                token: String::new(),
                invites: BTreeSet::new(),
                spectators: BTreeSet::new(),
            },
        );
        tracing::info!(room_id = id, host, "room created");
        id
    }

    /// Looks up one room.
    pub fn room(&self, id: u64) -> Option<&RoomRec> {
        self.rooms.get(&id)
    }

    /// Public rooms, for listings.
    pub fn public_rooms(&self) -> impl Iterator<Item = &RoomRec> {
        self.rooms
            .values()
            .filter(|r| r.visibility == Visibility::Public)
    }

    /// Iterates all rooms (persistence).
    pub fn rooms(&self) -> impl Iterator<Item = &RoomRec> {
        self.rooms.values()
    }

    /// Seats `user` in the open slot of room `id`.
    ///
    /// Rejections, in check order: unknown room, mid-match, both seats
    /// taken, already seated, uninvited into a private room. A successful
    /// join consumes any pending invitation.
    pub fn join_room(&mut self, id: u64, user: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::RoomNotFound)?;
        if room.status != RoomStatus::Idle {
            return Err(StoreError::RoomPlaying);
        }
        if !room.p2.is_empty() {
            return Err(StoreError::RoomFull);
        }
        if room.is_seated(user) {
            return Err(StoreError::AlreadyInRoom);
        }
        if room.visibility == Visibility::Private && !room.invites.contains(user) {
            return Err(StoreError::NotInvited);
        }
        room.p2 = user.to_string();
        room.invites.remove(user);
        tracing::info!(room_id = id, user, "player joined");
        Ok(())
    }

    /// Removes `user` from room `id`.
    ///
    /// Spectators simply leave the spectator set. A departing host hands
    /// the room to `p2` when one exists (the room drops back to idle with
    /// all transient state cleared) or closes the room when alone. A
    /// departing guest vacates their seat and also resets the room to idle:
    /// a match cannot continue one-sided.
    pub fn leave_room(&mut self, id: u64, user: &str) -> Result<LeaveOutcome, StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::RoomNotFound)?;

        if room.spectators.remove(user) {
            return Ok(LeaveOutcome::Left);
        }
        if !room.is_seated(user) && room.host != user {
            return Err(StoreError::NotInRoom);
        }

        if room.host == user {
            if room.p2.is_empty() {
                self.rooms.remove(&id);
                tracing::info!(room_id = id, user, "host left, room closed");
                return Ok(LeaveOutcome::Closed);
            }
            room.host = room.p2.clone();
            room.p1 = room.p2.clone();
            room.p2.clear();
            room.status = RoomStatus::Idle;
            room.clear_transient();
            tracing::info!(room_id = id, user, new_host = %room.host, "host left, seat handed over");
            return Ok(LeaveOutcome::Left);
        }

        if room.p2 == user {
            room.p2.clear();
        } else if room.p1 == user {
            room.p1.clear();
        }
        room.status = RoomStatus::Idle;
        room.token.clear();
        room.invites.remove(user);
        room.spectators.remove(user);
        tracing::info!(room_id = id, user, "player left");
        Ok(LeaveOutcome::Left)
    }

    /// Adds `user` to the invite list of room `id`. Only the host may
    /// invite.
    pub fn invite(&mut self, id: u64, user: &str, host: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::RoomNotFound)?;
        if room.host != host {
            return Err(StoreError::NotHost);
        }
        room.invites.insert(user.to_string());
        Ok(())
    }

    /// Rooms holding a pending invitation for `user`, as
    /// `(id, name, host)`.
    pub fn invites_for(&self, user: &str) -> Vec<(u64, &str, &str)> {
        self.rooms
            .values()
            .filter(|r| r.invites.contains(user))
            .map(|r| (r.id, r.name.as_str(), r.host.as_str()))
            .collect()
    }

    /// Adds `user` to the spectator set; only live rooms can be watched.
    pub fn spectate(&mut self, id: u64, user: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::RoomNotFound)?;
        if room.status != RoomStatus::Playing {
            return Err(StoreError::NotPlaying);
        }
        room.spectators.insert(user.to_string());
        Ok(())
    }

    /// Removes `user` from the spectator set.
    pub fn unspectate(&mut self, id: u64, user: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::RoomNotFound)?;
        if !room.spectators.remove(user) {
            return Err(StoreError::NotSpectating);
        }
        Ok(())
    }

    /// Sets a room's status. Dropping back to idle clears the token,
    /// invites, and spectators — all of it is per-match state.
    pub fn set_status(&mut self, id: u64, status: RoomStatus) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::RoomNotFound)?;
        room.status = status;
        if status == RoomStatus::Idle {
            room.clear_transient();
        }
        Ok(())
    }

    /// Sets a room's admission token.
    pub fn set_token(&mut self, id: u64, token: &str) -> Result<(), StoreError> {
        let room = self.rooms.get_mut(&id).ok_or(StoreError::RoomNotFound)?;
        room.token = token.to_string();
        Ok(())
    }

    // -- Game logs ----------------------------------------------------------

    /// Appends a finished match, returning the log id.
    pub fn add_game_log(
        &mut self,
        room_id: u64,
        user1: &str,
        user2: &str,
        score1: u32,
        score2: u32,
    ) -> u64 {
        let id = self.next_game_id;
        self.next_game_id += 1;
        self.game_logs.push(GameLogRec {
            id,
            room_id,
            user1: user1.to_string(),
            user2: user2.to_string(),
            score1,
            score2,
        });
        tracing::info!(game_id = id, room_id, "game log appended");
        id
    }

    /// All recorded matches, oldest first.
    pub fn game_logs(&self) -> &[GameLogRec] {
        &self.game_logs
    }
}

// =========================================================================
// Tests
// =========================================================================
