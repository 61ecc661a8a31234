//! The snapshot file: one record per line, `USER` / `ROOM` / `LOG` tagged,
//! string values quoted with backslash escapes.
//!
//! ```text
//! USER "alice" "passhash" 0
//! ROOM 1 "Den" "alice" "private" "idle" "alice" "bob" "" 1 "carol" 0
//! LOG 1 1 "alice" "bob" 800 100
//! ```
//!
//! The file is rewritten from scratch (truncate + write) at shutdown; there
//! are no intermediate checkpoints because all mutation runs through one
//! task. On load, unparsable lines are skipped rather than failing the
//! boot — a half-written record should not brick the registry.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::store::{GameLogRec, RoomRec, RoomStatus, Store, UserRec, Visibility};
use crate::RegistryError;

// ---------------------------------------------------------------------------
// Quoting
// ---------------------------------------------------------------------------

/// Wraps `value` in double quotes, escaping `\` and `"`.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '\\' || c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Pulls whitespace-separated tokens off a line, unquoting string tokens.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    /// Next quoted string token, or `None` if the line is exhausted or the
    /// token is malformed.
    fn quoted(&mut self) -> Option<String> {
        self.rest = self.rest.trim_start();
        let mut chars = self.rest.char_indices();
        match chars.next() {
            Some((_, '"')) => {}
            _ => return None,
        }
        let mut out = String::new();
        let mut escaped = false;
        for (i, c) in chars {
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                self.rest = &self.rest[i + 1..];
                return Some(out);
            } else {
                out.push(c);
            }
        }
        None
    }

    /// Next bare token parsed as an integer.
    fn number<T: std::str::FromStr>(&mut self) -> Option<T> {
        self.rest = self.rest.trim_start();
        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        token.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

fn parse_user(line: &str) -> Option<UserRec> {
    let mut sc = Scanner::new(line);
    let username = sc.quoted()?;
    let pass = sc.quoted()?;
    let online: u8 = sc.number()?;
    Some(UserRec {
        username,
        pass,
        online: online != 0,
    })
}

fn parse_room(line: &str) -> Option<RoomRec> {
    let mut sc = Scanner::new(line);
    let id = sc.number()?;
    let name = sc.quoted()?;
    let host = sc.quoted()?;
    let visibility = Visibility::parse_lenient(&sc.quoted()?);
    let status = sc.quoted()?.parse::<RoomStatus>().ok()?;
    let p1 = sc.quoted()?;
    let p2 = sc.quoted()?;
    let token = sc.quoted()?;

    let mut invites = BTreeSet::new();
    let n_invites: usize = sc.number()?;
    for _ in 0..n_invites {
        invites.insert(sc.quoted()?);
    }
    let mut spectators = BTreeSet::new();
    let n_spectators: usize = sc.number()?;
    for _ in 0..n_spectators {
        spectators.insert(sc.quoted()?);
    }

    Some(RoomRec {
        id,
        name,
        host,
        visibility,
        status,
        p1,
        p2,
        token,
        invites,
        spectators,
    })
}

fn parse_log(line: &str) -> Option<GameLogRec> {
    let mut sc = Scanner::new(line);
    let id = sc.number()?;
    let room_id = sc.number()?;
    let user1 = sc.quoted()?;
    let user2 = sc.quoted()?;
    let score1 = sc.number()?;
    let score2 = sc.number()?;
    Some(GameLogRec {
        id,
        room_id,
        user1,
        user2,
        score1,
        score2,
    })
}

/// Loads a store from `path`.
///
/// A missing file yields a fresh store. Every loaded user comes back with
/// `online = false` — no session survives a restart.
pub fn load(path: &Path) -> Result<Store, RegistryError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no state file, starting fresh");
            return Ok(Store::new());
        }
        Err(e) => {
            return Err(RegistryError::LoadState {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut users = Vec::new();
    let mut rooms = Vec::new();
    let mut logs = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (tag, rest) = quadra_wire::split_verb(line);
        let parsed = match tag {
            "USER" => parse_user(rest).map(|u| users.push(u)),
            "ROOM" => parse_room(rest).map(|r| rooms.push(r)),
            "LOG" => parse_log(rest).map(|g| logs.push(g)),
            _ => None,
        };
        if parsed.is_none() {
            tracing::warn!(line, "skipping unparsable state record");
        }
    }

    tracing::info!(
        path = %path.display(),
        users = users.len(),
        rooms = rooms.len(),
        logs = logs.len(),
        "state loaded"
    );
    Ok(Store::from_records(users, rooms, logs))
}

/// Rewrites the state file from scratch.
pub fn save(path: &Path, store: &Store) -> Result<(), RegistryError> {
    let write = |path: &Path| -> std::io::Result<()> {
        let mut out = fs::File::create(path)?;
        for u in store.users() {
            writeln!(
                out,
                "USER {} {} {}",
                quote(&u.username),
                quote(&u.pass),
                u8::from(u.online)
            )?;
        }
        for r in store.rooms() {
            write!(
                out,
                "ROOM {} {} {} {} {} {} {} {}",
                r.id,
                quote(&r.name),
                quote(&r.host),
                quote(&r.visibility.to_string()),
                quote(&r.status.to_string()),
                quote(&r.p1),
                quote(&r.p2),
                quote(&r.token)
            )?;
            write!(out, " {}", r.invites.len())?;
            for inv in &r.invites {
                write!(out, " {}", quote(inv))?;
            }
            write!(out, " {}", r.spectators.len())?;
            for spec in &r.spectators {
                write!(out, " {}", quote(spec))?;
            }
            writeln!(out)?;
        }
        for g in store.game_logs() {
            writeln!(
                out,
                "LOG {} {} {} {} {} {}",
                g.id,
                g.room_id,
                quote(&g.user1),
                quote(&g.user2),
                g.score1,
                g.score2
            )?;
        }
        out.flush()
    };

    write(path).map_err(|e| RegistryError::SaveState {
        path: path.to_path_buf(),
        source: e,
    })?;
    tracing::info!(path = %path.display(), "state saved");
    Ok(())
}

// =========================================================================
// Tests
// =========================================================================
