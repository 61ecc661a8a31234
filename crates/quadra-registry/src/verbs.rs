//! The text protocol over the store.
//!
//! Requests look like `<Collection> <Action> key=value …`; replies start
//! with `OK` (optionally followed by fields or a `;`-separated list) or
//! `ERR <reason>`. This layer only parses, delegates to [`Store`], and
//! formats — every rule lives in the store.

use quadra_wire::{split_verb, Fields};

use crate::store::{LeaveOutcome, RoomStatus, Store, StoreError, Visibility};

fn err(code: &str) -> String {
    format!("ERR {code}")
}

fn store_err(e: StoreError) -> String {
    err(e.wire_code())
}

/// Parses `roomId` as in every Room/GameLog verb: absent, empty, or
/// non-numeric all count as invalid.
fn room_id(fields: &Fields) -> Result<u64, String> {
    fields
        .get("roomId")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| err("invalid_roomId"))
}

fn score(fields: &Fields, key: &str) -> Result<u32, String> {
    fields
        .get(key)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| err(&format!("invalid_{key}")))
}

/// Applies one request to the store and returns the reply body.
///
/// Runs to completion with no suspension points, so every reply reflects a
/// state all other verbs have observed.
pub fn dispatch(store: &mut Store, request: &str) -> String {
    let (collection, rest) = split_verb(request);
    let (action, rest) = split_verb(rest);
    let fields = Fields::parse(rest);

    match (collection, action) {
        ("User", "create") => {
            let Ok(username) = fields.require("username") else {
                return err("missing_username");
            };
            match store.create_user(username, fields.get_or_empty("pass")) {
                Ok(()) => format!("OK user={username}"),
                Err(e) => store_err(e),
            }
        }
        ("User", "read") => match store.user(fields.get_or_empty("username")) {
            Some(u) => format!(
                "OK username={} pass={} online={}",
                u.username,
                u.pass,
                u8::from(u.online)
            ),
            None => err("not_found"),
        },
        ("User", "compareSetOnline") => {
            let Ok(username) = fields.require("username") else {
                return err("missing_username");
            };
            let expect = match fields.get("expect") {
                Some("0") => false,
                Some("1") => true,
                _ => return err("invalid_expect"),
            };
            let value = match fields.get("value") {
                Some("0") => false,
                Some("1") => true,
                _ => return err("invalid_value"),
            };
            match store.compare_set_online(username, expect, value) {
                Ok(()) => "OK".to_string(),
                Err(e) => store_err(e),
            }
        }
        ("User", "setOnline") => {
            let online = fields.get_or_empty("online") == "1";
            match store.set_online(fields.get_or_empty("username"), online) {
                Ok(()) => "OK".to_string(),
                Err(e) => store_err(e),
            }
        }
        ("User", "listOnline") => {
            let online = store.list_online();
            if online.is_empty() {
                "OK".to_string()
            } else {
                format!("OK {}", online.join(","))
            }
        }

        ("Room", "create") => {
            let Ok(name) = fields.require("name") else {
                return err("missing_name");
            };
            let Ok(host) = fields.require("host") else {
                return err("missing_host");
            };
            let visibility = Visibility::parse_lenient(fields.get_or_empty("visibility"));
            let id = store.create_room(name, host, visibility);
            format!("OK roomId={id}")
        }
        ("Room", "list") => {
            let mut out = String::from("OK ");
            for r in store.public_rooms() {
                out.push_str(&format!(
                    "{}:{}:{}:{}:{}:{}:{};",
                    r.id, r.name, r.host, r.status, r.visibility, r.p1, r.p2
                ));
            }
            out.trim_end().to_string()
        }
        ("Room", "get") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            match store.room(id) {
                Some(r) => format!(
                    "OK id={} name={} host={} status={} p1={} p2={} token={}",
                    r.id, r.name, r.host, r.status, r.p1, r.p2, r.token
                ),
                None => err("not_found"),
            }
        }
        ("Room", "join") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let Ok(user) = fields.require("user") else {
                return err("missing_user");
            };
            match store.join_room(id, user) {
                Ok(()) => "OK".to_string(),
                Err(e) => store_err(e),
            }
        }
        ("Room", "leave") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let Ok(user) = fields.require("user") else {
                return err("missing_user");
            };
            match store.leave_room(id, user) {
                Ok(LeaveOutcome::Left) => "OK".to_string(),
                Ok(LeaveOutcome::Closed) => "OK closed".to_string(),
                Err(e) => store_err(e),
            }
        }
        ("Room", "invite") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let Ok(host) = fields.require("host") else {
                return err("missing_host");
            };
            let Ok(user) = fields.require("user") else {
                return err("missing_user");
            };
            match store.invite(id, user, host) {
                Ok(()) => format!("OK invited={user}"),
                Err(e) => store_err(e),
            }
        }
        ("Room", "listInvites") => {
            let Ok(user) = fields.require("user") else {
                return err("missing_user");
            };
            let mut out = String::from("OK ");
            for (id, name, host) in store.invites_for(user) {
                out.push_str(&format!("{id}:{name}:{host};"));
            }
            out.trim_end().to_string()
        }
        ("Room", "spectate") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let Ok(user) = fields.require("user") else {
                return err("missing_user");
            };
            match store.spectate(id, user) {
                Ok(()) => "OK".to_string(),
                Err(e) => store_err(e),
            }
        }
        ("Room", "unspectate") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let Ok(user) = fields.require("user") else {
                return err("missing_user");
            };
            match store.unspectate(id, user) {
                Ok(()) => "OK".to_string(),
                Err(e) => store_err(e),
            }
        }
        ("Room", "setStatus") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let Ok(raw) = fields.require("status") else {
                return err("missing_status");
            };
            let Ok(status) = raw.parse::<RoomStatus>() else {
                return err("invalid_status");
            };
            match store.set_status(id, status) {
                Ok(()) => "OK".to_string(),
                Err(e) => store_err(e),
            }
        }
        ("Room", "setToken") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let Ok(token) = fields.require("token") else {
                return err("missing_token");
            };
            match store.set_token(id, token) {
                Ok(()) => "OK".to_string(),
                Err(e) => store_err(e),
            }
        }

        ("GameLog", "create") => {
            let id = match room_id(&fields) {
                Ok(id) => id,
                Err(e) => return e,
            };
            let score1 = match score(&fields, "score1") {
                Ok(s) => s,
                Err(e) => return e,
            };
            let score2 = match score(&fields, "score2") {
                Ok(s) => s,
                Err(e) => return e,
            };
            let (Ok(user1), Ok(user2)) = (fields.require("user1"), fields.require("user2"))
            else {
                return err("missing_user");
            };
            let game_id = store.add_game_log(id, user1, user2, score1, score2);
            format!("OK gameId={game_id}")
        }
        ("GameLog", "list") => {
            let mut out = String::from("OK ");
            for g in store.game_logs() {
                out.push_str(&format!(
                    "id={} room={} p1={} s1={} p2={} s2={};",
                    g.id, g.room_id, g.user1, g.score1, g.user2, g.score2
                ));
            }
            out.trim_end().to_string()
        }

        _ => err("unknown_command"),
    }
}

// =========================================================================
// Tests
// =========================================================================
