//! The match registry: which rooms have a live match, and where.
//!
//! `START_GAME` registers `(room_id, port, token)` here before announcing
//! the match; the supervisor removes the entry when the runtime returns.
//! Spectator admission reads it to find the port and token for a playing
//! room. Invariant: a room with `status=playing` in the registry service
//! has exactly one entry here.

use std::collections::HashMap;

/// Where one live match can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEntry {
    /// TCP port of the match runtime's listener.
    pub port: u16,
    /// Admission token shared with the players and spectators.
    pub token: String,
}

/// All live matches, keyed by room id.
#[derive(Debug, Default)]
pub struct MatchRegistry {
    entries: HashMap<u64, MatchEntry>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a starting match.
    pub fn insert(&mut self, room_id: u64, port: u16, token: &str) {
        self.entries.insert(
            room_id,
            MatchEntry {
                port,
                token: token.to_string(),
            },
        );
    }

    /// The entry for a room's live match, if any.
    pub fn get(&self, room_id: u64) -> Option<&MatchEntry> {
        self.entries.get(&room_id)
    }

    /// Removes a finished match's entry.
    pub fn remove(&mut self, room_id: u64) -> Option<MatchEntry> {
        self.entries.remove(&room_id)
    }

    /// Number of live matches.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove_cycle() {
        let mut reg = MatchRegistry::new();
        assert!(reg.get(7).is_none());

        reg.insert(7, 10123, "cafe");
        let entry = reg.get(7).unwrap();
        assert_eq!(entry.port, 10123);
        assert_eq!(entry.token, "cafe");

        let removed = reg.remove(7).unwrap();
        assert_eq!(removed.port, 10123);
        assert!(reg.is_empty());
        assert!(reg.remove(7).is_none());
    }

    #[test]
    fn test_reinsert_replaces_entry() {
        let mut reg = MatchRegistry::new();
        reg.insert(7, 10123, "old");
        reg.insert(7, 10999, "new");
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(7).unwrap().token, "new");
    }
}
