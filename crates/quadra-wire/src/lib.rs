//! Wire layer shared by every Quadra service.
//!
//! All three services (registry, lobby, match runtime) speak the same
//! transport: a 4-byte big-endian length prefix followed by that many bytes
//! of UTF-8 text. Bodies are whitespace-tokenized — a verb, then either
//! positional arguments or `key=value` pairs.
//!
//! This crate provides the two halves of that contract:
//!
//! 1. **Framing** ([`frame`]) — reading and writing length-prefixed frames
//!    on a TCP stream, with the 64 KiB cap enforced on both sides.
//! 2. **Messages** ([`message`]) — tokenizing bodies, extracting `key=value`
//!    fields, and classifying `OK`/`ERR` replies.

mod error;
mod frame;
mod message;

pub use error::WireError;
pub use frame::{read_frame, write_frame, FrameReader, FrameStream, FrameWriter, MAX_FRAME_LEN};
pub use message::{redact, split_verb, Fields, Reply};

use std::fmt;

/// Opaque identifier for one accepted connection.
///
/// Services hand these out from a per-process counter; the id has no
/// meaning on the wire, it only keys per-connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Creates a new `ConnId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_id_new_and_into_inner() {
        let id = ConnId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_conn_id_display() {
        assert_eq!(ConnId::new(7).to_string(), "conn-7");
    }

    #[test]
    fn test_conn_id_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnId::new(1), "alice");
        map.insert(ConnId::new(2), "bob");
        assert_eq!(map[&ConnId::new(1)], "alice");
    }
}
