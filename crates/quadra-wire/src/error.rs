//! Error types for the wire layer.

/// Errors that can occur while framing or parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The peer announced a frame length outside `1..=65536`.
    ///
    /// A zero or oversize length is a protocol violation, not a transient
    /// condition — the caller must close the connection.
    #[error("invalid frame length {0}")]
    BadLength(usize),

    /// The connection closed in the middle of a frame body.
    #[error("connection closed mid-frame ({got} of {want} bytes)")]
    Truncated {
        /// Bytes received before the stream ended.
        got: usize,
        /// Bytes the length prefix promised.
        want: usize,
    },

    /// The frame body is not valid UTF-8.
    #[error("frame body is not valid UTF-8")]
    NotUtf8,

    /// A required `key=value` field is missing from a message.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// An underlying socket read or write failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}
