//! Error types for the match runtime.

/// Errors from the match runtime's edges.
///
/// Gameplay itself never errors — illegal moves are simply not applied.
/// These cover result reporting and listener failures.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Talking to the registry failed mid-report.
    #[error(transparent)]
    Wire(#[from] quadra_wire::WireError),

    /// The registry answered a result write with an `ERR`.
    #[error("registry rejected result write: {0}")]
    RegistryRejected(String),

    /// The registry closed the pipe before answering.
    #[error("registry closed the connection")]
    RegistryClosed,
}
