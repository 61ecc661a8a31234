//! Error types for the lobby service.

/// Errors that can stop the lobby service.
///
/// Client-facing rejections are `ERR …` replies, not errors; these
/// variants are the fatal conditions — a dead listener or a dead registry
/// pipe.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// Binding or accepting on the client listener failed.
    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),

    /// Reading or writing the shared registry pipe failed.
    #[error("registry pipe error: {0}")]
    Registry(#[source] quadra_wire::WireError),

    /// The registry closed its end of the pipe.
    #[error("registry connection lost")]
    RegistryClosed,
}
