//! Error types for the registry service.

/// Errors that can stop the registry service itself.
///
/// Domain rejections (unknown user, full room, …) are not errors at this
/// level — they travel back to the caller as `ERR` replies. These variants
/// cover the fatal conditions: a dead listener or an unwritable state file.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Binding or accepting on the listener failed.
    #[error("listener error: {0}")]
    Listener(#[source] std::io::Error),

    /// Loading the state file failed (unreadable or malformed beyond
    /// tolerance).
    #[error("cannot load state file {path}: {source}")]
    LoadState {
        /// The offending file.
        path: std::path::PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// Rewriting the state file at shutdown failed.
    #[error("cannot save state file {path}: {source}")]
    SaveState {
        /// The offending file.
        path: std::path::PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// The store task ended unexpectedly.
    #[error("store task terminated")]
    StoreGone,
}
