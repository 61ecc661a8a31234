//! Registry service: the single source of truth for users, rooms, and
//! game logs.
//!
//! The registry speaks a line-oriented verb protocol
//! (`Collection Action key=value …`) over length-prefixed frames and
//! serializes every request through one store-owning task, so each reply
//! reflects a state every other verb has already observed. State survives
//! restarts through a line-oriented snapshot file rewritten at shutdown.
//!
//! Layering:
//!
//! - [`store`] — the typed entity store and every state-machine rule
//! - [`verbs`] — the text protocol over the store
//! - [`persist`] — the snapshot file format
//! - [`server`] — accept loop plus the store actor

pub mod config;
mod error;
pub mod persist;
mod server;
pub mod store;
pub mod verbs;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use server::Registry;
pub use store::{GameLogRec, RoomRec, RoomStatus, Store, StoreError, UserRec, Visibility};
