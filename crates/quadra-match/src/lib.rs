//! Match runtime: hosts one synchronous two-player falling-block match on a
//! pre-bound TCP listener, with live broadcast to spectators.
//!
//! The lobby allocates a port and an admission token, announces both to the
//! players, and hands the listener to [`run_match`]. Clients authenticate
//! with a `HELLO` frame; once both expected players are in, a fixed-tempo
//! gravity loop drives both boards from the same seed and broadcasts a
//! snapshot per player every tick. The runtime returns a [`MatchOutcome`]
//! for the embedder to record; standalone embedders can push it straight to
//! a registry with [`report_outcome`].

mod error;
mod game;
mod runtime;

pub use error::MatchError;
pub use game::{Action, Game, BOARD_COLS, BOARD_ROWS};
pub use runtime::{report_outcome, run_match, MatchConfig, MatchOutcome};
