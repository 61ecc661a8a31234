//! The shared registry pipe.
//!
//! The lobby holds exactly one framed connection to the registry service.
//! A mutex serializes complete `send + recv` round-trips, so request and
//! reply can never interleave across the tasks that share the pipe. If
//! throughput ever warrants it, a small pool of pipes would slot in here —
//! each preserving its own FIFO — without touching any caller.

use tokio::sync::Mutex;

use quadra_wire::{redact, FrameStream, Reply};

use crate::LobbyError;

/// Client for the registry's verb protocol over one shared pipe.
pub struct RegistryClient {
    addr: String,
    pipe: Mutex<FrameStream>,
}

impl RegistryClient {
    /// Connects the pipe.
    pub async fn connect(addr: &str) -> Result<Self, LobbyError> {
        let pipe = FrameStream::connect(addr)
            .await
            .map_err(LobbyError::Registry)?;
        tracing::info!(addr, "registry connected");
        Ok(Self {
            addr: addr.to_string(),
            pipe: Mutex::new(pipe),
        })
    }

    /// The address this client is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// One request/reply round-trip.
    ///
    /// Any transport failure here is fatal for the lobby — the registry is
    /// its source of truth — so errors propagate instead of being retried.
    pub async fn request(&self, body: &str) -> Result<Reply, LobbyError> {
        let mut pipe = self.pipe.lock().await;
        tracing::trace!(tx = %redact(body), "registry request");
        pipe.send(body).await.map_err(LobbyError::Registry)?;
        let reply = pipe
            .recv()
            .await
            .map_err(LobbyError::Registry)?
            .ok_or(LobbyError::RegistryClosed)?;
        tracing::trace!(rx = %redact(&reply), "registry reply");
        Ok(Reply::new(reply))
    }
}
