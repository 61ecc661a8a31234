//! The lobby server: accept loop, shared state, and match completion.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify};

use quadra_match::MatchOutcome;
use quadra_wire::ConnId;

use crate::handler::handle_connection;
use crate::matches::MatchRegistry;
use crate::ports::PortAllocator;
use crate::registry::RegistryClient;
use crate::session::SessionMap;
use crate::LobbyError;

/// Counter for generating unique connection IDs.
static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Everything the lobby needs to start.
#[derive(Debug, Clone)]
pub struct LobbyOptions {
    /// Address for the client listener.
    pub bind: String,
    /// Address of the registry service.
    pub registry_addr: String,
    /// IP that match listeners bind on.
    pub game_bind_ip: String,
    /// Inclusive game-port range.
    pub game_port_min: u16,
    pub game_port_max: u16,
}

impl Default for LobbyOptions {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:13472".to_string(),
            registry_addr: "127.0.0.1:12977".to_string(),
            game_bind_ip: "0.0.0.0".to_string(),
            game_port_min: 10_000,
            game_port_max: 65_000,
        }
    }
}

/// Shared state for every handler task and match supervisor.
///
/// Lock order when more than one is needed: `sessions` before `matches`.
/// The registry pipe has its own serialization inside [`RegistryClient`]
/// and is never called with either lock held.
pub(crate) struct LobbyState {
    pub(crate) sessions: Mutex<SessionMap>,
    pub(crate) matches: Mutex<MatchRegistry>,
    pub(crate) ports: Mutex<PortAllocator>,
    pub(crate) registry: RegistryClient,
    /// Signalled by any task that loses the registry; stops the lobby.
    pub(crate) fatal: Notify,
    pub(crate) game_bind_ip: String,
}

/// A bound lobby service, ready to run.
pub struct Lobby {
    listener: TcpListener,
    state: Arc<LobbyState>,
}

impl Lobby {
    /// Connects to the registry and binds the client listener.
    pub async fn bind(options: LobbyOptions) -> Result<Self, LobbyError> {
        let registry = RegistryClient::connect(&options.registry_addr).await?;
        let listener = TcpListener::bind(&options.bind)
            .await
            .map_err(LobbyError::Listener)?;
        tracing::info!(addr = %options.bind, "lobby listening");

        let state = Arc::new(LobbyState {
            sessions: Mutex::new(SessionMap::new()),
            matches: Mutex::new(MatchRegistry::new()),
            ports: Mutex::new(PortAllocator::new(
                options.game_port_min,
                options.game_port_max,
            )),
            registry,
            fatal: Notify::new(),
            game_bind_ip: options.game_bind_ip,
        });

        Ok(Self { listener, state })
    }

    /// The bound address — useful when binding to port 0 in tests.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until `shutdown` resolves or the registry pipe dies.
    ///
    /// Sessions are dropped with the state; detached match runtimes keep
    /// running until their own loops observe a disconnect.
    pub async fn run_until(
        self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), LobbyError> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("lobby shutting down");
                    return Ok(());
                }
                _ = self.state.fatal.notified() => {
                    tracing::error!("registry lost, lobby stopping");
                    return Err(LobbyError::RegistryClosed);
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let conn = ConnId::new(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
                            tracing::debug!(%conn, %peer, "accepted client");
                            let state = Arc::clone(&self.state);
                            tokio::spawn(handle_connection(state, conn, stream));
                        }
                        Err(e) => return Err(LobbyError::Listener(e)),
                    }
                }
            }
        }
    }
}

/// Completion sequence for a finished match: record the game log, reset
/// the room, release the match-registry entry.
///
/// Registry failures here are logged but must not leak the entry — the
/// removal always happens, so the port and token are never handed to a
/// later spectator.
pub(crate) async fn finish_match(state: &Arc<LobbyState>, outcome: MatchOutcome) {
    let room_id = outcome.room_id;

    let log = format!(
        "GameLog create roomId={room_id} user1={} user2={} score1={} score2={}",
        outcome.player_names[0], outcome.player_names[1], outcome.scores[0], outcome.scores[1]
    );
    match state.registry.request(&log).await {
        Ok(reply) if reply.is_ok() => {
            tracing::info!(room_id, game_id = reply.fields().get_or_empty("gameId"), "game logged")
        }
        Ok(reply) => tracing::warn!(room_id, reply = reply.raw(), "game log rejected"),
        Err(e) => tracing::warn!(room_id, error = %e, "game log write failed"),
    }

    match state
        .registry
        .request(&format!("Room setStatus roomId={room_id} status=idle"))
        .await
    {
        Ok(reply) if reply.is_ok() => {}
        Ok(reply) => tracing::warn!(room_id, reply = reply.raw(), "room reset rejected"),
        Err(e) => tracing::warn!(room_id, error = %e, "room reset failed"),
    }

    let mut matches = state.matches.lock().await;
    matches.remove(room_id);
    tracing::info!(room_id, "match resources released");
}
