//! The registry server: one listener, one store-owning task.
//!
//! Connection tasks never touch the store. Each request travels through an
//! mpsc channel to the store task with a oneshot for the reply, so every
//! request is parsed, applied, and answered in one run-to-completion step
//! — the total ordering the protocol promises, with no locks.

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

use quadra_wire::{redact, FrameStream};

use crate::store::Store;
use crate::{persist, verbs, RegistryError};

/// One queued request and its reply slot.
struct Request {
    body: String,
    reply: oneshot::Sender<String>,
}

/// Commands accepted by the store task.
enum Command {
    Apply(Request),
    /// Save the state file and stop. The oneshot reports the save result.
    Shutdown(oneshot::Sender<Result<(), RegistryError>>),
}

/// A bound registry service, ready to run.
pub struct Registry {
    listener: TcpListener,
    store: Store,
    state_file: PathBuf,
}

impl Registry {
    /// Binds the listener and loads (or initializes) the state file.
    pub async fn bind(
        addr: &str,
        state_file: impl Into<PathBuf>,
    ) -> Result<Self, RegistryError> {
        let state_file = state_file.into();
        let store = persist::load(&state_file)?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(RegistryError::Listener)?;
        tracing::info!(addr, "registry listening");
        Ok(Self {
            listener,
            store,
            state_file,
        })
    }

    /// The bound address — useful when binding to port 0 in tests.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until `shutdown` resolves, then rewrites the state file.
    ///
    /// Accepted connections keep their pipes until they hang up or until
    /// the store task stops answering at shutdown.
    pub async fn run_until(
        self,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = mpsc::channel::<Command>(64);

        let state_file = self.state_file;
        let store_task = tokio::spawn(store_loop(self.store, state_file, rx));

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!(%peer, "client connected");
                            tokio::spawn(handle_connection(stream, tx.clone()));
                        }
                        Err(e) => return Err(RegistryError::Listener(e)),
                    }
                }
            }
        }

        // Synchronous shutdown: the store saves before we return. Pending
        // requests behind the shutdown command are dropped; their
        // connections observe the closed reply channel and hang up.
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(Command::Shutdown(done_tx)).await.is_err() {
            return Err(RegistryError::StoreGone);
        }
        let save_result = done_rx.await.map_err(|_| RegistryError::StoreGone)?;
        let _ = store_task.await;
        save_result
    }
}

/// The store task: applies commands one at a time until shutdown.
async fn store_loop(
    mut store: Store,
    state_file: PathBuf,
    mut rx: mpsc::Receiver<Command>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Apply(req) => {
                let response = verbs::dispatch(&mut store, &req.body);
                // A dropped receiver just means the client went away
                // between sending and the reply; nothing to do.
                let _ = req.reply.send(response);
            }
            Command::Shutdown(done) => {
                let result = persist::save(&state_file, &store);
                let _ = done.send(result);
                return;
            }
        }
    }
}

/// Serves one client pipe: read a frame, queue it, write the reply.
async fn handle_connection(stream: TcpStream, tx: mpsc::Sender<Command>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".into());
    let mut frames = FrameStream::new(stream);

    loop {
        let body = match frames.recv().await {
            Ok(Some(body)) => body,
            Ok(None) => {
                tracing::debug!(%peer, "client disconnected");
                break;
            }
            Err(e) => {
                tracing::debug!(%peer, error = %e, "dropping client");
                break;
            }
        };
        tracing::trace!(%peer, rx = %redact(&body), "request");

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            body,
            reply: reply_tx,
        };
        if tx.send(Command::Apply(request)).await.is_err() {
            break; // store shut down
        }
        let Ok(response) = reply_rx.await else {
            break;
        };

        tracing::trace!(%peer, tx = %redact(&response), "reply");
        if frames.send(&response).await.is_err() {
            break;
        }
    }
}
