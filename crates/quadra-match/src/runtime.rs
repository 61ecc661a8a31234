//! The per-match server loop.
//!
//! One detached task owns the whole match: it accepts connections on the
//! pre-bound listener, admits them by token, and drives the gravity loop.
//! Connections get one reader task (frames in → event channel) and one
//! writer task (outbound channel → frames out), so the match task itself
//! never blocks on a peer.
//!
//! Ordering: inputs apply the moment their event is handled; the gravity
//! tick advances both boards and then broadcasts one snapshot per player,
//! so every snapshot reflects the last completed tick.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

use quadra_wire::{redact, ConnId, Fields, FrameStream, Reply, split_verb};

use crate::game::{Action, Game};
use crate::MatchError;

/// Default gravity interval.
const GRAVITY: Duration = Duration::from_millis(500);

/// Everything a match needs besides its listener.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Room this match belongs to; echoed in the outcome.
    pub room_id: u64,
    /// The two expected player usernames, in seat order.
    pub player_names: [String; 2],
    /// Admission token; `HELLO` frames must present it verbatim.
    pub token: String,
    /// Seed shared by both boards.
    pub seed: u64,
    /// Gravity interval. [`GRAVITY`] in production; tests shorten it.
    pub gravity: Duration,
}

impl MatchConfig {
    /// Builds a config with a random seed and the standard gravity.
    pub fn new(room_id: u64, p1: &str, p2: &str, token: &str) -> Self {
        Self {
            room_id,
            player_names: [p1.to_string(), p2.to_string()],
            token: token.to_string(),
            seed: rand::rng().random(),
            gravity: GRAVITY,
        }
    }
}

/// Final scores of a finished match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub room_id: u64,
    pub player_names: [String; 2],
    pub scores: [u32; 2],
}

// ---------------------------------------------------------------------------
// Internal plumbing
// ---------------------------------------------------------------------------

/// Events flowing from connection readers into the match task.
enum Event {
    Frame(ConnId, String),
    Closed(ConnId),
}

/// What a connection currently is to the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Connected but no accepted `HELLO` yet.
    Pending,
    /// Seat 0 or 1.
    Player(usize),
    Spectator,
}

struct Conn {
    outbound: mpsc::UnboundedSender<String>,
    role: Role,
}

struct Seat {
    name: String,
    conn: Option<ConnId>,
    game: Option<Game>,
}

impl Seat {
    fn score(&self) -> u32 {
        self.game.as_ref().map_or(0, Game::score)
    }

    fn is_over(&self) -> bool {
        self.game.as_ref().map_or(true, Game::is_over)
    }
}

struct MatchState {
    config: MatchConfig,
    conns: HashMap<ConnId, Conn>,
    seats: [Seat; 2],
    started: bool,
    next_conn_id: u64,
}

impl MatchState {
    fn new(config: MatchConfig) -> Self {
        let seats = [
            Seat {
                name: config.player_names[0].clone(),
                conn: None,
                game: None,
            },
            Seat {
                name: config.player_names[1].clone(),
                conn: None,
                game: None,
            },
        ];
        Self {
            config,
            conns: HashMap::new(),
            seats,
            started: false,
            next_conn_id: 1,
        }
    }

    /// Sends one frame to a single connection. Send failures surface later
    /// as `Closed` events from the reader; nothing to handle here.
    fn send_to(&self, conn: ConnId, body: &str) {
        if let Some(c) = self.conns.get(&conn) {
            let _ = c.outbound.send(body.to_string());
        }
    }

    /// Broadcasts to every admitted connection (players and spectators).
    fn broadcast(&self, body: &str) {
        for c in self.conns.values() {
            if c.role != Role::Pending {
                let _ = c.outbound.send(body.to_string());
            }
        }
    }

    /// Handles a `HELLO username=U token=T [role=SPEC]` frame.
    ///
    /// Admission requires the exact token plus either an unclaimed seat
    /// matching the username, or an explicit spectator role. Anything else
    /// is rejected and the connection dropped.
    fn handle_hello(&mut self, conn: ConnId, args: &str) {
        let fields = Fields::parse(args);
        let username = fields.get_or_empty("username");
        let token = fields.get_or_empty("token");
        let wants_spectate = fields.get("role") == Some("SPEC");

        let seat_idx = (!wants_spectate)
            .then(|| {
                self.seats
                    .iter()
                    .position(|s| s.name == username && s.conn.is_none())
            })
            .flatten();

        if token != self.config.token || (!wants_spectate && seat_idx.is_none()) {
            tracing::info!(%conn, user = username, "rejecting HELLO");
            self.send_to(conn, "ERR invalid_player_or_token");
            // Tear down through the close path so a connection that already
            // held a seat releases it.
            self.handle_closed(conn);
            return;
        }

        let welcome_role = match seat_idx {
            Some(idx) => {
                self.seats[idx].conn = Some(conn);
                if let Some(c) = self.conns.get_mut(&conn) {
                    c.role = Role::Player(idx);
                }
                if idx == 0 {
                    "P1"
                } else {
                    "P2"
                }
            }
            None => {
                if let Some(c) = self.conns.get_mut(&conn) {
                    c.role = Role::Spectator;
                }
                "SPEC"
            }
        };

        tracing::info!(%conn, user = username, role = welcome_role, "HELLO accepted");
        self.send_to(
            conn,
            &format!(
                "WELCOME role={welcome_role} seed={} gravity={} bag=7",
                self.config.seed,
                self.config.gravity.as_millis()
            ),
        );
    }

    /// Handles an `INPUT <ACTION>` frame. Ignored before the match starts
    /// and from anything that is not a seated player.
    fn handle_input(&mut self, conn: ConnId, args: &str) {
        if !self.started {
            return;
        }
        let Some(Role::Player(idx)) = self.conns.get(&conn).map(|c| c.role) else {
            return;
        };
        let Ok(action) = args.trim().parse::<Action>() else {
            return;
        };
        if let Some(game) = self.seats[idx].game.as_mut() {
            game.handle_input(action);
        }
    }

    /// Handles a connection going away.
    ///
    /// Before the match: a seated player simply frees the seat. Mid-match:
    /// the player's board is forced over, which ends the match on the next
    /// check. Spectators just leave the set.
    fn handle_closed(&mut self, conn: ConnId) {
        let Some(gone) = self.conns.remove(&conn) else {
            return;
        };
        if let Role::Player(idx) = gone.role {
            let seat = &mut self.seats[idx];
            seat.conn = None;
            if self.started {
                if let Some(game) = seat.game.as_mut() {
                    game.set_over();
                }
                tracing::info!(%conn, player = %seat.name, "player left mid-match");
            } else {
                tracing::info!(%conn, player = %seat.name, "player left before start");
            }
        } else {
            tracing::debug!(%conn, "connection closed");
        }
    }

    /// Starts the match once both seats are occupied.
    fn maybe_start(&mut self) -> bool {
        if self.started || self.seats.iter().any(|s| s.conn.is_none()) {
            return false;
        }
        for seat in &mut self.seats {
            seat.game = Some(Game::new(self.config.seed));
        }
        self.started = true;
        tracing::info!(
            room_id = self.config.room_id,
            seed = self.config.seed,
            "match started"
        );
        true
    }

    /// Advances both boards one gravity step and broadcasts snapshots.
    fn tick_and_broadcast(&mut self) {
        for idx in 0..2 {
            if let Some(game) = self.seats[idx].game.as_mut() {
                game.tick();
            }
        }
        for seat in &self.seats {
            if let Some(game) = &seat.game {
                self.broadcast(&format!(
                    "SNAPSHOT user={} score={} lines={} gameover={} board={}",
                    seat.name,
                    game.score(),
                    game.lines_cleared(),
                    u8::from(game.is_over()),
                    game.board_snapshot()
                ));
            }
        }
    }

    /// True once either board is done; announces the final scores.
    fn finish_if_over(&mut self) -> bool {
        if !self.started {
            return false;
        }
        if !self.seats[0].is_over() && !self.seats[1].is_over() {
            return false;
        }
        self.broadcast(&format!(
            "GAME_OVER p1_score={} p2_score={}",
            self.seats[0].score(),
            self.seats[1].score()
        ));
        true
    }

    fn outcome(&self) -> MatchOutcome {
        MatchOutcome {
            room_id: self.config.room_id,
            player_names: [self.seats[0].name.clone(), self.seats[1].name.clone()],
            scores: [self.seats[0].score(), self.seats[1].score()],
        }
    }
}

// ---------------------------------------------------------------------------
// The match loop
// ---------------------------------------------------------------------------

/// Runs one match to completion on `listener` and returns the outcome.
///
/// The listener and every accepted socket are released before returning.
/// There is no readiness timeout: until both players authenticate, the
/// match waits — a disconnect is the only way out of the wait.
pub async fn run_match(listener: TcpListener, config: MatchConfig) -> MatchOutcome {
    let room_id = config.room_id;
    let gravity = config.gravity;
    tracing::info!(room_id, "match runtime listening");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
    let mut state = MatchState::new(config);
    let mut next_tick = Instant::now() + gravity;

    loop {
        // Biased: queued inputs apply before a due gravity tick, so a tie
        // between an input and the tick resolves input-first.
        tokio::select! {
            biased;

            event = events_rx.recv() => {
                // The runtime holds a sender, so the channel cannot close.
                match event {
                    Some(Event::Frame(conn, body)) => {
                        tracing::trace!(%conn, rx = %redact(&body), "frame");
                        let (verb, args) = split_verb(&body);
                        match verb {
                            "HELLO" => state.handle_hello(conn, args),
                            "INPUT" => state.handle_input(conn, args),
                            _ => tracing::debug!(%conn, verb, "ignoring unknown verb"),
                        }
                        if state.maybe_start() {
                            next_tick = Instant::now() + gravity;
                        }
                    }
                    Some(Event::Closed(conn)) => state.handle_closed(conn),
                    None => unreachable!("runtime keeps an event sender"),
                }
            }

            accepted = listener.accept() => {
                if let Ok((stream, _)) = accepted {
                    let conn = ConnId::new(state.next_conn_id);
                    state.next_conn_id += 1;
                    let outbound = spawn_conn_tasks(conn, stream, events_tx.clone());
                    state.conns.insert(conn, Conn { outbound, role: Role::Pending });
                    tracing::debug!(%conn, "connection accepted");
                }
            }

            _ = tokio::time::sleep_until(next_tick), if state.started => {
                state.tick_and_broadcast();
                next_tick = Instant::now() + gravity;
            }
        }

        if state.finish_if_over() {
            break;
        }
    }

    let outcome = state.outcome();
    tracing::info!(
        room_id,
        p1_score = outcome.scores[0],
        p2_score = outcome.scores[1],
        "match finished"
    );
    // Dropping the state tears down every outbound channel; writer tasks
    // drain and release their sockets. The listener drops with this frame.
    outcome
}

/// Spawns the reader and writer tasks for one accepted socket and returns
/// the outbound sender.
fn spawn_conn_tasks(
    conn: ConnId,
    stream: TcpStream,
    events: mpsc::UnboundedSender<Event>,
) -> mpsc::UnboundedSender<String> {
    let (mut reader, mut writer) = FrameStream::new(stream).into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Ok(Some(body)) => {
                    if events.send(Event::Frame(conn, body)).is_err() {
                        break; // match over
                    }
                }
                Ok(None) | Err(_) => {
                    let _ = events.send(Event::Closed(conn));
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(body) = outbound_rx.recv().await {
            if writer.send(&body).await.is_err() {
                break;
            }
        }
    });

    outbound_tx
}

// ---------------------------------------------------------------------------
// Standalone result reporting
// ---------------------------------------------------------------------------

/// Writes a finished match straight to a registry: append the game log,
/// then reset the room to idle.
///
/// This is the path for embedders running the runtime without a lobby;
/// the lobby performs the same sequence itself over its shared pipe.
pub async fn report_outcome(
    registry_addr: &str,
    outcome: &MatchOutcome,
) -> Result<(), MatchError> {
    let mut pipe = FrameStream::connect(registry_addr).await?;

    let log = format!(
        "GameLog create roomId={} user1={} user2={} score1={} score2={}",
        outcome.room_id,
        outcome.player_names[0],
        outcome.player_names[1],
        outcome.scores[0],
        outcome.scores[1]
    );
    let reset = format!("Room setStatus roomId={} status=idle", outcome.room_id);

    for request in [log, reset] {
        pipe.send(&request).await?;
        let reply = pipe.recv().await?.ok_or(MatchError::RegistryClosed)?;
        let reply = Reply::new(reply);
        if !reply.is_ok() {
            return Err(MatchError::RegistryRejected(reply.raw().to_string()));
        }
    }
    Ok(())
}
