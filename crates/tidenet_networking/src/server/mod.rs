//! # Game Server
//!
//! The authoritative tick loop of one match.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       GAME SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ InputIngress │  │ Tick Loop    │  │ SnapshotSink │      │
//! │  │ (Any thread) │──│ (One thread) │──│ (Network)    │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         ▲                 │                                 │
//! │         │     ┌───────────▼───────────┐                     │
//! │   hosted bots │  Entity Registry      │                     │
//! │   and humans ─│  (owner = WORLD)      │                     │
//! │               └───────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Per tick
//!
//! 1. Gather input of hosted bots and humans, tagged with the current tick
//! 2. Apply every connected player's input for the current tick
//! 3. Step the registry
//! 4. On snapshot ticks, send every remote player its filtered snapshot
//! 5. Advance the tick and evict input that can no longer be applied

mod handler;
mod ingress;
mod players;

pub use handler::{DefaultServerHandler, HandlerDecision, ServerHandler};
pub use ingress::InputIngress;
pub use players::{player_associations, roster, InitialMatchPlayerData, PlayerResult};

use crate::config::GameConfig;
use crate::error::{NetError, NetResult};
use crate::transport::SnapshotSink;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::BTreeSet;
use std::time::Instant;
use tidenet_core::{EntityRegistry, PlayerContext};
use tidenet_shared::{PlayerId, Tick};

/// Match lifecycle on the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServerState {
    /// No roster yet.
    #[default]
    AwaitingInit,
    /// Roster known, waiting for the handler to start the match.
    WaitingForPlayers,
    /// Ticking.
    Running,
    /// Match over. Terminal.
    Ended,
}

/// Why a match ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Game code ended it.
    Finished,
    /// Not every player joined before the start timeout.
    StartTimeout,
}

/// Lifecycle notifications for whoever hosts the server.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchEvent {
    /// Roster accepted.
    Initialized {
        /// Seats in the match.
        players: usize,
    },
    /// Ticking began.
    Started,
    /// A player joined.
    PlayerConnected(PlayerId),
    /// A player left.
    PlayerDisconnected(PlayerId),
    /// Match is over.
    Ended {
        /// Why.
        reason: EndReason,
        /// Per-seat results, when game code reported a complete set.
        results: Option<Vec<PlayerResult>>,
    },
}

/// Server counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Ticks simulated.
    pub ticks: u64,
    /// Inputs applied.
    pub inputs_applied: u64,
    /// Connected player ticks without input.
    pub missing_inputs: u64,
    /// Snapshots handed to the sink.
    pub snapshots_sent: u64,
    /// Entries that failed to apply.
    pub protocol_errors: u64,
}

/// Authoritative half of a match.
pub struct GameServer {
    config: GameConfig,
    state: ServerState,
    tick: Tick,
    registry: EntityRegistry,
    ingress: InputIngress,
    handler: Box<dyn ServerHandler>,
    sink: Box<dyn SnapshotSink>,
    roster: Vec<InitialMatchPlayerData>,
    hosted_bots: Vec<PlayerId>,
    hosted_humans: Vec<PlayerId>,
    connected: BTreeSet<PlayerId>,
    events_tx: Sender<MatchEvent>,
    events_rx: Receiver<MatchEvent>,
    stats: ServerStats,
}

impl GameServer {
    /// Server for one match. Register entities through
    /// [`Self::registry_mut`] before calling [`Self::initialize`].
    #[must_use]
    pub fn new(config: GameConfig, handler: Box<dyn ServerHandler>, sink: Box<dyn SnapshotSink>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            state: ServerState::AwaitingInit,
            tick: 0,
            registry: EntityRegistry::new(PlayerId::WORLD),
            ingress: InputIngress::new(config.prediction_buffer_size()),
            handler,
            sink,
            roster: Vec::new(),
            hosted_bots: Vec::new(),
            hosted_humans: Vec::new(),
            connected: BTreeSet::new(),
            events_tx,
            events_rx,
            stats: ServerStats::default(),
            config,
        }
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Tick that runs next.
    #[inline]
    #[must_use]
    pub const fn current_tick(&self) -> Tick {
        self.tick
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Authoritative entities.
    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Authoritative entities, mutable.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    /// Handle for network callbacks to deliver input.
    #[must_use]
    pub fn ingress(&self) -> InputIngress {
        self.ingress.clone()
    }

    /// Receiver of lifecycle events.
    #[must_use]
    pub fn events(&self) -> Receiver<MatchEvent> {
        self.events_rx.clone()
    }

    /// Seats of the match.
    #[must_use]
    pub fn roster(&self) -> &[InitialMatchPlayerData] {
        &self.roster
    }

    /// Players currently connected, hosted ones included.
    #[must_use]
    pub fn connected_players(&self) -> Vec<PlayerId> {
        self.connected.iter().copied().collect()
    }

    fn emit(&self, event: MatchEvent) {
        // The receiver lives in self, sending cannot fail
        let _ = self.events_tx.send(event);
    }

    fn is_hosted(&self, player: PlayerId) -> bool {
        self.hosted_bots.contains(&player) || self.hosted_humans.contains(&player)
    }

    /// Accepts the roster, creates input buffers and connects hosted
    /// players.
    ///
    /// # Errors
    ///
    /// `Config` if already initialized, or if the roster has duplicate or
    /// invalid seats.
    pub fn initialize(&mut self, roster: Vec<InitialMatchPlayerData>, now: Instant) -> NetResult<()> {
        if self.state != ServerState::AwaitingInit {
            return Err(NetError::Config("server already initialized".into()));
        }
        let mut seats = BTreeSet::new();
        for seat in &roster {
            if !seat.player.is_player() || !seats.insert(seat.player) {
                tracing::error!(player = %seat.player, user_id = %seat.user_id, "invalid or duplicate seat");
                return Err(NetError::Config(format!("invalid or duplicate seat {}", seat.player)));
            }
        }

        for seat in &roster {
            self.ingress.register(&seat.user_id, seat.player);
        }
        let hosts_bots = self.config.debug_mode.hosts_humans() || self.config.bots_in_server;
        if hosts_bots {
            self.hosted_bots = roster.iter().filter(|s| s.is_bot).map(|s| s.player).collect();
        }
        if self.config.debug_mode.hosts_humans() {
            self.hosted_humans = roster.iter().filter(|s| !s.is_bot).map(|s| s.player).collect();
        }

        tracing::info!(
            players = roster.len(),
            hosted_bots = self.hosted_bots.len(),
            hosted_humans = self.hosted_humans.len(),
            "server initialized"
        );
        let decision = self.handler.on_server_init(&roster, now);
        self.roster = roster;
        self.state = ServerState::WaitingForPlayers;
        self.emit(MatchEvent::Initialized {
            players: self.roster.len(),
        });
        self.apply(decision);

        let hosted: Vec<PlayerId> = self.hosted_bots.iter().chain(&self.hosted_humans).copied().collect();
        for player in hosted {
            self.on_player_connected(player)?;
        }
        Ok(())
    }

    /// Marks a seat as connected.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before the roster is known, `UnknownPlayer` for a
    /// seat not in it.
    pub fn on_player_connected(&mut self, player: PlayerId) -> NetResult<()> {
        if self.state == ServerState::AwaitingInit {
            return Err(NetError::NotInitialized);
        }
        if !self.roster.iter().any(|s| s.player == player) {
            tracing::warn!(%player, "connect from player outside the roster");
            return Err(NetError::UnknownPlayer(player.0));
        }
        if self.connected.insert(player) {
            self.emit(MatchEvent::PlayerConnected(player));
            let decision = self.handler.on_player_connected(player);
            self.apply(decision);
        }
        Ok(())
    }

    /// Transport callback with the authenticated user id.
    ///
    /// # Errors
    ///
    /// `UnknownUser` if the user holds no seat.
    pub fn on_user_connected(&mut self, user_id: &str) -> NetResult<()> {
        let player = self
            .ingress
            .player_of(user_id)
            .ok_or_else(|| NetError::UnknownUser(user_id.to_owned()))?;
        self.on_player_connected(player)
    }

    /// Stops gathering and sending for `player`. The match goes on.
    pub fn on_player_disconnected(&mut self, player: PlayerId) {
        if !self.connected.remove(&player) {
            return;
        }
        self.hosted_bots.retain(|p| *p != player);
        self.hosted_humans.retain(|p| *p != player);
        self.emit(MatchEvent::PlayerDisconnected(player));
        let decision = self.handler.on_player_disconnected(player);
        self.apply(decision);
    }

    /// Transport callback with the authenticated user id.
    pub fn on_user_disconnected(&mut self, user_id: &str) {
        match self.ingress.player_of(user_id) {
            Some(player) => self.on_player_disconnected(player),
            None => tracing::warn!(user_id, "disconnect from unknown user"),
        }
    }

    fn apply(&mut self, decision: HandlerDecision) {
        match decision {
            HandlerDecision::Continue => {}
            HandlerDecision::StartMatch => self.start_match(),
            HandlerDecision::EndMatch => self.end_match(EndReason::StartTimeout, None),
        }
    }

    /// Starts ticking.
    pub fn start_match(&mut self) {
        if self.state != ServerState::WaitingForPlayers {
            return;
        }
        tracing::info!(tick = self.tick, players = self.connected.len(), "match started");
        self.state = ServerState::Running;
        self.emit(MatchEvent::Started);
    }

    /// Ends the match. Results are only forwarded when there is one per
    /// seat.
    pub fn end_match(&mut self, reason: EndReason, results: Option<Vec<PlayerResult>>) {
        if self.state == ServerState::Ended {
            return;
        }
        let results = results.filter(|r| {
            let complete = r.len() == self.roster.len();
            if !complete {
                tracing::error!(expected = self.roster.len(), got = r.len(), "invalid match result length");
            }
            complete
        });
        tracing::info!(?reason, tick = self.tick, "match ended");
        self.state = ServerState::Ended;
        self.emit(MatchEvent::Ended { reason, results });
    }

    fn gather_hosted_input(&mut self) {
        let bots = self.hosted_bots.iter().map(|p| PlayerContext::bot(*p));
        let humans = self.hosted_humans.iter().map(|p| PlayerContext::client(*p));
        let contexts: Vec<PlayerContext> = bots.chain(humans).collect();
        for ctx in contexts {
            let mut input = self.registry.gather_input(&ctx);
            input.tick = self.tick;
            input.player = ctx.player;
            if let Err(err) = self.ingress.add_input(ctx.player, input) {
                tracing::error!(player = %ctx.player, %err, "hosted input rejected");
            }
        }
    }

    /// Runs one server tick if the match is running. Returns true if the
    /// simulation stepped.
    pub fn tick(&mut self, now: Instant) -> bool {
        let decision = self.handler.poll(now);
        self.apply(decision);
        if self.state != ServerState::Running {
            return false;
        }

        self.gather_hosted_input();

        for player in &self.connected {
            match self.ingress.input_for(*player, self.tick) {
                Some(input) => {
                    self.stats.inputs_applied += 1;
                    if self.registry.apply_input(&input).is_err() {
                        self.stats.protocol_errors += 1;
                    }
                }
                None => {
                    self.stats.missing_inputs += 1;
                    tracing::trace!(%player, tick = self.tick, "no input for tick");
                }
            }
        }

        self.registry.step();

        if self.tick % Tick::from(self.config.snapshot_sending_period_in_ticks) == 0 {
            self.send_snapshots();
        }

        self.tick += 1;
        self.ingress.update_min_tick(self.tick);
        self.stats.ticks += 1;
        true
    }

    fn send_snapshots(&mut self) {
        let recipients: Vec<PlayerId> = self
            .connected
            .iter()
            .copied()
            .filter(|p| !self.is_hosted(*p))
            .collect();
        if recipients.is_empty() {
            return;
        }
        for (player, mut snapshot) in self.registry.get_snapshots(&recipients) {
            snapshot.tick = self.tick;
            self.sink.send_snapshot(player, snapshot.encode());
            self.stats.snapshots_sent += 1;
        }
    }
}

impl std::fmt::Debug for GameServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameServer")
            .field("state", &self.state)
            .field("tick", &self.tick)
            .field("connected", &self.connected)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
