//! # Local Match
//!
//! One server and every human client in a single process, connected by
//! emulated links. Time is passed in explicitly so a whole match can run
//! faster than real time in tests.
//!
//! Per step: deliver due payloads, feed time sync samples, tick the
//! server, route its snapshots, then tick each client and route its input.

use crate::client::GameClient;
use crate::config::{DebugMode, GameConfig, LagConfig};
use crate::error::{NetError, NetResult};
use crate::server::{roster, DefaultServerHandler, GameServer, InitialMatchPlayerData};
use crate::simulation::{LaggedLink, NetworkEmulator};
use crate::transport::ChannelSink;
use crossbeam_channel::{unbounded, Receiver};
use std::time::{Duration, Instant};
use tidenet_core::{EntityRegistry, SyncResult};
use tidenet_shared::PlayerId;

/// One remote human and its links.
struct LocalClient {
    client: GameClient,
    user_id: String,
    outbox: Receiver<Vec<u8>>,
    uplink: LaggedLink<Vec<u8>>,
    downlink: LaggedLink<Vec<u8>>,
    clock: NetworkEmulator,
    next_sync: Option<Instant>,
    connected: bool,
}

/// In-process match runner.
pub struct LocalMatch {
    server: GameServer,
    outbox: Receiver<(PlayerId, Vec<u8>)>,
    seats: Vec<InitialMatchPlayerData>,
    clients: Vec<LocalClient>,
    steps: u64,
}

fn link_config(lag: LagConfig, salt: u64) -> LagConfig {
    LagConfig {
        random_seed: lag.random_seed.wrapping_add(salt),
        ..lag
    }
}

impl LocalMatch {
    /// Seats `user_ids` in order, the last `bots` of them as server-hosted
    /// bots, and populates every registry with `populate`.
    ///
    /// Humans always connect through emulated links, whatever the
    /// configured debug mode.
    ///
    /// # Errors
    ///
    /// Invalid config, or whatever `populate` returns.
    pub fn new<F>(mut config: GameConfig, user_ids: &[String], bots: usize, mut populate: F) -> NetResult<Self>
    where
        F: FnMut(&mut EntityRegistry) -> SyncResult<()>,
    {
        config.validate()?;
        let seats = roster(user_ids, bots);
        if seats.iter().any(|s| s.is_bot) && !config.bots_in_server {
            return Err(NetError::Config("local match needs bots_in_server for bot seats".into()));
        }
        if config.debug_mode.hosts_humans() {
            tracing::debug!("local match runs humans remotely");
            config.debug_mode = DebugMode::HalfRemote;
        }

        let (server_tx, outbox) = unbounded();
        let handler = DefaultServerHandler::new(config.start_game_timeout());
        let mut server = GameServer::new(config.clone(), Box::new(handler), Box::new(ChannelSink::new(server_tx)));
        populate(server.registry_mut())?;

        let mut clients = Vec::new();
        for (index, seat) in seats.iter().filter(|s| !s.is_bot).enumerate() {
            let (client_tx, client_outbox) = unbounded();
            let mut client = GameClient::new(config.clone(), seat.player, Box::new(ChannelSink::new(client_tx)));
            populate(client.registry_mut())?;
            let salt = 3 * index as u64;
            clients.push(LocalClient {
                client,
                user_id: seat.user_id.clone(),
                outbox: client_outbox,
                uplink: LaggedLink::new(link_config(config.lag, salt)),
                downlink: LaggedLink::new(link_config(config.lag, salt + 1)),
                clock: NetworkEmulator::new(link_config(config.lag, salt + 2)),
                next_sync: None,
                connected: false,
            });
        }

        Ok(Self {
            server,
            outbox,
            seats,
            clients,
            steps: 0,
        })
    }

    /// Initializes the server and connects every client.
    ///
    /// # Errors
    ///
    /// `Config` if the match was already started.
    pub fn start(&mut self, now: Instant) -> NetResult<()> {
        let seats = std::mem::take(&mut self.seats);
        self.server.initialize(seats, now)?;
        for local in &mut self.clients {
            self.server.on_user_connected(&local.user_id)?;
            local.client.initialize();
            local.connected = true;
        }
        Ok(())
    }

    /// Runs one step at `now`. Returns true if the server stepped.
    pub fn step(&mut self, now: Instant) -> bool {
        for local in &mut self.clients {
            if !local.connected {
                continue;
            }
            for package in local.uplink.poll(now) {
                if let Err(err) = self.server.ingress().on_unreliable_input(&local.user_id, &package) {
                    tracing::warn!(user_id = %local.user_id, %err, "input package rejected");
                }
            }
            for payload in local.downlink.poll(now) {
                if let Err(err) = local.client.inbox().on_snapshot(&payload) {
                    tracing::warn!(player = %local.client.player(), %err, "snapshot rejected");
                }
            }
            if local.next_sync.map_or(true, |at| at <= now) {
                let (sample, interval) = local.clock.sync_sample();
                if let Some(sample) = sample {
                    local.client.inbox().on_sync_sample(sample);
                }
                local.next_sync = Some(now + interval);
            }
        }

        let stepped = self.server.tick(now);
        for (player, payload) in self.outbox.try_iter() {
            match self.clients.iter_mut().find(|c| c.client.player() == player) {
                Some(local) if local.connected => {
                    local.downlink.send(now, payload);
                }
                _ => tracing::trace!(%player, "snapshot for absent client"),
            }
        }

        for local in &mut self.clients {
            local.client.tick();
            for package in local.outbox.try_iter() {
                if local.connected {
                    local.uplink.send(now, package);
                }
            }
        }
        self.steps += 1;
        stepped
    }

    /// Steps `count` times from `start`, one tick duration apart. Returns
    /// the instant after the last step.
    pub fn run(&mut self, start: Instant, count: u64) -> Instant {
        let tick = self.server.config().tick_duration();
        let mut now = start;
        for _ in 0..count {
            self.step(now);
            now += tick;
        }
        now
    }

    /// Drops `player`'s connection on both ends.
    pub fn disconnect(&mut self, player: PlayerId) {
        self.server.on_player_disconnected(player);
        if let Some(local) = self.clients.iter_mut().find(|c| c.client.player() == player) {
            local.connected = false;
            local.client.inbox().on_disconnected();
        }
    }

    /// The server.
    #[must_use]
    pub const fn server(&self) -> &GameServer {
        &self.server
    }

    /// The server, mutably.
    pub fn server_mut(&mut self) -> &mut GameServer {
        &mut self.server
    }

    /// Client of `player`, if it is a remote human.
    #[must_use]
    pub fn client(&self, player: PlayerId) -> Option<&GameClient> {
        self.clients
            .iter()
            .map(|c| &c.client)
            .find(|c| c.player() == player)
    }

    /// Client of `player`, mutably.
    pub fn client_mut(&mut self, player: PlayerId) -> Option<&mut GameClient> {
        self.clients
            .iter_mut()
            .map(|c| &mut c.client)
            .find(|c| c.player() == player)
    }

    /// Every remote client in seat order.
    pub fn clients(&self) -> impl Iterator<Item = &GameClient> {
        self.clients.iter().map(|c| &c.client)
    }

    /// Steps run so far.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Payloads lost on every link so far.
    #[must_use]
    pub fn dropped_payloads(&self) -> u64 {
        self.clients
            .iter()
            .map(|c| c.uplink.dropped() + c.downlink.dropped())
            .sum()
    }

    /// Time between steps.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        self.server.config().tick_duration()
    }
}

impl std::fmt::Debug for LocalMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMatch")
            .field("server", &self.server)
            .field("clients", &self.clients.len())
            .field("steps", &self.steps)
            .finish()
    }
}
