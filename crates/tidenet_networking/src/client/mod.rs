//! # Game Client
//!
//! Client-side tick loop with prediction and reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      GAME CLIENT                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │ ClientInbox  │  │ Synchronizer │  │ InputSink    │      │
//! │  │ (Network)    │──│ (RTT, ticks) │──│ (Network)    │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │         │                 │                 ▲               │
//! │         └────────────────┼─────────────────┘               │
//! │                          │                                  │
//! │              ┌───────────▼───────────┐                     │
//! │              │  Entity Registry      │                     │
//! │              │  + input history      │                     │
//! │              │  + snapshot history   │                     │
//! │              └───────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Per tick
//!
//! 1. Advance the prediction tick from the newest authoritative snapshot
//! 2. Gather, send and remember this tick's input
//! 3. With prediction: reconcile if the history at the snapshot's tick
//!    diverged, apply the unpredictable half of the snapshot, apply the
//!    buffered input. Without: apply the whole snapshot.
//! 4. Step, then remember the predicted snapshot

mod inbox;

pub use inbox::{ClientInbox, Drained};

use crate::config::{GameConfig, ReconciliationFrequency};
use crate::synchronizer::{SyncSample, TickSynchronizer};
use crate::transport::InputSink;
use tidenet_core::{
    EntityRegistry, Input, InputPackager, PlayerContext, Predictability, Snapshot, SyncResult,
    TickBuffer,
};
use tidenet_shared::{PlayerId, Tick};

/// Client lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientState {
    /// Not yet joined a match.
    #[default]
    Uninitialized,
    /// Joined, waiting for a snapshot and a time sync sample.
    WaitingForFirstSnapshot,
    /// Ticking.
    Running,
    /// Connection gone. Terminal.
    Disconnected,
}

/// Client counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClientStats {
    /// Ticks stepped.
    pub ticks: u64,
    /// Ticks skipped because prediction hit its limit.
    pub stalled_ticks: u64,
    /// Reconciliations performed.
    pub reconciliations: u64,
    /// Ticks re-simulated during reconciliations.
    pub resimulated_ticks: u64,
    /// Snapshot or input entries that failed to apply.
    pub protocol_errors: u64,
}

impl ClientStats {
    fn count(&mut self, result: SyncResult<()>) {
        if result.is_err() {
            self.protocol_errors += 1;
        }
    }
}

/// Client half of a match.
pub struct GameClient {
    player: PlayerId,
    config: GameConfig,
    state: ClientState,
    registry: EntityRegistry,
    synchronizer: TickSynchronizer,
    inbox: ClientInbox,
    last_snapshot: Option<Snapshot>,
    input_history: TickBuffer<Input>,
    snapshot_history: TickBuffer<Snapshot>,
    packager: InputPackager,
    sink: Box<dyn InputSink>,
    stats: ClientStats,
}

impl GameClient {
    /// Client for `player`. Register entities through [`Self::registry_mut`]
    /// before calling [`Self::initialize`].
    #[must_use]
    pub fn new(config: GameConfig, player: PlayerId, sink: Box<dyn InputSink>) -> Self {
        let history = config.client_history_size();
        Self {
            player,
            registry: EntityRegistry::new(player),
            synchronizer: TickSynchronizer::new(&config),
            inbox: ClientInbox::new(),
            last_snapshot: None,
            input_history: TickBuffer::new(history),
            snapshot_history: TickBuffer::new(history),
            packager: InputPackager::new(config.inputs_to_send_buffer_size()),
            sink,
            stats: ClientStats::default(),
            state: ClientState::Uninitialized,
            config,
        }
    }

    /// Our player id.
    #[inline]
    #[must_use]
    pub const fn player(&self) -> PlayerId {
        self.player
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ClientState {
        self.state
    }

    /// Counters so far.
    #[must_use]
    pub const fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Settings in use.
    #[must_use]
    pub const fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Local entities.
    #[must_use]
    pub const fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Local entities, mutable.
    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    /// Handle for the transport to deliver snapshots and sync samples.
    #[must_use]
    pub fn inbox(&self) -> ClientInbox {
        self.inbox.clone()
    }

    /// Tick synchronizer.
    #[must_use]
    pub const fn synchronizer(&self) -> &TickSynchronizer {
        &self.synchronizer
    }

    /// Tick currently being predicted.
    #[must_use]
    pub const fn prediction_tick(&self) -> Option<Tick> {
        self.synchronizer.current_target_tick()
    }

    /// Tick of the newest authoritative snapshot seen.
    #[must_use]
    pub fn last_received_tick(&self) -> Option<Tick> {
        self.last_snapshot.as_ref().map(|s| s.tick)
    }

    /// Predicted snapshot stored for `tick`.
    #[must_use]
    pub fn predicted_snapshot(&self, tick: Tick) -> Option<&Snapshot> {
        self.snapshot_history.try_get(tick)
    }

    /// Input stored for `tick`.
    #[must_use]
    pub fn sent_input(&self, tick: Tick) -> Option<&Input> {
        self.input_history.try_get(tick)
    }

    /// Marks the match as joined; ticking starts with the first snapshot.
    pub fn initialize(&mut self) {
        if self.state == ClientState::Uninitialized {
            tracing::info!(player = %self.player, entities = self.registry.len(), "client initialized");
            self.state = ClientState::WaitingForFirstSnapshot;
        }
    }

    /// Feeds a time sync sample directly.
    pub fn on_sync_sample(&mut self, sample: SyncSample) {
        self.synchronizer.on_sync_sample(sample);
    }

    /// Leaves the match. Terminal.
    pub fn disconnect(&mut self) {
        if self.state != ClientState::Disconnected {
            tracing::info!(player = %self.player, "client disconnected");
            self.state = ClientState::Disconnected;
        }
    }

    fn drain_inbox(&mut self) {
        let drained = self.inbox.drain();
        for sample in drained.samples {
            self.synchronizer.on_sync_sample(sample);
        }
        if let Some(snapshot) = drained.snapshot {
            let newer = self
                .last_snapshot
                .as_ref()
                .map_or(true, |current| current.tick < snapshot.tick);
            if newer {
                self.last_snapshot = Some(snapshot);
            }
        }
        if drained.disconnected {
            self.disconnect();
        }
    }

    /// Runs one client tick. Returns true if the simulation stepped.
    pub fn tick(&mut self) -> bool {
        self.drain_inbox();
        match self.state {
            ClientState::Running => {}
            ClientState::WaitingForFirstSnapshot => {
                if self.last_snapshot.is_none() || !self.synchronizer.is_synchronized() {
                    return false;
                }
                tracing::info!(player = %self.player, tick = self.last_received_tick(), "first snapshot, client running");
                self.state = ClientState::Running;
            }
            ClientState::Uninitialized | ClientState::Disconnected => return false,
        }

        let Some(received) = self.last_snapshot.take() else {
            return false;
        };
        let stepped = self.step_with(&received);
        self.last_snapshot = Some(received);
        stepped
    }

    fn step_with(&mut self, received: &Snapshot) -> bool {
        let Some(targets) = self.synchronizer.calculate_next_tick(received.tick) else {
            self.stats.stalled_ticks += 1;
            return false;
        };
        self.input_history.update_min_tick(received.tick);
        self.snapshot_history.update_min_tick(received.tick);

        self.send_input(targets.delayed_input_tick);

        if self.config.prediction {
            self.reconcile_if_required(received, targets.prediction_tick);
            let result = self.registry.apply_snapshot(received, Predictability::Unpredictable);
            self.stats.count(result);
            if let Some(input) = self.input_history.try_get(targets.prediction_tick) {
                let result = self.registry.apply_input(input);
                self.stats.count(result);
            }
        } else {
            let result = self.registry.apply_snapshot(received, Predictability::Both);
            self.stats.count(result);
        }

        self.registry.step();
        self.stats.ticks += 1;

        if self.config.prediction {
            let mut predicted = self.registry.get_snapshot(None);
            predicted.tick = targets.prediction_tick;
            self.snapshot_history.add_or_replace(predicted.tick, predicted);
        }
        true
    }

    fn send_input(&mut self, tick: Tick) {
        if !self.player.is_player() {
            return;
        }
        let mut input = self.registry.gather_input(&PlayerContext::client(self.player));
        input.tick = tick;
        input.player = self.player;
        let package = self.packager.push(&input);
        self.sink.send_input_unreliable(package);
        if !self.input_history.try_add(tick, input) {
            tracing::debug!(player = %self.player, tick, "input already buffered for tick");
        }
    }

    fn reconcile_if_required(&mut self, received: &Snapshot, prediction_tick: Tick) {
        let frequency = self.config.reconciliation_frequency;
        if frequency == ReconciliationFrequency::Never {
            return;
        }
        let Some(history) = self.snapshot_history.try_get(received.tick) else {
            return;
        };
        if frequency != ReconciliationFrequency::OnEverySnapshot
            && self.registry.snapshots_equal_on_predictable(history, received)
        {
            return;
        }
        let history = history.clone();

        tracing::warn!(
            player = %self.player,
            tick = received.tick,
            prediction_tick,
            "reconciliation"
        );
        self.stats.reconciliations += 1;
        self.registry.on_pre_reconcile();

        let result = self.registry.apply_snapshot(received, Predictability::Predictable);
        self.stats.count(result);
        let result = self.registry.apply_snapshot(&history, Predictability::Unpredictable);
        self.stats.count(result);
        let mut corrected = self.registry.get_snapshot(None);
        corrected.tick = received.tick;
        self.snapshot_history.add_or_replace(received.tick, corrected);

        for tick in (received.tick + 1)..prediction_tick {
            if let Some(history) = self.snapshot_history.try_get(tick) {
                let result = self.registry.apply_snapshot(history, Predictability::Unpredictable);
                self.stats.count(result);
            }
            if let Some(input) = self.input_history.try_get(tick) {
                let result = self.registry.apply_input(input);
                self.stats.count(result);
            }
            self.registry.step();
            self.stats.resimulated_ticks += 1;

            let mut resimulated = self.registry.get_snapshot(None);
            resimulated.tick = tick;
            self.snapshot_history.add_or_replace(tick, resimulated);
        }

        self.registry.on_post_reconcile();
    }
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("player", &self.player)
            .field("state", &self.state)
            .field("prediction_tick", &self.prediction_tick())
            .field("last_received_tick", &self.last_received_tick())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelSink;
    use std::time::Duration;
    use tidenet_core::{
        decode_input_package, EntityOptions, NetworkedEntity, StateReader, StateWriter, SyncInt,
        SyncVar,
    };

    struct Walker {
        x: SyncInt,
    }

    impl NetworkedEntity for Walker {
        fn fields(&self) -> Vec<&dyn SyncVar> {
            vec![&self.x]
        }
        fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
            vec![&mut self.x]
        }
        fn has_input(&self) -> bool {
            true
        }
        fn gather_input(&mut self, _ctx: &PlayerContext, writer: &mut StateWriter) {
            writer.write_i32(1);
        }
        fn apply_input(&mut self, _player: PlayerId, reader: &mut StateReader<'_>) -> SyncResult<()> {
            let step = reader.read_i32()?;
            self.x.set(self.x.get() + step);
            Ok(())
        }
    }

    fn client(config: GameConfig) -> (GameClient, crossbeam_channel::Receiver<Vec<u8>>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut client = GameClient::new(config, PlayerId(0), Box::new(ChannelSink::new(tx)));
        client
            .registry_mut()
            .add(1, EntityOptions::default(), Box::new(Walker { x: SyncInt::new(0) }))
            .unwrap();
        client.initialize();
        (client, rx)
    }

    #[test]
    fn test_waits_for_snapshot_and_sample() {
        let (mut client, rx) = client(GameConfig::default());
        assert_eq!(client.state(), ClientState::WaitingForFirstSnapshot);
        assert!(!client.tick());

        client.inbox().push_snapshot(Snapshot::new(0));
        assert!(!client.tick());
        assert_eq!(client.state(), ClientState::WaitingForFirstSnapshot);

        client.inbox().on_sync_sample(SyncSample::from_round_trip(Duration::ZERO));
        assert!(client.tick());
        assert_eq!(client.state(), ClientState::Running);
        assert_eq!(client.prediction_tick(), Some(2));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_inputs_are_tagged_and_packaged() {
        let (mut client, rx) = client(GameConfig::default());
        client.on_sync_sample(SyncSample::from_round_trip(Duration::ZERO));
        client.inbox().push_snapshot(Snapshot::new(0));
        for _ in 0..3 {
            assert!(client.tick());
        }
        let last = rx.try_iter().last().unwrap();
        let inputs = decode_input_package(&last).unwrap();
        let ticks: Vec<Tick> = inputs.iter().map(|i| i.tick).collect();
        assert_eq!(ticks, vec![2, 3, 4]);
        assert!(inputs.iter().all(|i| i.player == PlayerId(0)));
        assert!(client.sent_input(4).is_some());
    }

    #[test]
    fn test_disconnect_is_terminal() {
        let (mut client, _rx) = client(GameConfig::default());
        client.inbox().on_disconnected();
        assert!(!client.tick());
        assert_eq!(client.state(), ClientState::Disconnected);
        client.initialize();
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[test]
    fn test_without_prediction_mirrors_server() {
        let config = GameConfig {
            prediction: false,
            ..GameConfig::default()
        };
        let (mut client, _rx) = client(config);
        client.on_sync_sample(SyncSample::from_round_trip(Duration::ZERO));
        client.inbox().push_snapshot(Snapshot {
            tick: 7,
            entries: vec![(1, 42i32.to_le_bytes().to_vec())],
        });
        assert!(client.tick());
        let state = client.registry.get_snapshot(None);
        assert_eq!(state.get(1), Some(&42i32.to_le_bytes()[..]));
        assert!(client.predicted_snapshot(9).is_none());
    }
}
