//! # Network Simulation
//!
//! Emulates bad networks for local testing. Never used on a production
//! delivery path.
//!
//! ## Model
//!
//! Every payload is decided independently:
//!
//! ```text
//!   drop?   Bernoulli(packet_loss)
//!   lag     Gaussian(mean = delay + jitter, sd = jitter)
//!           clamped to [delay, delay + 3 * jitter]
//! ```
//!
//! Time sync samples are derived from the same stream: a round trip of two
//! lags, produced every `max(lag, 200ms)`.
//!
//! ## Pieces
//!
//! - [`NetworkEmulator`]: the seeded decision stream
//! - [`LaggedLink`]: deterministic in-flight queue driven by an explicit clock
//! - [`forward_with_lag`] / [`run_time_sync`]: tokio tasks for real-time use

use crate::client::ClientInbox;
use crate::config::LagConfig;
use crate::synchronizer::SyncSample;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidenet_shared::constants::{MAX_JITTER_MULTIPLIER, MIN_SYNC_INTERVAL_MS};
use tokio::sync::{mpsc, watch};

/// Fate of one payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LagSample {
    /// Lost.
    Dropped,
    /// Delivered after the given delay.
    Deliver(Duration),
}

/// Seeded packet loss and lag generator.
#[derive(Debug, Clone)]
pub struct NetworkEmulator {
    config: LagConfig,
    rng: ChaCha8Rng,
}

/// Emulator shared between tasks.
pub type SharedEmulator = Arc<Mutex<NetworkEmulator>>;

impl NetworkEmulator {
    /// Emulator seeded from `config.random_seed`.
    #[must_use]
    pub fn new(config: LagConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.random_seed),
            config,
        }
    }

    /// Wraps self for sharing between tasks.
    #[must_use]
    pub fn shared(self) -> SharedEmulator {
        Arc::new(Mutex::new(self))
    }

    /// Conditions in use.
    #[must_use]
    pub const fn config(&self) -> &LagConfig {
        &self.config
    }

    fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = 1.0 - self.rng.gen::<f64>();
        let u2 = 1.0 - self.rng.gen::<f64>();
        let standard = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).sin();
        mean + std_dev * standard
    }

    /// Draws the lag of one payload, ignoring loss.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_lag(&mut self) -> Duration {
        let delay = f64::from(self.config.delay_ms);
        let jitter = f64::from(self.config.jitter_ms);
        let max = delay + f64::from(MAX_JITTER_MULTIPLIER) * jitter;
        let lag_ms = self.gaussian(delay + jitter, jitter).clamp(delay, max);
        Duration::from_millis(lag_ms as u64)
    }

    /// Decides one payload's fate.
    pub fn sample(&mut self) -> LagSample {
        let lost = self.config.packet_loss > 0.0 && self.rng.gen::<f64>() < self.config.packet_loss;
        let lag = self.next_lag();
        if lost {
            LagSample::Dropped
        } else {
            LagSample::Deliver(lag)
        }
    }

    /// One emulated time sync measurement and the pause before the next.
    /// The sample is `None` when the ping was lost.
    pub fn sync_sample(&mut self) -> (Option<SyncSample>, Duration) {
        let fate = self.sample();
        let lag = match fate {
            LagSample::Dropped => self.next_lag(),
            LagSample::Deliver(lag) => lag,
        };
        let interval = lag.max(Duration::from_millis(MIN_SYNC_INTERVAL_MS));
        let sample = match fate {
            LagSample::Dropped => None,
            LagSample::Deliver(_) => Some(SyncSample::from_round_trip(lag * 2)),
        };
        (sample, interval)
    }
}

/// Payloads in flight on an emulated one-way link, released by an explicit
/// clock. Deterministic for a given seed and clock.
#[derive(Debug)]
pub struct LaggedLink<T> {
    emulator: NetworkEmulator,
    in_flight: VecDeque<(Instant, T)>,
    sent: u64,
    dropped: u64,
}

impl<T> LaggedLink<T> {
    /// Link with its own emulator.
    #[must_use]
    pub fn new(config: LagConfig) -> Self {
        Self {
            emulator: NetworkEmulator::new(config),
            in_flight: VecDeque::new(),
            sent: 0,
            dropped: 0,
        }
    }

    /// Puts `payload` on the wire at `now`. Returns false if it was lost.
    pub fn send(&mut self, now: Instant, payload: T) -> bool {
        self.sent += 1;
        match self.emulator.sample() {
            LagSample::Dropped => {
                self.dropped += 1;
                false
            }
            LagSample::Deliver(lag) => {
                let due = now + lag;
                // Keep ordered by due time; equal times stay FIFO
                let index = self.in_flight.partition_point(|(at, _)| *at <= due);
                self.in_flight.insert(index, (due, payload));
                true
            }
        }
    }

    /// Takes every payload due at `now`, earliest first.
    pub fn poll(&mut self, now: Instant) -> Vec<T> {
        let ready = self.in_flight.partition_point(|(at, _)| *at <= now);
        self.in_flight.drain(..ready).map(|(_, payload)| payload).collect()
    }

    /// Payloads still travelling.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Payloads sent so far, lost ones included.
    #[must_use]
    pub const fn sent(&self) -> u64 {
        self.sent
    }

    /// Payloads lost so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Delivers `payload` into `tx` after an emulated lag, or never if lost.
pub async fn forward_with_lag<T>(emulator: &SharedEmulator, payload: T, tx: &mpsc::UnboundedSender<T>) {
    let fate = emulator.lock().sample();
    match fate {
        LagSample::Dropped => tracing::trace!("emulated packet loss"),
        LagSample::Deliver(lag) => {
            if !lag.is_zero() {
                tokio::time::sleep(lag).await;
            }
            if tx.send(payload).is_err() {
                tracing::trace!("lagged payload receiver closed");
            }
        }
    }
}

/// Feeds emulated time sync samples into `inbox` until `shutdown` flips to
/// true or its sender is dropped.
pub async fn run_time_sync(emulator: SharedEmulator, inbox: ClientInbox, mut shutdown: watch::Receiver<bool>) {
    loop {
        let (sample, interval) = emulator.lock().sync_sample();
        if let Some(sample) = sample {
            inbox.on_sync_sample(sample);
        }
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!("time sync stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lag(delay_ms: u32, jitter_ms: u32, packet_loss: f64) -> LagConfig {
        LagConfig {
            delay_ms,
            jitter_ms,
            packet_loss,
            random_seed: 42,
        }
    }

    #[test]
    fn test_lag_stays_in_window() {
        let mut emulator = NetworkEmulator::new(lag(50, 10, 0.0));
        for _ in 0..2_000 {
            let ms = emulator.next_lag().as_millis();
            assert!((50..=80).contains(&ms), "lag {ms} outside window");
        }
    }

    #[test]
    fn test_zero_config_is_transparent() {
        let mut emulator = NetworkEmulator::new(LagConfig::LAN);
        for _ in 0..100 {
            assert_eq!(emulator.sample(), LagSample::Deliver(Duration::ZERO));
        }
    }

    #[test]
    fn test_loss_rate_roughly_matches() {
        let mut emulator = NetworkEmulator::new(lag(0, 0, 0.25));
        let dropped = (0..10_000)
            .filter(|_| emulator.sample() == LagSample::Dropped)
            .count();
        assert!((2_000..3_000).contains(&dropped), "dropped {dropped}");
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = NetworkEmulator::new(lag(30, 15, 0.1));
        let mut b = NetworkEmulator::new(lag(30, 15, 0.1));
        for _ in 0..100 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_sync_interval_floor() {
        let mut emulator = NetworkEmulator::new(lag(20, 0, 0.0));
        let (sample, interval) = emulator.sync_sample();
        assert_eq!(sample.unwrap().round_trip, Duration::from_millis(40));
        assert_eq!(interval, Duration::from_millis(200));
    }

    #[test]
    fn test_link_releases_in_due_order() {
        let mut link = LaggedLink::new(lag(10, 20, 0.0));
        let start = Instant::now();
        for i in 0..50 {
            assert!(link.send(start, i));
        }
        assert!(link.poll(start + Duration::from_millis(9)).is_empty());
        let all = link.poll(start + Duration::from_millis(100));
        assert_eq!(all.len(), 50);
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn test_link_counts_losses() {
        let mut link = LaggedLink::new(lag(0, 0, 1.0));
        let now = Instant::now();
        assert!(!link.send(now, ()));
        assert_eq!((link.sent(), link.dropped()), (1, 1));
        assert!(link.poll(now).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_forward_with_lag_waits() {
        let emulator = NetworkEmulator::new(lag(100, 0, 0.0)).shared();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = tokio::time::Instant::now();
        forward_with_lag(&emulator, 7u8, &tx).await;
        assert_eq!(rx.recv().await, Some(7));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_sync_until_shutdown() {
        let emulator = NetworkEmulator::new(lag(10, 0, 0.0)).shared();
        let inbox = ClientInbox::new();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_time_sync(emulator, inbox.clone(), stop_rx));

        tokio::time::sleep(Duration::from_millis(450)).await;
        stop_tx.send(true).unwrap();
        task.await.unwrap();

        // Samples at 0, 200 and 400 ms
        assert_eq!(inbox.drain().samples.len(), 3);
    }
}
