//! # Tick Synchronizer
//!
//! Turns round-trip samples and the latest authoritative tick into the tick
//! the client should be simulating.
//!
//! ```text
//!   last snapshot      prediction tick          limit
//!        │                   │                    │
//!   ─────┼────── lag + rtt ──┼───────── ... ──────┼────►
//!        T                T + L + R         T + L + P + N
//! ```
//!
//! `L` is the configured input lag, `R` the smoothed RTT in whole ticks, `P`
//! the snapshot period and `N` the prediction limit. Inputs are tagged with
//! the prediction tick so the server applies them at the same tick the
//! client predicted them. The prediction tick never moves backwards and
//! stalls once it reaches the limit.

use crate::config::GameConfig;
use std::time::Duration;
use tidenet_shared::Tick;

/// Weight of a new sample in the smoothed RTT.
const RTT_SMOOTHING: f64 = 0.125;

/// One time-sync measurement from the transport.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SyncSample {
    /// Measured round trip.
    pub round_trip: Duration,
    /// Server clock minus local clock, in milliseconds.
    pub clock_offset_ms: f64,
}

impl SyncSample {
    /// Sample with the given round trip and no clock offset.
    #[must_use]
    pub const fn from_round_trip(round_trip: Duration) -> Self {
        Self {
            round_trip,
            clock_offset_ms: 0.0,
        }
    }
}

/// Ticks computed for one client step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickTargets {
    /// Tick the client simulates this step.
    pub prediction_tick: Tick,
    /// Tick this step's input is tagged with.
    pub delayed_input_tick: Tick,
}

/// Smoothed RTT and target tick tracking.
#[derive(Clone, Debug)]
pub struct TickSynchronizer {
    tick_duration: Duration,
    input_lag: Tick,
    prediction_limit: Tick,
    smoothed_rtt: Option<Duration>,
    clock_offset_ms: f64,
    last_received_tick: Option<Tick>,
    prediction_tick: Option<Tick>,
}

impl TickSynchronizer {
    /// Synchronizer for `config`'s tick rate and lag budget.
    #[must_use]
    pub fn new(config: &GameConfig) -> Self {
        Self {
            tick_duration: config.tick_duration(),
            input_lag: Tick::from(config.input_lag_ticks),
            prediction_limit: Tick::from(config.total_prediction_limit_in_ticks()),
            smoothed_rtt: None,
            clock_offset_ms: 0.0,
            last_received_tick: None,
            prediction_tick: None,
        }
    }

    /// Feeds one sample. The first sample is taken as is.
    pub fn on_sync_sample(&mut self, sample: SyncSample) {
        let smoothed = match self.smoothed_rtt {
            None => sample.round_trip,
            Some(previous) => Duration::from_secs_f64(
                previous.as_secs_f64() * (1.0 - RTT_SMOOTHING)
                    + sample.round_trip.as_secs_f64() * RTT_SMOOTHING,
            ),
        };
        if self.smoothed_rtt.is_none() {
            tracing::debug!(rtt_ms = smoothed.as_millis() as u64, "first time sync sample");
        }
        self.smoothed_rtt = Some(smoothed);
        self.clock_offset_ms = sample.clock_offset_ms;
    }

    /// True once a sample arrived.
    #[must_use]
    pub const fn is_synchronized(&self) -> bool {
        self.smoothed_rtt.is_some()
    }

    /// Smoothed round trip.
    #[must_use]
    pub const fn smoothed_rtt(&self) -> Option<Duration> {
        self.smoothed_rtt
    }

    /// Latest clock offset in milliseconds.
    #[must_use]
    pub const fn clock_offset_ms(&self) -> f64 {
        self.clock_offset_ms
    }

    /// Smoothed RTT rounded up to whole ticks.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn rtt_ticks(&self) -> Tick {
        let Some(rtt) = self.smoothed_rtt else {
            return 0;
        };
        (rtt.as_secs_f64() / self.tick_duration.as_secs_f64()).ceil() as Tick
    }

    /// Latest authoritative tick passed to [`Self::calculate_next_tick`].
    #[must_use]
    pub const fn last_received_tick(&self) -> Option<Tick> {
        self.last_received_tick
    }

    /// Tick the client is currently simulating.
    #[must_use]
    pub const fn current_target_tick(&self) -> Option<Tick> {
        self.prediction_tick
    }

    /// Advances the prediction tick given the newest authoritative tick.
    ///
    /// Returns `None` when the client must not step: no sample yet, or the
    /// prediction already sits at the limit.
    pub fn calculate_next_tick(&mut self, last_received: Tick) -> Option<TickTargets> {
        if !self.is_synchronized() {
            return None;
        }
        self.last_received_tick = Some(last_received);

        let target = last_received + self.input_lag + self.rtt_ticks();
        let limit = last_received + self.prediction_limit;
        let next = self
            .prediction_tick
            .map_or(target, |previous| (previous + 1).max(target))
            .min(limit);

        if self.prediction_tick.is_some_and(|previous| next <= previous) {
            tracing::trace!(last_received, limit, "prediction limit reached, stalling");
            return None;
        }
        self.prediction_tick = Some(next);
        Some(TickTargets {
            prediction_tick: next,
            delayed_input_tick: next,
        })
    }

    /// Forgets every sample and tick, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.smoothed_rtt = None;
        self.clock_offset_ms = 0.0;
        self.last_received_tick = None;
        self.prediction_tick = None;
    }
}
