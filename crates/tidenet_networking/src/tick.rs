//! # Fixed-Step Driver
//!
//! Accumulator-based clock for running a simulation at `ticks_per_second`
//! on a wall clock.
//!
//! ```rust,ignore
//! let mut clock = TickLoop::from_config(&config);
//! loop {
//!     while clock.should_tick() {
//!         let start = clock.begin_tick();
//!         server.tick(start);
//!         clock.end_tick(start);
//!     }
//!     clock.wait_for_next_tick();
//! }
//! ```
//!
//! After a long stall the accumulator is capped so the loop catches up by at
//! most `max_catch_up` ticks instead of spiralling.

use crate::config::GameConfig;
use std::time::{Duration, Instant};

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest tick observed, in microseconds.
    pub min_tick_us: u64,
    /// Longest tick observed, in microseconds.
    pub max_tick_us: u64,
    /// Rolling average, in microseconds.
    pub avg_tick_us: u64,
    /// Ticks that overran their budget.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
    /// Ticks skipped by the catch-up cap.
    pub dropped_ticks: u64,
}

impl TickStats {
    fn fresh(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_us(budget),
            late_ticks: 0,
            total_ticks: 0,
            dropped_ticks: 0,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_us(duration: Duration) -> u64 {
    duration.as_micros() as u64
}

/// Fixed-timestep clock.
#[derive(Debug, Clone)]
pub struct TickLoop {
    tick_duration: Duration,
    max_catch_up: u32,
    last_poll: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

impl TickLoop {
    /// Clock ticking every `tick_duration`.
    #[must_use]
    pub fn new(tick_duration: Duration) -> Self {
        let tick_duration = tick_duration.max(Duration::from_micros(1));
        Self {
            tick_duration,
            max_catch_up: 5,
            last_poll: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Clock at the configured tick rate.
    #[must_use]
    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.tick_duration())
    }

    /// Caps how many overdue ticks are run back to back.
    #[must_use]
    pub fn with_max_catch_up(mut self, ticks: u32) -> Self {
        self.max_catch_up = ticks.max(1);
        self
    }

    /// True while a tick is due. Call in a loop until it returns false.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_poll);
        self.last_poll = now;

        let cap = self.tick_duration * self.max_catch_up;
        if self.accumulator > cap {
            let overflow = self.accumulator - cap;
            let dropped = overflow.as_nanos() / self.tick_duration.as_nanos();
            self.stats.dropped_ticks += u64::try_from(dropped).unwrap_or(u64::MAX);
            tracing::debug!(dropped = self.stats.dropped_ticks, "tick loop fell behind, dropping ticks");
            self.accumulator = cap;
        }
        self.accumulator >= self.tick_duration
    }

    /// Consumes one due tick and returns its start instant.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Records how long the tick started at `start` took.
    pub fn end_tick(&mut self, start: Instant) {
        let elapsed = start.elapsed();
        let elapsed_us = duration_us(elapsed);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(elapsed_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(elapsed_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + elapsed_us) / 16;

        if elapsed > self.tick_duration {
            self.stats.late_ticks += 1;
            tracing::trace!(elapsed_us, budget_us = duration_us(self.tick_duration), "late tick");
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let since_poll = self.last_poll.elapsed();
        let owed = self.accumulator + since_poll;
        if owed < self.tick_duration {
            std::thread::sleep(self.tick_duration - owed);
        }
    }

    /// Ticks begun so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Length of one tick.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Clears statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.tick_duration);
    }
}
