//! # Game Configuration
//!
//! Loaded once at startup from TOML. Every field has a default so a config
//! file only lists what it changes:
//!
//! ```toml
//! ticks_per_second = 60
//! input_lag_ticks = 3
//! reconciliation_frequency = "OnEverySnapshot"
//!
//! [lag]
//! delay_ms = 80
//! jitter_ms = 20
//! ```

use crate::error::{NetError, NetResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tidenet_shared::constants::{DEFAULT_START_GAME_TIMEOUT_SECS, DEFAULT_TICK_RATE, MIN_RESENT_INPUT_TICKS};
use tidenet_shared::MAX_PLAYERS;

/// When a client resimulates predicted entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationFrequency {
    /// Only when the prediction diverged from the server.
    #[default]
    OnlyIfNeeded,
    /// Never correct predicted entities.
    Never,
    /// Resimulate on every snapshot, diverged or not.
    OnEverySnapshot,
}

/// Which actors the server hosts locally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugMode {
    /// Humans and bots are simulated inside the server process.
    #[default]
    LocalPlayerAndBots,
    /// Humans connect over the network; bots run in the server.
    HalfRemote,
    /// One real online player against a real server; bots run in the server.
    DebugOnlinePlayer,
}

impl DebugMode {
    /// True if the server gathers human input itself.
    #[must_use]
    pub const fn hosts_humans(self) -> bool {
        matches!(self, Self::LocalPlayerAndBots)
    }
}

/// Artificial network conditions for local testing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LagConfig {
    /// Minimum one-way delay.
    pub delay_ms: u32,
    /// Gaussian spread on top of the delay.
    pub jitter_ms: u32,
    /// Probability in `[0, 1]` that a packet is dropped.
    pub packet_loss: f64,
    /// Seed for the emulator's random stream.
    pub random_seed: u64,
}

impl LagConfig {
    /// No lag, no loss.
    pub const LAN: Self = Self {
        delay_ms: 0,
        jitter_ms: 0,
        packet_loss: 0.0,
        random_seed: 0,
    };

    /// Typical broadband.
    pub const BROADBAND: Self = Self {
        delay_ms: 25,
        jitter_ms: 5,
        packet_loss: 0.01,
        random_seed: 0,
    };

    /// Congested mobile link.
    pub const MOBILE: Self = Self {
        delay_ms: 90,
        jitter_ms: 30,
        packet_loss: 0.05,
        random_seed: 0,
    };

    /// True if the emulator would never delay or drop anything.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.delay_ms == 0 && self.jitter_ms == 0 && self.packet_loss <= 0.0
    }
}

/// Timeouts of the match connect flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// How long one connect stage may take.
    pub connect_timeout_ms: u64,
    /// Pause between connect attempts.
    pub retry_backoff_ms: u64,
    /// Attempts before giving up.
    pub max_connect_attempts: u32,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            retry_backoff_ms: 1000,
            max_connect_attempts: 3,
        }
    }
}

impl ConnectConfig {
    /// Stage timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Backoff as a duration.
    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Per-match simulation and netcode settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Simulation rate.
    pub ticks_per_second: u32,
    /// Server sends a snapshot every this many ticks.
    pub snapshot_sending_period_in_ticks: u32,
    /// Ticks between producing an input and the server applying it.
    pub input_lag_ticks: u32,
    /// Oldest input the server still buffers, in ticks.
    pub max_allowed_lag_in_ticks: u32,
    /// Whether clients predict.
    pub prediction: bool,
    /// How far past the last snapshot a client may predict.
    pub prediction_limit_in_ticks: u32,
    /// Players in the match.
    pub players: u32,
    /// Whether the server hosts the bots.
    pub bots_in_server: bool,
    /// Client reconciliation policy.
    pub reconciliation_frequency: ReconciliationFrequency,
    /// Which actors the server hosts.
    pub debug_mode: DebugMode,
    /// Seconds the server waits for every player before ending the match.
    pub start_game_timeout_secs: u64,
    /// Emulated network conditions.
    pub lag: LagConfig,
    /// Connect flow timeouts.
    pub connect: ConnectConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICK_RATE,
            snapshot_sending_period_in_ticks: 1,
            input_lag_ticks: 2,
            max_allowed_lag_in_ticks: 15,
            prediction: true,
            prediction_limit_in_ticks: 8,
            players: 2,
            bots_in_server: true,
            reconciliation_frequency: ReconciliationFrequency::default(),
            debug_mode: DebugMode::default(),
            start_game_timeout_secs: DEFAULT_START_GAME_TIMEOUT_SECS,
            lag: LagConfig::default(),
            connect: ConnectConfig::default(),
        }
    }
}

impl GameConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// `Config` on malformed TOML or out-of-range values.
    pub fn from_toml_str(text: &str) -> NetResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| NetError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// `Config` if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> NetResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NetError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Serializes back to TOML.
    ///
    /// # Errors
    ///
    /// `Config` if serialization fails.
    pub fn to_toml_string(&self) -> NetResult<String> {
        toml::to_string(self).map_err(|e| NetError::Config(e.to_string()))
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// `Config` naming the first offending field.
    pub fn validate(&self) -> NetResult<()> {
        if self.ticks_per_second == 0 {
            return Err(NetError::Config("ticks_per_second must be positive".into()));
        }
        if self.snapshot_sending_period_in_ticks == 0 {
            return Err(NetError::Config(
                "snapshot_sending_period_in_ticks must be positive".into(),
            ));
        }
        if self.players == 0 || self.players as usize > MAX_PLAYERS {
            return Err(NetError::Config(format!(
                "players must be in 1..={MAX_PLAYERS}, got {}",
                self.players
            )));
        }
        if !(0.0..=1.0).contains(&self.lag.packet_loss) {
            return Err(NetError::Config(format!(
                "lag.packet_loss must be in [0, 1], got {}",
                self.lag.packet_loss
            )));
        }
        Ok(())
    }

    /// Length of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.ticks_per_second.max(1)
    }

    /// Server-side per-player input buffer capacity.
    #[must_use]
    pub const fn prediction_buffer_size(&self) -> usize {
        (self.input_lag_ticks + self.snapshot_sending_period_in_ticks + self.max_allowed_lag_in_ticks)
            as usize
    }

    /// How far ahead of the last snapshot a client may simulate.
    #[must_use]
    pub const fn total_prediction_limit_in_ticks(&self) -> u32 {
        self.input_lag_ticks + self.snapshot_sending_period_in_ticks + self.prediction_limit_in_ticks
    }

    /// Number of recent inputs a client resends in every package.
    #[must_use]
    pub fn inputs_to_send_buffer_size(&self) -> usize {
        (self.input_lag_ticks + self.max_allowed_lag_in_ticks.max(MIN_RESENT_INPUT_TICKS)) as usize
    }

    /// Capacity of the client's input and snapshot history.
    #[must_use]
    pub const fn client_history_size(&self) -> usize {
        self.total_prediction_limit_in_ticks() as usize + 1
    }

    /// Start timeout as a duration.
    #[must_use]
    pub const fn start_game_timeout(&self) -> Duration {
        Duration::from_secs(self.start_game_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_buffer_sizes() {
        let config = GameConfig::default();
        assert_eq!(config.inputs_to_send_buffer_size(), 17);
        assert_eq!(config.prediction_buffer_size(), 18);
        assert_eq!(config.total_prediction_limit_in_ticks(), 11);
        assert_eq!(config.client_history_size(), 12);
    }

    #[test]
    fn test_resend_window_has_a_floor() {
        let config = GameConfig {
            max_allowed_lag_in_ticks: 0,
            ..GameConfig::default()
        };
        assert_eq!(config.inputs_to_send_buffer_size(), 4);
    }

    #[test]
    fn test_partial_toml() {
        let config = GameConfig::from_toml_str(
            r#"
            ticks_per_second = 60
            reconciliation_frequency = "Never"

            [lag]
            delay_ms = 40
            "#,
        )
        .unwrap();
        assert_eq!(config.ticks_per_second, 60);
        assert_eq!(config.reconciliation_frequency, ReconciliationFrequency::Never);
        assert_eq!(config.lag.delay_ms, 40);
        assert_eq!(config.lag.jitter_ms, 0);
        assert_eq!(config.input_lag_ticks, 2);
        assert_eq!(config.connect.max_connect_attempts, 3);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = GameConfig {
            debug_mode: DebugMode::HalfRemote,
            lag: LagConfig::BROADBAND,
            ..GameConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(GameConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            GameConfig::from_toml_str("ticks_per_second = 0"),
            Err(NetError::Config(_))
        ));
        assert!(matches!(
            GameConfig::from_toml_str("players = 40"),
            Err(NetError::Config(_))
        ));
        assert!(matches!(
            GameConfig::from_toml_str("[lag]\npacket_loss = 1.5"),
            Err(NetError::Config(_))
        ));
        assert!(matches!(
            GameConfig::from_toml_str("players = \"two\""),
            Err(NetError::Config(_))
        ));
    }

    #[test]
    fn test_tick_duration() {
        let config = GameConfig {
            ticks_per_second: 50,
            ..GameConfig::default()
        };
        assert_eq!(config.tick_duration(), Duration::from_millis(20));
    }
}
