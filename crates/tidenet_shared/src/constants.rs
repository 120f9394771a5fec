//! # Protocol Constants
//!
//! Values every peer must agree on. Changing any of these is a protocol
//! change and requires rebuilding client, server and bots together.

// =============================================================================
// TIMING
// =============================================================================

/// Default simulation rate (ticks per second).
pub const DEFAULT_TICK_RATE: u32 = 30;

/// Lower bound on the number of older inputs resent with every input package.
pub const MIN_RESENT_INPUT_TICKS: u32 = 2;

/// Seconds the server waits for every expected player before ending the match.
pub const DEFAULT_START_GAME_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// RECONCILIATION TOLERANCES
// =============================================================================

/// Absolute tolerance for `f32` fields.
pub const FLOAT_TOLERANCE: f32 = 0.01;

/// Squared-distance tolerance for vector fields.
pub const VECTOR_SQR_TOLERANCE: f32 = 0.01;

/// Angular tolerance for rotation fields, in degrees.
pub const ROTATION_TOLERANCE_DEGREES: f32 = 1.0;

// =============================================================================
// NETWORK EMULATION
// =============================================================================

/// Upper clamp of emulated lag, in multiples of the configured jitter.
pub const MAX_JITTER_MULTIPLIER: u32 = 3;

/// Shortest interval between two emulated time-sync samples, in milliseconds.
pub const MIN_SYNC_INTERVAL_MS: u64 = 200;
