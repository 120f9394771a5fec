//! # tidenet shared
//!
//! Types every peer of a match agrees on: wire value types, player
//! identities and protocol constants.
//!
//! This crate must stay free of simulation and transport code so that
//! tooling can depend on it alone.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod math;
pub mod player;

pub use math::{Quat, Vec2, Vec3};
pub use player::{PlayerId, PlayersMask, MAX_PLAYERS};

/// Simulation step number. Ticks start at zero on the server.
pub type Tick = i64;
