//! # TIDENET Core
//!
//! Entity state synchronization for tick-based multiplayer simulations:
//! - Synchronized fields with per-type reconciliation comparers
//! - Entity state codec and the entity registry
//! - Tick-indexed ring buffers for inputs and predicted snapshots
//! - Snapshot / input wire format
//!
//! ## Architecture Rules
//!
//! 1. **The simulation owns the registry** - nothing here is shared across threads
//! 2. **Field order is the wire contract** - identical on every peer
//! 3. **Malformed peers never panic us** - every decode path returns `SyncResult`
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidenet_core::{EntityRegistry, EntityOptions, Predictability};
//!
//! let mut registry = EntityRegistry::new(PlayerId::WORLD);
//! registry.add(1, EntityOptions::default(), Box::new(Ship::new()))?;
//! let snapshot = registry.get_snapshot(None);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod entity;
pub mod error;
pub mod field;
pub mod registry;
pub mod stream;
pub mod wire;

pub use buffer::TickBuffer;
pub use entity::{NetworkId, NetworkIdAllocator, NetworkedEntity, PlayerContext, PlayerRole};
pub use error::{SyncError, SyncResult};
pub use field::{
    SyncBool, SyncField, SyncFloat, SyncInt, SyncQuat, SyncString, SyncVar, SyncVec2, SyncVec3,
    ValueComparer,
};
pub use registry::{EntityOptions, EntityRegistry, Predictability};
pub use stream::{StateReader, StateWriter};
pub use wire::{decode_input_package, encode_input_package, Input, InputPackager, Snapshot};

pub use tidenet_shared::{PlayerId, PlayersMask, Tick};
