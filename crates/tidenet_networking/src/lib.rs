//! # TIDENET Networking
//!
//! Match lifecycle on top of `tidenet_core`: the authoritative server loop,
//! the predicting client, and everything between them.
//!
//! ## Architecture
//!
//! ```text
//! CLIENT                                        SERVER
//!   |                                              |
//!   |--- input package (last N ticks) ----------->|  InputIngress
//!   |                                              |  apply input for tick T
//!   |                                              |  step
//!   |<-- snapshot @T (filtered for this player) ---|
//!   |                                              |
//!   | compare with prediction @T                   |
//!   | reconcile if diverged, predict ahead         |
//! ```
//!
//! The server never trusts a client's claimed player id: input is attributed
//! to the seat of the authenticated user that delivered it.
//!
//! ## Modules
//!
//! - [`server`]: `GameServer`, input ingress, roster, lifecycle handler
//! - [`client`]: `GameClient` with prediction and reconciliation
//! - [`synchronizer`]: RTT smoothing and tick targets
//! - [`connection`]: connect → authenticate → join flow
//! - [`simulation`]: packet loss and lag emulation
//! - [`local`]: in-process server plus clients
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidenet_networking::{GameConfig, LocalMatch};
//!
//! let config = GameConfig::from_toml_str("ticks_per_second = 60")?;
//! let mut local = LocalMatch::new(config, &users, 0, |registry| populate(registry))?;
//! local.start(Instant::now())?;
//! local.run(Instant::now(), 600);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod local;
pub mod server;
pub mod simulation;
pub mod synchronizer;
pub mod tick;
pub mod transport;

pub use client::{ClientInbox, ClientState, ClientStats, GameClient};
pub use config::{ConnectConfig, DebugMode, GameConfig, LagConfig, ReconciliationFrequency};
pub use connection::{
    connect_with_retry, ConnectionEvent, GameServerClient, MatchConnectClient, ServerClientEvent,
};
pub use error::{NetError, NetResult};
pub use local::LocalMatch;
pub use server::{
    DefaultServerHandler, EndReason, GameServer, HandlerDecision, InitialMatchPlayerData,
    InputIngress, MatchEvent, PlayerResult, ServerHandler, ServerState, ServerStats,
};
pub use simulation::{LagSample, LaggedLink, NetworkEmulator};
pub use synchronizer::{SyncSample, TickSynchronizer, TickTargets};
pub use tick::{TickLoop, TickStats};
pub use transport::{ChannelSink, InputSink, NullSink, SnapshotSink, TransportStats};
