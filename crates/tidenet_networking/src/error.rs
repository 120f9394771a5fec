//! # Networking Errors
//!
//! Connection failures carry their stage so callers can pick a retry
//! strategy: only `ConnectingFailed` is worth retrying.

use thiserror::Error;
use tidenet_core::SyncError;

/// Errors of the match lifecycle and connection flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// State or input codec failure.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Input arrived from a user that is not part of the match.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Input arrived for a player without an input buffer.
    #[error("unknown player: {0}")]
    UnknownPlayer(i32),

    /// Transport could not reach the game server.
    #[error("connecting to game server failed")]
    ConnectingFailed,

    /// Game server rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Game server refused the match join.
    #[error("joining match failed: {0}")]
    JoinFailed(String),

    /// A connect attempt is already in flight.
    #[error("already connecting")]
    AlreadyConnecting,

    /// Already connected to a game server.
    #[error("already connected")]
    AlreadyConnected,

    /// Connection dropped while waiting.
    #[error("disconnected")]
    Disconnected,

    /// Operation needs a running match.
    #[error("not initialized")]
    NotInitialized,
}

impl NetError {
    /// True for failures a fresh connect attempt might fix.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectingFailed)
    }
}

/// Result type for networking operations.
pub type NetResult<T> = Result<T, NetError>;
