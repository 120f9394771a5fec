//! # Sync Error Types
//!
//! Protocol and configuration violations raised by the codec and the
//! registry. Expected channel misses (a tick that is not buffered yet or was
//! already evicted) are never errors: they surface as `None` or `false`.

use thiserror::Error;

/// Errors raised while encoding, decoding or registering entity state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// An input handler tried to read past the end of its entry.
    #[error("entity {entity_id} ({type_name}) read more input bytes than were sent")]
    ReadTooMuch {
        /// Offending entity.
        entity_id: i32,
        /// Type name of the entity implementation.
        type_name: &'static str,
    },

    /// An input handler left bytes of its entry unread.
    #[error("entity {entity_id} ({type_name}) left {remaining} input bytes unread")]
    ReadNotEnough {
        /// Offending entity.
        entity_id: i32,
        /// Type name of the entity implementation.
        type_name: &'static str,
        /// Bytes still unread.
        remaining: usize,
    },

    /// A reader ran out of bytes.
    #[error("unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes the read required.
        needed: usize,
        /// Bytes that were left.
        remaining: usize,
    },

    /// A string field did not hold valid UTF-8.
    #[error("string field is not valid utf-8")]
    InvalidUtf8,

    /// A length or count prefix was negative.
    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    /// State bytes were left over after every field was decoded.
    #[error("{0} trailing bytes after decoding entity state")]
    TrailingBytes(usize),

    /// Entity ids must be non-negative.
    #[error("invalid network id {0}")]
    InvalidEntityId(i32),

    /// Two entities claimed the same id.
    #[error("duplicate network id {0}")]
    DuplicateEntityId(i32),
}

impl SyncError {
    /// True for errors that mean the peers were built from different code.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        !matches!(self, Self::InvalidEntityId(_) | Self::DuplicateEntityId(_))
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
