//! # Player identities and masks
//!
//! Every simulation role acts as some player:
//!
//! ```text
//!   WORLD (-2)    the authoritative server, sees and predicts everything
//!   INVALID (-1)  placeholder before a role is assigned
//!   0..=30        real players (humans or bots), PLAYER1 = 0
//! ```
//!
//! Entities carry two [`PlayersMask`]s: who receives their state and who may
//! predict them locally.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest number of players a mask can address.
pub const MAX_PLAYERS: usize = 31;

/// Identifier of a player within one match.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PlayerId(pub i32);

impl PlayerId {
    /// The server itself.
    pub const WORLD: Self = Self(-2);
    /// No player.
    pub const INVALID: Self = Self(-1);
    /// First real player.
    pub const PLAYER1: Self = Self(0);

    /// Player id for the `index`-th participant of a match.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub const fn from_index(index: usize) -> Self {
        Self(Self::PLAYER1.0 + index as i32)
    }

    /// True for the server role.
    #[inline]
    #[must_use]
    pub const fn is_world(self) -> bool {
        self.0 == Self::WORLD.0
    }

    /// True for ids that address a mask bit.
    #[inline]
    #[must_use]
    pub const fn is_player(self) -> bool {
        self.0 >= 0 && (self.0 as usize) < MAX_PLAYERS
    }

    /// Bit of this player inside a [`PlayersMask`], zero for non players.
    #[inline]
    #[must_use]
    pub const fn mask_bit(self) -> u32 {
        if self.is_player() {
            1 << self.0
        } else {
            0
        }
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::WORLD => f.write_str("world"),
            Self::INVALID => f.write_str("invalid"),
            Self(id) => write!(f, "player{id}"),
        }
    }
}

/// Bitset of players, bit `n` is player `n`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PlayersMask(pub u32);

impl PlayersMask {
    /// Nobody.
    pub const NONE: Self = Self(0);
    /// Everybody.
    pub const ALL: Self = Self(!0);

    /// Mask holding a single player.
    #[must_use]
    pub const fn single(player: PlayerId) -> Self {
        Self(player.mask_bit())
    }

    /// Adds a player.
    #[must_use]
    pub const fn with(self, player: PlayerId) -> Self {
        Self(self.0 | player.mask_bit())
    }

    /// Membership test. The world is a member of every mask.
    #[inline]
    #[must_use]
    pub const fn contains(self, player: PlayerId) -> bool {
        player.is_world() || self.0 & player.mask_bit() != 0
    }
}

impl Default for PlayersMask {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_ids() {
        assert_eq!(PlayerId::from_index(0), PlayerId::PLAYER1);
        assert_eq!(PlayerId::from_index(3), PlayerId(3));
        assert_eq!(PlayerId(2).mask_bit(), 0b100);
        assert_eq!(PlayerId::WORLD.mask_bit(), 0);
        assert_eq!(PlayerId::INVALID.mask_bit(), 0);
        assert_eq!(PlayerId(5).to_string(), "player5");
    }

    #[test]
    fn test_mask_membership() {
        let mask = PlayersMask::single(PlayerId(0)).with(PlayerId(4));
        assert!(mask.contains(PlayerId(0)));
        assert!(mask.contains(PlayerId(4)));
        assert!(!mask.contains(PlayerId(1)));
        assert!(!mask.contains(PlayerId::INVALID));

        // World sees through every mask, even an empty one
        assert!(PlayersMask::NONE.contains(PlayerId::WORLD));
        assert!(PlayersMask::ALL.contains(PlayerId(30)));
    }
}
