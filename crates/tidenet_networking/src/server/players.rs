//! Match roster handed to the server at initialization.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tidenet_shared::PlayerId;

/// One seat of the match as the matchmaker filled it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialMatchPlayerData {
    /// Seat in the match.
    pub player: PlayerId,
    /// Account behind the seat.
    pub user_id: String,
    /// Whether the seat is a bot.
    pub is_bot: bool,
    /// Difficulty for bot seats.
    pub bot_difficulty: f64,
    /// Opaque per-player payload for the game.
    pub game_engine_data: Vec<u8>,
    /// Matchmaker scores.
    pub matchmaker_data: Vec<f32>,
}

impl InitialMatchPlayerData {
    /// Human seat.
    #[must_use]
    pub fn human(player: PlayerId, user_id: impl Into<String>) -> Self {
        Self {
            player,
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Bot seat.
    #[must_use]
    pub fn bot(player: PlayerId, user_id: impl Into<String>, difficulty: f64) -> Self {
        Self {
            player,
            user_id: user_id.into(),
            is_bot: true,
            bot_difficulty: difficulty,
            ..Self::default()
        }
    }
}

/// What a player reports back when the match ends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerResult {
    /// Opaque per-player payload for the game backend.
    pub game_engine_data: Vec<u8>,
    /// Scores fed back to the matchmaker.
    pub matchmaker_data: Vec<f32>,
}

/// Seats users in the order given: the n-th user becomes player n.
#[must_use]
pub fn player_associations(user_ids: &[String]) -> HashMap<String, PlayerId> {
    user_ids
        .iter()
        .enumerate()
        .map(|(index, user)| (user.clone(), PlayerId::from_index(index)))
        .collect()
}

/// Builds a roster from user ids, seating the last `bots` of them as bots.
#[must_use]
pub fn roster(user_ids: &[String], bots: usize) -> Vec<InitialMatchPlayerData> {
    let humans = user_ids.len().saturating_sub(bots);
    let seats = player_associations(user_ids);
    user_ids
        .iter()
        .enumerate()
        .map(|(index, user)| {
            let player = seats[user];
            if index < humans {
                InitialMatchPlayerData::human(player, user.as_str())
            } else {
                InitialMatchPlayerData::bot(player, user.as_str(), 0.5)
            }
        })
        .collect()
}
