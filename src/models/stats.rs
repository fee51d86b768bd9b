//! Derived statistics models.
//!
//! None of these are persisted; they are recomputed from match results on
//! every request.

use serde::{Deserialize, Serialize};

/// KDA value reported when a player never died.
pub const PERFECT_KDA: &str = "Perfect";

/// Aggregated statistics for one player name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub player_name: String,
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,

    /// Percentage (0.0 to 100.0)
    pub win_rate: f64,

    pub average_kills: f64,
    pub average_deaths: f64,
    pub average_assists: f64,

    #[serde(rename = "averageCS")]
    pub average_cs: f64,

    /// `(kills + assists) / deaths` to two decimals, or [`PERFECT_KDA`]
    pub kda: String,
}

/// Usage of one champion by a team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChampionStats {
    pub champion: String,
    pub games: u32,
    pub wins: u32,
    pub win_rate: f64,
}

/// Aggregated statistics for one team.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStats {
    pub team_name: String,
    pub total_games: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,

    /// Mean game length in minutes over games with a known duration
    pub average_game_duration: f64,

    /// Top five champions by games played
    pub most_played_champions: Vec<ChampionStats>,
}
