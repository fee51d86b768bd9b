//! Statistics calculation engine.
//!
//! Computes derived metrics from stored match results:
//! - Player win rate, per-game averages and KDA
//! - Team win rate, average game length and champion usage ranking
//!
//! The `*_stats` functions are pure and work on any slice of matches. The
//! `query_*` functions fetch the relevant matches from a [`MatchStore`]
//! first.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::models::{ChampionStats, MatchResult, PlayerStats, TeamStats, PERFECT_KDA};
use crate::storage::{with_timeout, FindOptions, MatchFilter, MatchStore, SortOrder, StorageError};

/// How many champions a team ranking keeps.
pub const TOP_CHAMPIONS: usize = 5;

/// Errors returned by stats queries.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("No matches found for {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Calculate win rate as a percentage.
pub fn calculate_win_rate(wins: u32, games: u32) -> f64 {
    if games == 0 {
        0.0
    } else {
        wins as f64 / games as f64 * 100.0
    }
}

/// `(kills + assists) / deaths` to two decimals, or "Perfect" with no deaths.
pub fn format_kda(kills: u64, deaths: u64, assists: u64) -> String {
    if deaths == 0 {
        PERFECT_KDA.to_string()
    } else {
        format!("{:.2}", (kills + assists) as f64 / deaths as f64)
    }
}

fn mean(total: u64, count: u32) -> f64 {
    if count == 0 {
        0.0
    } else {
        total as f64 / count as f64
    }
}

/// Aggregate one player's line across the matches they appear in.
///
/// Matches without a line for `name` are ignored. Returns `None` when the
/// player appears in none of them. Draws count as losses.
pub fn player_stats(name: &str, matches: &[MatchResult]) -> Option<PlayerStats> {
    let mut games = 0u32;
    let mut wins = 0u32;
    let (mut kills, mut deaths, mut assists, mut cs) = (0u64, 0u64, 0u64, 0u64);

    for m in matches {
        let mut appeared = false;
        for p in m.players.iter().filter(|p| p.name == name) {
            appeared = true;
            kills += p.kills as u64;
            deaths += p.deaths as u64;
            assists += p.assists as u64;
            cs += p.cs as u64;
            if m.winner == p.team {
                wins += 1;
            }
        }
        if appeared {
            games += 1;
        }
    }

    if games == 0 {
        return None;
    }

    Some(PlayerStats {
        player_name: name.to_string(),
        total_games: games,
        wins,
        losses: games.saturating_sub(wins),
        win_rate: calculate_win_rate(wins, games),
        average_kills: mean(kills, games),
        average_deaths: mean(deaths, games),
        average_assists: mean(assists, games),
        average_cs: mean(cs, games),
        kda: format_kda(kills, deaths, assists),
    })
}

/// Aggregate a team's record across the matches it played.
///
/// Champion usage counts only player lines whose team is `team`. The
/// ranking is by games played, descending; ties keep the order in which
/// champions were first seen.
pub fn team_stats(team: &str, matches: &[MatchResult]) -> Option<TeamStats> {
    let mut games = 0u32;
    let mut wins = 0u32;
    let mut minutes = 0.0;
    let mut timed = 0u32;

    // Index into `champions`, to keep first-seen order
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut champions: Vec<ChampionStats> = Vec::new();

    for m in matches.iter().filter(|m| m.involves_team(team)) {
        games += 1;
        let won = m.winner == team;
        if won {
            wins += 1;
        }
        if let Some(d) = m.duration_minutes() {
            minutes += d;
            timed += 1;
        }

        for p in m.players.iter().filter(|p| p.team == team) {
            let idx = *seen.entry(p.champion.as_str()).or_insert_with(|| {
                champions.push(ChampionStats {
                    champion: p.champion.clone(),
                    games: 0,
                    wins: 0,
                    win_rate: 0.0,
                });
                champions.len() - 1
            });
            let c = &mut champions[idx];
            c.games += 1;
            if won {
                c.wins += 1;
            }
        }
    }

    if games == 0 {
        return None;
    }

    for c in &mut champions {
        c.win_rate = calculate_win_rate(c.wins, c.games);
    }
    // sort_by is stable
    champions.sort_by(|a, b| b.games.cmp(&a.games));
    champions.truncate(TOP_CHAMPIONS);

    Some(TeamStats {
        team_name: team.to_string(),
        total_games: games,
        wins,
        losses: games.saturating_sub(wins),
        win_rate: calculate_win_rate(wins, games),
        average_game_duration: if timed == 0 {
            0.0
        } else {
            minutes / timed as f64
        },
        most_played_champions: champions,
    })
}

async fn load(
    store: &dyn MatchStore,
    filter: MatchFilter,
    timeout: Duration,
) -> Result<Vec<MatchResult>, StatsError> {
    let options = FindOptions {
        sort: SortOrder::Inserted,
        ..FindOptions::default()
    };
    let found = with_timeout("find", timeout, store.find(&filter, &options)).await?;
    debug!("Loaded {} matches for stats", found.records.len());
    Ok(found.records)
}

/// Fetch and aggregate stats for a player.
pub async fn query_player_stats(
    store: &dyn MatchStore,
    name: &str,
    timeout: Duration,
) -> Result<PlayerStats, StatsError> {
    let matches = load(store, MatchFilter::player(name), timeout).await?;
    player_stats(name, &matches).ok_or_else(|| StatsError::NotFound(format!("player '{}'", name)))
}

/// Fetch and aggregate stats for a team.
pub async fn query_team_stats(
    store: &dyn MatchStore,
    team: &str,
    timeout: Duration,
) -> Result<TeamStats, StatsError> {
    let matches = load(store, MatchFilter::team(team), timeout).await?;
    team_stats(team, &matches).ok_or_else(|| StatsError::NotFound(format!("team '{}'", team)))
}
