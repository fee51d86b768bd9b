//! Match result model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Value stored in `winner` when both sides finish level.
pub const DRAW: &str = "draw";

/// A player's line in a single match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub name: String,
    pub team: String,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub champion: String,
    #[serde(default)]
    pub kills: u32,
    #[serde(default)]
    pub deaths: u32,
    #[serde(default)]
    pub assists: u32,
    #[serde(default)]
    pub cs: u32,
    #[serde(default)]
    pub gold: u32,
    #[serde(default)]
    pub damage_dealt: u32,
    #[serde(default)]
    pub vision_score: u32,
}

impl Player {
    /// A player line with all stats at zero.
    pub fn new(name: impl Into<String>, team: impl Into<String>, champion: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            champion: champion.into(),
            ..Self::default()
        }
    }

    /// Builder method to set kills, deaths and assists.
    pub fn with_kda(mut self, kills: u32, deaths: u32, assists: u32) -> Self {
        self.kills = kills;
        self.deaths = deaths;
        self.assists = assists;
        self
    }
}

/// The result of one match between two teams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Region-scoped identifier (source id or `<region>-<ordinal>`)
    pub match_id: String,

    /// Day the match was played
    pub date: NaiveDate,

    pub team_a: String,
    pub team_b: String,
    pub score_a: u32,
    pub score_b: u32,

    /// Name of the winning team, or [`DRAW`]
    pub winner: String,

    /// Competition bracket the match belongs to
    pub region: String,

    #[serde(default)]
    pub players: Vec<Player>,

    /// Game length as shown on the source page (e.g. "32:15")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mvp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_stage: Option<String>,

    /// Link to the match recording
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vod: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decide the winner from the scoreline.
///
/// Strict comparison; equal scores yield [`DRAW`].
pub fn decide_winner(team_a: &str, team_b: &str, score_a: u32, score_b: u32) -> String {
    if score_a > score_b {
        team_a.to_string()
    } else if score_b > score_a {
        team_b.to_string()
    } else {
        DRAW.to_string()
    }
}

impl MatchResult {
    /// Create a new match result. The winner is derived from the scores.
    pub fn new(
        match_id: impl Into<String>,
        date: NaiveDate,
        region: impl Into<String>,
        team_a: impl Into<String>,
        team_b: impl Into<String>,
        score_a: u32,
        score_b: u32,
    ) -> Self {
        let (team_a, team_b) = (team_a.into(), team_b.into());
        let winner = decide_winner(&team_a, &team_b, score_a, score_b);
        let now = Utc::now();

        Self {
            match_id: match_id.into(),
            date,
            team_a,
            team_b,
            score_a,
            score_b,
            winner,
            region: region.into(),
            players: Vec::new(),
            duration: None,
            mvp: None,
            tournament_stage: None,
            vod: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder method to set the player lines.
    pub fn with_players(mut self, players: Vec<Player>) -> Self {
        self.players = players;
        self
    }

    /// Builder method to set the game duration.
    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    /// Recompute `winner` after the teams or scores changed.
    pub fn refresh_winner(&mut self) {
        self.winner = decide_winner(&self.team_a, &self.team_b, self.score_a, self.score_b);
    }

    pub fn is_draw(&self) -> bool {
        self.winner == DRAW
    }

    /// Whether `team` played in this match.
    pub fn involves_team(&self, team: &str) -> bool {
        self.team_a == team || self.team_b == team
    }

    /// Game duration in minutes, if the duration text parses.
    pub fn duration_minutes(&self) -> Option<f64> {
        self.duration.as_deref().and_then(parse_duration_minutes)
    }
}

/// Parse `MM:SS` or `H:MM:SS` into minutes.
pub fn parse_duration_minutes(s: &str) -> Option<f64> {
    let re = regex::Regex::new(r"^\s*(?:(\d+):)?(\d{1,3}):([0-5]\d)\s*$").unwrap();
    let caps = re.captures(s)?;

    let hours: u64 = caps.get(1).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    let minutes: u64 = caps[2].parse().ok()?;
    let seconds: u64 = caps[3].parse().ok()?;

    Some((hours * 60 + minutes) as f64 + seconds as f64 / 60.0)
}
