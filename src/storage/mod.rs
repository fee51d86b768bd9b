//! Match persistence.
//!
//! Handles reading and writing to the local data directory:
//! - Raw page snapshots (`raw/<region>/`)
//! - The normalized match collection (`normalized/matches.jsonl`)
//!
//! Everything above this layer talks to a [`MatchStore`], so the JSONL
//! collection can be swapped for another document store.

pub mod jsonl;
pub mod snapshot;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{MatchResult, Player};

pub use jsonl::{JsonlMatchStore, JsonlReader, JsonlWriter};
pub use snapshot::SnapshotWriter;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

/// Configuration for storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.data_dir.join("raw")
    }

    pub fn normalized_dir(&self) -> PathBuf {
        self.data_dir.join("normalized")
    }

    pub fn matches_path(&self) -> PathBuf {
        self.normalized_dir().join("matches.jsonl")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}

/// Fields a filter can compare on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    MatchId,
    Region,
    TeamA,
    TeamB,
    /// Any embedded player's name
    PlayerName,
}

/// Equality filters combined with `and`/`or`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MatchFilter {
    #[default]
    All,
    Eq(MatchField, String),
    Or(Vec<MatchFilter>),
    And(Vec<MatchFilter>),
}

impl MatchFilter {
    pub fn match_id(id: impl Into<String>) -> Self {
        MatchFilter::Eq(MatchField::MatchId, id.into())
    }

    pub fn region(region: impl Into<String>) -> Self {
        MatchFilter::Eq(MatchField::Region, region.into())
    }

    /// Matches where the team played on either side.
    pub fn team(team: impl Into<String>) -> Self {
        let team = team.into();
        MatchFilter::Or(vec![
            MatchFilter::Eq(MatchField::TeamA, team.clone()),
            MatchFilter::Eq(MatchField::TeamB, team),
        ])
    }

    pub fn player(name: impl Into<String>) -> Self {
        MatchFilter::Eq(MatchField::PlayerName, name.into())
    }

    /// Combine with another filter, flattening nested `And`s.
    pub fn and(self, other: MatchFilter) -> Self {
        match (self, other) {
            (MatchFilter::All, f) | (f, MatchFilter::All) => f,
            (MatchFilter::And(mut a), MatchFilter::And(b)) => {
                a.extend(b);
                MatchFilter::And(a)
            }
            (MatchFilter::And(mut a), f) => {
                a.push(f);
                MatchFilter::And(a)
            }
            (f, MatchFilter::And(mut b)) => {
                b.insert(0, f);
                MatchFilter::And(b)
            }
            (a, b) => MatchFilter::And(vec![a, b]),
        }
    }

    pub fn matches(&self, record: &MatchResult) -> bool {
        match self {
            MatchFilter::All => true,
            MatchFilter::Eq(field, value) => match field {
                MatchField::MatchId => record.match_id == *value,
                MatchField::Region => record.region == *value,
                MatchField::TeamA => record.team_a == *value,
                MatchField::TeamB => record.team_b == *value,
                MatchField::PlayerName => record.players.iter().any(|p| p.name == *value),
            },
            MatchFilter::Or(filters) => filters.iter().any(|f| f.matches(record)),
            MatchFilter::And(filters) => filters.iter().all(|f| f.matches(record)),
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Newest match date first, then most recently stored
    #[default]
    NewestFirst,
    /// Storage order
    Inserted,
}

/// Sort, skip and limit for `find`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: SortOrder,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindOptions {
    pub fn page(skip: usize, limit: usize) -> Self {
        Self {
            sort: SortOrder::NewestFirst,
            skip,
            limit: Some(limit),
        }
    }
}

/// One page of records plus the total that matched the filter.
#[derive(Debug, Clone)]
pub struct FindResult {
    pub records: Vec<MatchResult>,
    pub total: usize,
}

/// Partial update of a match. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MatchPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_a: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_b: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<Vec<Player>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mvp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tournament_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vod: Option<String>,
}

impl MatchPatch {
    pub fn is_empty(&self) -> bool {
        *self == MatchPatch::default()
    }

    /// Apply to a record, recompute the winner and bump `updatedAt`.
    pub fn apply(&self, record: &mut MatchResult) {
        if let Some(date) = self.date {
            record.date = date;
        }
        if let Some(region) = &self.region {
            record.region = region.clone();
        }
        if let Some(team_a) = &self.team_a {
            record.team_a = team_a.clone();
        }
        if let Some(team_b) = &self.team_b {
            record.team_b = team_b.clone();
        }
        if let Some(score_a) = self.score_a {
            record.score_a = score_a;
        }
        if let Some(score_b) = self.score_b {
            record.score_b = score_b;
        }
        if let Some(players) = &self.players {
            record.players = players.clone();
        }
        if let Some(duration) = &self.duration {
            record.duration = Some(duration.clone());
        }
        if let Some(mvp) = &self.mvp {
            record.mvp = Some(mvp.clone());
        }
        if let Some(stage) = &self.tournament_stage {
            record.tournament_stage = Some(stage.clone());
        }
        if let Some(vod) = &self.vod {
            record.vod = Some(vod.clone());
        }
        record.refresh_winner();
        record.updated_at = Utc::now();
    }
}

/// Document store for match records.
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Matching records after sort/skip/limit, plus the unpaginated total.
    async fn find(
        &self,
        filter: &MatchFilter,
        options: &FindOptions,
    ) -> Result<FindResult, StorageError>;

    async fn find_one(&self, filter: &MatchFilter) -> Result<Option<MatchResult>, StorageError>;

    async fn insert(&self, record: &MatchResult) -> Result<(), StorageError>;

    /// Patch every matching record. Returns how many were updated.
    async fn update(&self, filter: &MatchFilter, patch: &MatchPatch)
        -> Result<usize, StorageError>;

    /// Remove every matching record. Returns how many were removed.
    async fn delete(&self, filter: &MatchFilter) -> Result<usize, StorageError>;

    async fn count(&self, filter: &MatchFilter) -> Result<usize, StorageError>;
}

/// Bound a store call by `limit`.
pub async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout {
            operation,
            after: limit,
        }),
    }
}
