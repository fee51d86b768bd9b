//! Ingestion orchestrator.
//!
//! Coordinates one ingestion run:
//! 1. Launch a page session (shared by every region)
//! 2. Fetch each region's results container, with retry
//! 3. Optionally snapshot the raw markup
//! 4. Parse match cards
//! 5. Store each match independently
//!
//! Failures are isolated per region and per record and collected into an
//! [`IngestReport`]. Only failing to start at all is an error.

pub mod runner;
pub mod schedule;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::fetch::{FetchError, Fetcher, PageSource, SessionLauncher, SessionState};
use crate::parse::{MatchParser, PageParse};
use crate::storage::{with_timeout, MatchStore, SnapshotWriter};

pub use runner::{IngestRunner, IngestState, RunStatus, TriggerOutcome};
pub use schedule::{DailySchedule, Scheduler};

/// Errors that stop a run from happening at all.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No regions configured")]
    NoRegions,

    #[error("Could not open a page session: {0}")]
    Launch(#[source] FetchError),

    #[error("An ingestion run is already in progress")]
    AlreadyRunning,

    #[error("Ingestion task aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A competition bracket and the page listing its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub url: Url,
}

impl Region {
    pub fn new(name: impl Into<String>, url: Url) -> Self {
        Self {
            name: name.into(),
            url,
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Schedule,
    Api,
    Cli,
    Import,
}

/// How a region fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionOutcome {
    /// Page fetched and parsed; see the counters for stored records
    Ingested,
    /// Every attempt failed, or the deadline passed
    FetchFailed,
    /// Cards were found but none could be parsed
    ParseFailed,
}

/// Per-region section of a run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionReport {
    pub region: String,
    pub url: Option<Url>,
    pub outcome: RegionOutcome,
    pub attempts: u32,

    /// Session step that failed, for fetch failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_state: Option<SessionState>,

    pub cards_seen: usize,
    pub cards_dropped: usize,
    pub stored: usize,
    pub failed: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<PathBuf>,

    /// Fetch error, dropped cards and failed writes, in order
    pub errors: Vec<String>,
}

impl RegionReport {
    fn new(region: &str, url: Option<Url>) -> Self {
        Self {
            region: region.to_string(),
            url,
            outcome: RegionOutcome::Ingested,
            attempts: 0,
            failed_state: None,
            cards_seen: 0,
            cards_dropped: 0,
            stored: 0,
            failed: 0,
            snapshot: None,
            errors: Vec::new(),
        }
    }
}

/// Sums across regions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestTotals {
    pub regions_ingested: usize,
    pub regions_failed: usize,
    pub cards_seen: usize,
    pub cards_dropped: usize,
    pub stored: usize,
    pub failed: usize,
}

/// Structured result of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub regions: Vec<RegionReport>,
    pub totals: IngestTotals,
}

impl IngestReport {
    fn finish(
        run_id: Uuid,
        trigger: Trigger,
        started_at: DateTime<Utc>,
        regions: Vec<RegionReport>,
    ) -> Self {
        let mut totals = IngestTotals::default();
        for r in &regions {
            if r.outcome == RegionOutcome::Ingested {
                totals.regions_ingested += 1;
            } else {
                totals.regions_failed += 1;
            }
            totals.cards_seen += r.cards_seen;
            totals.cards_dropped += r.cards_dropped;
            totals.stored += r.stored;
            totals.failed += r.failed;
        }

        Self {
            run_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            regions,
            totals,
        }
    }

    /// Every region ingested with no dropped cards or failed writes.
    pub fn is_clean(&self) -> bool {
        self.totals.regions_failed == 0
            && self.totals.cards_dropped == 0
            && self.totals.failed == 0
    }
}

/// Runs ingestion over all configured regions.
pub struct IngestOrchestrator {
    regions: Vec<Region>,
    launcher: Arc<dyn SessionLauncher>,
    fetcher: Fetcher,
    parser: Arc<MatchParser>,
    store: Arc<dyn MatchStore>,
    snapshots: Option<SnapshotWriter>,
    store_timeout: Duration,
}

impl IngestOrchestrator {
    pub fn new(
        regions: Vec<Region>,
        launcher: Arc<dyn SessionLauncher>,
        fetcher: Fetcher,
        parser: Arc<MatchParser>,
        store: Arc<dyn MatchStore>,
    ) -> Self {
        Self {
            regions,
            launcher,
            fetcher,
            parser,
            store,
            snapshots: None,
            store_timeout: Duration::from_secs(5),
        }
    }

    /// Builder method to save raw markup before parsing.
    pub fn with_snapshots(mut self, writer: SnapshotWriter) -> Self {
        self.snapshots = Some(writer);
        self
    }

    /// Builder method to set the per-insert timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Run one ingestion cycle.
    pub async fn run(&self, run_id: Uuid, trigger: Trigger) -> Result<IngestReport, SyncError> {
        if self.regions.is_empty() {
            return Err(SyncError::NoRegions);
        }

        let started_at = Utc::now();
        info!(%run_id, ?trigger, regions = self.regions.len(), "Starting ingestion run");

        let session = self.launcher.launch().await.map_err(|e| {
            error!(%run_id, "Failed to open page session: {}", e);
            SyncError::Launch(e)
        })?;

        let mut reports = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            reports.push(self.run_region(session.as_ref(), region).await);
        }

        if let Err(e) = session.close().await {
            warn!(%run_id, "Failed to close page session: {}", e);
        }

        let report = IngestReport::finish(run_id, trigger, started_at, reports);
        info!(
            %run_id,
            ingested = report.totals.regions_ingested,
            failed = report.totals.regions_failed,
            stored = report.totals.stored,
            dropped = report.totals.cards_dropped,
            "Ingestion run finished"
        );
        Ok(report)
    }

    async fn run_region(&self, session: &dyn PageSource, region: &Region) -> RegionReport {
        let mut report = RegionReport::new(&region.name, Some(region.url.clone()));

        let fetched = self.fetcher.fetch(session, &region.name, &region.url).await;
        report.attempts = fetched.attempts;

        let html = match fetched.result {
            Ok(html) => html,
            Err(e) => {
                warn!(region = %region.name, "Skipping region: {}", e);
                report.outcome = RegionOutcome::FetchFailed;
                report.failed_state = Some(e.state());
                report.errors.push(e.to_string());
                return report;
            }
        };

        if let Some(writer) = &self.snapshots {
            match writer.write(&region.name, &html, Utc::now()).await {
                Ok(path) => report.snapshot = Some(path),
                Err(e) => warn!(region = %region.name, "Failed to save snapshot: {}", e),
            }
        }

        let page = self.parser.parse_page(&html, &region.name);
        self.persist(page, &mut report).await;
        report
    }

    /// Parse an already-fetched page and store its matches.
    pub async fn ingest_page(&self, region: &str, html: &str) -> RegionReport {
        let mut report = RegionReport::new(region, None);
        let page = self.parser.parse_page(html, region);
        self.persist(page, &mut report).await;
        report
    }

    async fn persist(&self, page: PageParse, report: &mut RegionReport) {
        report.cards_seen = page.cards_seen;
        report.cards_dropped = page.cards_dropped();
        for card in &page.dropped {
            report
                .errors
                .push(format!("card {} dropped: {}", card.index, card.reason));
        }

        if page.cards_seen > 0 && page.matches.is_empty() {
            warn!(region = %report.region, "No card on the page could be parsed");
            report.outcome = RegionOutcome::ParseFailed;
            return;
        }

        for m in &page.matches {
            match with_timeout("insert", self.store_timeout, self.store.insert(m)).await {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    warn!(
                        region = %report.region,
                        match_id = %m.match_id,
                        "Failed to store match: {}",
                        e
                    );
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("match {} not stored: {}", m.match_id, e));
                }
            }
        }

        info!(
            region = %report.region,
            stored = report.stored,
            failed = report.failed,
            dropped = report.cards_dropped,
            "Region ingested"
        );
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{orchestrator, regions, session, NORTE, SUL};
    use super::*;
    use crate::fetch::testing::{transient, ScriptedLauncher, Step};
    use crate::parse::fixtures::{card, page, player_row};
    use crate::retry::ManualClock;
    use crate::storage::testing::RejectingStore;
    use crate::storage::{JsonlMatchStore, MatchFilter, StorageConfig};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn results_page(ids: &[&str]) -> String {
        let cards: Vec<String> = ids
            .iter()
            .map(|id| {
                card(
                    Some(id),
                    "15 Mar 2025",
                    ("paiN Gaming", "LOUD"),
                    ("2", "1"),
                    &[player_row("Robo", "paiN Gaming", "Azir", ("4", "1", "7"))],
                )
            })
            .collect();
        page(&cards)
    }

    fn jsonl_store(temp_dir: &TempDir) -> JsonlMatchStore {
        JsonlMatchStore::open(&StorageConfig::new(temp_dir.path().to_path_buf())).unwrap()
    }

    #[tokio::test]
    async fn test_run_ingests_every_region() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(jsonl_store(&temp_dir));
        let clock = ManualClock::new();

        let session = session(&clock)
            .script(SUL, vec![Step::Page(results_page(&["sul-a", "sul-b"]))])
            .script(NORTE, vec![Step::Page(results_page(&["norte-a"]))]);
        let closed = session.closed.clone();

        let orch = orchestrator(&clock, ScriptedLauncher::new(session), store.clone());
        let report = orch.run(Uuid::new_v4(), Trigger::Cli).await.unwrap();

        assert!(report.is_clean());
        assert_eq!(report.totals.stored, 3);
        assert_eq!(report.regions[0].region, "sul");
        assert_eq!(report.regions[0].attempts, 1);
        assert_eq!(store.count(&MatchFilter::region("norte")).await.unwrap(), 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(jsonl_store(&temp_dir));
        let clock = ManualClock::new();

        let session = session(&clock)
            .script(
                SUL,
                vec![
                    Step::Fail(transient()),
                    Step::Fail(transient()),
                    Step::Page(results_page(&["sul-a"])),
                ],
            )
            .script(NORTE, vec![Step::Page(results_page(&["norte-a"]))]);

        let orch = orchestrator(&clock, ScriptedLauncher::new(session), store);
        let report = orch.run(Uuid::new_v4(), Trigger::Schedule).await.unwrap();

        assert_eq!(report.regions[0].outcome, RegionOutcome::Ingested);
        assert_eq!(report.regions[0].attempts, 3);
        assert_eq!(report.totals.stored, 2);
    }

    #[tokio::test]
    async fn test_exhausted_region_is_skipped_and_run_continues() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(jsonl_store(&temp_dir));
        let clock = ManualClock::new();

        let session = session(&clock)
            .script(
                SUL,
                vec![
                    Step::Fail(transient()),
                    Step::Fail(transient()),
                    Step::Fail(transient()),
                ],
            )
            .script(NORTE, vec![Step::Page(results_page(&["norte-a"]))]);
        let closed = session.closed.clone();

        let orch = orchestrator(&clock, ScriptedLauncher::new(session), store);
        let report = orch.run(Uuid::new_v4(), Trigger::Api).await.unwrap();

        let sul = &report.regions[0];
        assert_eq!(sul.outcome, RegionOutcome::FetchFailed);
        assert_eq!(sul.attempts, 3);
        assert_eq!(sul.failed_state, Some(SessionState::WaitingForContent));
        assert_eq!(sul.errors.len(), 1);

        assert_eq!(report.regions[1].outcome, RegionOutcome::Ingested);
        assert_eq!(report.totals.regions_failed, 1);
        assert_eq!(report.totals.stored, 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_in_one_region_does_not_starve_the_next() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(jsonl_store(&temp_dir));
        let clock = ManualClock::new();

        let session = session(&clock)
            .script(SUL, vec![Step::Stall])
            .script(NORTE, vec![Step::Page(results_page(&["norte-a"]))]);

        let orch = orchestrator(&clock, ScriptedLauncher::new(session), store);
        let report = orch.run(Uuid::new_v4(), Trigger::Cli).await.unwrap();

        assert_eq!(report.regions[0].outcome, RegionOutcome::FetchFailed);
        assert_eq!(report.regions[0].attempts, 1);
        assert_eq!(report.regions[1].outcome, RegionOutcome::Ingested);
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated_per_record() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(RejectingStore::new(jsonl_store(&temp_dir), &["sul-b"]));
        let clock = ManualClock::new();

        let session = session(&clock)
            .script(SUL, vec![Step::Page(results_page(&["sul-a", "sul-b", "sul-c"]))])
            .script(NORTE, vec![Step::Page(results_page(&[]))]);

        let orch = orchestrator(&clock, ScriptedLauncher::new(session), store.clone());
        let report = orch.run(Uuid::new_v4(), Trigger::Cli).await.unwrap();

        let sul = &report.regions[0];
        assert_eq!(sul.outcome, RegionOutcome::Ingested);
        assert_eq!(sul.stored, 2);
        assert_eq!(sul.failed, 1);
        assert!(sul.errors[0].contains("sul-b"));
        assert!(!report.is_clean());
        assert_eq!(store.inner.count(&MatchFilter::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_page_with_only_corrupt_cards_is_a_parse_failure() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(jsonl_store(&temp_dir));
        let clock = ManualClock::new();

        let broken = page(&[card(
            Some("sul-x"),
            "not a date",
            ("paiN Gaming", "LOUD"),
            ("2", "1"),
            &[],
        )]);
        let session = session(&clock)
            .script(SUL, vec![Step::Page(broken)])
            .script(NORTE, vec![Step::Page(results_page(&["norte-a"]))]);

        let orch = orchestrator(&clock, ScriptedLauncher::new(session), store);
        let report = orch.run(Uuid::new_v4(), Trigger::Cli).await.unwrap();

        let sul = &report.regions[0];
        assert_eq!(sul.outcome, RegionOutcome::ParseFailed);
        assert_eq!(sul.cards_seen, 1);
        assert_eq!(sul.cards_dropped, 1);
        assert_eq!(sul.stored, 0);
    }

    #[tokio::test]
    async fn test_launch_failure_is_a_hard_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(jsonl_store(&temp_dir));
        let clock = ManualClock::new();

        let orch = orchestrator(&clock, ScriptedLauncher::failing(), store);
        let err = orch.run(Uuid::new_v4(), Trigger::Cli).await.unwrap_err();
        assert!(matches!(err, SyncError::Launch(_)));
    }

    #[tokio::test]
    async fn test_no_regions_is_a_hard_error() {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let orch = IngestOrchestrator {
            regions: Vec::new(),
            ..orchestrator(
                &clock,
                ScriptedLauncher::new(session(&clock)),
                Arc::new(jsonl_store(&temp_dir)),
            )
        };

        let err = orch.run(Uuid::new_v4(), Trigger::Cli).await.unwrap_err();
        assert!(matches!(err, SyncError::NoRegions));
    }

    #[tokio::test]
    async fn test_snapshots_are_written() {
        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::new(temp_dir.path().to_path_buf());
        let store = Arc::new(jsonl_store(&temp_dir));
        let clock = ManualClock::new();

        let session = session(&clock)
            .script(SUL, vec![Step::Page(results_page(&["sul-a"]))])
            .script(NORTE, vec![Step::Page(results_page(&["norte-a"]))]);

        let orch = orchestrator(&clock, ScriptedLauncher::new(session), store)
            .with_snapshots(SnapshotWriter::new(&config));
        let report = orch.run(Uuid::new_v4(), Trigger::Cli).await.unwrap();

        let snapshot = report.regions[0].snapshot.as_ref().unwrap();
        assert!(snapshot.starts_with(config.raw_dir().join("sul")));
        assert!(snapshot.exists());
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = IngestReport::finish(
            Uuid::nil(),
            Trigger::Api,
            Utc::now(),
            vec![RegionReport::new("sul", Some(regions()[0].url.clone()))],
        );
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["trigger"], "api");
        assert_eq!(json["totals"]["regionsIngested"], 1);
        assert_eq!(json["regions"][0]["cardsSeen"], 0);
        assert_eq!(json["regions"][0]["outcome"], "ingested");
    }
}
