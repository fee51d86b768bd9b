//! Single-flight execution of ingestion runs.
//!
//! The scheduler and the admin API both start runs through an
//! [`IngestRunner`]. At most one run is in progress at a time; a trigger
//! that arrives while one is running is turned away instead of queued.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{IngestOrchestrator, IngestReport, SyncError, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Pollable status of the current or most recent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestState {
    pub status: RunStatus,
    pub run_id: Option<Uuid>,
    pub trigger: Option<Trigger>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Report of the last run that got as far as producing one
    pub last_report: Option<IngestReport>,

    /// Why the last run could not start
    pub last_error: Option<String>,
}

/// Result of asking for a run.
#[derive(Debug)]
pub enum TriggerOutcome {
    Started {
        run_id: Uuid,
        handle: JoinHandle<Result<IngestReport, SyncError>>,
    },
    AlreadyRunning,
}

/// Starts runs in the background, one at a time.
#[derive(Clone)]
pub struct IngestRunner {
    orchestrator: Arc<IngestOrchestrator>,
    guard: Arc<Mutex<()>>,
    state: Arc<RwLock<IngestState>>,
}

impl IngestRunner {
    pub fn new(orchestrator: Arc<IngestOrchestrator>) -> Self {
        Self {
            orchestrator,
            guard: Arc::new(Mutex::new(())),
            state: Arc::new(RwLock::new(IngestState::default())),
        }
    }

    /// Get current run state.
    pub async fn state(&self) -> IngestState {
        self.state.read().await.clone()
    }

    /// Check if a run is in progress.
    pub fn is_running(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Start a run in the background unless one is already in progress.
    ///
    /// Returns as soon as the run is spawned; the state reads `running`
    /// by then.
    pub async fn trigger(&self, trigger: Trigger) -> TriggerOutcome {
        let permit = match self.guard.clone().try_lock_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(?trigger, "Ingestion already running, ignoring trigger");
                return TriggerOutcome::AlreadyRunning;
            }
        };

        let run_id = Uuid::new_v4();
        {
            let mut state = self.state.write().await;
            state.status = RunStatus::Running;
            state.run_id = Some(run_id);
            state.trigger = Some(trigger);
            state.started_at = Some(Utc::now());
            state.finished_at = None;
            state.last_error = None;
        }
        info!(%run_id, ?trigger, "Ingestion run accepted");

        let this = self.clone();
        let handle = tokio::spawn(async move {
            // Held until the run is over
            let _permit = permit;
            let result = this.orchestrator.run(run_id, trigger).await;
            this.finish(&result).await;
            result
        });

        TriggerOutcome::Started { run_id, handle }
    }

    /// Run in the foreground and wait for the report.
    pub async fn run_now(&self, trigger: Trigger) -> Result<IngestReport, SyncError> {
        match self.trigger(trigger).await {
            TriggerOutcome::Started { handle, .. } => handle
                .await
                .map_err(|e| SyncError::Aborted(e.to_string()))?,
            TriggerOutcome::AlreadyRunning => Err(SyncError::AlreadyRunning),
        }
    }

    async fn finish(&self, result: &Result<IngestReport, SyncError>) {
        let mut state = self.state.write().await;
        state.finished_at = Some(Utc::now());
        match result {
            Ok(report) => {
                state.status = if report.totals.regions_ingested > 0 {
                    RunStatus::Completed
                } else {
                    RunStatus::Failed
                };
                state.last_report = Some(report.clone());
            }
            Err(e) => {
                error!("Ingestion run failed: {}", e);
                state.status = RunStatus::Failed;
                state.last_error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::{GatedLauncher, ScriptedLauncher, ScriptedSession, Step};
    use crate::parse::fixtures::page;
    use crate::retry::ManualClock;
    use crate::storage::JsonlMatchStore;
    use crate::sync::testing::{orchestrator, NORTE, SUL};
    use tempfile::TempDir;

    fn store(temp_dir: &TempDir) -> Arc<JsonlMatchStore> {
        Arc::new(JsonlMatchStore::open_path(temp_dir.path().join("matches.jsonl")).unwrap())
    }

    #[tokio::test]
    async fn test_second_trigger_while_running_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let launcher = GatedLauncher::new();
        let (gate, entered) = (launcher.gate.clone(), launcher.entered.clone());
        let runner = IngestRunner::new(Arc::new(orchestrator(&clock, launcher, store(&temp_dir))));

        let first = runner.trigger(Trigger::Api).await;
        let handle = match first {
            TriggerOutcome::Started { handle, .. } => handle,
            TriggerOutcome::AlreadyRunning => panic!("first trigger must start"),
        };

        entered.notified().await;
        assert!(runner.is_running());
        assert_eq!(runner.state().await.status, RunStatus::Running);
        assert!(matches!(
            runner.trigger(Trigger::Schedule).await,
            TriggerOutcome::AlreadyRunning
        ));
        assert!(matches!(
            runner.run_now(Trigger::Cli).await,
            Err(SyncError::AlreadyRunning)
        ));

        // Release both regions
        gate.notify_one();
        entered.notified().await;
        gate.notify_one();

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.trigger, Trigger::Api);
        assert!(!runner.is_running());

        let state = runner.state().await;
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.run_id, Some(report.run_id));
        assert!(state.last_report.is_some());
    }

    #[tokio::test]
    async fn test_run_now_and_rerun_after_completion() {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::new();

        let make_session = || {
            ScriptedSession::new(clock.clone())
                .script(SUL, vec![Step::Page(page(&[]))])
                .script(NORTE, vec![Step::Page(page(&[]))])
        };
        let runner = IngestRunner::new(Arc::new(orchestrator(
            &clock,
            ScriptedLauncher::new(make_session()),
            store(&temp_dir),
        )));

        let report = runner.run_now(Trigger::Cli).await.unwrap();
        assert_eq!(report.totals.regions_ingested, 2);

        // The scripted launcher hands out a single session, so the second
        // run fails to launch, but it is allowed to start.
        let err = runner.run_now(Trigger::Cli).await.unwrap_err();
        assert!(matches!(err, SyncError::Launch(_)));

        let state = runner.state().await;
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.last_error.unwrap().contains("no browser"));
        // Report from the successful run is kept
        assert!(state.last_report.is_some());
    }

    #[test]
    fn test_state_serialization() {
        let state = IngestState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "idle");
        assert!(json["runId"].is_null());
    }
}
