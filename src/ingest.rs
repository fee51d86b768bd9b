//! Offline import of saved results pages.
//!
//! Re-runs the parser over a page saved to disk (a raw snapshot or a page
//! saved from a browser) and stores the matches, with the same per-record
//! isolation as a live run.

use std::path::Path;

use tracing::info;

use crate::sync::{IngestOrchestrator, RegionReport, SyncError};

/// Import one saved page for `region`.
pub async fn import_file(
    orchestrator: &IngestOrchestrator,
    region: &str,
    path: &Path,
) -> Result<RegionReport, SyncError> {
    info!("Importing {} results from {:?}", region, path);
    let html = tokio::fs::read_to_string(path).await?;
    Ok(orchestrator.ingest_page(region, &html).await)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::fetch::testing::ScriptedLauncher;
    use crate::parse::fixtures::{card, page, player_row};
    use crate::retry::ManualClock;
    use crate::storage::{JsonlMatchStore, MatchFilter, MatchStore};
    use crate::sync::testing::orchestrator;
    use crate::sync::RegionOutcome;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_import_saved_page() {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let store =
            Arc::new(JsonlMatchStore::open_path(temp_dir.path().join("matches.jsonl")).unwrap());
        let orch = orchestrator(&clock, ScriptedLauncher::failing(), store.clone());

        let html = page(&[
            card(
                None,
                "15 Mar 2025",
                ("paiN Gaming", "LOUD"),
                ("2", "0"),
                &[player_row("Robo", "paiN Gaming", "Aatrox", ("3", "0", "4"))],
            ),
            card(
                None,
                "bad",
                ("Fluxo", "RED Canids"),
                ("1", "2"),
                &[],
            ),
        ]);
        let file = temp_dir.path().join("sul.html");
        std::fs::write(&file, html).unwrap();

        let report = import_file(&orch, "sul", &file).await.unwrap();

        assert_eq!(report.outcome, RegionOutcome::Ingested);
        assert_eq!(report.cards_seen, 2);
        assert_eq!(report.cards_dropped, 1);
        assert_eq!(report.stored, 1);
        assert!(store
            .find_one(&MatchFilter::match_id("sul-1"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_import_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::new();
        let store =
            Arc::new(JsonlMatchStore::open_path(temp_dir.path().join("matches.jsonl")).unwrap());
        let orch = orchestrator(&clock, ScriptedLauncher::failing(), store);

        let err = import_file(&orch, "sul", &temp_dir.path().join("missing.html"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
