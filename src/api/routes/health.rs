use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::state::AppState;
use crate::sync::RunStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ingestion: RunStatus,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ingestion: state.runner.state().await.status,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;

    use crate::api::build_router;
    use crate::api::testing::{get_json, state};
    use crate::storage::JsonlMatchStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_health() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(JsonlMatchStore::open_path(temp_dir.path().join("m.jsonl")).unwrap());
        let (status, json) = get_json(build_router(state(store)), "/api/v1/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["ingestion"], "idle");
    }
}
