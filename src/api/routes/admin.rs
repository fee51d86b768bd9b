//! Admin routes: ingestion control and manual edits of match records.
//!
//! Every route here sits behind [`require_api_key`].

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::state::AppState;
use crate::api::{ApiError, API_KEY_HEADER};
use crate::models::{decide_winner, MatchResult, Player};
use crate::storage::{with_timeout, MatchFilter, MatchPatch};
use crate::sync::{IngestState, RunStatus, Trigger, TriggerOutcome};

// ── Auth ─────────────────────────────────────────────────────────

/// Reject requests whose `X-API-Key` (trimmed) is not the configured secret.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if provided.is_empty() {
        return Err(ApiError::Unauthorized("missing API key".to_string()));
    }

    match state.admin_key.as_deref() {
        Some(expected) if expected == provided => Ok(next.run(request).await),
        Some(_) => Err(ApiError::Unauthorized("invalid API key".to_string())),
        None => {
            warn!("Admin request rejected: no admin API key is configured");
            Err(ApiError::Unauthorized("invalid API key".to_string()))
        }
    }
}

// ── Ingestion ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeAccepted {
    pub run_id: Uuid,
    pub status: RunStatus,
}

/// `POST /admin/scrape`: start a run in the background.
pub async fn trigger_scrape(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ScrapeAccepted>), ApiError> {
    match state.runner.trigger(Trigger::Api).await {
        // The handle is dropped; the run keeps going and is polled via status
        TriggerOutcome::Started { run_id, .. } => Ok((
            StatusCode::ACCEPTED,
            Json(ScrapeAccepted {
                run_id,
                status: RunStatus::Running,
            }),
        )),
        TriggerOutcome::AlreadyRunning => {
            Err(ApiError::Conflict("Ingestion already running".to_string()))
        }
    }
}

/// `GET /admin/scrape/status`
pub async fn scrape_status(State(state): State<AppState>) -> Json<IngestState> {
    Json(state.runner.state().await)
}

// ── Match records ────────────────────────────────────────────────

/// Body of `POST /admin/results`.
///
/// `winner`, when given, must agree with the scores. Timestamps are always
/// set by the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatch {
    pub match_id: String,
    pub date: NaiveDate,
    pub region: String,
    pub team_a: String,
    pub team_b: String,
    pub score_a: u32,
    pub score_b: u32,
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub mvp: Option<String>,
    #[serde(default)]
    pub tournament_stage: Option<String>,
    #[serde(default)]
    pub vod: Option<String>,
}

impl NewMatch {
    fn into_record(self) -> Result<MatchResult, ApiError> {
        let expected = decide_winner(&self.team_a, &self.team_b, self.score_a, self.score_b);
        if let Some(winner) = &self.winner {
            if *winner != expected {
                return Err(ApiError::BadRequest(format!(
                    "winner '{}' does not match the score {}-{}",
                    winner, self.score_a, self.score_b
                )));
            }
        }

        let mut record = MatchResult::new(
            self.match_id,
            self.date,
            self.region,
            self.team_a,
            self.team_b,
            self.score_a,
            self.score_b,
        )
        .with_players(self.players);
        record.duration = self.duration;
        record.mvp = self.mvp;
        record.tournament_stage = self.tournament_stage;
        record.vod = self.vod;

        validate(&record)?;
        Ok(record)
    }
}

fn validate(record: &MatchResult) -> Result<(), ApiError> {
    let required = [
        ("matchId", &record.match_id),
        ("region", &record.region),
        ("teamA", &record.team_a),
        ("teamB", &record.team_b),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
        }
    }
    if record.team_a == record.team_b {
        return Err(ApiError::BadRequest(
            "teamA and teamB must be different teams".to_string(),
        ));
    }
    if let Some(i) = record.players.iter().position(|p| p.name.trim().is_empty()) {
        return Err(ApiError::BadRequest(format!(
            "players[{}].name must not be empty",
            i
        )));
    }
    Ok(())
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// `POST /admin/results`
pub async fn create_result(
    State(state): State<AppState>,
    payload: Result<Json<NewMatch>, JsonRejection>,
) -> Result<(StatusCode, Json<MatchResult>), ApiError> {
    let record = body(payload)?.into_record()?;

    let filter = MatchFilter::match_id(&record.match_id);
    let existing = with_timeout("count", state.query_timeout, state.store.count(&filter)).await?;
    if existing > 0 {
        return Err(ApiError::Conflict(format!(
            "match '{}' already exists",
            record.match_id
        )));
    }

    with_timeout("insert", state.store_timeout, state.store.insert(&record)).await?;
    info!(match_id = %record.match_id, "Match created by admin");
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PUT /admin/results/:match_id`: partial update.
pub async fn update_result(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
    payload: Result<Json<MatchPatch>, JsonRejection>,
) -> Result<Json<MatchResult>, ApiError> {
    let patch = body(payload)?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest("no fields to update".to_string()));
    }

    let filter = MatchFilter::match_id(&match_id);
    let not_found = || ApiError::NotFound(format!("match '{}'", match_id));

    let mut preview = with_timeout("find_one", state.query_timeout, state.store.find_one(&filter))
        .await?
        .ok_or_else(not_found)?;
    patch.apply(&mut preview);
    validate(&preview)?;

    let updated = with_timeout(
        "update",
        state.store_timeout,
        state.store.update(&filter, &patch),
    )
    .await?;
    if updated == 0 {
        return Err(not_found());
    }
    info!(%match_id, updated, "Match updated by admin");

    let record = with_timeout("find_one", state.query_timeout, state.store.find_one(&filter))
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: usize,
}

/// `DELETE /admin/results/:match_id`
pub async fn delete_result(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let filter = MatchFilter::match_id(&match_id);
    let deleted = with_timeout("delete", state.store_timeout, state.store.delete(&filter)).await?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("match '{}'", match_id)));
    }
    info!(%match_id, deleted, "Match deleted by admin");
    Ok(Json(DeleteResponse { deleted }))
}
