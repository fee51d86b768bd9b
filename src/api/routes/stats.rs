use axum::extract::{Path, State};
use axum::Json;

use crate::api::state::AppState;
use crate::api::ApiError;
use crate::calculate::{query_player_stats, query_team_stats};
use crate::models::{PlayerStats, TeamStats};

/// `GET /players/:player_name/stats`
pub async fn player_stats(
    State(state): State<AppState>,
    Path(player_name): Path<String>,
) -> Result<Json<PlayerStats>, ApiError> {
    let stats = query_player_stats(state.store.as_ref(), &player_name, state.query_timeout).await?;
    Ok(Json(stats))
}

/// `GET /teams/:team_name/stats`
pub async fn team_stats(
    State(state): State<AppState>,
    Path(team_name): Path<String>,
) -> Result<Json<TeamStats>, ApiError> {
    let stats = query_team_stats(state.store.as_ref(), &team_name, state.query_timeout).await?;
    Ok(Json(stats))
}
