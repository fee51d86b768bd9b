use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::state::AppState;
use crate::api::{ApiError, Pagination, PaginationMeta};
use crate::models::MatchResult;
use crate::storage::{with_timeout, FindOptions, MatchFilter};

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub region: Option<String>,
    pub team: Option<String>,
    pub limit: Option<u32>,
    pub page: Option<u32>,
}

impl ResultsQuery {
    /// Blank parameters count as absent.
    fn filter(&self) -> MatchFilter {
        let mut filter = MatchFilter::All;
        if let Some(region) = self.region.as_deref().filter(|r| !r.trim().is_empty()) {
            filter = filter.and(MatchFilter::region(region.trim()));
        }
        if let Some(team) = self.team.as_deref().filter(|t| !t.trim().is_empty()) {
            filter = filter.and(MatchFilter::team(team.trim()));
        }
        filter
    }
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub results: Vec<MatchResult>,
    pub pagination: PaginationMeta,
}

/// `GET /results`, newest first.
pub async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ResultsResponse>, ApiError> {
    let pagination = Pagination::new(query.page, query.limit);
    let options = FindOptions::page(pagination.offset(), pagination.limit as usize);
    let filter = query.filter();

    let found = with_timeout(
        "find",
        state.query_timeout,
        state.store.find(&filter, &options),
    )
    .await?;

    Ok(Json(ResultsResponse {
        pagination: PaginationMeta::new(&pagination, found.total),
        results: found.records,
    }))
}

/// `GET /results/:match_id`
pub async fn get_result(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<MatchResult>, ApiError> {
    let filter = MatchFilter::match_id(&match_id);
    with_timeout("find_one", state.query_timeout, state.store.find_one(&filter))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("match '{}'", match_id)))
}
