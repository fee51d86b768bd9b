//! REST API endpoints.
//!
//! Axum-based HTTP API for querying match results and aggregated
//! player/team stats, plus admin routes for ingestion and manual edits.

pub mod routes;
pub mod state;

use axum::{
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::calculate::StatsError;
use crate::storage::StorageError;
use routes::{admin, health, results, stats};
use state::AppState;

/// Header carrying the admin shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// API error types.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };

        (status, Json(body)).into_response()
    }
}

// Backend details go to the log, callers get a generic message.
impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        error!("Storage failure: {}", e);
        ApiError::Internal("storage backend unavailable".to_string())
    }
}

impl From<StatsError> for ApiError {
    fn from(e: StatsError) -> Self {
        match e {
            StatsError::NotFound(what) => ApiError::NotFound(what),
            StatsError::Storage(e) => e.into(),
        }
    }
}

/// Default page size for result listings.
pub const DEFAULT_LIMIT: u32 = 10;

/// Largest page a caller may ask for.
pub const MAX_LIMIT: u32 = 100;

/// Pagination parameters.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

/// Pagination metadata in responses.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub pages: usize,
}

impl PaginationMeta {
    pub fn new(pagination: &Pagination, total: usize) -> Self {
        Self {
            total,
            page: pagination.page,
            limit: pagination.limit,
            pages: total.div_ceil(pagination.limit as usize),
        }
    }
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = if origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                warn!("Invalid CORS origin '{}', allowing any origin", origin);
                AllowOrigin::any()
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(API_KEY_HEADER),
        ])
}

/// Build the application router. Everything lives under `/api/v1`.
pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/scrape", post(admin::trigger_scrape))
        .route("/scrape/status", get(admin::scrape_status))
        .route("/results", post(admin::create_result))
        .route(
            "/results/:match_id",
            put(admin::update_result).delete(admin::delete_result),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_api_key,
        ));

    let v1 = Router::new()
        .route("/health", get(health::health))
        .route("/results", get(results::list_results))
        .route("/results/:match_id", get(results::get_result))
        .route("/players/:player_name/stats", get(stats::player_stats))
        .route("/teams/:team_name/stats", get(stats::team_stats))
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api/v1", v1)
        .layer(cors_layer(&state.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Router fixtures and request helpers for route tests.

    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::util::ServiceExt;

    use super::state::AppState;
    use crate::fetch::testing::ScriptedLauncher;
    use crate::fetch::SessionLauncher;
    use crate::retry::ManualClock;
    use crate::storage::MatchStore;
    use crate::sync::testing::orchestrator;
    use crate::sync::IngestRunner;

    pub const ADMIN_KEY: &str = "s3cret";

    pub fn state_with(store: Arc<dyn MatchStore>, launcher: impl SessionLauncher + 'static) -> AppState {
        let clock = ManualClock::new();
        let runner = IngestRunner::new(Arc::new(orchestrator(&clock, launcher, store.clone())));
        AppState {
            store,
            runner,
            admin_key: Some(ADMIN_KEY.to_string()),
            query_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
            cors_origin: "*".to_string(),
        }
    }

    pub fn state(store: Arc<dyn MatchStore>) -> AppState {
        state_with(store, ScriptedLauncher::failing())
    }

    pub async fn send(
        app: axum::Router,
        method: &str,
        uri: &str,
        api_key: Option<&str>,
        body: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let resp = app.oneshot(request).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        send(app, "GET", uri, None, None).await
    }
}
