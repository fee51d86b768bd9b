use std::sync::Arc;
use std::time::Duration;

use crate::storage::MatchStore;
use crate::sync::IngestRunner;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MatchStore>,
    pub runner: IngestRunner,
    /// Shared secret for admin routes; `None` rejects every admin call
    pub admin_key: Option<String>,
    pub query_timeout: Duration,
    pub store_timeout: Duration,
    pub cors_origin: String,
}
