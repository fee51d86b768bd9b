//! Page fetching through a scoped session.
//!
//! A [`SessionLauncher`] opens one [`PageSource`] per ingestion cycle. The
//! [`Fetcher`] drives that session for each region: navigate, wait for the
//! results container to appear, return its markup. Attempts are retried
//! under a [`RetryPolicy`]; every region gets a deadline, and once it has
//! passed no further attempts are made for that region.

pub mod browser;
pub mod http;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::retry::{retry, Clock, Retried, RetryPolicy};

pub use browser::{BrowserLauncher, BrowserSettings};
pub use http::HttpLauncher;

/// Errors that can occur while fetching a page.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to launch session: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Waiting for '{selector}' failed: {message}")]
    Wait { selector: String, message: String },

    #[error("Results container '{selector}' not found")]
    ContentNotFound { selector: String },

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Session already closed")]
    SessionClosed,
}

impl FetchError {
    /// Whether another attempt on the same session could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::DeadlineExceeded(_) | FetchError::SessionClosed | FetchError::Launch(_)
        )
    }

    /// The step of the session lifecycle that failed.
    pub fn state(&self) -> SessionState {
        match self {
            FetchError::Launch(_) => SessionState::Launching,
            FetchError::Navigation { .. } | FetchError::HttpStatus { .. } | FetchError::Http(_) => {
                SessionState::Navigating
            }
            FetchError::Wait { .. } | FetchError::ContentNotFound { .. } => {
                SessionState::WaitingForContent
            }
            FetchError::DeadlineExceeded(_) | FetchError::SessionClosed => SessionState::Failed,
        }
    }
}

/// Lifecycle of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Launching,
    Navigating,
    WaitingForContent,
    Extracted,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Launching => "launching",
            SessionState::Navigating => "navigating",
            SessionState::WaitingForContent => "waiting_for_content",
            SessionState::Extracted => "extracted",
            SessionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Wall-clock budget for one region's fetch, shared by all its attempts.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn start(clock: &dyn Clock, limit: Duration) -> Self {
        Self {
            started: clock.now(),
            limit,
        }
    }

    /// Time left, or `DeadlineExceeded` once the budget is spent.
    pub fn remaining(&self, clock: &dyn Clock) -> Result<Duration, FetchError> {
        let elapsed = clock.now().saturating_duration_since(self.started);
        match self.limit.checked_sub(elapsed) {
            Some(left) if !left.is_zero() => Ok(left),
            _ => Err(FetchError::DeadlineExceeded(self.limit)),
        }
    }
}

/// An open session able to render pages.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Session kind for logging.
    fn name(&self) -> &'static str;

    /// Load `url`, wait until `container` is visible and return its outer
    /// markup. Must give up with `DeadlineExceeded` after `budget`.
    async fn render(&self, url: &Url, container: &str, budget: Duration)
        -> Result<String, FetchError>;

    /// Release the session. Further renders fail with `SessionClosed`.
    async fn close(&self) -> Result<(), FetchError>;
}

/// Opens sessions.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageSource>, FetchError>;
}

/// Configuration for the fetcher.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Selector of the element holding the match cards
    pub container_selector: String,

    /// Deadline for one region, across all of its attempts
    pub session_timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            container_selector: ".recent-matches".to_string(),
            session_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Fetches region pages through an open session with retry.
pub struct Fetcher {
    config: FetcherConfig,
    clock: Arc<dyn Clock>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Fetch the results container for one region.
    ///
    /// Transient failures are retried up to the attempt cap. A deadline
    /// failure ends the region immediately.
    pub async fn fetch(
        &self,
        session: &dyn PageSource,
        region: &str,
        url: &Url,
    ) -> Retried<String, FetchError> {
        let clock = self.clock.as_ref();
        let container = self.config.container_selector.as_str();
        let deadline = Deadline::start(clock, self.config.session_timeout);
        let operation_name = format!("Fetch {} ({})", region, session.name());

        let outcome = retry(
            &self.config.retry,
            clock,
            &operation_name,
            FetchError::is_retryable,
            |attempt| async move {
                let budget = deadline.remaining(clock)?;
                debug!(region, attempt, %url, "Navigating");
                session.render(url, container, budget).await
            },
        )
        .await;

        match &outcome.result {
            Ok(html) => info!(
                region,
                attempts = outcome.attempts,
                bytes = html.len(),
                state = %SessionState::Extracted,
                "Fetched results page"
            ),
            Err(e) => warn!(
                region,
                attempts = outcome.attempts,
                state = %e.state(),
                "Giving up on region: {}",
                e
            ),
        }

        outcome
    }
}
