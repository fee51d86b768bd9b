//! Plain HTTP sessions for pages that render server-side.
//!
//! No script execution happens here: the results container has to be in the
//! served markup. Useful for mirrors, saved pages and tests against a local
//! server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use scraper::Html;
use tracing::{debug, info};
use url::Url;

use super::{FetchError, PageSource, SessionLauncher};
use crate::extract::parse_selector;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Builds a reqwest client per ingestion cycle.
#[derive(Debug, Clone)]
pub struct HttpLauncher {
    user_agent: String,

    /// Responses larger than this are rejected
    max_content_size: usize,
}

impl HttpLauncher {
    pub fn new(user_agent: Option<String>) -> Self {
        Self {
            user_agent: user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            max_content_size: 20 * 1024 * 1024,
        }
    }
}

impl Default for HttpLauncher {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl SessionLauncher for HttpLauncher {
    async fn launch(&self) -> Result<Box<dyn PageSource>, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("lta-results/0.1.0")),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        debug!("HTTP session started");
        Ok(Box::new(HttpSession {
            client,
            max_content_size: self.max_content_size,
        }))
    }
}

pub struct HttpSession {
    client: Client,
    max_content_size: usize,
}

impl HttpSession {
    async fn get(&self, url: &Url) -> Result<String, FetchError> {
        info!("Fetching {}", url);
        let response = self.client.get(url.as_str()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let body = response.text().await?;
        if body.len() > self.max_content_size {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                message: format!(
                    "content too large: {} bytes (max {})",
                    body.len(),
                    self.max_content_size
                ),
            });
        }
        Ok(body)
    }
}

/// Pull the outer markup of the first element matching `container`.
pub(crate) fn select_container(body: &str, container: &str) -> Result<String, FetchError> {
    let selector = parse_selector(container).map_err(|e| FetchError::Wait {
        selector: container.to_string(),
        message: e.to_string(),
    })?;

    let document = Html::parse_document(body);
    let found = document.select(&selector).next().map(|el| el.html());
    found.ok_or_else(|| FetchError::ContentNotFound {
        selector: container.to_string(),
    })
}

#[async_trait]
impl PageSource for HttpSession {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn render(
        &self,
        url: &Url,
        container: &str,
        budget: Duration,
    ) -> Result<String, FetchError> {
        let body = match tokio::time::timeout(budget, self.get(url)).await {
            Ok(body) => body?,
            Err(_) => return Err(FetchError::DeadlineExceeded(budget)),
        };
        select_container(&body, container)
    }

    async fn close(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_container_returns_outer_html() {
        let body = r#"<html><body>
            <nav>menu</nav>
            <section class="recent-matches"><div class="match-card">x</div></section>
        </body></html>"#;

        let html = select_container(body, ".recent-matches").unwrap();
        assert!(html.starts_with("<section class=\"recent-matches\">"));
        assert!(html.contains("match-card"));
        assert!(!html.contains("menu"));
    }

    #[test]
    fn test_select_container_missing() {
        let err = select_container("<html><body></body></html>", ".recent-matches").unwrap_err();
        assert!(matches!(err, FetchError::ContentNotFound { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_launch_builds_client() {
        let session = HttpLauncher::default().launch().await.unwrap();
        assert_eq!(session.name(), "http");
        session.close().await.unwrap();
    }
}
