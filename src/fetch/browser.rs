//! Headless Chrome sessions via chromiumoxide.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as ChromeBrowser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{FetchError, PageSource, SessionLauncher, SessionState};

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    /// Chrome binary; `None` lets chromiumoxide search the usual places
    pub chrome_executable: Option<PathBuf>,

    pub user_agent: Option<String>,

    /// Keep Chrome's sandbox enabled. Containers without user namespaces
    /// need this off.
    pub sandbox: bool,

    /// How often to re-check whether the container became visible
    pub poll_interval: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            user_agent: None,
            sandbox: true,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Launches one headless browser per ingestion cycle.
pub struct BrowserLauncher {
    settings: BrowserSettings,
}

impl BrowserLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    fn browser_config(&self) -> Result<BrowserConfig, FetchError> {
        let mut builder = BrowserConfig::builder()
            .disable_default_args()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--mute-audio")
            .window_size(1920, 1080);

        if let Some(path) = &self.settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(agent) = &self.settings.user_agent {
            builder = builder.arg(format!("--user-agent={}", agent));
        }
        if !self.settings.sandbox {
            builder = builder.no_sandbox();
        }

        builder.build().map_err(FetchError::Launch)
    }
}

#[async_trait]
impl SessionLauncher for BrowserLauncher {
    async fn launch(&self) -> Result<Box<dyn PageSource>, FetchError> {
        debug!(state = %SessionState::Launching, "Starting headless browser");
        let config = self.browser_config()?;

        let (browser, mut handler) = ChromeBrowser::launch(config)
            .await
            .map_err(|e| FetchError::Launch(e.to_string()))?;

        // The CDP handler must be polled for the browser to make progress
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        info!("Browser session started");
        Ok(Box::new(BrowserSession {
            browser: Mutex::new(Some(browser)),
            handle: Mutex::new(Some(handle)),
            poll_interval: self.settings.poll_interval,
        }))
    }
}

/// A running browser. Each render opens and closes its own tab.
pub struct BrowserSession {
    browser: Mutex<Option<ChromeBrowser>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl BrowserSession {
    async fn load_container(
        page: &Page,
        url: &Url,
        container: &str,
        poll_interval: Duration,
    ) -> Result<String, FetchError> {
        page.goto(url.as_str())
            .await
            .map_err(|e| FetchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        debug!(%url, container, state = %SessionState::WaitingForContent, "Page loaded");
        let probe = visibility_probe(container);
        let wait_err = |e: &dyn std::fmt::Display| FetchError::Wait {
            selector: container.to_string(),
            message: e.to_string(),
        };

        loop {
            let visible: bool = page
                .evaluate(probe.as_str())
                .await
                .map_err(|e| wait_err(&e))?
                .into_value()
                .map_err(|e| wait_err(&e))?;

            if visible {
                let element = page
                    .find_element(container)
                    .await
                    .map_err(|e| wait_err(&e))?;
                return element
                    .outer_html()
                    .await
                    .map_err(|e| wait_err(&e))?
                    .ok_or_else(|| FetchError::ContentNotFound {
                        selector: container.to_string(),
                    });
            }

            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// JavaScript expression that is true once `selector` matches an element
/// that has a layout box and is not hidden by style.
fn visibility_probe(selector: &str) -> String {
    // serde_json quoting gives a valid JS string literal
    let quoted = serde_json::Value::String(selector.to_string()).to_string();
    format!(
        "(() => {{ const el = document.querySelector({}); \
         if (!el) return false; \
         const style = window.getComputedStyle(el); \
         if (style.display === 'none' || style.visibility === 'hidden') return false; \
         const rect = el.getBoundingClientRect(); \
         return rect.width > 0 && rect.height > 0; }})()",
        quoted
    )
}

#[async_trait]
impl PageSource for BrowserSession {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn render(
        &self,
        url: &Url,
        container: &str,
        budget: Duration,
    ) -> Result<String, FetchError> {
        let guard = self.browser.lock().await;
        let browser = guard.as_ref().ok_or(FetchError::SessionClosed)?;

        let work = async {
            debug!(%url, state = %SessionState::Navigating, "Opening tab");
            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| FetchError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            let result = Self::load_container(&page, url, container, self.poll_interval).await;
            if let Err(e) = page.close().await {
                debug!("Failed to close tab: {}", e);
            }
            result
        };

        match tokio::time::timeout(budget, work).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::DeadlineExceeded(budget)),
        }
    }

    async fn close(&self) -> Result<(), FetchError> {
        let browser = self.browser.lock().await.take();
        let handle = self.handle.lock().await.take();

        if let Some(mut browser) = browser {
            if let Err(e) = browser.close().await {
                warn!("Browser did not close cleanly: {}", e);
            }
            if let Err(e) = browser.wait().await {
                warn!("Failed waiting for browser process: {}", e);
            }
            info!("Browser session closed");
        }
        if let Some(handle) = handle {
            handle.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_probe_quotes_selector() {
        let probe = visibility_probe(r#"div[data-x="a"]"#);
        assert!(probe.contains(r#"document.querySelector("div[data-x=\"a\"]")"#));
    }

    #[test]
    fn test_browser_config_builds() {
        let launcher = BrowserLauncher::new(BrowserSettings {
            chrome_executable: Some(PathBuf::from("/usr/bin/chromium")),
            user_agent: Some("lta-results/0.1".to_string()),
            sandbox: false,
            ..BrowserSettings::default()
        });
        assert!(launcher.browser_config().is_ok());
    }
}
