//! Configuration loading and validation.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `LTA__`-prefixed environment variables (`LTA__SERVER__PORT=9000`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::fetch::{BrowserSettings, FetcherConfig};
use crate::parse::CardSelectors;
use crate::retry::{Backoff, RetryPolicy};
use crate::storage::StorageConfig;
use crate::sync::{DailySchedule, Region};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Failed to render config: {0}")]
    RenderError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origin, `*` for any
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "*".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Name of the environment variable holding the shared secret
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_api_key_env() -> String {
    "ADMIN_API_KEY".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
        }
    }
}

impl AdminConfig {
    /// The admin secret, if set and non-blank.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// How pages are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScraperMode {
    /// Headless Chromium, for script-rendered pages
    #[default]
    Browser,
    /// Plain HTTP GET, for server-rendered pages
    Http,
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    #[serde(default)]
    pub mode: ScraperMode,

    #[serde(default = "default_regions")]
    pub regions: Vec<Region>,

    #[serde(default = "default_container_selector")]
    pub container_selector: String,

    /// Deadline per region, across all attempts
    #[serde(default = "default_session_timeout")]
    pub session_timeout_seconds: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: Backoff,

    #[serde(default = "default_store_timeout")]
    pub store_timeout_seconds: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,

    /// Daily run time, `HH:MM` UTC
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Save fetched markup under `<data_dir>/raw`
    #[serde(default = "default_true")]
    pub keep_snapshots: bool,

    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub sandbox: bool,

    #[serde(default)]
    pub user_agent: Option<String>,

    #[serde(default)]
    pub selectors: CardSelectors,
}

const DEFAULT_REGIONS: &[(&str, &str)] = &[
    (
        "sul",
        "https://lolesports.com/standings/lta-sul/lta_2025_split1/regular_season",
    ),
    (
        "norte",
        "https://lolesports.com/standings/lta-norte/lta_2025_split1/regular_season",
    ),
];

fn default_regions() -> Vec<Region> {
    DEFAULT_REGIONS
        .iter()
        .filter_map(|(name, url)| Url::parse(url).ok().map(|url| Region::new(*name, url)))
        .collect()
}

fn default_container_selector() -> String {
    ".recent-matches".to_string()
}

fn default_session_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    3
}

fn default_store_timeout() -> u64 {
    5
}

fn default_query_timeout() -> u64 {
    10
}

fn default_schedule() -> String {
    "02:00".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            mode: ScraperMode::default(),
            regions: default_regions(),
            container_selector: default_container_selector(),
            session_timeout_seconds: default_session_timeout(),
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
            backoff: Backoff::default(),
            store_timeout_seconds: default_store_timeout(),
            query_timeout_seconds: default_query_timeout(),
            schedule: default_schedule(),
            keep_snapshots: true,
            chrome_executable: None,
            sandbox: true,
            user_agent: None,
            selectors: CardSelectors::default(),
        }
    }
}

impl ScraperConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
        }
    }

    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            container_selector: self.container_selector.clone(),
            session_timeout: self.session_timeout(),
            retry: self.retry_policy(),
        }
    }

    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            chrome_executable: self.chrome_executable.clone(),
            user_agent: self.user_agent.clone(),
            sandbox: self.sandbox,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn daily_schedule(&self) -> Result<DailySchedule, ConfigError> {
        self.schedule.parse().map_err(ConfigError::ValidationError)
    }

    /// Keep only the named regions, in configured order.
    pub fn select_regions(&self, names: &[String]) -> Result<Vec<Region>, ConfigError> {
        if names.is_empty() {
            return Ok(self.regions.clone());
        }
        for name in names {
            if !self.regions.iter().any(|r| &r.name == name) {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown region '{}'",
                    name
                )));
            }
        }
        Ok(self
            .regions
            .iter()
            .filter(|r| names.contains(&r.name))
            .cloned()
            .collect())
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub scraper: ScraperConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            server: ServerConfig::default(),
            admin: AdminConfig::default(),
            scraper: ScraperConfig::default(),
        }
    }
}

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "LTA";

impl AppConfig {
    /// Load `path` if it exists, then the environment. Anything left unset
    /// takes its default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig::new(self.data_dir.clone())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));
        let s = &self.scraper;

        if self.server.port == 0 {
            return invalid("Server port must be greater than 0");
        }
        if s.session_timeout_seconds == 0 {
            return invalid("Session timeout must be greater than 0");
        }
        if s.store_timeout_seconds == 0 || s.query_timeout_seconds == 0 {
            return invalid("Store timeouts must be greater than 0");
        }
        if s.max_attempts == 0 {
            return invalid("Max attempts must be at least 1");
        }
        if s.poll_interval_ms == 0 {
            return invalid("Poll interval must be greater than 0");
        }
        if s.container_selector.trim().is_empty() {
            return invalid("Container selector must not be empty");
        }

        for (i, region) in s.regions.iter().enumerate() {
            if region.name.trim().is_empty() {
                return invalid("Region names must not be empty");
            }
            if !matches!(region.url.scheme(), "http" | "https") {
                return Err(ConfigError::ValidationError(format!(
                    "Region '{}' must use an http(s) URL",
                    region.name
                )));
            }
            if s.regions[..i].iter().any(|r| r.name == region.name) {
                return Err(ConfigError::ValidationError(format!(
                    "Region '{}' is configured twice",
                    region.name
                )));
            }
        }

        s.daily_schedule()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.admin.api_key_env, "ADMIN_API_KEY");
        assert_eq!(config.scraper.mode, ScraperMode::Browser);
        assert_eq!(config.scraper.session_timeout(), Duration::from_secs(60));

        let names: Vec<_> = config.scraper.regions.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["sul", "norte"]);
    }

    #[test]
    fn test_config_validation_ok() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_port() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_timeouts() {
        let mut config = AppConfig::default();
        config.scraper.session_timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scraper.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_schedule() {
        let mut config = AppConfig::default();
        config.scraper.schedule = "2am".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_validation_regions() {
        let mut config = AppConfig::default();
        config.scraper.regions[1].name = "sul".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scraper.regions[0].url = Url::parse("ftp://example.com/sul").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::load(&temp_dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.scraper.regions.len(), 2);
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/var/lib/lta"

[server]
port = 9090

[scraper]
mode = "http"
max_attempts = 5
schedule = "04:30"

[scraper.backoff]
kind = "exponential"
initial_ms = 1000
multiplier = 2.0
max_ms = 30000

[[scraper.regions]]
name = "sul"
url = "https://results.example/sul"

[scraper.selectors]
card = ".game-card"
"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/lta"));
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.scraper.mode, ScraperMode::Http);
        assert_eq!(config.scraper.max_attempts, 5);
        assert_eq!(config.scraper.regions.len(), 1);
        assert_eq!(config.scraper.selectors.card, ".game-card");
        assert_eq!(config.scraper.selectors.date, ".match-date");
        assert_eq!(
            config.scraper.backoff,
            Backoff::Exponential {
                initial_ms: 1000,
                multiplier: 2.0,
                max_ms: 30000
            }
        );
    }

    #[test]
    fn test_select_regions() {
        let scraper = ScraperConfig::default();

        assert_eq!(scraper.select_regions(&[]).unwrap().len(), 2);
        let norte = scraper.select_regions(&["norte".to_string()]).unwrap();
        assert_eq!(norte.len(), 1);
        assert_eq!(norte[0].name, "norte");
        assert!(scraper.select_regions(&["emea".to_string()]).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();

        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.data_dir, parsed.data_dir);
        assert_eq!(config.scraper.regions, parsed.scraper.regions);
    }
}
