//! Raw page snapshots.
//!
//! Fetched container markup is saved under `raw/<region>/` so a page can be
//! re-parsed later without touching the network.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{StorageConfig, StorageError};

/// Writes snapshots into the raw data directory.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    raw_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            raw_dir: config.raw_dir(),
        }
    }

    /// Save one region's markup. Returns the file path.
    pub async fn write(
        &self,
        region: &str,
        html: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<PathBuf, StorageError> {
        let path = self.path_for(region, html, fetched_at);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        file.write_all(html.as_bytes()).await?;
        file.flush().await?;

        debug!("Saved {} snapshot to {:?}", region, path);
        Ok(path)
    }

    /// `<raw>/<region>/<YYYYmmddTHHMMSSZ>-<hash>.html`
    pub fn path_for(&self, region: &str, html: &str, fetched_at: DateTime<Utc>) -> PathBuf {
        self.raw_dir.join(sanitize(region)).join(format!(
            "{}-{}.html",
            fetched_at.format("%Y%m%dT%H%M%SZ"),
            content_hash(html)
        ))
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }
}

/// First 8 bytes of the SHA-256 of the markup, hex encoded.
pub fn content_hash(html: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(html.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

fn sanitize(region: &str) -> String {
    region
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash("<section>1</section>");
        assert_eq!(a.len(), 16);
        assert_eq!(a, content_hash("<section>1</section>"));
        assert_ne!(a, content_hash("<section>2</section>"));
    }

    #[test]
    fn test_path_layout() {
        let writer = SnapshotWriter::new(&StorageConfig::new(PathBuf::from("/data")));
        let at = Utc.with_ymd_and_hms(2025, 3, 15, 2, 0, 5).unwrap();

        let path = writer.path_for("sul", "<x/>", at);
        assert!(path.starts_with("/data/raw/sul"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("20250315T020005Z-"));
        assert!(name.ends_with(".html"));
    }

    #[test]
    fn test_region_is_sanitized() {
        let writer = SnapshotWriter::new(&StorageConfig::new(PathBuf::from("/data")));
        let path = writer.path_for("../etc", "<x/>", Utc::now());
        assert!(path.starts_with("/data/raw/___etc"));
    }

    #[tokio::test]
    async fn test_write_snapshot() {
        let temp_dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(&StorageConfig::new(temp_dir.path().to_path_buf()));

        let path = writer
            .write("norte", "<section class=\"recent-matches\"></section>", Utc::now())
            .await
            .unwrap();

        let saved = std::fs::read_to_string(path).unwrap();
        assert!(saved.contains("recent-matches"));
    }
}
