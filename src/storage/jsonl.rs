//! JSONL (JSON Lines) storage.
//!
//! JSONL is the source of truth for stored matches.
//! Each line is a valid JSON object representing one record.

use std::cmp::Reverse;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    FindOptions, FindResult, MatchFilter, MatchPatch, MatchStore, SortOrder, StorageConfig,
    StorageError,
};
use crate::models::MatchResult;

/// JSONL file writer.
pub struct JsonlWriter<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: Serialize> JsonlWriter<T> {
    /// Create a new JSONL writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    /// Ensure the parent directory exists.
    fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Append a single entity to the file.
    pub fn append(&self, entity: &T) -> Result<(), StorageError> {
        self.ensure_dir()?;

        // Serialize first so a failure leaves the file untouched
        let json = serde_json::to_string(entity)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        debug!("Appended entity to {:?}", self.path);
        Ok(())
    }

    /// Write entities, replacing the entire file.
    ///
    /// Writes to a sibling temp file and renames it over the original.
    pub fn write_all(&self, entities: &[T]) -> Result<usize, StorageError> {
        self.ensure_dir()?;

        let tmp = self.path.with_extension("jsonl.tmp");
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        let mut count = 0;

        for entity in entities {
            let json = serde_json::to_string(entity)?;
            writeln!(writer, "{}", json)?;
            count += 1;
        }

        writer.flush()?;
        drop(writer);
        fs::rename(&tmp, &self.path)?;
        info!("Wrote {} entities to {:?}", count, self.path);

        Ok(count)
    }
}

/// JSONL file reader.
pub struct JsonlReader<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> JsonlReader<T> {
    /// Create a new JSONL reader for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    /// Check if the file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read all entities from the file, skipping lines that do not parse.
    pub fn read_all(&self) -> Result<Vec<T>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut entities = Vec::new();
        let mut line_num = 0;

        for line in reader.lines() {
            line_num += 1;
            let line = line?;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str(&line) {
                Ok(entity) => entities.push(entity),
                Err(e) => {
                    warn!(
                        "Failed to parse line {} in {:?}: {}",
                        line_num, self.path, e
                    );
                }
            }
        }

        debug!("Read {} entities from {:?}", entities.len(), self.path);
        Ok(entities)
    }
}

/// Match collection backed by a single JSONL file.
///
/// The whole collection is held in memory behind a read/write lock. Inserts
/// append one line; updates and deletes rewrite the file. The file is
/// written before memory is changed, so a failed write leaves both as they
/// were.
pub struct JsonlMatchStore {
    path: PathBuf,
    records: RwLock<Vec<MatchResult>>,
}

impl JsonlMatchStore {
    /// Open the collection under the configured data directory.
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        Self::open_path(config.matches_path())
    }

    /// Open a collection file, creating nothing until the first write.
    pub fn open_path(path: PathBuf) -> Result<Self, StorageError> {
        let records = JsonlReader::<MatchResult>::new(path.clone()).read_all()?;
        info!("Opened match store {:?} ({} records)", path, records.len());

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> JsonlWriter<MatchResult> {
        JsonlWriter::new(self.path.clone())
    }
}

fn sort_records(records: &mut [MatchResult], order: SortOrder) {
    match order {
        SortOrder::NewestFirst => {
            records.sort_by_key(|m| (Reverse(m.date), Reverse(m.created_at)));
        }
        SortOrder::Inserted => {}
    }
}

#[async_trait]
impl MatchStore for JsonlMatchStore {
    async fn find(
        &self,
        filter: &MatchFilter,
        options: &FindOptions,
    ) -> Result<FindResult, StorageError> {
        let records = self.records.read().await;
        let mut matching: Vec<MatchResult> = records
            .iter()
            .filter(|m| filter.matches(m))
            .cloned()
            .collect();
        drop(records);

        let total = matching.len();
        sort_records(&mut matching, options.sort);

        let page = matching
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(FindResult {
            records: page,
            total,
        })
    }

    async fn find_one(&self, filter: &MatchFilter) -> Result<Option<MatchResult>, StorageError> {
        let records = self.records.read().await;
        Ok(records.iter().find(|m| filter.matches(m)).cloned())
    }

    async fn insert(&self, record: &MatchResult) -> Result<(), StorageError> {
        let mut records = self.records.write().await;
        self.writer().append(record)?;
        records.push(record.clone());
        Ok(())
    }

    async fn update(
        &self,
        filter: &MatchFilter,
        patch: &MatchPatch,
    ) -> Result<usize, StorageError> {
        let mut records = self.records.write().await;

        let mut next = records.clone();
        let mut updated = 0;
        for record in next.iter_mut().filter(|m| filter.matches(m)) {
            patch.apply(record);
            updated += 1;
        }

        if updated > 0 {
            self.writer().write_all(&next)?;
            *records = next;
        }
        Ok(updated)
    }

    async fn delete(&self, filter: &MatchFilter) -> Result<usize, StorageError> {
        let mut records = self.records.write().await;

        let (removed, kept): (Vec<_>, Vec<_>) =
            records.iter().cloned().partition(|m| filter.matches(m));

        if !removed.is_empty() {
            self.writer().write_all(&kept)?;
            *records = kept;
        }
        Ok(removed.len())
    }

    async fn count(&self, filter: &MatchFilter) -> Result<usize, StorageError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|m| filter.matches(m)).count())
    }
}
