//! Per-feed tick history and its durable storage.
//!
//! Every append rewrites the feed's whole history through the configured
//! [`HistoryPersistence`] backend before returning, so the stored sequence
//! always matches the in-memory one.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::model::{Movement, MovementCounts, TickRecord};

/// Key-value storage of whole tick sequences, one key per feed.
pub trait HistoryPersistence {
    fn read(&self, key: &str) -> Result<Vec<TickRecord>, AppError>;
    fn write(&self, key: &str, records: &[TickRecord]) -> Result<(), AppError>;
}

/// One pretty-printed JSON array file per key.
#[derive(Debug, Clone)]
pub struct JsonFileHistory {
    dir: PathBuf,
}

impl JsonFileHistory {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl HistoryPersistence for JsonFileHistory {
    fn read(&self, key: &str) -> Result<Vec<TickRecord>, AppError> {
        let path = self.path_for(key);
        let payload = match std::fs::read_to_string(&path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&payload)?)
    }

    fn write(&self, key: &str, records: &[TickRecord]) -> Result<(), AppError> {
        let path = self.path_for(key);
        let tmp_path = self.dir.join(format!(".{}.tmp", key));
        let json = serde_json::to_vec_pretty(records)?;

        // Readers only ever see the old file or the complete new one.
        let result = (|| -> Result<(), AppError> {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, &path)?;
            sync_dir(&self.dir)?;
            Ok(())
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }
}

/// Make a completed rename durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// In-process backend; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    data: Arc<Mutex<HashMap<String, Vec<TickRecord>>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryPersistence for MemoryHistory {
    fn read(&self, key: &str) -> Result<Vec<TickRecord>, AppError> {
        let guard = self
            .data
            .lock()
            .map_err(|_| AppError::Io(std::io::Error::other("memory history lock poisoned")))?;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(key.to_string()))
    }

    fn write(&self, key: &str, records: &[TickRecord]) -> Result<(), AppError> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| AppError::Io(std::io::Error::other("memory history lock poisoned")))?;
        guard.insert(key.to_string(), records.to_vec());
        Ok(())
    }
}

#[derive(Debug)]
struct FeedHistory {
    key: String,
    records: Vec<TickRecord>,
}

/// Ordered, append-only tick log for every tracked feed.
#[derive(Debug)]
pub struct TickHistoryStore<P> {
    persistence: P,
    feeds: HashMap<String, FeedHistory>,
}

impl<P: HistoryPersistence> TickHistoryStore<P> {
    pub fn new(persistence: P) -> Self {
        Self {
            persistence,
            feeds: HashMap::new(),
        }
    }

    /// Reload `feed` from `key`. Missing or unreadable data becomes an empty
    /// history; the caller never sees the failure.
    pub fn load(&mut self, feed: &str, key: &str) -> &[TickRecord] {
        let records = match self.persistence.read(key) {
            Ok(records) => records,
            Err(AppError::NotFound(_)) => {
                tracing::debug!(feed, key, "No persisted history, starting empty");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(feed, key, error = %e, "Discarding unreadable history");
                Vec::new()
            }
        };
        let entry = self.feeds.entry(feed.to_string()).or_insert(FeedHistory {
            key: key.to_string(),
            records: Vec::new(),
        });
        entry.key = key.to_string();
        entry.records = records;
        &entry.records
    }

    /// Append `record` and persist the full sequence. On a failed write the
    /// record is dropped from memory again and the error returned.
    pub fn append(&mut self, feed: &str, record: TickRecord) -> Result<(), AppError> {
        let entry = self
            .feeds
            .get_mut(feed)
            .ok_or_else(|| AppError::UnknownFeed(feed.to_string()))?;
        entry.records.push(record);
        if let Err(e) = self.persistence.write(&entry.key, &entry.records) {
            entry.records.pop();
            return Err(e);
        }
        Ok(())
    }

    pub fn counts(&self, feed: &str) -> MovementCounts {
        let mut counts = MovementCounts::default();
        for record in self.records(feed) {
            match record.movement {
                Movement::Up => counts.up += 1,
                Movement::Down => counts.down += 1,
            }
        }
        counts
    }

    pub fn records(&self, feed: &str) -> &[TickRecord] {
        self.feeds
            .get(feed)
            .map(|h| h.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self, feed: &str) -> usize {
        self.records(feed).len()
    }

    pub fn is_empty(&self, feed: &str) -> bool {
        self.len(feed) == 0
    }
}
