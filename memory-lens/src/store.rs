use crate::types::{normalize_image_path, ImageRecord, IndexerError, RecordStatus, Result, SearchDocument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Why a load fell back to an empty store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAnomaly {
    Empty,
    Unreadable(String),
    Corrupt(String),
}

impl std::fmt::Display for StoreAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreAnomaly::Empty => f.write_str("store file is empty"),
            StoreAnomaly::Unreadable(e) => write!(f, "store file unreadable: {}", e),
            StoreAnomaly::Corrupt(e) => write!(f, "store file is not a valid record list: {}", e),
        }
    }
}

/// Per-status record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub described: usize,
    pub failed: usize,
}

/// On-disk shape accepted by `load`. Also reads the older
/// `{"image_path", "response"}` files.
#[derive(Debug, Deserialize)]
struct StoredRecord {
    image_path: String,
    #[serde(default, alias = "response")]
    description: Option<String>,
    #[serde(default)]
    status: Option<RecordStatus>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    fn into_record(self) -> ImageRecord {
        let has_text = self.description.as_deref().map(|d| !d.trim().is_empty()).unwrap_or(false);
        let status = self.status.unwrap_or(if has_text {
            RecordStatus::Described
        } else {
            RecordStatus::Pending
        });

        ImageRecord {
            image_path: normalize_image_path(&self.image_path),
            description: self.description,
            status,
            error: self.error,
            attempts: self.attempts,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Durable record set keyed by normalized image path.
/// The single source of truth for descriptions.
#[derive(Debug, Default, Clone)]
pub struct DescriptionStore {
    records: BTreeMap<String, ImageRecord>,
    anomaly: Option<StoreAnomaly>,
}

impl DescriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the store at `path`. Never fails: a missing file gives an empty
    /// store, an empty, unreadable or invalid file gives an empty store with
    /// the anomaly recorded and a warning logged.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("No description store at {}, starting empty", path.display());
            return Self::new();
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => return Self::fallback(path, StoreAnomaly::Unreadable(e.to_string())),
        };

        if content.trim().is_empty() {
            return Self::fallback(path, StoreAnomaly::Empty);
        }

        let stored: Vec<StoredRecord> = match serde_json::from_str(&content) {
            Ok(stored) => stored,
            Err(e) => return Self::fallback(path, StoreAnomaly::Corrupt(e.to_string())),
        };

        let total = stored.len();
        let mut store = Self::new();
        for record in stored {
            store.upsert(record.into_record());
        }

        if store.len() < total {
            info!(
                "Merged {} duplicate entries while loading {}",
                total - store.len(),
                path.display()
            );
        }
        info!("Loaded {} records from {}", store.len(), path.display());
        store
    }

    fn fallback(path: &Path, anomaly: StoreAnomaly) -> Self {
        warn!(
            path = %path.display(),
            error = %anomaly,
            "description store could not be loaded, treating it as empty; saving will replace it"
        );
        Self {
            records: BTreeMap::new(),
            anomaly: Some(anomaly),
        }
    }

    /// Set when `load` had to discard the file's content.
    pub fn anomaly(&self) -> Option<&StoreAnomaly> {
        self.anomaly.as_ref()
    }

    /// Insert or replace the record for its path. Returns the previous record.
    pub fn upsert(&mut self, mut record: ImageRecord) -> Option<ImageRecord> {
        record.image_path = normalize_image_path(&record.image_path);
        self.records.insert(record.image_path.clone(), record)
    }

    pub fn get(&self, image_path: &str) -> Option<&ImageRecord> {
        self.records.get(&normalize_image_path(image_path))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered by path.
    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.values()
    }

    pub fn with_status(&self, status: RecordStatus) -> impl Iterator<Item = &ImageRecord> {
        self.records.values().filter(move |r| r.status == status)
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in self.records.values() {
            match record.status {
                RecordStatus::Pending => counts.pending += 1,
                RecordStatus::Described => counts.described += 1,
                RecordStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Search projection of every described record.
    pub fn search_documents(&self) -> Vec<SearchDocument> {
        self.records.values().filter_map(|r| r.to_search_document()).collect()
    }

    /// Put failed records back to pending with a fresh attempt budget.
    /// An empty `paths` requeues every failed record. Returns how many changed.
    pub fn requeue_failed(&mut self, paths: &[String]) -> usize {
        let wanted: Vec<String> = paths.iter().map(|p| normalize_image_path(p)).collect();
        let mut changed = 0;

        for record in self.records.values_mut() {
            if record.status != RecordStatus::Failed {
                continue;
            }
            if !wanted.is_empty() && !wanted.contains(&record.image_path) {
                continue;
            }
            record.status = RecordStatus::Pending;
            record.error = None;
            record.attempts = 0;
            record.updated_at = Utc::now();
            changed += 1;
        }

        debug!("Requeued {} failed records", changed);
        changed
    }

    /// Serialize every record to `path` atomically: the JSON is written to a
    /// temporary file next to the target and renamed over it.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let write_error = |reason: String| IndexerError::StoreWrite {
            path: path.to_path_buf(),
            reason,
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| write_error(e.to_string()))?;

        let mut file = NamedTempFile::new_in(&dir).map_err(|e| write_error(e.to_string()))?;
        let bytes = self.to_pretty_json()?;
        file.write_all(&bytes).map_err(|e| write_error(e.to_string()))?;
        file.as_file().sync_all().map_err(|e| write_error(e.to_string()))?;
        // the temp file is created 0600; keep whatever mode the store already had
        if let Ok(existing) = std::fs::metadata(path) {
            file.as_file()
                .set_permissions(existing.permissions())
                .map_err(|e| write_error(e.to_string()))?;
        }
        file.persist(path).map_err(|e| write_error(e.error.to_string()))?;

        debug!("Saved {} records to {}", self.len(), path.display());
        Ok(())
    }

    /// 4-space indented JSON array, non-ASCII left as is.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>> {
        let records: Vec<&ImageRecord> = self.records.values().collect();
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        records.serialize(&mut serializer)?;
        out.push(b'\n');
        Ok(out)
    }
}
