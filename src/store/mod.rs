//! Qualification record storage (MTG-008)
//!
//! Pluggable persistence for [`QualificationRecord`]s behind the
//! [`RecordBackend`] trait: an in-memory backend for embedding and tests,
//! and a JSON file-per-record backend for local tooling. Backends store
//! and enumerate; lifecycle rules, indexing, and leases live in
//! [`QualificationEngine`](crate::qualify::QualificationEngine).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::qualify::QualificationRecord;

/// Errors from record storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("qualification record not found: {0}")]
    NotFound(String),
}

/// Result alias for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Trait for qualification record persistence.
///
/// Records are append-or-replace by id and never deleted; supersession is
/// expressed through record status, not removal.
pub trait RecordBackend {
    /// Save (insert or replace) a record
    fn save(&mut self, record: &QualificationRecord) -> Result<()>;

    /// Load a record by id
    fn load(&self, id: &str) -> Result<QualificationRecord>;

    /// Enumerate all records in submission order
    fn list(&self) -> Result<Vec<QualificationRecord>>;
}

/// In-memory record backend
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    records: HashMap<String, QualificationRecord>,
    order: Vec<String>,
}

impl InMemoryBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordBackend for InMemoryBackend {
    fn save(&mut self, record: &QualificationRecord) -> Result<()> {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<QualificationRecord> {
        self.records.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn list(&self) -> Result<Vec<QualificationRecord>> {
        Ok(self.order.iter().filter_map(|id| self.records.get(id).cloned()).collect())
    }
}

/// JSON file-based record backend.
///
/// Stores each record as `{id}.json` in a directory, creating the
/// directory on first save.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    /// Create a backend rooted at `dir`
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl RecordBackend for JsonFileBackend {
    fn save(&mut self, record: &QualificationRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;
        fs::write(self.record_path(&record.id), json)?;
        Ok(())
    }

    fn load(&self, id: &str) -> Result<QualificationRecord> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn list(&self) -> Result<Vec<QualificationRecord>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let json = fs::read_to_string(&path)?;
                records.push(serde_json::from_str(&json)?);
            }
        }
        records.sort_by_key(|r: &QualificationRecord| r.submitted_at);
        Ok(records)
    }
}
