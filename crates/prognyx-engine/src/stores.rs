//! Record profile and historical-accuracy stores.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use prognyx_common::{AnalysisError, RawAvailability, Result};

// ── Profile store ───────────────────────────────────────────────────────────

/// Source of raw availability indicators for a record.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns `RecordNotFound` for unknown ids.
    async fn get_raw_availability(&self, record_id: &str) -> Result<RawAvailability>;
}

/// Profile store backed by a map, for tests and embedding.
#[derive(Default)]
pub struct InMemoryProfileStore {
    records: RwLock<HashMap<String, RawAvailability>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, record_id: &str, raw: RawAvailability) -> Self {
        self.insert(record_id, raw);
        self
    }

    pub fn insert(&self, record_id: &str, raw: RawAvailability) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record_id.to_string(), raw);
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_raw_availability(&self, record_id: &str) -> Result<RawAvailability> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(record_id)
            .cloned()
            .ok_or_else(|| AnalysisError::RecordNotFound(record_id.to_string()))
    }
}

/// One JSON file per record: `<dir>/<record_id>.json` holding a
/// serialised `RawAvailability`.
pub struct JsonDirProfileStore {
    dir: PathBuf,
}

impl JsonDirProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, record_id: &str) -> Option<PathBuf> {
        let valid = !record_id.is_empty()
            && record_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !record_id.starts_with('.');
        valid.then(|| self.dir.join(format!("{record_id}.json")))
    }
}

#[async_trait]
impl ProfileStore for JsonDirProfileStore {
    async fn get_raw_availability(&self, record_id: &str) -> Result<RawAvailability> {
        let path = self
            .path_for(record_id)
            .ok_or_else(|| AnalysisError::RecordNotFound(record_id.to_string()))?;
        debug!(record_id, path = %path.display(), "Loading record profile");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AnalysisError::RecordNotFound(record_id.to_string()));
            }
            Err(e) => return Err(AnalysisError::Store(format!("{}: {e}", path.display()))),
        };

        serde_json::from_str(&content)
            .map_err(|e| AnalysisError::Store(format!("{}: {e}", path.display())))
    }
}

// ── Historical accuracy ─────────────────────────────────────────────────────

/// Read access to per-method historical accuracy in [0, 1].
pub trait PerformanceStore: Send + Sync {
    fn accuracy(&self, method_id: &str) -> Option<f64>;
}

/// Immutable accuracy snapshot. A request pins one snapshot for its whole
/// lifetime; refreshing swaps in a new one.
#[derive(Debug, Clone)]
pub struct AccuracySnapshot {
    accuracy: HashMap<String, f64>,
    pub taken_at: DateTime<Utc>,
}

impl AccuracySnapshot {
    pub fn empty() -> Self {
        Self::from_map(HashMap::new())
    }

    pub fn from_map<I>(accuracy: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        Self {
            accuracy: accuracy.into_iter().collect(),
            taken_at: Utc::now(),
        }
    }

    pub fn with(mut self, method_id: &str, accuracy: f64) -> Self {
        self.accuracy.insert(method_id.to_string(), accuracy);
        self
    }

    pub fn len(&self) -> usize {
        self.accuracy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accuracy.is_empty()
    }
}

impl Default for AccuracySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl PerformanceStore for AccuracySnapshot {
    fn accuracy(&self, method_id: &str) -> Option<f64> {
        self.accuracy.get(method_id).copied()
    }
}
