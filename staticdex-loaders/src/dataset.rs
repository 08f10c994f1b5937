//! Built-in dataset loaders.
//!
//! A dataset loader copies every record of a source into
//! `<prefix>:<dataset>:<id>` and then writes the dataset's completion marker.
//! The marker goes last so that an interrupted load never looks complete to
//! the presence check.

use crate::Loader;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use staticdex_core::{
    CacheNamespace, LoaderError, CLASSIFICATION_DATASET, DATASET_MARKER_ID,
    REFERENCE_MEDICINE_DATASET,
};
use staticdex_storage::CacheStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// One record of a reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticRecord {
    pub id: String,
    pub value: Value,
}

impl StaticRecord {
    pub fn new(id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Errors produced by record sources.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Record {index} has no usable `{field}` field")]
    MissingId { index: usize, field: String },
}

/// Where a dataset's records come from.
pub trait RecordSource: Send + Sync {
    fn records(&self) -> Result<Vec<StaticRecord>, SourceError>;
}

// ============================================================================
// SOURCES
// ============================================================================

/// Records held in memory.
#[derive(Debug, Clone, Default)]
pub struct InlineSource {
    records: Vec<StaticRecord>,
}

impl InlineSource {
    pub fn new(records: Vec<StaticRecord>) -> Self {
        Self { records }
    }
}

impl RecordSource for InlineSource {
    fn records(&self) -> Result<Vec<StaticRecord>, SourceError> {
        Ok(self.records.clone())
    }
}

/// A JSON file holding an array of objects, each identified by `id_field`.
///
/// Ids may be strings or integers; integers are stored in decimal.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
    id_field: String,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id_field: "id".to_string(),
        }
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for JsonFileSource {
    fn records(&self) -> Result<Vec<StaticRecord>, SourceError> {
        let path = self.path.display().to_string();
        let raw = std::fs::read_to_string(&self.path).map_err(|e| SourceError::Io {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let items: Vec<Value> = serde_json::from_str(&raw).map_err(|e| SourceError::Parse {
            path,
            reason: e.to_string(),
        })?;

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let id = match item.get(&self.id_field) {
                    Some(Value::String(s)) if !s.is_empty() => s.clone(),
                    Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
                    _ => {
                        return Err(SourceError::MissingId {
                            index,
                            field: self.id_field.clone(),
                        })
                    }
                };
                Ok(StaticRecord::new(id, item))
            })
            .collect()
    }
}

// ============================================================================
// DATASET LOADER
// ============================================================================

/// Loads one dataset into the namespace.
#[derive(Clone)]
pub struct DatasetLoader {
    dataset: String,
    namespace: CacheNamespace,
    store: Arc<dyn CacheStore>,
    source: Arc<dyn RecordSource>,
}

impl DatasetLoader {
    pub fn new(
        dataset: impl Into<String>,
        namespace: CacheNamespace,
        store: Arc<dyn CacheStore>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            namespace,
            store,
            source,
        }
    }

    /// Disease classification (ICD-11) loader.
    pub fn classification(
        namespace: CacheNamespace,
        store: Arc<dyn CacheStore>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self::new(CLASSIFICATION_DATASET, namespace, store, source)
    }

    /// Reference medicine (Medibase) loader.
    pub fn reference_medicines(
        namespace: CacheNamespace,
        store: Arc<dyn CacheStore>,
        source: Arc<dyn RecordSource>,
    ) -> Self {
        Self::new(REFERENCE_MEDICINE_DATASET, namespace, store, source)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    fn write(&self, key: String, value: Value) -> Result<(), LoaderError> {
        self.store
            .set(&key, value, None)
            .map_err(|source| LoaderError::WriteFailed {
                loader: self.dataset.clone(),
                key,
                source,
            })
    }
}

impl Loader for DatasetLoader {
    fn name(&self) -> &str {
        &self.dataset
    }

    fn load(&self) -> Result<(), LoaderError> {
        let records = self.source.records().map_err(|e| match e {
            SourceError::MissingId { .. } => LoaderError::MalformedRecord {
                loader: self.dataset.clone(),
                reason: e.to_string(),
            },
            _ => LoaderError::SourceUnavailable {
                loader: self.dataset.clone(),
                reason: e.to_string(),
            },
        })?;

        if let Some(record) = records
            .iter()
            .find(|r| r.id.is_empty() || r.id == DATASET_MARKER_ID)
        {
            return Err(LoaderError::MalformedRecord {
                loader: self.dataset.clone(),
                reason: format!("reserved or empty record id {:?}", record.id),
            });
        }

        let count = records.len();
        for record in records {
            let key = self.namespace.record_key(&self.dataset, &record.id);
            self.write(key, record.value)?;
        }

        self.write(
            self.namespace.marker_key(&self.dataset),
            json!({ "records": count, "loaded_at": Utc::now().to_rfc3339() }),
        )?;

        tracing::info!(dataset = %self.dataset, records = count, "Loaded dataset");
        Ok(())
    }
}

impl std::fmt::Debug for DatasetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetLoader")
            .field("dataset", &self.dataset)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
