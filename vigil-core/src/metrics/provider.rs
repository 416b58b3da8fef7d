use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scalar::Scalar;

use super::error::ProviderResult;

/// One stored observation of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    #[serde(rename = "t")]
    pub timestamp: u64,
    #[serde(rename = "v")]
    pub value: Scalar,
}

/// What a backend key holds: a sample, or the key of a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredValue {
    Pointer { key: String },
    Sample(MetricSample),
}

impl StoredValue {
    pub fn pointer(key: impl Into<String>) -> Self {
        StoredValue::Pointer { key: key.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoredValue::Pointer { .. } => "pointer",
            StoredValue::Sample(_) => "sample",
        }
    }
}

/// Key/value backend behind the metric store. Absent keys are `Ok(None)`,
/// never an error.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn get(&self, key: &str) -> ProviderResult<Option<StoredValue>>;
    async fn set(&self, key: &str, value: StoredValue) -> ProviderResult<()>;
}

/// Map-backed provider used by default and in tests.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn get(&self, key: &str) -> ProviderResult<Option<StoredValue>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: StoredValue) -> ProviderResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value);
        Ok(())
    }
}
