use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::metrics::Granularity;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct EngineConfig {
    pub store: StoreSection,
    pub rules: RulesSection,
    pub alerts: AlertsSection,
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_engine_config(path)
    }

    fn validate(self, path: &Path) -> Result<Self> {
        if self.store.range_concurrency == 0 {
            return Err(invalid(path, "store.range_concurrency", "must be at least 1"));
        }
        if self.rules.sms_min_digits == 0 {
            return Err(invalid(path, "rules.sms_min_digits", "must be at least 1"));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Bucket width for range queries that do not name one.
    pub default_granularity: Granularity,
    /// Upper bound on bucket lookups in flight during one range query.
    pub range_concurrency: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            default_granularity: Granularity::Second,
            range_concurrency: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesSection {
    pub sms_min_digits: usize,
}

impl Default for RulesSection {
    fn default() -> Self {
        Self { sms_min_digits: 3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    /// Re-evaluate a fired rule's condition before delivering its alerts.
    pub gate_on_condition: bool,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            gate_on_condition: true,
        }
    }
}

pub fn load_engine_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let path = path.as_ref();
    let config: EngineConfig = load_toml(path)?;
    config.validate(path)
}

fn invalid(path: &Path, field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_path_buf(),
        field,
        reason: reason.to_string(),
    }
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: PathBuf::from(path),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: PathBuf::from(path),
    })
}
