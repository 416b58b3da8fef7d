use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("write rejected for key {key}: {reason}")]
    WriteRejected { key: String, reason: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("`{0}` is not a metric identifier")]
    NotAMetric(String),
    #[error("invalid sample timestamp {0}")]
    InvalidTimestamp(f64),
    #[error("storage error: {0}")]
    Provider(#[from] ProviderError),
    #[error("key {key} holds a {found} where a {expected} was expected")]
    CorruptRecord {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

pub type MetricResult<T> = std::result::Result<T, MetricError>;
