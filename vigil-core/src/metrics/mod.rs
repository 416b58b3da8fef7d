pub mod error;
pub mod granularity;
pub mod provider;
pub mod snapshot;
pub mod store;

pub use error::{MetricError, MetricResult, ProviderError, ProviderResult};
pub use granularity::{round_down, round_up, Granularity, UnknownGranularity};
pub use provider::{MemoryProvider, MetricSample, StorageProvider, StoredValue};
pub use snapshot::MetricSnapshot;
pub use store::{is_metric, Fetched, MetricStore};
