use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use futures::future::try_join_all;
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::StoreSection;
use crate::scalar::Scalar;

use super::error::{MetricError, MetricResult};
use super::granularity::{round_down, round_up, Granularity};
use super::provider::{MemoryProvider, MetricSample, StorageProvider, StoredValue};
use super::snapshot::MetricSnapshot;

/// True when `candidate` is a dot-segmented metric identifier such as
/// `servers.dallas.cpu`.
pub fn is_metric(candidate: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9.]+$").expect("valid regex"))
        .is_match(candidate)
}

/// Result of a point lookup through [`MetricStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// The input was not a metric identifier and is returned unchanged.
    Literal(String),
    /// Latest sample of the metric, if one was ever saved.
    Latest(Option<MetricSample>),
}

/// Time-bucketed metric storage over a pluggable key/value provider.
///
/// Every save writes the sample under `<metric>.<timestamp>`, points the bare
/// metric name at it, and records it in one bucket index per granularity
/// under `<bucket>.<metric>.<granularity>`. Writes are idempotent overwrites,
/// so a failed save can be retried.
#[derive(Clone)]
pub struct MetricStore {
    provider: Arc<dyn StorageProvider>,
    default_granularity: Granularity,
    range_concurrency: usize,
}

impl fmt::Debug for MetricStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricStore")
            .field("default_granularity", &self.default_granularity)
            .field("range_concurrency", &self.range_concurrency)
            .finish()
    }
}

impl MetricStore {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self::with_config(provider, &StoreSection::default())
    }

    pub fn with_config(provider: Arc<dyn StorageProvider>, config: &StoreSection) -> Self {
        Self {
            provider,
            default_granularity: config.default_granularity,
            range_concurrency: config.range_concurrency.max(1),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryProvider::new()))
    }

    pub fn sample_key(metric: &str, timestamp: u64) -> String {
        format!("{metric}.{timestamp}")
    }

    pub fn index_key(metric: &str, timestamp: u64, granularity: Granularity) -> String {
        format!(
            "{bucket}.{metric}.{granularity}",
            bucket = round_down(timestamp, granularity)
        )
    }

    /// Stores `value` for `metric` at `timestamp` (seconds, floored), or now.
    pub async fn save(
        &self,
        metric: &str,
        value: impl Into<Scalar>,
        timestamp: Option<f64>,
    ) -> MetricResult<MetricSample> {
        if !is_metric(metric) {
            return Err(MetricError::NotAMetric(metric.to_string()));
        }
        let timestamp = match timestamp {
            Some(raw) => normalize_timestamp(raw)?,
            None => u64::try_from(Utc::now().timestamp()).unwrap_or_default(),
        };
        let sample = MetricSample {
            timestamp,
            value: value.into(),
        };
        let sample_key = Self::sample_key(metric, timestamp);

        self.provider
            .set(&sample_key, StoredValue::Sample(sample.clone()))
            .await?;
        self.provider
            .set(metric, StoredValue::pointer(sample_key.as_str()))
            .await?;

        let index_writes = Granularity::ALL.into_iter().map(|granularity| {
            let key = Self::index_key(metric, timestamp, granularity);
            let pointer = StoredValue::pointer(sample_key.as_str());
            async move { self.provider.set(&key, pointer).await }
        });
        try_join_all(index_writes).await?;

        debug!(target: "metrics", metric, timestamp, "sample saved");
        Ok(sample)
    }

    /// Latest sample of `metric`, or `None` when nothing was saved.
    pub async fn latest(&self, metric: &str) -> MetricResult<Option<MetricSample>> {
        if !is_metric(metric) {
            return Err(MetricError::NotAMetric(metric.to_string()));
        }
        let Some(sample_key) = self.read_pointer(metric).await? else {
            return Ok(None);
        };
        self.read_sample(&sample_key).await
    }

    /// Point lookup that doubles as a literal passthrough: non-metric input
    /// comes back as [`Fetched::Literal`] without touching storage.
    pub async fn get(&self, token: &str) -> MetricResult<Fetched> {
        if !is_metric(token) {
            return Ok(Fetched::Literal(token.to_string()));
        }
        self.latest(token).await.map(Fetched::Latest)
    }

    /// Values of `metric` keyed by bucket timestamp, for every bucket boundary
    /// from `round_up(start)` through `end` inclusive. Buckets without an index
    /// entry are omitted. Failed lookups are logged and omitted as well; the
    /// result is produced once every lookup has completed.
    pub async fn range(
        &self,
        metric: &str,
        start: u64,
        end: u64,
        granularity: Option<Granularity>,
    ) -> MetricResult<BTreeMap<u64, Scalar>> {
        if !is_metric(metric) {
            return Err(MetricError::NotAMetric(metric.to_string()));
        }
        let granularity = granularity.unwrap_or(self.default_granularity);
        let first = round_up(start, granularity);
        let mut values = BTreeMap::new();
        if first > end {
            return Ok(values);
        }

        let step = usize::try_from(granularity.interval_secs()).unwrap_or(usize::MAX);
        let lookups = stream::iter((first..=end).step_by(step))
            .map(|bucket| async move {
                let outcome = self.lookup_bucket(metric, bucket, granularity).await;
                (bucket, outcome)
            })
            .buffer_unordered(self.range_concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut failed = 0usize;
        for (bucket, outcome) in lookups {
            match outcome {
                Ok(Some(value)) => {
                    values.insert(bucket, value);
                }
                Ok(None) => {}
                Err(err) => {
                    failed += 1;
                    warn!(
                        target: "metrics",
                        metric,
                        bucket,
                        %granularity,
                        error = %err,
                        "bucket lookup failed"
                    );
                }
            }
        }
        debug!(
            target: "metrics",
            metric,
            %granularity,
            found = values.len(),
            failed,
            "range query resolved"
        );
        Ok(values)
    }

    /// Resolves the latest value of every distinct metric in `names` so a
    /// condition can be evaluated synchronously against the result.
    pub async fn snapshot<S: AsRef<str>>(&self, names: &[S]) -> MetricResult<MetricSnapshot> {
        let mut seen = HashSet::new();
        let metrics: Vec<&str> = names
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| is_metric(name) && seen.insert(*name))
            .collect();

        let latest = try_join_all(metrics.iter().map(|name| self.latest(name))).await?;

        let mut snapshot = MetricSnapshot::new();
        for (name, sample) in metrics.into_iter().zip(latest) {
            if let Some(sample) = sample {
                snapshot.insert(name, sample.value);
            }
        }
        Ok(snapshot)
    }

    async fn lookup_bucket(
        &self,
        metric: &str,
        bucket: u64,
        granularity: Granularity,
    ) -> MetricResult<Option<Scalar>> {
        let index_key = Self::index_key(metric, bucket, granularity);
        let Some(sample_key) = self.read_pointer(&index_key).await? else {
            return Ok(None);
        };
        Ok(self
            .read_sample(&sample_key)
            .await?
            .map(|sample| sample.value))
    }

    async fn read_pointer(&self, key: &str) -> MetricResult<Option<String>> {
        match self.provider.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Pointer { key }) => Ok(Some(key)),
            Some(other) => Err(MetricError::CorruptRecord {
                key: key.to_string(),
                expected: "pointer",
                found: other.kind(),
            }),
        }
    }

    async fn read_sample(&self, key: &str) -> MetricResult<Option<MetricSample>> {
        match self.provider.get(key).await? {
            None => Ok(None),
            Some(StoredValue::Sample(sample)) => Ok(Some(sample)),
            Some(other) => Err(MetricError::CorruptRecord {
                key: key.to_string(),
                expected: "sample",
                found: other.kind(),
            }),
        }
    }
}

fn normalize_timestamp(raw: f64) -> MetricResult<u64> {
    if !raw.is_finite() || raw < 0.0 {
        return Err(MetricError::InvalidTimestamp(raw));
    }
    Ok(raw.floor() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Evaluator;

    #[test]
    fn metric_identifiers() {
        for name in ["somemetric", "metric.test.1.2.3", "test123", "load.avg"] {
            assert!(is_metric(name), "{name} should be a metric");
        }
        for name in [
            "this should always fail",
            "fail_test",
            "_1",
            "!@#$%^&*()",
            "",
            "1",
            "a",
            "20834",
            "4850.50",
        ] {
            assert!(!is_metric(name), "{name} should not be a metric");
        }
    }

    #[tokio::test]
    async fn save_writes_sample_pointer_and_buckets() {
        let provider = Arc::new(MemoryProvider::new());
        let store = MetricStore::new(provider.clone());

        let sample = store.save("test.metric.name", "payload", Some(125.7)).await.unwrap();
        assert_eq!(sample.timestamp, 125);

        assert_eq!(
            provider.get("test.metric.name.125").await.unwrap(),
            Some(StoredValue::Sample(MetricSample {
                timestamp: 125,
                value: Scalar::from("payload"),
            }))
        );
        assert_eq!(
            provider.get("test.metric.name").await.unwrap(),
            Some(StoredValue::pointer("test.metric.name.125"))
        );
        for key in [
            "125.test.metric.name.second",
            "120.test.metric.name.minute",
            "0.test.metric.name.hour",
            "0.test.metric.name.day",
        ] {
            assert_eq!(
                provider.get(key).await.unwrap(),
                Some(StoredValue::pointer("test.metric.name.125")),
                "missing index {key}"
            );
        }
        assert_eq!(provider.len(), 6);
    }

    #[tokio::test]
    async fn save_defaults_to_now() {
        let store = MetricStore::in_memory();
        let before = Utc::now().timestamp() as u64;
        let sample = store.save("uptime", 1, None).await.unwrap();
        assert!(sample.timestamp >= before);
    }

    #[tokio::test]
    async fn rejects_non_metrics_and_bad_timestamps() {
        let store = MetricStore::in_memory();
        assert!(matches!(
            store.save("not a metric", 1, Some(0.0)).await,
            Err(MetricError::NotAMetric(_))
        ));
        assert!(matches!(
            store.save("cpu", 1, Some(-1.0)).await,
            Err(MetricError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            store.save("cpu", 1, Some(f64::NAN)).await,
            Err(MetricError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            store.range("_bad", 0, 10, None).await,
            Err(MetricError::NotAMetric(_))
        ));
    }

    #[tokio::test]
    async fn get_passes_literals_through() {
        let store = MetricStore::in_memory();
        assert_eq!(
            store.get("not a metric").await.unwrap(),
            Fetched::Literal("not a metric".into())
        );
        assert_eq!(store.get("cpu").await.unwrap(), Fetched::Latest(None));
    }

    #[tokio::test]
    async fn latest_follows_most_recent_write() {
        let store = MetricStore::in_memory();
        store.save("test.metric.name", "blah", Some(900.0)).await.unwrap();
        store.save("test.metric.name", "fresh", Some(1_000.0)).await.unwrap();
        let latest = store.latest("test.metric.name").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 1_000);
        assert_eq!(latest.value, Scalar::from("fresh"));
    }

    #[tokio::test]
    async fn range_uses_configured_default_granularity() {
        let config = StoreSection {
            default_granularity: Granularity::Minute,
            range_concurrency: 2,
        };
        let store = MetricStore::with_config(Arc::new(MemoryProvider::new()), &config);
        assert!(matches!(
            store.save("m", 1, Some(0.0)).await,
            Err(MetricError::NotAMetric(_))
        ));
        store.save("mm", 2, Some(61.0)).await.unwrap();
        store.save("mm", 3, Some(130.0)).await.unwrap();

        let values = store.range("mm", 0, 180, None).await.unwrap();
        assert_eq!(
            values,
            BTreeMap::from([(60, Scalar::from(2)), (120, Scalar::from(3))])
        );
    }

    #[tokio::test]
    async fn range_skips_start_inside_bucket() {
        let store = MetricStore::in_memory();
        store.save("mm", 1, Some(30.0)).await.unwrap();
        store.save("mm", 2, Some(90.0)).await.unwrap();

        let values = store
            .range("mm", 30, 120, Some(Granularity::Minute))
            .await
            .unwrap();
        assert_eq!(values, BTreeMap::from([(60, Scalar::from(2))]));
        assert!(store
            .range("mm", 121, 100, Some(Granularity::Minute))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn snapshot_resolves_each_metric_once() {
        let store = MetricStore::in_memory();
        store.save("cpu.load", 80, Some(10.0)).await.unwrap();

        let snapshot = store
            .snapshot(&["cpu.load", "cpu.load", "mem.free", "not a metric"])
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("cpu.load"), Scalar::from(80));
        assert_eq!(snapshot.get("mem.free"), Scalar::Null);
        assert_eq!(snapshot.get("not a metric"), Scalar::from("not a metric"));
    }
}
