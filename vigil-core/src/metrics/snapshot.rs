use std::collections::HashMap;

use crate::condition::Evaluator;
use crate::scalar::Scalar;

use super::store::is_metric;

/// Point-in-time metric values a condition can be evaluated against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    values: HashMap<String, Scalar>,
}

impl MetricSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: impl Into<String>, value: impl Into<Scalar>) {
        self.values.insert(metric.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Evaluator for MetricSnapshot {
    fn get(&self, identifier: &str) -> Scalar {
        if !is_metric(identifier) {
            return Scalar::Text(identifier.to_string());
        }
        self.values.get(identifier).cloned().unwrap_or(Scalar::Null)
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for MetricSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (metric, value) in iter {
            snapshot.insert(metric, value);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::condition::Condition;

    #[test]
    fn evaluates_conditions_against_snapshot() {
        let snapshot: MetricSnapshot = [("load.avg", 4.2), ("mem.free", 512.0)].into_iter().collect();
        let condition = Condition::from_value(&json!({
            "op": "and",
            "args": [
                {"op": ">", "args": ["load.avg", 2]},
                {"op": "<", "args": ["mem.free", 1024]}
            ]
        }))
        .unwrap();
        assert!(condition.holds(&snapshot).unwrap());
    }

    #[test]
    fn missing_metrics_are_null_and_literals_pass_through() {
        let snapshot = MetricSnapshot::new();
        assert_eq!(snapshot.get("disk.used"), Scalar::Null);
        assert_eq!(snapshot.get("_literal"), Scalar::from("_literal"));
    }
}
