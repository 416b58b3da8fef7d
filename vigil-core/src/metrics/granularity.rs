use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bucket width used to index samples for range queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Second,
    Minute,
    Hour,
    Day,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown granularity `{0}` (expected second, minute, hour or day)")]
pub struct UnknownGranularity(pub String);

impl Granularity {
    pub const ALL: [Granularity; 4] = [
        Granularity::Second,
        Granularity::Minute,
        Granularity::Hour,
        Granularity::Day,
    ];

    pub fn interval_secs(self) -> u64 {
        match self {
            Granularity::Second => 1,
            Granularity::Minute => 60,
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = UnknownGranularity;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Granularity::ALL
            .into_iter()
            .find(|granularity| granularity.as_str() == value)
            .ok_or_else(|| UnknownGranularity(value.to_string()))
    }
}

/// Start of the bucket containing `timestamp`.
pub fn round_down(timestamp: u64, granularity: Granularity) -> u64 {
    let interval = granularity.interval_secs();
    timestamp - timestamp % interval
}

/// First bucket boundary at or after `timestamp`.
pub fn round_up(timestamp: u64, granularity: Granularity) -> u64 {
    let down = round_down(timestamp, granularity);
    if down < timestamp {
        down.saturating_add(granularity.interval_secs())
    } else {
        down
    }
}
