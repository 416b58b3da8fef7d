use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single metric value or condition literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(value) => *value,
            Scalar::Number(value) => *value != 0.0 && !value.is_nan(),
            Scalar::Text(value) => !value.is_empty(),
        }
    }

    /// Orders two values. Numbers and booleans compare numerically, text
    /// compares lexicographically, and numeric text is coerced when compared
    /// against a number. `None` means the pair is incomparable.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => Some(Ordering::Equal),
            (Scalar::Null, _) | (_, Scalar::Null) => None,
            (Scalar::Text(left), Scalar::Text(right)) => Some(left.cmp(right)),
            _ => {
                let left = self.as_number()?;
                let right = other.as_number()?;
                left.partial_cmp(&right)
            }
        }
    }

    pub fn loosely_equals(&self, other: &Scalar) -> bool {
        matches!(self.compare(other), Some(Ordering::Equal))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            Scalar::Number(value) => Some(*value),
            Scalar::Text(value) => value.trim().parse::<f64>().ok(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Number(value) => write!(f, "{value}"),
            Scalar::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Number(value as f64)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Number(f64::from(value))
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}
