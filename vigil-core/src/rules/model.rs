use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::condition::Condition;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule document must be an object")]
    NotAnObject,
    #[error("malformed rule document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Fired when a metric the condition references is updated.
    Trigger,
    /// Fired by a calendar recurrence.
    Schedule,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleKind::Trigger => "trigger",
            RuleKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "trigger" => Ok(RuleKind::Trigger),
            "schedule" => Ok(RuleKind::Schedule),
            other => Err(format!("unknown rule type `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Email,
    Sms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub endpoint: String,
}

impl Alert {
    pub fn email(endpoint: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Email,
            endpoint: endpoint.into(),
        }
    }

    pub fn sms(endpoint: impl Into<String>) -> Self {
        Self {
            kind: AlertKind::Sms,
            endpoint: endpoint.into(),
        }
    }
}

/// A single alert or a sequence of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertSpec {
    One(Alert),
    Many(Vec<Alert>),
}

impl AlertSpec {
    pub fn alerts(&self) -> &[Alert] {
        match self {
            AlertSpec::One(alert) => std::slice::from_ref(alert),
            AlertSpec::Many(alerts) => alerts,
        }
    }
}

impl From<Alert> for AlertSpec {
    fn from(alert: Alert) -> Self {
        AlertSpec::One(alert)
    }
}

/// Content hash identifying a rule document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey(String);

impl RuleKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rule document: `{type, condition, alert, schedule?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub condition: Condition,
    pub alert: AlertSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Value>,
}

impl Rule {
    pub fn trigger(condition: Condition, alert: impl Into<AlertSpec>) -> Self {
        Self {
            kind: RuleKind::Trigger,
            condition,
            alert: alert.into(),
            schedule: None,
        }
    }

    pub fn scheduled(condition: Condition, alert: impl Into<AlertSpec>, schedule: Value) -> Self {
        Self {
            kind: RuleKind::Schedule,
            condition,
            alert: alert.into(),
            schedule: Some(schedule),
        }
    }

    pub fn parse(document: &Value) -> Result<Self, RuleError> {
        if !document.is_object() {
            return Err(RuleError::NotAnObject);
        }
        Ok(Self::deserialize(document)?)
    }

    /// SHA-256 over the canonical JSON encoding. Object keys are emitted in
    /// sorted order, so equal documents always hash alike.
    pub fn key(&self) -> Result<RuleKey, RuleError> {
        let canonical = serde_json::to_value(self)?;
        let bytes = serde_json::to_vec(&canonical)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(RuleKey(hex::encode(hasher.finalize())))
    }
}
