use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::config::RulesSection;
use crate::recurrence::{CalendarGrammar, Recurrence, RecurrenceGrammar};

use super::model::{Alert, AlertKind, Rule, RuleKind};

/// Structural checks applied to every rule before it is registered.
///
/// Validation never fails loudly: every problem collapses to `false` and is
/// only reported through `debug!` events on the `rules` target.
#[derive(Clone)]
pub struct RuleValidator {
    grammar: Arc<dyn RecurrenceGrammar>,
    sms_min_digits: usize,
}

impl fmt::Debug for RuleValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleValidator")
            .field("sms_min_digits", &self.sms_min_digits)
            .finish_non_exhaustive()
    }
}

impl Default for RuleValidator {
    fn default() -> Self {
        Self::new(Arc::new(CalendarGrammar))
    }
}

impl RuleValidator {
    pub fn new(grammar: Arc<dyn RecurrenceGrammar>) -> Self {
        Self::with_config(grammar, &RulesSection::default())
    }

    pub fn with_config(grammar: Arc<dyn RecurrenceGrammar>, config: &RulesSection) -> Self {
        Self {
            grammar,
            sms_min_digits: config.sms_min_digits,
        }
    }

    pub fn validate(&self, rule: &Rule) -> bool {
        if !rule.condition.is_valid() {
            debug!(target: "rules", kind = %rule.kind, "rejected rule: invalid condition");
            return false;
        }
        if rule.kind == RuleKind::Schedule && self.parse_schedule(rule.schedule.as_ref()).is_none() {
            debug!(target: "rules", "rejected rule: invalid schedule");
            return false;
        }
        let alerts = rule.alert.alerts();
        if alerts.is_empty() || !alerts.iter().all(|alert| self.validate_alert(alert)) {
            debug!(target: "rules", kind = %rule.kind, "rejected rule: invalid alert");
            return false;
        }
        true
    }

    /// Validates an untyped rule document.
    pub fn validate_document(&self, document: &Value) -> bool {
        match Rule::parse(document) {
            Ok(rule) => self.validate(&rule),
            Err(err) => {
                debug!(target: "rules", error = %err, "rejected rule document");
                false
            }
        }
    }

    pub fn validate_alert(&self, alert: &Alert) -> bool {
        match alert.kind {
            AlertKind::Email => is_valid_email(&alert.endpoint),
            AlertKind::Sms => is_valid_phone(&alert.endpoint, self.sms_min_digits),
        }
    }

    pub fn validate_schedule(&self, schedule: Option<&Value>) -> bool {
        self.parse_schedule(schedule).is_some()
    }

    /// Parses a schedule after rejecting missing, empty and bare-scalar
    /// values up front.
    pub fn parse_schedule(&self, schedule: Option<&Value>) -> Option<Arc<dyn Recurrence>> {
        let schedule = schedule?;
        let shaped = match schedule {
            Value::Object(map) => !map.is_empty(),
            Value::Array(entries) => !entries.is_empty(),
            _ => false,
        };
        if !shaped {
            return None;
        }
        match self.grammar.parse(schedule) {
            Ok(recurrence) => Some(recurrence),
            Err(err) => {
                debug!(target: "rules", error = %err, "schedule did not parse");
                None
            }
        }
    }
}

pub fn is_valid_rule_type(kind: &str) -> bool {
    kind.parse::<RuleKind>().is_ok()
}

fn is_valid_email(endpoint: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
                .expect("valid regex")
        })
        .is_match(endpoint)
}

fn is_valid_phone(endpoint: &str, min_digits: usize) -> bool {
    endpoint.len() >= min_digits && endpoint.bytes().all(|byte| byte.is_ascii_digit())
}
