use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::error::RecurrenceError;

/// A parsed calendar recurrence.
pub trait Recurrence: Send + Sync + fmt::Debug {
    /// First fire time strictly after `after`, or `None` when the recurrence
    /// has no further occurrences.
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>>;

    /// The next `count` fire times after `from`, in order.
    fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut times = Vec::with_capacity(count);
        let mut cursor = from;
        while times.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    times.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        times
    }
}

/// Parse-or-fail entry point for schedule specifications.
pub trait RecurrenceGrammar: Send + Sync {
    fn parse(&self, schedule: &Value) -> Result<Arc<dyn Recurrence>, RecurrenceError>;
}

/// Calendar grammar understood by the engine out of the box.
///
/// Accepted shapes:
/// - `{"text": "every [N] <unit>"}` fires on UTC-aligned multiples of the
///   period (units: seconds, minutes, hours, days and their short forms).
/// - `{"text": "at HH:MM"}` fires once a day.
/// - `{"h": [..], "m": [..], "s": [..]}` with at least one field. Fields
///   coarser than the finest one given match any value; finer ones are 0.
/// - A non-empty array of the above, or `{"schedules": ...}`, fires on the
///   union of its members.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalendarGrammar;

impl RecurrenceGrammar for CalendarGrammar {
    fn parse(&self, schedule: &Value) -> Result<Arc<dyn Recurrence>, RecurrenceError> {
        parse_entry(schedule)
    }
}

fn parse_entry(value: &Value) -> Result<Arc<dyn Recurrence>, RecurrenceError> {
    match value {
        Value::Null => Err(RecurrenceError::Empty),
        Value::Object(map) if map.is_empty() => Err(RecurrenceError::Empty),
        Value::Object(map) => {
            if let Some(text) = map.get("text") {
                reject_extra_fields(map, "text")?;
                let text = text
                    .as_str()
                    .ok_or_else(|| RecurrenceError::InvalidField("text".into()))?;
                return parse_text(text);
            }
            if let Some(schedules) = map.get("schedules") {
                reject_extra_fields(map, "schedules")?;
                return parse_union(schedules);
            }
            Ok(Arc::new(Descriptor::from_map(map)?))
        }
        Value::Array(_) => parse_union(value),
        Value::Bool(_) => Err(RecurrenceError::UnsupportedShape("boolean".into())),
        Value::Number(_) => Err(RecurrenceError::UnsupportedShape("number".into())),
        Value::String(_) => Err(RecurrenceError::UnsupportedShape(
            "bare string (wrap text as {\"text\": ...})".into(),
        )),
    }
}

fn parse_union(value: &Value) -> Result<Arc<dyn Recurrence>, RecurrenceError> {
    let Value::Array(entries) = value else {
        return parse_entry(value);
    };
    let mut members = entries
        .iter()
        .map(parse_entry)
        .collect::<Result<Vec<_>, _>>()?;
    match members.len() {
        0 => Err(RecurrenceError::Empty),
        1 => Ok(members.remove(0)),
        _ => Ok(Arc::new(Union { members })),
    }
}

fn reject_extra_fields(map: &Map<String, Value>, expected: &str) -> Result<(), RecurrenceError> {
    match map.keys().find(|key| key.as_str() != expected) {
        Some(extra) => Err(RecurrenceError::UnknownField(extra.clone())),
        None => Ok(()),
    }
}

fn parse_text(text: &str) -> Result<Arc<dyn Recurrence>, RecurrenceError> {
    let lowered = text.trim().to_ascii_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    match tokens.as_slice() {
        [] => Err(RecurrenceError::Empty),
        ["every", unit] => Interval::new(text, 1, unit),
        ["every", count, unit] => {
            let count = count
                .parse::<u64>()
                .map_err(|_| invalid_text(text, "interval count must be a positive integer"))?;
            Interval::new(text, count, unit)
        }
        ["at", clock] => {
            let (hour, minute) = parse_clock(clock).map_err(|reason| invalid_text(text, reason))?;
            Ok(Arc::new(Descriptor::daily(hour, minute)))
        }
        _ => Err(invalid_text(text, "expected `every [N] <unit>` or `at HH:MM`")),
    }
}

fn invalid_text(text: &str, reason: &str) -> RecurrenceError {
    RecurrenceError::InvalidText {
        text: text.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses `HH:MM` into hour and minute.
fn parse_clock(clock: &str) -> Result<(u32, u32), &'static str> {
    let Some((hour, minute)) = clock.split_once(':') else {
        return Err("time must be in HH:MM format");
    };
    let hour = hour.parse::<u32>().map_err(|_| "invalid hour")?;
    let minute = minute.parse::<u32>().map_err(|_| "invalid minute")?;
    if hour > 23 {
        return Err("hour must be 0-23");
    }
    if minute > 59 {
        return Err("minute must be 0-59");
    }
    Ok((hour, minute))
}

fn unit_secs(unit: &str) -> Option<u64> {
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1),
        "min" | "mins" | "minute" | "minutes" => Some(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(3_600),
        "day" | "days" => Some(86_400),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    period_secs: i64,
}

impl Interval {
    fn new(text: &str, count: u64, unit: &str) -> Result<Arc<dyn Recurrence>, RecurrenceError> {
        if count == 0 {
            return Err(invalid_text(text, "interval count must be a positive integer"));
        }
        let unit = unit_secs(unit).ok_or_else(|| invalid_text(text, "unknown time unit"))?;
        let period_secs = count
            .checked_mul(unit)
            .and_then(|secs| i64::try_from(secs).ok())
            .ok_or_else(|| invalid_text(text, "interval is too large"))?;
        Ok(Arc::new(Interval { period_secs }))
    }
}

impl Recurrence for Interval {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let periods = after.timestamp().div_euclid(self.period_secs);
        let next = periods.checked_add(1)?.checked_mul(self.period_secs)?;
        DateTime::from_timestamp(next, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Descriptor {
    hours: Vec<u32>,
    minutes: Vec<u32>,
    seconds: Vec<u32>,
}

impl Descriptor {
    fn daily(hour: u32, minute: u32) -> Self {
        Self {
            hours: vec![hour],
            minutes: vec![minute],
            seconds: vec![0],
        }
    }

    fn from_map(map: &Map<String, Value>) -> Result<Self, RecurrenceError> {
        if let Some(unknown) = map.keys().find(|key| !matches!(key.as_str(), "h" | "m" | "s")) {
            return Err(RecurrenceError::UnknownField(unknown.clone()));
        }
        let hours = read_field(map, "h", 23)?;
        let minutes = read_field(map, "m", 59)?;
        let seconds = read_field(map, "s", 59)?;

        let minutes_any = seconds.is_some();
        Ok(Self {
            hours: hours.unwrap_or_else(|| (0..24).collect()),
            minutes: minutes.unwrap_or_else(|| if minutes_any { (0..60).collect() } else { vec![0] }),
            seconds: seconds.unwrap_or_else(|| vec![0]),
        })
    }
}

fn read_field(
    map: &Map<String, Value>,
    field: &'static str,
    max: u32,
) -> Result<Option<Vec<u32>>, RecurrenceError> {
    let Some(value) = map.get(field) else {
        return Ok(None);
    };
    let entries = value
        .as_array()
        .filter(|entries| !entries.is_empty())
        .ok_or_else(|| RecurrenceError::InvalidField(field.into()))?;

    let mut values = Vec::with_capacity(entries.len());
    for entry in entries {
        let raw = entry
            .as_i64()
            .ok_or_else(|| RecurrenceError::InvalidField(field.into()))?;
        let value = u32::try_from(raw)
            .ok()
            .filter(|value| *value <= max)
            .ok_or(RecurrenceError::OutOfRange {
                field,
                value: raw,
                max,
            })?;
        values.push(value);
    }
    values.sort_unstable();
    values.dedup();
    Ok(Some(values))
}

impl Recurrence for Descriptor {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = DateTime::from_timestamp(after.timestamp().checked_add(1)?, 0)?;
        let mut day = start.date_naive();
        // Every descriptor fires at least once per day.
        for _ in 0..2 {
            for &hour in &self.hours {
                for &minute in &self.minutes {
                    for &second in &self.seconds {
                        let candidate = day.and_hms_opt(hour, minute, second)?.and_utc();
                        if candidate >= start {
                            return Some(candidate);
                        }
                    }
                }
            }
            day = day.succ_opt()?;
        }
        None
    }
}

#[derive(Debug)]
struct Union {
    members: Vec<Arc<dyn Recurrence>>,
}

impl Recurrence for Union {
    fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.members
            .iter()
            .filter_map(|member| member.next_after(after))
            .min()
    }
}
