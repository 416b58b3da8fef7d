use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("schedule is empty")]
    Empty,
    #[error("unsupported schedule shape: {0}")]
    UnsupportedShape(String),
    #[error("invalid schedule text `{text}`: {reason}")]
    InvalidText { text: String, reason: String },
    #[error("unknown schedule field `{0}`")]
    UnknownField(String),
    #[error("schedule field `{0}` must be a non-empty array of integers")]
    InvalidField(String),
    #[error("schedule field `{field}` value {value} is outside 0..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        max: u32,
    },
}
