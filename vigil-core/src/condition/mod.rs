pub mod engine;
pub mod model;

use thiserror::Error;

pub use engine::Evaluator;
pub use model::{Condition, Operator};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConditionError {
    #[error("operator node is missing a string `op`")]
    MissingOperator,
    #[error("arguments of `{op}` must be an array")]
    InvalidArguments { op: String },
    #[error("unsupported condition leaf: {0}")]
    UnsupportedLeaf(String),
    #[error("unknown operator `{0}`")]
    UnknownOperator(String),
    #[error("operator `{op}` needs {required} arguments, found {found}")]
    Arity {
        op: String,
        required: usize,
        found: usize,
    },
}

pub type ConditionResult<T> = std::result::Result<T, ConditionError>;
