use std::cmp::Ordering;

use crate::scalar::Scalar;

use super::model::{Condition, Operator};
use super::{ConditionError, ConditionResult};

/// Resolves string leaves to values while a condition is evaluated.
///
/// Lookups are synchronous from the engine's point of view; an implementation
/// backed by asynchronous storage must resolve its values beforehand (see
/// `MetricStore::snapshot`).
pub trait Evaluator {
    fn get(&self, identifier: &str) -> Scalar;
}

impl<F> Evaluator for F
where
    F: Fn(&str) -> Scalar,
{
    fn get(&self, identifier: &str) -> Scalar {
        self(identifier)
    }
}

impl Condition {
    /// Structural validity: every operator is known and has at least its
    /// required arity, and every leaf is a non-empty whitespace-free literal.
    pub fn is_valid(&self) -> bool {
        match self {
            Condition::Literal(Scalar::Null) => false,
            Condition::Literal(Scalar::Text(text)) => is_valid_leaf(text),
            Condition::Literal(_) => true,
            Condition::Metric(name) => is_valid_leaf(name),
            Condition::Apply { op, args } => match Operator::from_symbol(op) {
                Some(operator) => {
                    args.len() >= operator.arity() && args.iter().all(Condition::is_valid)
                }
                None => false,
            },
        }
    }

    /// Every string leaf, depth-first and left to right. Duplicates are kept.
    pub fn metric_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, names: &mut Vec<String>) {
        match self {
            Condition::Literal(_) => {}
            Condition::Metric(name) => names.push(name.clone()),
            Condition::Apply { args, .. } => {
                for arg in args {
                    arg.collect_names(names);
                }
            }
        }
    }

    /// Evaluates the tree. Every argument of an operator node is resolved
    /// before the operator is applied; `and`/`or` never short-circuit.
    pub fn evaluate<E>(&self, evaluator: &E) -> ConditionResult<Scalar>
    where
        E: Evaluator + ?Sized,
    {
        match self {
            Condition::Literal(value) => Ok(value.clone()),
            Condition::Metric(name) => Ok(evaluator.get(name)),
            Condition::Apply { op, args } => {
                let operator = Operator::from_symbol(op)
                    .ok_or_else(|| ConditionError::UnknownOperator(op.clone()))?;
                if args.len() < operator.arity() {
                    return Err(ConditionError::Arity {
                        op: op.clone(),
                        required: operator.arity(),
                        found: args.len(),
                    });
                }
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(evaluator))
                    .collect::<ConditionResult<Vec<_>>>()?;
                Ok(Scalar::Bool(operator.reduce(&values)))
            }
        }
    }

    pub fn holds<E>(&self, evaluator: &E) -> ConditionResult<bool>
    where
        E: Evaluator + ?Sized,
    {
        self.evaluate(evaluator).map(|value| value.is_truthy())
    }
}

impl Operator {
    /// Applies the operator to already-resolved arguments. Binary operators
    /// only look at the first two values.
    fn reduce(self, values: &[Scalar]) -> bool {
        let ordering = || values[0].compare(&values[1]);
        match self {
            Operator::Gt => ordering() == Some(Ordering::Greater),
            Operator::Ge => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
            Operator::Lt => ordering() == Some(Ordering::Less),
            Operator::Le => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
            Operator::Eq => values[0].loosely_equals(&values[1]),
            Operator::Ne => !values[0].loosely_equals(&values[1]),
            Operator::Not => !values[0].is_truthy(),
            Operator::Or => values
                .iter()
                .fold(false, |acc, value| acc || value.is_truthy()),
            Operator::And => values
                .iter()
                .fold(true, |acc, value| acc && value.is_truthy()),
        }
    }
}

fn is_valid_leaf(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(char::is_whitespace)
}
