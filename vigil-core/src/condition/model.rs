use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::scalar::Scalar;

use super::ConditionError;

/// Boolean/comparison expression tree over metric identifiers and literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Number or boolean literal. Text literals only arise programmatically;
    /// string leaves on the wire become [`Condition::Metric`].
    Literal(Scalar),
    /// String leaf resolved through the evaluator. Strings that are not
    /// metric identifiers come back from the evaluator unchanged.
    Metric(String),
    Apply { op: String, args: Vec<Condition> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
    Not,
    Or,
    And,
}

impl Operator {
    pub const ALL: [Operator; 9] = [
        Operator::Gt,
        Operator::Ge,
        Operator::Lt,
        Operator::Le,
        Operator::Eq,
        Operator::Ne,
        Operator::Not,
        Operator::Or,
        Operator::And,
    ];

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|operator| operator.symbol() == symbol)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Not => "not",
            Operator::Or => "or",
            Operator::And => "and",
        }
    }

    /// Minimum number of arguments. `or`/`and` accept any count above it.
    pub fn arity(self) -> usize {
        match self {
            Operator::Not => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Condition {
    pub fn literal(value: impl Into<Scalar>) -> Self {
        Condition::Literal(value.into())
    }

    pub fn metric(name: impl Into<String>) -> Self {
        Condition::Metric(name.into())
    }

    pub fn apply(operator: Operator, args: Vec<Condition>) -> Self {
        Condition::Apply {
            op: operator.symbol().to_string(),
            args,
        }
    }

    pub fn from_value(value: &Value) -> Result<Self, ConditionError> {
        match value {
            Value::Bool(flag) => Ok(Condition::Literal(Scalar::Bool(*flag))),
            Value::Number(number) => number
                .as_f64()
                .map(|number| Condition::Literal(Scalar::Number(number)))
                .ok_or_else(|| ConditionError::UnsupportedLeaf(number.to_string())),
            Value::String(name) => Ok(Condition::Metric(name.clone())),
            Value::Null => Err(ConditionError::UnsupportedLeaf("null".into())),
            Value::Array(_) => Err(ConditionError::UnsupportedLeaf("array".into())),
            Value::Object(map) => {
                let op = map
                    .get("op")
                    .and_then(Value::as_str)
                    .ok_or(ConditionError::MissingOperator)?
                    .to_string();
                let args = match map.get("args") {
                    None => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(Condition::from_value)
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(_) => return Err(ConditionError::InvalidArguments { op }),
                };
                Ok(Condition::Apply { op, args })
            }
        }
    }
}

impl Serialize for Condition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Condition::Literal(value) => value.serialize(serializer),
            Condition::Metric(name) => serializer.serialize_str(name),
            Condition::Apply { op, args } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("op", op)?;
                map.serialize_entry("args", args)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Condition::from_value(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_operator_nodes() {
        let condition = Condition::from_value(&json!({
            "op": "and",
            "args": [
                {"op": ">", "args": ["cpu.load", 50]},
                true
            ]
        }))
        .unwrap();

        assert_eq!(
            condition,
            Condition::apply(
                Operator::And,
                vec![
                    Condition::apply(
                        Operator::Gt,
                        vec![Condition::metric("cpu.load"), Condition::literal(50.0)]
                    ),
                    Condition::literal(true),
                ]
            )
        );
    }

    #[test]
    fn rejects_malformed_nodes() {
        assert!(matches!(
            Condition::from_value(&json!({})),
            Err(ConditionError::MissingOperator)
        ));
        assert!(matches!(
            Condition::from_value(&json!({"op": ">", "args": "cpu"})),
            Err(ConditionError::InvalidArguments { .. })
        ));
        assert!(Condition::from_value(&json!(null)).is_err());
        assert!(Condition::from_value(&json!({"op": "not", "args": [[1]]})).is_err());
    }

    #[test]
    fn unknown_operator_still_parses() {
        let condition = Condition::from_value(&json!({"op": "FAIL"})).unwrap();
        assert_eq!(
            condition,
            Condition::Apply {
                op: "FAIL".into(),
                args: vec![]
            }
        );
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let wire = json!({"op": "<>", "args": ["disk.free", 0.0]});
        let condition: Condition = serde_json::from_value(wire.clone()).unwrap();
        assert_eq!(serde_json::to_value(&condition).unwrap(), wire);
    }

    #[test]
    fn operator_symbols_round_trip() {
        for operator in Operator::ALL {
            assert_eq!(Operator::from_symbol(operator.symbol()), Some(operator));
        }
        assert_eq!(Operator::from_symbol("xor"), None);
    }
}
