pub mod model;
pub mod validate;

pub use model::{Alert, AlertKind, AlertSpec, Rule, RuleError, RuleKey, RuleKind};
pub use validate::{is_valid_rule_type, RuleValidator};
