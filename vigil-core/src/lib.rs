pub mod alerting;
pub mod condition;
pub mod config;
pub mod error;
pub mod metrics;
pub mod recurrence;
pub mod rules;
pub mod scalar;
pub mod scheduler;

pub use alerting::{
    AlertEngine, AlertEngineError, AlertNotification, AlertSink, DispatchError, LogAlertSink,
};
pub use condition::{Condition, ConditionError, ConditionResult, Evaluator, Operator};
pub use config::{load_engine_config, AlertsSection, EngineConfig, RulesSection, StoreSection};
pub use error::{ConfigError, Result};
pub use metrics::{
    is_metric, round_down, round_up, Fetched, Granularity, MemoryProvider, MetricError,
    MetricResult, MetricSample, MetricSnapshot, MetricStore, ProviderError, ProviderResult,
    StorageProvider, StoredValue,
};
pub use recurrence::{
    spawn_timer, CalendarGrammar, Recurrence, RecurrenceError, RecurrenceGrammar, TimerHandle,
};
pub use rules::{Alert, AlertKind, AlertSpec, Rule, RuleError, RuleKey, RuleKind, RuleValidator};
pub use scalar::Scalar;
pub use scheduler::{FireCallback, RuleScheduler, SchedulerError, SchedulerStats};
