use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{AlertsSection, EngineConfig};
use crate::metrics::{MetricError, MetricSample, MetricStore, StorageProvider};
use crate::recurrence::RecurrenceGrammar;
use crate::rules::{Alert, Rule, RuleValidator};
use crate::scalar::Scalar;
use crate::scheduler::{FireCallback, RuleScheduler, SchedulerError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("alert transport failed for {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },
}

#[derive(Debug, Error)]
pub enum AlertEngineError {
    #[error("metric store error: {0}")]
    Metric(#[from] MetricError),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("alert engine is already running")]
    AlreadyRunning,
    #[error("alert engine needs a tokio runtime")]
    NoRuntime,
}

/// One alert produced by a fired rule.
#[derive(Debug, Clone)]
pub struct AlertNotification {
    pub rule: Arc<Rule>,
    pub alert: Alert,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

/// Transport for alert notifications (e-mail gateway, SMS provider, ...).
#[async_trait]
pub trait AlertSink: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    async fn deliver(&self, notification: &AlertNotification) -> Result<(), DispatchError>;
}

#[derive(Debug)]
pub struct LogAlertSink {
    name: String,
}

impl LogAlertSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, notification: &AlertNotification) -> Result<(), DispatchError> {
        warn!(
            target: "alerts",
            sink = %self.name,
            rule_type = %notification.rule.kind,
            alert_type = ?notification.alert.kind,
            endpoint = %notification.alert.endpoint,
            message = %notification.message,
            "alert triggered"
        );
        Ok(())
    }
}

/// Connects the metric store, the rule scheduler and the alert sinks.
///
/// `record` saves a sample and fires the trigger rules indexed under its
/// metric. Fired rules are queued to a worker that re-checks the rule's
/// condition against the latest metric values (unless gating is disabled)
/// and hands one notification per alert to every sink.
pub struct AlertEngine {
    store: MetricStore,
    scheduler: Arc<RuleScheduler>,
    sinks: Vec<Arc<dyn AlertSink>>,
    config: AlertsSection,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEngine")
            .field("store", &self.store)
            .field("scheduler", &self.scheduler)
            .field("sinks", &self.sinks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    pub fn new(store: MetricStore, scheduler: Arc<RuleScheduler>) -> Self {
        Self {
            store,
            scheduler,
            sinks: Vec::new(),
            config: AlertsSection::default(),
            worker: Mutex::new(None),
        }
    }

    pub fn from_config(
        provider: Arc<dyn StorageProvider>,
        grammar: Arc<dyn RecurrenceGrammar>,
        config: &EngineConfig,
    ) -> Self {
        let store = MetricStore::with_config(provider, &config.store);
        let validator = RuleValidator::with_config(grammar, &config.rules);
        Self::new(store, Arc::new(RuleScheduler::new(validator)))
            .with_alerts_config(config.alerts.clone())
    }

    pub fn with_alerts_config(mut self, config: AlertsSection) -> Self {
        self.config = config;
        self
    }

    pub fn add_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(&self) -> &MetricStore {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<RuleScheduler> {
        &self.scheduler
    }

    pub fn add_rule(&self, rule: Rule) -> bool {
        self.scheduler.add(rule)
    }

    /// Starts the scheduler and the dispatch worker. Notifications are also
    /// published on the returned channel.
    pub fn start(&self) -> Result<mpsc::UnboundedReceiver<AlertNotification>, AlertEngineError> {
        let runtime = Handle::try_current().map_err(|_| AlertEngineError::NoRuntime)?;
        let mut worker = self.worker();
        if worker.is_some() {
            return Err(AlertEngineError::AlreadyRunning);
        }

        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel::<Arc<Rule>>();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let on_fire: FireCallback = Arc::new(move |rule: &Rule| {
            if fired_tx.send(Arc::new(rule.clone())).is_err() {
                debug!(target: "alerts", "alert worker gone; dropping fired rule");
            }
        });
        self.scheduler.start(on_fire)?;

        let store = self.store.clone();
        let sinks = self.sinks.clone();
        let gate = self.config.gate_on_condition;
        *worker = Some(runtime.spawn(async move {
            while let Some(rule) = fired_rx.recv().await {
                for notification in dispatch(&store, &sinks, gate, rule).await {
                    // The subscriber may have gone away.
                    let _ = notify_tx.send(notification);
                }
            }
            debug!(target: "alerts", "alert worker finished");
        }));
        info!(target: "alerts", sinks = self.sinks.len(), gate, "alert engine started");
        Ok(notify_rx)
    }

    /// Stops the scheduler and detaches the dispatch worker, which drains
    /// the rules already queued in the background. The engine can be started
    /// again right away.
    pub fn stop(&self) {
        self.halt();
    }

    /// Stops the engine and waits for queued rules to be dispatched.
    pub async fn shutdown(&self) {
        if let Some(task) = self.halt() {
            if let Err(err) = task.await {
                error!(target: "alerts", error = %err, "alert worker failed");
            }
        }
    }

    fn halt(&self) -> Option<JoinHandle<()>> {
        self.scheduler.stop();
        let task = self.worker().take();
        info!(target: "alerts", "alert engine stopped");
        task
    }

    /// Saves a sample and fires the trigger rules watching `metric`.
    pub async fn record(
        &self,
        metric: &str,
        value: impl Into<Scalar>,
        timestamp: Option<f64>,
    ) -> Result<MetricSample, AlertEngineError> {
        let sample = self.store.save(metric, value, timestamp).await?;
        let fired = self.scheduler.fire_triggers(metric);
        debug!(target: "alerts", metric, fired, "metric recorded");
        Ok(sample)
    }

    fn worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn dispatch(
    store: &MetricStore,
    sinks: &[Arc<dyn AlertSink>],
    gate: bool,
    rule: Arc<Rule>,
) -> Vec<AlertNotification> {
    let metrics = rule.condition.metric_names();
    if gate {
        let snapshot = match store.snapshot(&metrics).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(target: "alerts", error = %err, "could not resolve rule metrics");
                return Vec::new();
            }
        };
        match rule.condition.holds(&snapshot) {
            Ok(true) => {}
            Ok(false) => {
                debug!(target: "alerts", rule_type = %rule.kind, "condition does not hold");
                return Vec::new();
            }
            Err(err) => {
                warn!(target: "alerts", error = %err, "condition evaluation failed");
                return Vec::new();
            }
        }
    }

    let message = if metrics.is_empty() {
        format!("{} rule fired", rule.kind)
    } else {
        format!("{} rule fired on {}", rule.kind, metrics.join(", "))
    };
    let triggered_at = Utc::now();
    let mut notifications = Vec::with_capacity(rule.alert.alerts().len());
    for alert in rule.alert.alerts() {
        let notification = AlertNotification {
            rule: Arc::clone(&rule),
            alert: alert.clone(),
            message: message.clone(),
            triggered_at,
        };
        for sink in sinks {
            if let Err(err) = sink.deliver(&notification).await {
                error!(
                    target: "alerts",
                    sink = sink.name(),
                    endpoint = %alert.endpoint,
                    error = %err,
                    "failed to deliver alert"
                );
            }
        }
        notifications.push(notification);
    }
    notifications
}
