use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::recurrence::{spawn_timer, Recurrence, TimerHandle};
use crate::rules::{Rule, RuleKey, RuleKind, RuleValidator};

/// Invoked with the full rule document whenever a rule fires.
pub type FireCallback = Arc<dyn Fn(&Rule) + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("schedule rules need a tokio runtime to drive their timers")]
    NoRuntime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub triggers: usize,
    pub schedules: usize,
    pub total: usize,
    pub running: bool,
}

struct RegisteredRule {
    key: RuleKey,
    rule: Arc<Rule>,
    recurrence: Option<Arc<dyn Recurrence>>,
    active: bool,
    timer: Option<TimerHandle>,
}

#[derive(Default)]
struct SchedulerState {
    rules: Vec<RegisteredRule>,
    positions: HashMap<RuleKey, usize>,
    triggers: HashMap<String, Vec<(FireCallback, RuleKey)>>,
    running: bool,
}

impl SchedulerState {
    fn lookup(&self, key: &RuleKey) -> Option<&RegisteredRule> {
        self.positions.get(key).map(|&index| &self.rules[index])
    }
}

/// Owns registered rules, the metric trigger index and schedule timers.
///
/// Rules are activated in batches: `start` wires up every rule that is not
/// yet active, so rules added while running wait for the next `start`.
pub struct RuleScheduler {
    validator: RuleValidator,
    state: Mutex<SchedulerState>,
}

impl fmt::Debug for RuleScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleScheduler")
            .field("validator", &self.validator)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for RuleScheduler {
    fn default() -> Self {
        Self::new(RuleValidator::default())
    }
}

impl RuleScheduler {
    pub fn new(validator: RuleValidator) -> Self {
        Self {
            validator,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    /// Builds a scheduler and registers `rules`, skipping rejected ones.
    pub fn with_rules<I>(validator: RuleValidator, rules: I) -> Self
    where
        I: IntoIterator<Item = Rule>,
    {
        let scheduler = Self::new(validator);
        for rule in rules {
            scheduler.add(rule);
        }
        scheduler
    }

    pub fn validator(&self) -> &RuleValidator {
        &self.validator
    }

    /// Registers `rule` as inactive. Returns `false` when the rule is invalid
    /// or an identical rule is already registered.
    pub fn add(&self, rule: Rule) -> bool {
        if !self.validator.validate(&rule) {
            return false;
        }
        let key = match rule.key() {
            Ok(key) => key,
            Err(err) => {
                warn!(target: "scheduler", error = %err, "could not derive rule key");
                return false;
            }
        };
        let recurrence = match rule.kind {
            RuleKind::Trigger => None,
            RuleKind::Schedule => self.validator.parse_schedule(rule.schedule.as_ref()),
        };

        let mut state = self.state();
        if state.positions.contains_key(&key) {
            debug!(target: "scheduler", %key, "duplicate rule ignored");
            return false;
        }
        let kind = rule.kind;
        let index = state.rules.len();
        state.positions.insert(key.clone(), index);
        state.rules.push(RegisteredRule {
            key: key.clone(),
            rule: Arc::new(rule),
            recurrence,
            active: false,
            timer: None,
        });
        info!(target: "scheduler", %key, %kind, "rule registered");
        true
    }

    /// Parses and registers an untyped rule document.
    pub fn add_document(&self, document: &Value) -> bool {
        match Rule::parse(document) {
            Ok(rule) => self.add(rule),
            Err(err) => {
                debug!(target: "rules", error = %err, "rejected rule document");
                false
            }
        }
    }

    /// Activates every inactive rule: trigger rules are indexed under each
    /// metric their condition names, schedule rules get a recurring timer.
    pub fn start(&self, on_fire: FireCallback) -> Result<(), SchedulerError> {
        let mut state = self.state();
        let needs_timers = state
            .rules
            .iter()
            .any(|entry| !entry.active && entry.rule.kind == RuleKind::Schedule);
        let runtime = match Handle::try_current() {
            Ok(handle) => Some(handle),
            Err(_) if needs_timers => return Err(SchedulerError::NoRuntime),
            Err(_) => None,
        };

        let SchedulerState {
            rules, triggers, ..
        } = &mut *state;
        let mut activated = 0usize;
        for entry in rules.iter_mut().filter(|entry| !entry.active) {
            match entry.rule.kind {
                RuleKind::Trigger => {
                    for name in entry.rule.condition.metric_names() {
                        triggers
                            .entry(name)
                            .or_default()
                            .push((Arc::clone(&on_fire), entry.key.clone()));
                    }
                }
                RuleKind::Schedule => {
                    let (Some(runtime), Some(recurrence)) = (runtime.as_ref(), entry.recurrence.clone())
                    else {
                        warn!(target: "scheduler", key = %entry.key, "schedule rule has no recurrence");
                        continue;
                    };
                    let rule = Arc::clone(&entry.rule);
                    let callback = Arc::clone(&on_fire);
                    entry.timer = Some(spawn_timer(runtime, recurrence, move || callback(&*rule)));
                }
            }
            entry.active = true;
            activated += 1;
        }
        state.running = true;
        info!(
            target: "scheduler",
            activated,
            indexed_metrics = state.triggers.len(),
            "scheduler started"
        );
        Ok(())
    }

    /// Clears the trigger index and cancels every timer. Registered rules are
    /// kept and become inactive. Returns once no timer tick is running.
    pub fn stop(&self) {
        let timers = {
            let mut state = self.state();
            state.triggers.clear();
            state.running = false;
            state
                .rules
                .iter_mut()
                .filter_map(|entry| {
                    entry.active = false;
                    entry.timer.take()
                })
                .collect::<Vec<_>>()
        };
        // Ticks may call back into the scheduler, so cancel outside the lock.
        for timer in &timers {
            timer.cancel();
        }
        info!(target: "scheduler", cancelled = timers.len(), "scheduler stopped");
    }

    /// Invokes, in registration order, every callback indexed under `metric`.
    /// Returns the number of callbacks invoked; nothing fires while stopped.
    pub fn fire_triggers(&self, metric: &str) -> usize {
        let pending = {
            let state = self.state();
            if !state.running {
                return 0;
            }
            state
                .triggers
                .get(metric)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|(callback, key)| {
                            state
                                .lookup(key)
                                .map(|entry| (Arc::clone(callback), Arc::clone(&entry.rule)))
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        trace!(target: "scheduler", metric, fired = pending.len(), "dispatching triggers");
        for (callback, rule) in &pending {
            callback(&**rule);
        }
        pending.len()
    }

    pub fn fire_triggers_many<I, S>(&self, metrics: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        metrics
            .into_iter()
            .map(|metric| self.fire_triggers(metric.as_ref()))
            .sum()
    }

    pub fn rule(&self, key: &RuleKey) -> Option<Arc<Rule>> {
        self.state().lookup(key).map(|entry| Arc::clone(&entry.rule))
    }

    /// Keys of every registered rule, in registration order.
    pub fn keys(&self) -> Vec<RuleKey> {
        self.state().rules.iter().map(|entry| entry.key.clone()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state();
        let triggers = state
            .rules
            .iter()
            .filter(|entry| entry.rule.kind == RuleKind::Trigger)
            .count();
        let schedules = state.rules.len() - triggers;
        SchedulerStats {
            triggers,
            schedules,
            total: triggers + schedules,
            running: state.running,
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
