use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use vigil_core::{Rule, RuleKind, RuleScheduler, RuleValidator, SchedulerStats};

fn rules() -> Vec<Rule> {
    [
        json!({
            "type": "trigger",
            "condition": "anything.goes",
            "alert": {"type": "email", "endpoint": "test@example.com"}
        }),
        json!({
            "type": "schedule",
            "condition": "anything.goes",
            "schedule": {"text": "every 2 s"},
            "alert": {"type": "email", "endpoint": "test@example.com"}
        }),
    ]
    .iter()
    .map(|document| Rule::parse(document).unwrap())
    .collect()
}

fn recorder() -> (Arc<Mutex<Vec<RuleKind>>>, vigil_core::FireCallback) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    (
        fired,
        Arc::new(move |rule: &Rule| sink.lock().unwrap().push(rule.kind)),
    )
}

#[tokio::test(start_paused = true)]
async fn start_executes_trigger_and_schedule_rules() {
    let scheduler = RuleScheduler::with_rules(RuleValidator::default(), rules());
    let (fired, callback) = recorder();

    scheduler.start(callback).unwrap();
    assert_eq!(scheduler.fire_triggers("anything.goes"), 1);

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    scheduler.stop();

    let fired = fired.lock().unwrap().clone();
    assert_eq!(fired[0], RuleKind::Trigger);
    assert!(fired.contains(&RuleKind::Schedule), "schedule rule never fired");
}

#[tokio::test(start_paused = true)]
async fn stop_silences_timers_and_triggers() {
    let scheduler = RuleScheduler::with_rules(RuleValidator::default(), rules());
    let (fired, callback) = recorder();

    scheduler.start(callback).unwrap();
    scheduler.stop();
    assert!(!scheduler.stats().running);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(scheduler.fire_triggers("anything.goes"), 0);
    assert!(fired.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn schedule_keeps_firing_until_stopped() {
    let scheduler = RuleScheduler::with_rules(RuleValidator::default(), rules());
    let (fired, callback) = recorder();

    scheduler.start(callback).unwrap();
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    scheduler.stop();
    let ticks = fired.lock().unwrap().len();
    assert!((5..=6).contains(&ticks), "fired {ticks} times");

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fired.lock().unwrap().len(), ticks);

    let (restarted, callback) = recorder();
    scheduler.start(callback).unwrap();
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    scheduler.stop();
    assert!(!restarted.lock().unwrap().is_empty());
}

#[test]
fn stats_count_rules_by_kind() {
    let scheduler = RuleScheduler::with_rules(RuleValidator::default(), rules());
    assert_eq!(
        scheduler.stats(),
        SchedulerStats {
            triggers: 1,
            schedules: 1,
            total: 2,
            running: false,
        }
    );
    let duplicate = rules().remove(0);
    assert!(!scheduler.add(duplicate));
    assert_eq!(scheduler.stats().total, 2);
}
