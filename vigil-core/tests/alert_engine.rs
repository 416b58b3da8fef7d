use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use vigil_core::{
    load_engine_config, AlertEngine, AlertKind, AlertNotification, AlertSink, AlertsSection,
    CalendarGrammar, DispatchError, MemoryProvider, MetricStore, Rule, RuleScheduler,
};

#[derive(Debug, Default)]
struct RecordingSink {
    delivered: Mutex<Vec<(AlertKind, String)>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, notification: &AlertNotification) -> Result<(), DispatchError> {
        self.delivered.lock().unwrap().push((
            notification.alert.kind,
            notification.alert.endpoint.clone(),
        ));
        Ok(())
    }
}

fn cpu_rule() -> Rule {
    Rule::parse(&json!({
        "type": "trigger",
        "condition": {"op": ">", "args": ["cpu.load", 90]},
        "alert": [
            {"type": "email", "endpoint": "ops@example.com"},
            {"type": "sms", "endpoint": "5551234"}
        ]
    }))
    .unwrap()
}

async fn drain(notifications: &mut UnboundedReceiver<AlertNotification>) -> Vec<AlertNotification> {
    let mut received = Vec::new();
    while let Ok(Some(notification)) =
        tokio::time::timeout(Duration::from_secs(1), notifications.recv()).await
    {
        received.push(notification);
    }
    received
}

#[tokio::test]
async fn records_fire_alerts_when_condition_holds() {
    let sink = Arc::new(RecordingSink::default());
    let engine = AlertEngine::new(MetricStore::in_memory(), Arc::new(RuleScheduler::default()))
        .add_sink(sink.clone());
    assert!(engine.add_rule(cpu_rule()));

    let mut notifications = engine.start().unwrap();
    engine.record("mem.free", 1, Some(5.0)).await.unwrap();
    engine.record("cpu.load", 50, Some(10.0)).await.unwrap();
    engine.shutdown().await;
    assert!(drain(&mut notifications).await.is_empty());
    assert!(sink.delivered.lock().unwrap().is_empty());

    let mut notifications = engine.start().unwrap();
    engine.record("cpu.load", 97, Some(20.0)).await.unwrap();
    engine.shutdown().await;

    let received = drain(&mut notifications).await;
    assert_eq!(received.len(), 2);
    assert!(received
        .iter()
        .all(|notification| notification.message == "trigger rule fired on cpu.load"));
    assert_eq!(
        *sink.delivered.lock().unwrap(),
        vec![
            (AlertKind::Email, "ops@example.com".to_string()),
            (AlertKind::Sms, "5551234".to_string()),
        ]
    );
}

#[tokio::test]
async fn ungated_engine_alerts_on_every_update() {
    let sink = Arc::new(RecordingSink::default());
    let engine = AlertEngine::new(MetricStore::in_memory(), Arc::new(RuleScheduler::default()))
        .with_alerts_config(AlertsSection {
            gate_on_condition: false,
        })
        .add_sink(sink.clone());
    engine.add_rule(cpu_rule());
    let _notifications = engine.start().unwrap();

    engine.record("cpu.load", 1, Some(10.0)).await.unwrap();
    engine.record("cpu.load", 2, Some(11.0)).await.unwrap();
    engine.shutdown().await;

    assert_eq!(sink.delivered.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn stopped_engine_can_start_again() {
    let sink = Arc::new(RecordingSink::default());
    let engine = AlertEngine::new(MetricStore::in_memory(), Arc::new(RuleScheduler::default()))
        .add_sink(sink.clone());
    engine.add_rule(cpu_rule());

    let _first = engine.start().unwrap();
    engine.stop();
    assert!(!engine.scheduler().is_running());

    let mut notifications = engine.start().unwrap();
    assert!(engine.scheduler().is_running());
    engine.record("cpu.load", 99, Some(5.0)).await.unwrap();
    engine.shutdown().await;

    assert_eq!(drain(&mut notifications).await.len(), 2);
    assert_eq!(sink.delivered.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn engine_refuses_second_start() {
    let engine = AlertEngine::new(MetricStore::in_memory(), Arc::new(RuleScheduler::default()));
    let _notifications = engine.start().unwrap();
    assert!(engine.start().is_err());
    engine.shutdown().await;
    assert!(!engine.scheduler().is_running());
}

#[tokio::test]
async fn builds_from_config_file() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/vigil.toml");
    let config = load_engine_config(path).unwrap();
    let engine = AlertEngine::from_config(
        Arc::new(MemoryProvider::new()),
        Arc::new(CalendarGrammar),
        &config,
    );
    assert!(engine.add_rule(cpu_rule()));
    assert!(!engine.add_rule(cpu_rule()));
    assert_eq!(engine.scheduler().stats().triggers, 1);

    engine.store().save("cpu.load", 1, Some(30.0)).await.unwrap();
    engine.store().save("cpu.load", 2, Some(95.0)).await.unwrap();
    // The fixture config queries by minute unless told otherwise.
    let values = engine.store().range("cpu.load", 0, 120, None).await.unwrap();
    assert_eq!(values.len(), 2);
}
