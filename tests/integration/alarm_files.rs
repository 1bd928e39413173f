//! Alarm definitions on disk feeding the pipeline

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;
use vigil::alarm::AlarmRepository;
use vigil::alarm::loader::FileAlarmRepository;
use vigil::pipeline::CheckPipeline;
use vigil::sentinel::SentinelRegistry;
use vigil::signal::Status;
use vigil::storage::{MemorySignalStore, SignalStore};
use vigil::tasks::MemoryQueue;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::endpoint_alarm;

#[tokio::test]
async fn test_stored_alarm_is_checked_from_disk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let alarms = Arc::new(FileAlarmRepository::new(dir.path()));

    let mut alarm = endpoint_alarm("payments", &server.uri());
    alarm.path = vec!["prod".to_string(), "api".to_string()];
    alarm.config.insert("expected_body".to_string(), "OK".into());
    alarms.set_alarm(alarm.clone()).await.unwrap();

    assert!(dir.path().join("prod/api/payments.toml").exists());

    let loaded = alarms.get_alarm("payments").await.unwrap().unwrap();
    assert_eq!(loaded, alarm);

    let store = Arc::new(MemorySignalStore::new());
    let pipeline = CheckPipeline::new(
        alarms.clone(),
        Arc::new(SentinelRegistry::with_builtins()),
        store.clone(),
        Arc::new(MemoryQueue::new()),
        Duration::from_secs(5),
    );

    let outcome = pipeline.check("payments").await.unwrap();
    assert_eq!(outcome.signal.status, Status::Healthy);
    assert_eq!(store.health("payments").await.unwrap(), Status::Healthy);

    alarms.delete_alarm("payments").await.unwrap();
    let err = pipeline.check("payments").await.unwrap_err();
    assert!(err.is_permanent());
}
