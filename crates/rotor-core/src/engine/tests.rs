use super::*;
use crate::c2::C2Error;
use crate::events::StreamListener;
use crate::models::{Event, EventType};
use crate::store::{MemoryRuleStore, MemoryTriggerStateStore};
use crate::test_support::{FailingRuleWriter, FakeC2};

fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_stream_retry_delay(0)
        .with_shutdown_timeout(2)
}

#[tokio::test]
async fn test_rule_load_failure_is_reported_and_engine_keeps_running() {
    let (c2, _feed) = FakeC2::new();
    let engine = Arc::new(AutomationEngine::new(
        fast_config(),
        c2,
        Arc::new(FailingRuleWriter),
        Arc::new(MemoryTriggerStateStore::new()),
    ));
    let mut errors = engine.take_errors().unwrap();
    assert!(engine.take_errors().is_none());

    let shutdown = CancellationToken::new();
    let task = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(shutdown).await })
    };

    let reported = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap();
    assert!(matches!(reported, Some(Error::Store(_))));

    // A restart retries the load
    engine.restart();
    let reported = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap();
    assert!(matches!(reported, Some(Error::Store(_))));
    assert!(!task.is_finished());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(3), task)
        .await
        .expect("engine should stop after shutdown")
        .unwrap();
}

#[tokio::test]
async fn test_stream_is_reopened_after_subscribe_failure() {
    let (c2, feed) = FakeC2::new();
    *c2.subscribe_error.lock().unwrap() = Some(C2Error::Unavailable("down".to_string()));
    let engine = Arc::new(AutomationEngine::new(
        fast_config(),
        c2,
        Arc::new(MemoryRuleStore::new()),
        Arc::new(MemoryTriggerStateStore::new()),
    ));
    let mut errors = engine.take_errors().unwrap();
    let listener = StreamListener::new(
        engine.streamer().clone(),
        vec![EventType::ClientSubscribed],
        4,
    );

    let shutdown = CancellationToken::new();
    let task = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { engine.run(shutdown).await })
    };

    let reported = tokio::time::timeout(Duration::from_secs(1), errors.recv())
        .await
        .unwrap();
    assert!(matches!(
        reported,
        Some(Error::Stream(StreamError::Subscribe(C2Error::Unavailable(_))))
    ));

    feed.send(Ok(Event::new(EventType::ClientSubscribed, "c1", "t1")))
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(1), listener.recv())
        .await
        .expect("event should arrive over the reopened stream");
    assert_eq!(event.source, "c1");

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn test_restart_requested_before_run_is_kept() {
    let (c2, _feed) = FakeC2::new();
    let engine = AutomationEngine::new(
        fast_config(),
        c2,
        Arc::new(FailingRuleWriter),
        Arc::new(MemoryTriggerStateStore::new()),
    );
    let mut errors = engine.take_errors().unwrap();
    engine.handle().request_restart();
    engine.handle().request_restart();

    let shutdown = CancellationToken::new();
    let stopper = shutdown.clone();
    let run = engine.run(shutdown);
    let observe = async {
        // First generation plus exactly one rebuild for both requests
        for _ in 0..2 {
            assert!(matches!(errors.recv().await, Some(Error::Store(_))));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(errors.try_recv().is_err());
        stopper.cancel();
    };
    tokio::time::timeout(Duration::from_secs(3), async { tokio::join!(run, observe) })
        .await
        .expect("engine should stop");
}

#[test]
fn test_config_is_kept() {
    let (c2, _feed) = FakeC2::new();
    let engine = AutomationEngine::new(
        EngineConfig::new().with_listener_capacity(3),
        c2,
        Arc::new(MemoryRuleStore::new()),
        Arc::new(MemoryTriggerStateStore::new()),
    )
    .with_validator(Arc::new(ModelValidator::new()));
    assert_eq!(engine.config().listener_capacity, 3);
}
