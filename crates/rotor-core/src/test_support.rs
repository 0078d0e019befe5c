//! Fakes shared by unit tests

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::c2::{C2Client, C2Error, EventStream};
use crate::models::{Event, Rule, TriggerState};
use crate::store::{RuleWriter, StoreError, TriggerStateService};

pub(crate) type EventFeed = mpsc::UnboundedSender<Result<Event, C2Error>>;

/// C2 client recording key requests and serving a test-controlled stream.
#[derive(Default)]
pub(crate) struct FakeC2 {
    pub client_keys: Mutex<Vec<Vec<u8>>>,
    pub topic_keys: Mutex<Vec<String>>,
    pub failing_topics: Mutex<Vec<String>>,
    pub subscribe_error: Mutex<Option<C2Error>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Result<Event, C2Error>>>>,
}

impl FakeC2 {
    pub fn new() -> (Arc<Self>, EventFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fake = Self {
            events: Mutex::new(Some(rx)),
            ..Self::default()
        };
        (Arc::new(fake), tx)
    }

    pub fn client_keys(&self) -> Vec<Vec<u8>> {
        self.client_keys.lock().unwrap().clone()
    }

    pub fn topic_keys(&self) -> Vec<String> {
        self.topic_keys.lock().unwrap().clone()
    }

    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().push(topic.to_string());
    }
}

#[async_trait]
impl C2Client for FakeC2 {
    async fn new_client_key(&self, client_id: &[u8]) -> Result<(), C2Error> {
        self.client_keys.lock().unwrap().push(client_id.to_vec());
        Ok(())
    }

    async fn new_topic_key(&self, topic: &str) -> Result<(), C2Error> {
        if self.failing_topics.lock().unwrap().iter().any(|t| t == topic) {
            return Err(C2Error::Rejected(format!("topic {}", topic)));
        }
        self.topic_keys.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn subscribe_to_event_stream(&self) -> Result<EventStream, C2Error> {
        if let Some(err) = self.subscribe_error.lock().unwrap().take() {
            return Err(err);
        }
        match self.events.lock().unwrap().take() {
            Some(rx) => Ok(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// Rule writer that fails every save.
pub(crate) struct FailingRuleWriter;

#[async_trait]
impl RuleWriter for FailingRuleWriter {
    async fn all(&self) -> Result<Vec<Rule>, StoreError> {
        Err(StoreError::Backend("database offline".to_string()))
    }

    async fn save(&self, _rule: &Rule) -> Result<(), StoreError> {
        Err(StoreError::Backend("database offline".to_string()))
    }
}

/// Trigger state service that fails every lookup.
pub(crate) struct FailingStateService;

#[async_trait]
impl TriggerStateService for FailingStateService {
    async fn by_trigger_id(&self, _trigger_id: i64) -> Result<TriggerState, StoreError> {
        Err(StoreError::Backend("database offline".to_string()))
    }

    async fn save(&self, _state: &TriggerState) -> Result<(), StoreError> {
        Err(StoreError::Backend("database offline".to_string()))
    }
}

/// Poll `check` until it holds or the timeout elapses.
pub(crate) async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
