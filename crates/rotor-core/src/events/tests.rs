use super::*;
use crate::models::{Event, EventType};
use crate::test_support::{wait_until, FakeC2};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn subscribed(source: &str, target: &str) -> Event {
    Event::new(EventType::ClientSubscribed, source, target)
}

#[test]
fn test_handle_drops_oldest_when_full() {
    let handle = ListenerHandle::new(1, vec![EventType::ClientSubscribed], 3);
    for i in 0..4 {
        assert!(handle.on_event(subscribed(&format!("c{}", i), "t")));
    }

    let mut remaining = Vec::new();
    while let Some(event) = handle.pop() {
        remaining.push(event.source);
    }
    assert_eq!(remaining, vec!["c1", "c2", "c3"]);
}

#[test]
fn test_handle_discards_non_whitelisted() {
    let handle = ListenerHandle::new(1, vec![EventType::ClientUnsubscribed], 3);
    assert!(!handle.on_event(subscribed("c1", "t1")));
    assert!(handle.pop().is_none());
}

#[test]
fn test_handle_zero_capacity_holds_one() {
    let handle = ListenerHandle::new(1, vec![EventType::ClientSubscribed], 0);
    assert_eq!(handle.capacity(), 1);
    handle.on_event(subscribed("c1", "t"));
    handle.on_event(subscribed("c2", "t"));
    assert_eq!(handle.pop().unwrap().source, "c2");
}

#[tokio::test]
async fn test_listener_registers_and_closes() {
    let (c2, _feed) = FakeC2::new();
    let streamer = Arc::new(EventStreamer::new(c2));

    let listener = StreamListener::new(
        streamer.clone(),
        vec![EventType::ClientSubscribed],
        DEFAULT_LISTENER_CAPACITY,
    );
    assert_eq!(streamer.listeners().len(), 1);
    assert_eq!(streamer.listeners()[0].id(), listener.id());

    listener.close().unwrap();
    assert!(streamer.listeners().is_empty());

    // Second close surfaces NotFound
    assert!(matches!(
        listener.close(),
        Err(StreamError::ListenerNotFound(id)) if id == listener.id()
    ));
}

#[tokio::test]
async fn test_remove_unknown_listener() {
    let (c2, _feed) = FakeC2::new();
    let streamer = EventStreamer::new(c2);
    assert!(matches!(
        streamer.remove_listener(99),
        Err(StreamError::ListenerNotFound(99))
    ));
}

#[tokio::test]
async fn test_dropped_listener_deregisters() {
    let (c2, _feed) = FakeC2::new();
    let streamer = Arc::new(EventStreamer::new(c2));
    {
        let _listener = StreamListener::new(streamer.clone(), vec![EventType::ClientSubscribed], 4);
        assert_eq!(streamer.listeners().len(), 1);
    }
    assert!(streamer.listeners().is_empty());
}

#[tokio::test]
async fn test_stream_fans_out_to_all_listeners() {
    let (c2, feed) = FakeC2::new();
    let streamer = Arc::new(EventStreamer::new(c2));
    let a = StreamListener::new(streamer.clone(), vec![EventType::ClientSubscribed], 4);
    let b = StreamListener::new(
        streamer.clone(),
        vec![EventType::ClientSubscribed, EventType::ClientUnsubscribed],
        4,
    );
    let c = StreamListener::new(streamer.clone(), vec![EventType::ClientUnsubscribed], 4);

    let cancel = CancellationToken::new();
    let run = {
        let streamer = streamer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { streamer.start_stream(cancel).await })
    };

    feed.send(Ok(subscribed("c1", "t1"))).unwrap();

    let got_a = tokio::time::timeout(Duration::from_secs(1), a.recv())
        .await
        .unwrap();
    let got_b = tokio::time::timeout(Duration::from_secs(1), b.recv())
        .await
        .unwrap();
    assert_eq!(got_a.source, "c1");
    assert_eq!(got_b.target, "t1");

    // Give delivery a moment, then check the filtered listener stayed empty
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(c.is_empty());

    cancel.cancel();
    let result = run.await.unwrap();
    assert!(matches!(result, Err(StreamError::Cancelled)));
}

#[tokio::test]
async fn test_slow_listener_keeps_most_recent() {
    let (c2, feed) = FakeC2::new();
    let streamer = Arc::new(EventStreamer::new(c2));
    let slow = StreamListener::new(streamer.clone(), vec![EventType::ClientSubscribed], 2);
    let fast = StreamListener::new(streamer.clone(), vec![EventType::ClientSubscribed], 16);

    let cancel = CancellationToken::new();
    let run = {
        let streamer = streamer.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { streamer.start_stream(cancel).await })
    };

    for i in 0..5 {
        feed.send(Ok(subscribed(&format!("c{}", i), "t"))).unwrap();
    }

    assert!(wait_until(Duration::from_secs(1), || fast.len() == 5).await);
    assert!(wait_until(Duration::from_secs(1), || slow.len() == 2).await);
    assert_eq!(slow.try_recv().unwrap().source, "c3");
    assert_eq!(slow.try_recv().unwrap().source, "c4");

    cancel.cancel();
    let _ = run.await;
}

#[tokio::test]
async fn test_stream_returns_receive_error() {
    let (c2, feed) = FakeC2::new();
    let streamer = EventStreamer::new(c2);

    feed.send(Err(crate::c2::C2Error::Stream("reset".to_string())))
        .unwrap();
    let result = streamer.start_stream(CancellationToken::new()).await;
    assert!(matches!(result, Err(StreamError::Receive(_))));
}

#[tokio::test]
async fn test_stream_returns_subscribe_error() {
    let (c2, _feed) = FakeC2::new();
    *c2.subscribe_error.lock().unwrap() =
        Some(crate::c2::C2Error::Unavailable("down".to_string()));
    let streamer = EventStreamer::new(c2);

    let result = streamer.start_stream(CancellationToken::new()).await;
    assert!(matches!(result, Err(StreamError::Subscribe(_))));
}

#[tokio::test]
async fn test_stream_ends_when_upstream_closes() {
    let (c2, feed) = FakeC2::new();
    let streamer = EventStreamer::new(c2);
    drop(feed);

    let result = streamer.start_stream(CancellationToken::new()).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_stream_cancelled_before_subscribe() {
    let (c2, _feed) = FakeC2::new();
    let streamer = EventStreamer::new(c2);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = streamer.start_stream(cancel).await;
    assert!(matches!(result, Err(StreamError::Cancelled)));
}
