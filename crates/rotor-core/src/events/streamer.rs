use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::listener::{ListenerHandle, ListenerId};
use super::StreamError;
use crate::c2::C2Client;
use crate::models::Event;

/// A registered listener and the feed of its delivery task.
struct Registration {
    handle: Arc<ListenerHandle>,
    feed: mpsc::UnboundedSender<Event>,
}

/// Owns the upstream C2 event subscription and fans events out to listeners.
///
/// The read loop is sequential. Each listener has its own delivery task, so
/// a listener never holds up the reader or its siblings. The listener
/// registry is the only lock-protected state.
pub struct EventStreamer {
    client: Arc<dyn C2Client>,
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl EventStreamer {
    /// Create a streamer reading from the given C2 client
    pub fn new(client: Arc<dyn C2Client>) -> Self {
        Self {
            client,
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open the upstream subscription and dispatch events until cancelled.
    ///
    /// Returns [`StreamError::Cancelled`] on cancellation, the upstream error
    /// if subscribing or receiving fails, and `Ok(())` if the upstream closes
    /// the stream. Never retries; restarting is up to the caller.
    pub async fn start_stream(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            subscribed = self.client.subscribe_to_event_stream() => {
                subscribed.map_err(StreamError::Subscribe)?
            }
        };
        info!("Event stream started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Event stream cancelled");
                    return Err(StreamError::Cancelled);
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => self.dispatch(event),
                    Some(Err(e)) => {
                        warn!(error = %e, "Event stream receive failed");
                        return Err(StreamError::Receive(e));
                    }
                    None => {
                        info!("Event stream closed by upstream");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Register a listener and start its delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn add_listener(&self, handle: Arc<ListenerHandle>) {
        let (feed, mut rx) = mpsc::unbounded_channel::<Event>();
        let sink = handle.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.on_event(event);
            }
        });

        debug!(
            listener_id = handle.id(),
            event_types = ?handle.event_types(),
            "Listener added"
        );
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { handle, feed });
    }

    /// Deregister a listener. Its delivery task ends once the feed drains.
    pub fn remove_listener(&self, id: ListenerId) -> Result<(), StreamError> {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let pos = listeners
            .iter()
            .position(|r| r.handle.id() == id)
            .ok_or(StreamError::ListenerNotFound(id))?;
        listeners.remove(pos);
        debug!(listener_id = id, "Listener removed");
        Ok(())
    }

    /// Snapshot of the registered listeners
    pub fn listeners(&self) -> Vec<Arc<ListenerHandle>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| r.handle.clone())
            .collect()
    }

    pub(crate) fn next_listener_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn dispatch(&self, event: Event) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(
            event_type = %event.event_type,
            source = %event.source,
            target = %event.target,
            listeners = listeners.len(),
            "Dispatching event"
        );
        for registration in listeners.iter() {
            if registration.feed.send(event.clone()).is_err() {
                debug!(
                    listener_id = registration.handle.id(),
                    "Listener delivery task gone, event skipped"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamer")
            .field("listeners", &self.listeners().len())
            .finish()
    }
}
