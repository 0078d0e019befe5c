use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

use super::{EventStreamer, StreamError};
use crate::models::{Event, EventType};

/// Default number of events a listener buffers
pub const DEFAULT_LISTENER_CAPACITY: usize = 10;

/// Listener identifier, unique per streamer
pub type ListenerId = u64;

/// Streamer-side view of a listener.
///
/// Holds the whitelist and the bounded buffer the streamer delivers into.
#[derive(Debug)]
pub struct ListenerHandle {
    id: ListenerId,
    event_types: Vec<EventType>,
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    available: Notify,
}

impl ListenerHandle {
    pub(crate) fn new(id: ListenerId, event_types: Vec<EventType>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id,
            event_types,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Notify::new(),
        }
    }

    /// Listener ID
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whitelisted event types
    pub fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    /// Buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether events of this type are delivered to the listener
    pub fn accepts(&self, event_type: EventType) -> bool {
        self.event_types.contains(&event_type)
    }

    /// Deliver an event. Never blocks: a full buffer evicts its oldest
    /// event first. Returns whether the event was buffered.
    pub(crate) fn on_event(&self, event: Event) -> bool {
        if !self.accepts(event.event_type) {
            return false;
        }

        {
            let mut queue = self.queue();
            if queue.len() >= self.capacity {
                if let Some(dropped) = queue.pop_front() {
                    debug!(
                        listener_id = self.id,
                        event_type = %dropped.event_type,
                        "Listener buffer full, dropped oldest event"
                    );
                }
            }
            queue.push_back(event);
        }
        self.available.notify_one();
        true
    }

    pub(super) fn pop(&self) -> Option<Event> {
        self.queue().pop_front()
    }

    fn len(&self) -> usize {
        self.queue().len()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Consumer side of a listener, owned by exactly one watcher.
///
/// Registered with the streamer on creation; deregistered by [`close`] or,
/// failing that, on drop.
///
/// [`close`]: StreamListener::close
pub struct StreamListener {
    handle: Arc<ListenerHandle>,
    streamer: Arc<EventStreamer>,
    closed: AtomicBool,
}

impl StreamListener {
    /// Create a listener for the given event types and register it.
    pub fn new(
        streamer: Arc<EventStreamer>,
        event_types: Vec<EventType>,
        capacity: usize,
    ) -> Self {
        let handle = Arc::new(ListenerHandle::new(
            streamer.next_listener_id(),
            event_types,
            capacity,
        ));
        streamer.add_listener(handle.clone());
        Self {
            handle,
            streamer,
            closed: AtomicBool::new(false),
        }
    }

    /// Listener ID
    pub fn id(&self) -> ListenerId {
        self.handle.id
    }

    /// Wait for the next buffered event, oldest first.
    ///
    /// Cancel-safe: dropping the future never loses a buffered event.
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.handle.pop() {
                return event;
            }
            self.handle.available.notified().await;
        }
    }

    /// Take the next buffered event without waiting
    pub fn try_recv(&self) -> Option<Event> {
        self.handle.pop()
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.handle.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deregister from the streamer.
    ///
    /// Closing a listener that is no longer registered returns
    /// [`StreamError::ListenerNotFound`].
    pub fn close(&self) -> Result<(), StreamError> {
        self.closed.store(true, Ordering::SeqCst);
        self.streamer.remove_listener(self.handle.id)
    }
}

impl Drop for StreamListener {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.streamer.remove_listener(self.handle.id);
        }
    }
}

impl std::fmt::Debug for StreamListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamListener")
            .field("id", &self.handle.id)
            .field("event_types", &self.handle.event_types)
            .field("buffered", &self.handle.len())
            .finish()
    }
}
