//! Event fan-out
//!
//! One [`EventStreamer`] owns the single upstream C2 event subscription and
//! delivers every received event to the registered [`StreamListener`]s.
//! Listeners buffer a bounded number of whitelisted events and drop the
//! oldest when full, so a slow consumer never blocks the reader or its
//! siblings.

mod listener;
mod streamer;

pub use listener::{ListenerHandle, ListenerId, StreamListener, DEFAULT_LISTENER_CAPACITY};
pub use streamer::EventStreamer;

use crate::c2::C2Error;

/// Event streaming errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    /// Streaming stopped because of cancellation
    #[error("event stream cancelled")]
    Cancelled,
    /// Upstream subscription could not be opened
    #[error("event stream subscription failed: {0}")]
    Subscribe(C2Error),
    /// Upstream subscription failed while receiving
    #[error("event stream receive failed: {0}")]
    Receive(C2Error),
    /// Listener is not (or no longer) registered
    #[error("listener {0} not found")]
    ListenerNotFound(ListenerId),
}

#[cfg(test)]
mod tests;
