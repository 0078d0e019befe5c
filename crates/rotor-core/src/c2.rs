//! C2 service collaborator
//!
//! The engine only needs three operations from the command-and-control
//! service: rotating a client key, rotating a topic key, and subscribing to
//! the stream of client events. The wire client lives outside this crate.

use async_trait::async_trait;
use futures::stream::BoxStream;
use sha2::{Digest, Sha256};

use crate::models::Event;

/// Length in bytes of a client key identifier
pub const CLIENT_ID_LEN: usize = 16;

/// Errors returned by the C2 collaborator
#[derive(Debug, Clone, thiserror::Error)]
pub enum C2Error {
    /// Service could not be reached
    #[error("c2 unavailable: {0}")]
    Unavailable(String),
    /// Service rejected the request
    #[error("c2 rejected request: {0}")]
    Rejected(String),
    /// Event stream failed while receiving
    #[error("c2 stream error: {0}")]
    Stream(String),
}

/// Stream of events from one upstream subscription.
pub type EventStream = BoxStream<'static, Result<Event, C2Error>>;

/// Command-and-control service operations used by the engine.
#[async_trait]
pub trait C2Client: Send + Sync {
    /// Request a new key for the client with the given hashed identifier.
    async fn new_client_key(&self, client_id: &[u8]) -> Result<(), C2Error>;

    /// Request a new key for a topic.
    async fn new_topic_key(&self, topic: &str) -> Result<(), C2Error>;

    /// Open a long-lived subscription to the C2 event stream.
    async fn subscribe_to_event_stream(&self) -> Result<EventStream, C2Error>;
}

/// Derive the key identifier of a client from its name.
pub fn hash_client_name(name: &str) -> Vec<u8> {
    let digest = Sha256::digest(name.as_bytes());
    digest[..CLIENT_ID_LEN].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_client_name_length() {
        assert_eq!(hash_client_name("alice").len(), CLIENT_ID_LEN);
        assert_eq!(hash_client_name("").len(), CLIENT_ID_LEN);
    }

    #[test]
    fn test_hash_client_name_stable() {
        assert_eq!(hash_client_name("alice"), hash_client_name("alice"));
        assert_ne!(hash_client_name("alice"), hash_client_name("bob"));
    }
}
