//! Optional external cache backend.

use super::CacheKey;
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::time::Duration;
use thiserror::Error;

/// Backend failure. Never fatal to the caller: lookups degrade to miss,
/// stores are logged and dropped.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend protocol error: {0}")]
    Protocol(String),
}

/// A reply fetched from a backend, with its remaining windows.
#[derive(Debug, Clone)]
pub struct BackendEntry {
    /// The stored reply.
    pub reply: Message,
    /// Time left in the fresh window.
    pub fresh_for: Duration,
    /// Time left in the stale window, measured from the same origin.
    pub stale_for: Duration,
}

/// External key-value store behind the in-process cache.
///
/// Implementations are expected to be remote (network round-trips), so both
/// operations are async and should honor caller cancellation by dropping.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetches a stored reply. `Ok(None)` is a clean miss.
    async fn get(&self, key: &CacheKey) -> Result<Option<BackendEntry>, BackendError>;

    /// Stores a reply with its windows.
    async fn store(
        &self,
        key: &CacheKey,
        reply: &Message,
        fresh_for: Duration,
        stale_for: Duration,
    ) -> Result<(), BackendError>;
}
