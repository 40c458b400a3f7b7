//! Cache entry implementation.

use hickory_proto::op::Message;
use std::time::Instant;

/// A cached reply with its freshness windows.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    reply: Message,
    fresh_until: Instant,
    stale_until: Instant,
}

impl CacheEntry {
    /// Creates an entry. `stale_until` is clamped to never precede
    /// `fresh_until`.
    pub fn new(reply: Message, fresh_until: Instant, stale_until: Instant) -> Self {
        Self {
            reply,
            fresh_until,
            stale_until: stale_until.max(fresh_until),
        }
    }

    /// The stored reply.
    pub fn reply(&self) -> &Message {
        &self.reply
    }

    /// True while the entry may be served as-is.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.fresh_until
    }

    /// True once even the stale window has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.stale_until
    }
}
