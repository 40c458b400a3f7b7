//! Single-flight coordination for background refreshes.

use super::CacheKey;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Tracks which keys already have a refresh in flight.
///
/// The first stale hit on a key wins a [`RefreshToken`]; further hits get
/// `None` until the token is dropped. The lock is held only for the set
/// lookup/insert, never across the refresh itself.
#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
}

impl SingleFlight {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to claim the refresh for a key.
    pub fn try_begin(&self, key: &CacheKey) -> Option<RefreshToken> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(key.clone()) {
            return None;
        }
        Some(RefreshToken {
            key: key.clone(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Number of refreshes currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns true when no refresh is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.lock().is_empty()
    }
}

/// Exclusive permission to refresh one key; released on drop.
#[derive(Debug)]
pub struct RefreshToken {
    key: CacheKey,
    in_flight: Arc<Mutex<HashSet<CacheKey>>>,
}

impl Drop for RefreshToken {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn key(name: &str) -> CacheKey {
        let mut msg = Message::new();
        msg.set_id(1);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
        CacheKey::from_query(&msg).unwrap()
    }

    #[test]
    fn only_one_token_per_key() {
        let flight = SingleFlight::new();
        let k = key("stale.test.");

        let token = flight.try_begin(&k);
        assert!(token.is_some());
        assert!(flight.try_begin(&k).is_none());

        // Independent keys are unaffected.
        assert!(flight.try_begin(&key("other.test.")).is_some());
    }

    #[test]
    fn drop_releases_the_key() {
        let flight = SingleFlight::new();
        let k = key("stale.test.");

        let token = flight.try_begin(&k).unwrap();
        drop(token);

        assert!(flight.try_begin(&k).is_some());
        assert_eq!(flight.len(), 1);
    }
}
