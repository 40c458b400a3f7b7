//! # Vantage Response Cache
//!
//! Sharded in-process cache for DNS replies with optional stale serving
//! and an optional external backend.
//!
//! ## Design
//!
//! - Keys are question fingerprints (name, type, class, client-subnet)
//! - ≥8 shards, each an LRU map behind its own mutex, so lock hold times
//!   stay bounded under load; eviction is per-shard LRU on insert overflow
//! - Entries carry a fresh window (min answer TTL) and a stale window
//!   (`lazy_ttl`); stale-but-not-expired entries are served with every
//!   record TTL rewritten to a small configured value
//! - A single-flight tracker hands out at most one refresh token per key
//! - Backend lookups happen only on local miss; backend failures are
//!   logged and degrade to a miss, never surfaced

use hickory_proto::op::Message;
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use vantage_query::msgutil;

pub mod backend;
pub mod entry;
pub mod key;
pub mod singleflight;

pub use backend::{BackendEntry, BackendError, CacheBackend};
pub use entry::CacheEntry;
pub use key::CacheKey;
pub use singleflight::{RefreshToken, SingleFlight};

/// Minimum shard count; configured values below this are raised.
const MIN_SHARDS: usize = 8;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Total entry capacity, divided evenly across shards.
    pub capacity: usize,

    /// Shard count; at least [`MIN_SHARDS`].
    pub shards: usize,

    /// How long past the fresh window an entry may still be served.
    /// Zero disables stale serving.
    pub lazy_ttl: Duration,

    /// TTL stamped on every record of a reply served stale.
    pub lazy_reply_ttl: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            shards: MIN_SHARDS,
            lazy_ttl: Duration::ZERO,
            lazy_reply_ttl: 5,
        }
    }
}

/// Age class of a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Within the fresh window; served unchanged.
    Fresh,
    /// Past fresh but within the stale window; the caller should trigger
    /// a background refresh.
    Stale,
}

/// Sharded DNS response cache.
pub struct ResponseCache {
    config: CacheConfig,
    shards: Vec<Mutex<LruCache<CacheKey, CacheEntry>>>,
    flight: SingleFlight,
    backend: Option<Arc<dyn CacheBackend>>,
}

impl ResponseCache {
    /// Creates a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let shard_count = config.shards.max(MIN_SHARDS);
        let per_shard = (config.capacity / shard_count).max(1);
        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(LruCache::new(
                    NonZeroUsize::new(per_shard).expect("per-shard capacity is at least 1"),
                ))
            })
            .collect();

        Self {
            config,
            shards,
            flight: SingleFlight::new(),
            backend: None,
        }
    }

    /// Attaches an external backend.
    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// True when stale serving is enabled.
    pub fn lazy_enabled(&self) -> bool {
        !self.config.lazy_ttl.is_zero()
    }

    /// The stale window length.
    pub fn lazy_ttl(&self) -> Duration {
        self.config.lazy_ttl
    }

    /// Looks up a reply.
    ///
    /// Consults the in-memory shards first and the backend only on miss;
    /// a backend hit is promoted into memory. Never fails — any backend
    /// error is logged and reported as a miss. The returned reply still
    /// carries the transaction ID it was stored with; the caller rewrites
    /// it to the current question's ID.
    pub async fn get(&self, key: &CacheKey) -> Option<(Message, CacheState)> {
        if let Some(hit) = self.get_memory(key) {
            return Some(hit);
        }

        let backend = self.backend.as_ref()?;
        match backend.get(key).await {
            Ok(Some(entry)) => {
                let now = Instant::now();
                self.insert(
                    key.clone(),
                    CacheEntry::new(
                        entry.reply.clone(),
                        now + entry.fresh_for,
                        now + entry.stale_for,
                    ),
                );
                if entry.fresh_for.is_zero() {
                    self.serve_stale(entry.reply)
                } else {
                    Some((entry.reply, CacheState::Fresh))
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!(name = key.name(), error = %e, "cache backend lookup failed");
                None
            }
        }
    }

    /// In-memory lookup only.
    pub fn get_memory(&self, key: &CacheKey) -> Option<(Message, CacheState)> {
        let now = Instant::now();
        let mut shard = self.shards[self.shard_index(key)].lock();

        let entry = shard.get(key)?;
        if entry.is_fresh(now) {
            return Some((entry.reply().clone(), CacheState::Fresh));
        }
        if !entry.is_expired(now) && self.lazy_enabled() {
            let reply = entry.reply().clone();
            drop(shard);
            return self.serve_stale(reply);
        }

        shard.pop(key);
        None
    }

    /// Stores a reply with its windows.
    ///
    /// Replies that are not NOERROR or carry no answers are silently
    /// refused. Backend store failures are logged and dropped.
    pub async fn store(
        &self,
        key: &CacheKey,
        reply: &Message,
        fresh_for: Duration,
        stale_for: Duration,
    ) {
        if !msgutil::is_cacheable(reply) {
            debug!(name = key.name(), "reply not cacheable, skipping store");
            return;
        }

        let now = Instant::now();
        self.insert(
            key.clone(),
            CacheEntry::new(reply.clone(), now + fresh_for, now + fresh_for + stale_for),
        );

        if let Some(backend) = &self.backend {
            if let Err(e) = backend.store(key, reply, fresh_for, stale_for).await {
                warn!(name = key.name(), error = %e, "cache backend store failed");
            }
        }
    }

    /// Claims the single refresh slot for a key.
    ///
    /// The first stale hit gets a token; concurrent hits get `None` and
    /// must not launch their own refresh. Dropping the token releases the
    /// slot.
    pub fn try_refresh(&self, key: &CacheKey) -> Option<RefreshToken> {
        self.flight.try_begin(key)
    }

    /// Total number of live entries across shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: CacheKey, entry: CacheEntry) {
        let mut shard = self.shards[self.shard_index(&key)].lock();
        shard.put(key, entry);
    }

    fn serve_stale(&self, mut reply: Message) -> Option<(Message, CacheState)> {
        msgutil::set_ttl(&mut reply, self.config.lazy_reply_ttl);
        Some((reply, CacheState::Stale))
    }

    fn shard_index(&self, key: &CacheKey) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}
