//! The resolution pipeline.
//!
//! Stage order is fixed: hosts → arbitrary records → blacklist → cache →
//! dispatcher → TTL clamp. A stage that sets a response short-circuits
//! the stages between it and the clamp; the clamp always applies to the
//! final reply.

use super::{Handler, ResponseWriter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vantage_cache::{CacheKey, CacheState, ResponseCache};
use vantage_match::{Arbitrary, Hosts, Matcher, QNameMatcher};
use vantage_query::{msgutil, QueryContext, QueryStatus};
use vantage_resolver::{Dispatcher, ResolverError};

/// The assembled pipeline. Cheap to share; every field is immutable after
/// assembly.
pub struct Pipeline {
    hosts: Option<Arc<Hosts>>,
    arbitrary: Option<Arc<Arbitrary>>,
    blacklist: Option<Arc<QNameMatcher>>,
    cache: Option<Arc<ResponseCache>>,
    dispatcher: Arc<Dispatcher>,
    ttl_bounds: Option<(u32, u32)>,
}

impl Pipeline {
    /// Creates a pipeline around a dispatcher; the optional stages are
    /// attached with the builder methods.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            hosts: None,
            arbitrary: None,
            blacklist: None,
            cache: None,
            dispatcher,
            ttl_bounds: None,
        }
    }

    /// Attaches a hosts table.
    pub fn with_hosts(mut self, hosts: Arc<Hosts>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Attaches an arbitrary-record table.
    pub fn with_arbitrary(mut self, arbitrary: Arc<Arbitrary>) -> Self {
        self.arbitrary = Some(arbitrary);
        self
    }

    /// Attaches a blacklist.
    pub fn with_blacklist(mut self, blacklist: Arc<QNameMatcher>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    /// Attaches a response cache.
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Clamps final reply TTLs into `[min, max]`.
    pub fn with_ttl_bounds(mut self, min: u32, max: u32) -> Self {
        self.ttl_bounds = Some((min, max));
        self
    }

    /// Runs the query through the stage chain, leaving the outcome in the
    /// context's response slot and status tag.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        qctx: &mut QueryContext,
    ) -> Result<(), ResolverError> {
        self.resolve_inner(cancel, qctx).await?;

        if let (Some((min, max)), Some(response)) = (self.ttl_bounds, qctx.response()) {
            let mut clamped = response.clone();
            msgutil::clamp_ttl(&mut clamped, min, max);
            let status = qctx.status();
            qctx.set_response(clamped, status);
        }
        Ok(())
    }

    async fn resolve_inner(
        &self,
        cancel: &CancellationToken,
        qctx: &mut QueryContext,
    ) -> Result<(), ResolverError> {
        if let Some(hosts) = &self.hosts {
            if let Some(reply) = hosts.lookup(qctx.query()) {
                debug!(query = %qctx, "answered from hosts");
                qctx.set_response(reply, QueryStatus::Responded);
                return Ok(());
            }
        }

        if let Some(arbitrary) = &self.arbitrary {
            if let Some(reply) = arbitrary.lookup(qctx.query()) {
                debug!(query = %qctx, "answered from arbitrary records");
                qctx.set_response(reply, QueryStatus::Responded);
                return Ok(());
            }
        }

        if let Some(blacklist) = &self.blacklist {
            match blacklist.matches(qctx) {
                Ok(true) => {
                    debug!(query = %qctx, "blacklisted");
                    qctx.set_response(msgutil::nxdomain_reply(qctx.query()), QueryStatus::Rejected);
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => warn!(query = %qctx, error = %e, "blacklist matcher failed"),
            }
        }

        let cache_key = self
            .cache
            .as_ref()
            .and_then(|_| CacheKey::from_query(qctx.query()));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some((reply, state)) = cache.get(key).await {
                debug!(query = %qctx, ?state, "cache hit");
                if state == CacheState::Stale {
                    self.spawn_refresh(cache, key, qctx);
                }
                qctx.set_response(reply, QueryStatus::Responded);
                return Ok(());
            }
        }

        match self.dispatcher.dispatch(cancel, qctx).await {
            Ok(reply) => {
                if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
                    store_reply(cache, key, &reply).await;
                }
                qctx.set_response(reply, QueryStatus::Responded);
                Ok(())
            }
            Err(e @ ResolverError::Cancelled) => {
                qctx.set_status(QueryStatus::Dropped);
                Err(e)
            }
            Err(e) => {
                qctx.set_status(QueryStatus::Failed);
                Err(e)
            }
        }
    }

    /// Launches the single-flight background refresh for a stale key.
    ///
    /// The refresh deliberately runs on its own token: it must survive the
    /// request that happened to trigger it.
    fn spawn_refresh(&self, cache: &Arc<ResponseCache>, key: &CacheKey, qctx: &QueryContext) {
        let Some(token) = cache.try_refresh(key) else {
            return; // Another request already owns the refresh.
        };

        let cache = cache.clone();
        let key = key.clone();
        let dispatcher = self.dispatcher.clone();
        let refresh_ctx = QueryContext::new(qctx.query().clone(), qctx.client(), qctx.transport());

        tokio::spawn(async move {
            let _token = token;
            match dispatcher
                .dispatch(&CancellationToken::new(), &refresh_ctx)
                .await
            {
                Ok(reply) => {
                    store_reply(&cache, &key, &reply).await;
                    debug!(name = key.name(), "stale entry refreshed");
                }
                Err(e) => debug!(name = key.name(), error = %e, "stale refresh failed"),
            }
        });
    }
}

async fn store_reply(cache: &ResponseCache, key: &CacheKey, reply: &hickory_proto::op::Message) {
    let fresh_for = Duration::from_secs(u64::from(msgutil::min_answer_ttl(reply, 0)));
    cache.store(key, reply, fresh_for, cache.lazy_ttl()).await;
}

#[async_trait]
impl Handler for Pipeline {
    async fn serve(
        &self,
        cancel: &CancellationToken,
        qctx: &mut QueryContext,
        writer: &mut dyn ResponseWriter,
    ) {
        if let Err(e) = self.resolve(cancel, qctx).await {
            warn!(query = %qctx, error = %e, "query failed");
            return;
        }

        match qctx.status() {
            QueryStatus::Responded | QueryStatus::Rejected => {
                if let Some(reply) = qctx.response() {
                    if let Err(e) = writer.write(reply).await {
                        warn!(query = %qctx, error = %e, "failed to write response");
                    }
                }
            }
            // No reply to emit; stay silent and let the transport decide.
            _ => {}
        }
    }
}
