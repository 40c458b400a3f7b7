//! Split-horizon dispatch.
//!
//! Three routing strategies, tried in order:
//!
//! 1. **Simple forwarding** — a single `upstream` pool handles everything.
//! 2. **Domain classification** — the question name is tested against the
//!    remote-domain set (higher-precedence deny policy for the local
//!    resolver), then the local-domain set.
//! 3. **IP-validated race** — local and remote pools resolve concurrently;
//!    the local answer wins only when it names an address inside the local
//!    network, and the remote answer is held back for a short latency
//!    budget to give the local resolver first shot.

use super::exchange::exchange_parallel_msg;
use super::{exchange_parallel, Pool, ResolverError, Result};
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vantage_match::{Matcher, QNameMatcher, QTypeMatcher, ResponseIpMatcher};
use vantage_query::QueryContext;

/// Default latency budget granted to the local pool.
pub const DEFAULT_LOCAL_LATENCY: Duration = Duration::from_millis(50);

/// Configuration of the split-horizon strategy.
pub struct SplitConfig {
    /// Resolvers on the local network.
    pub local: Pool,
    /// Resolvers reached through the tunnel.
    pub remote: Pool,
    /// The local network's address space; a local answer is accepted only
    /// when it names one of these.
    pub local_ips: ResponseIpMatcher,
    /// Names always routed to the local pool.
    pub local_domains: Option<QNameMatcher>,
    /// Names always routed to the remote pool.
    pub remote_domains: Option<QNameMatcher>,
    /// How long the remote answer is held while the local pool works.
    pub local_latency: Duration,
}

enum Strategy {
    Forward(Pool),
    Split {
        config: SplitConfig,
        /// Question types the IP-validated race can judge.
        address_types: QTypeMatcher,
    },
}

/// Routes queries to upstream pools.
pub struct Dispatcher {
    strategy: Strategy,
}

impl Dispatcher {
    /// A simple forwarder over one pool.
    pub fn forwarder(pool: Pool) -> Self {
        Self {
            strategy: Strategy::Forward(pool),
        }
    }

    /// A split-horizon dispatcher.
    pub fn split(config: SplitConfig) -> Self {
        Self {
            strategy: Strategy::Split {
                config,
                address_types: QTypeMatcher::new([RecordType::A, RecordType::AAAA]),
            },
        }
    }

    /// Resolves a query through the configured strategy.
    ///
    /// The cancellation token bounds every upstream exchange this call
    /// starts; by return, no spawned work outlives the token's child
    /// scope.
    pub async fn dispatch(
        &self,
        cancel: &CancellationToken,
        qctx: &QueryContext,
    ) -> Result<Message> {
        match &self.strategy {
            Strategy::Forward(pool) => exchange_parallel(cancel, qctx, pool).await,
            Strategy::Split {
                config,
                address_types,
            } => self.dispatch_split(config, address_types, cancel, qctx).await,
        }
    }

    async fn dispatch_split(
        &self,
        split: &SplitConfig,
        address_types: &QTypeMatcher,
        cancel: &CancellationToken,
        qctx: &QueryContext,
    ) -> Result<Message> {
        if let Some(matcher) = &split.remote_domains {
            if matches_or_warn(matcher, qctx, "remote-domain") {
                debug!(query = %qctx, "remote domain match");
                return exchange_parallel(cancel, qctx, &split.remote).await;
            }
        }

        if let Some(matcher) = &split.local_domains {
            if matches_or_warn(matcher, qctx, "local-domain") {
                debug!(query = %qctx, "local domain match");
                return exchange_parallel(cancel, qctx, &split.local).await;
            }
        }

        // The IP test below is meaningless for non-address questions, so
        // they go straight to the local resolver.
        if !address_types.matches(qctx).unwrap_or(false) {
            return exchange_parallel(cancel, qctx, &split.local).await;
        }

        self.race(split, cancel, qctx).await
    }

    /// The fallback race between the local and remote pools.
    ///
    /// A local success containing a local-network address wins
    /// immediately. The remote result becomes acceptable ("armed") once
    /// the latency timer fires, the local pool answers without a local
    /// address, or the local pool fails; an early remote arrival is
    /// buffered until then. Both pools failing is a terminal error.
    async fn race(
        &self,
        split: &SplitConfig,
        cancel: &CancellationToken,
        qctx: &QueryContext,
    ) -> Result<Message> {
        let scope = cancel.child_token();
        let _guard = scope.clone().drop_guard();

        let (ltx, mut lrx) = oneshot::channel();
        let (rtx, mut rrx) = oneshot::channel();
        spawn_pool_exchange(&scope, qctx, split.local.clone(), ltx);
        spawn_pool_exchange(&scope, qctx, split.remote.clone(), rtx);

        let latency = tokio::time::sleep(split.local_latency);
        tokio::pin!(latency);

        let mut remote_armed = false;
        let mut buffered_remote: Option<Message> = None;
        let mut local_done = false;
        let mut remote_done = false;
        let mut last_err: Option<ResolverError> = None;

        loop {
            if local_done && remote_done {
                let last = last_err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no acceptable answer".to_string());
                return Err(ResolverError::AllFailed { last });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ResolverError::Cancelled),

                _ = &mut latency, if !remote_armed => {
                    remote_armed = true;
                    if let Some(reply) = buffered_remote.take() {
                        debug!(query = %qctx, "latency budget spent, remote response accepted");
                        return Ok(reply);
                    }
                }

                res = &mut lrx, if !local_done => {
                    local_done = true;
                    match flatten(res) {
                        Ok(reply) if split.local_ips.match_reply(&reply) => {
                            debug!(query = %qctx, "local response contains local ip, accepted");
                            return Ok(reply);
                        }
                        Ok(_) => {
                            debug!(query = %qctx, "local response has no local ip, waiting on remote");
                            remote_armed = true;
                            if let Some(reply) = buffered_remote.take() {
                                return Ok(reply);
                            }
                        }
                        Err(e) => {
                            warn!(query = %qctx, error = %e, "local pool failed");
                            last_err = Some(e);
                            remote_armed = true;
                            if let Some(reply) = buffered_remote.take() {
                                return Ok(reply);
                            }
                        }
                    }
                }

                res = &mut rrx, if !remote_done => {
                    remote_done = true;
                    match flatten(res) {
                        Ok(reply) if remote_armed => {
                            debug!(query = %qctx, "remote response accepted");
                            return Ok(reply);
                        }
                        Ok(reply) => buffered_remote = Some(reply),
                        Err(e) => {
                            warn!(query = %qctx, error = %e, "remote pool failed");
                            last_err = Some(e);
                        }
                    }
                }
            }
        }
    }
}

fn matches_or_warn(matcher: &QNameMatcher, qctx: &QueryContext, what: &str) -> bool {
    match matcher.matches(qctx) {
        Ok(matched) => matched,
        Err(e) => {
            warn!(query = %qctx, error = %e, "{what} matcher failed, treating as non-match");
            false
        }
    }
}

fn spawn_pool_exchange(
    scope: &CancellationToken,
    qctx: &QueryContext,
    pool: Pool,
    tx: oneshot::Sender<Result<Message>>,
) {
    let scope = scope.clone();
    let query = qctx.query().clone();
    let prefer_stream = qctx.transport().is_stream();

    tokio::spawn(async move {
        let result = exchange_parallel_msg(&scope, &query, prefer_stream, &pool).await;
        let _ = tx.send(result);
    });
}

fn flatten(res: std::result::Result<Result<Message>, oneshot::error::RecvError>) -> Result<Message> {
    match res {
        Ok(inner) => inner,
        Err(_) => Err(ResolverError::Protocol("exchange task dropped".into())),
    }
}
