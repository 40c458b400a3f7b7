//! Parallel exchange across a pool of upstreams.

use super::{Pool, ResolverError, Result};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use hickory_proto::op::{Message, ResponseCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vantage_query::QueryContext;

/// Exchanges a query with every member of the pool concurrently and
/// returns the first acceptable reply.
///
/// A reply is acceptable when the transport succeeded and the rcode is not
/// SERVFAIL/REFUSED — unless the member is trusted, in which case any
/// rcode concludes the pool. Once a reply is accepted the remaining sends
/// are aborted. If every member fails the composite error carries the
/// last per-member failure.
pub async fn exchange_parallel(
    cancel: &CancellationToken,
    qctx: &QueryContext,
    pool: &Pool,
) -> Result<Message> {
    exchange_parallel_msg(cancel, qctx.query(), qctx.transport().is_stream(), pool).await
}

pub(crate) async fn exchange_parallel_msg(
    cancel: &CancellationToken,
    query: &Message,
    prefer_stream: bool,
    pool: &Pool,
) -> Result<Message> {
    if pool.is_empty() {
        return Err(ResolverError::NoUpstream);
    }

    let mut abort_handles = Vec::with_capacity(pool.len());
    let mut futs = FuturesUnordered::new();

    for upstream in pool {
        let upstream = upstream.clone();
        let query = query.clone();
        let scope = cancel.clone();

        let handle = tokio::spawn(async move {
            let result = tokio::select! {
                _ = scope.cancelled() => Err(ResolverError::Cancelled),
                r = upstream.exchange(&query, prefer_stream) => r,
            };
            (result, upstream.trusted(), upstream.address().to_string())
        });

        abort_handles.push(handle.abort_handle());
        futs.push(handle);
    }

    let abort_all = |handles: &[tokio::task::AbortHandle]| {
        for handle in handles {
            handle.abort();
        }
    };

    let mut last_err: Option<ResolverError> = None;

    loop {
        let joined = tokio::select! {
            _ = cancel.cancelled() => {
                abort_all(&abort_handles);
                return Err(ResolverError::Cancelled);
            }
            joined = futs.next() => joined,
        };

        let Some(joined) = joined else {
            // Every send has completed without an acceptable reply.
            let last = last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no error recorded".to_string());
            return Err(ResolverError::AllFailed { last });
        };

        match joined {
            Ok((Ok(reply), trusted, address)) => {
                let rcode = reply.response_code();
                let negative = matches!(rcode, ResponseCode::ServFail | ResponseCode::Refused);
                if negative && !trusted {
                    debug!(upstream = %address, rcode = %rcode, "untrusted negative rcode, trying next");
                    last_err =
                        Some(ResolverError::Protocol(format!("{address} answered {rcode}")));
                    continue;
                }

                abort_all(&abort_handles);
                return Ok(reply);
            }
            Ok((Err(e), _, address)) => {
                debug!(upstream = %address, error = %e, "upstream exchange failed");
                last_err = Some(e);
            }
            Err(e) => {
                warn!(error = %e, "upstream task failed");
                last_err = Some(ResolverError::Protocol(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Upstream;
    use async_trait::async_trait;
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use vantage_query::msgutil;

    pub(crate) fn query_msg(name: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(0x0404);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
        msg
    }

    pub(crate) struct MockUpstream {
        pub address: String,
        pub trusted: bool,
        pub delay: Duration,
        pub rcode: ResponseCode,
        pub answer: Option<Ipv4Addr>,
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    impl MockUpstream {
        pub(crate) fn ok(address: &str, delay: Duration, answer: Ipv4Addr) -> Self {
            Self {
                address: address.to_string(),
                trusted: false,
                delay,
                rcode: ResponseCode::NoError,
                answer: Some(answer),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing(address: &str, delay: Duration) -> Self {
            Self {
                address: address.to_string(),
                trusted: false,
                delay,
                rcode: ResponseCode::NoError,
                answer: None,
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn rcode(address: &str, delay: Duration, rcode: ResponseCode) -> Self {
            Self {
                address: address.to_string(),
                trusted: false,
                delay,
                rcode,
                answer: None,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn trusted(mut self) -> Self {
            self.trusted = true;
            self
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn exchange(&self, query: &Message, _prefer_stream: bool) -> Result<Message> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;

            if self.fail {
                return Err(ResolverError::Timeout);
            }

            let mut reply = msgutil::reply_to(query);
            reply.set_response_code(self.rcode);
            if let Some(ip) = self.answer {
                let name = query.queries().first().unwrap().name().clone();
                reply.add_answer(Record::from_rdata(name, 60, RData::A(A::from(ip))));
            }
            Ok(reply)
        }

        fn address(&self) -> &str {
            &self.address
        }

        fn trusted(&self) -> bool {
            self.trusted
        }
    }

    fn ctx(name: &str) -> QueryContext {
        QueryContext::new(
            query_msg(name),
            "127.0.0.1:5353".parse().unwrap(),
            vantage_query::Transport::Datagram,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn fastest_success_wins() {
        let slow = Arc::new(MockUpstream::ok(
            "slow",
            Duration::from_millis(200),
            Ipv4Addr::new(2, 2, 2, 2),
        ));
        let pool: Pool = vec![
            slow.clone(),
            Arc::new(MockUpstream::ok(
                "fast",
                Duration::from_millis(10),
                Ipv4Addr::new(1, 1, 1, 1),
            )),
        ];

        let cancel = CancellationToken::new();
        let reply = exchange_parallel(&cancel, &ctx("x.test."), &pool)
            .await
            .unwrap();

        assert_eq!(
            msgutil::answer_ips(&reply),
            vec!["1.1.1.1".parse::<std::net::IpAddr>().unwrap()]
        );
        assert_eq!(slow.calls.load(Ordering::SeqCst), 1, "both were dispatched");
    }

    #[tokio::test(start_paused = true)]
    async fn untrusted_servfail_fails_over() {
        let pool: Pool = vec![
            Arc::new(MockUpstream::rcode(
                "bad",
                Duration::from_millis(5),
                ResponseCode::ServFail,
            )),
            Arc::new(MockUpstream::ok(
                "good",
                Duration::from_millis(50),
                Ipv4Addr::new(9, 9, 9, 9),
            )),
        ];

        let cancel = CancellationToken::new();
        let reply = exchange_parallel(&cancel, &ctx("x.test."), &pool)
            .await
            .unwrap();
        assert_eq!(reply.response_code(), ResponseCode::NoError);
    }

    #[tokio::test(start_paused = true)]
    async fn trusted_servfail_concludes_the_pool() {
        let shadow = Arc::new(MockUpstream::ok(
            "shadow",
            Duration::from_millis(50),
            Ipv4Addr::new(9, 9, 9, 9),
        ));
        let pool: Pool = vec![
            Arc::new(
                MockUpstream::rcode("primary", Duration::from_millis(5), ResponseCode::ServFail)
                    .trusted(),
            ),
            shadow.clone(),
        ];

        let cancel = CancellationToken::new();
        let reply = exchange_parallel(&cancel, &ctx("x.test."), &pool)
            .await
            .unwrap();
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert_eq!(shadow.calls.load(Ordering::SeqCst), 1, "both were dispatched");
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_produce_composite_error() {
        let pool: Pool = vec![
            Arc::new(MockUpstream::failing("a", Duration::from_millis(5))),
            Arc::new(MockUpstream::failing("b", Duration::from_millis(10))),
        ];

        let cancel = CancellationToken::new();
        let err = exchange_parallel(&cancel, &ctx("x.test."), &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::AllFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_is_an_error() {
        let cancel = CancellationToken::new();
        let err = exchange_parallel(&cancel, &ctx("x.test."), &Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::NoUpstream));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_promptly() {
        let pool: Pool = vec![Arc::new(MockUpstream::ok(
            "never",
            Duration::from_secs(3600),
            Ipv4Addr::new(1, 1, 1, 1),
        ))];

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = exchange_parallel(&cancel, &ctx("x.test."), &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolverError::Cancelled));
    }
}
