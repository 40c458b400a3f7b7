//! Matchers over the query context.

use super::{DomainSet, IpSet, Matcher, Result};
use hickory_proto::rr::RecordType;
use std::collections::HashSet;
use vantage_query::{msgutil, QueryContext};

/// Matches the question name against a domain set.
#[derive(Debug, Clone)]
pub struct QNameMatcher {
    domains: DomainSet,
}

impl QNameMatcher {
    /// Wraps a domain set.
    pub fn new(domains: DomainSet) -> Self {
        Self { domains }
    }

    /// Number of rules behind the matcher.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if the matcher has no rules.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl Matcher for QNameMatcher {
    fn matches(&self, qctx: &QueryContext) -> Result<bool> {
        let Some(question) = qctx.question() else {
            return Ok(false);
        };
        Ok(self.domains.contains(&question.name().to_utf8()))
    }
}

/// Matches the question type against a configured set.
#[derive(Debug, Clone)]
pub struct QTypeMatcher {
    types: HashSet<RecordType>,
}

impl QTypeMatcher {
    /// Builds a matcher over the given types.
    pub fn new<I: IntoIterator<Item = RecordType>>(types: I) -> Self {
        Self {
            types: types.into_iter().collect(),
        }
    }
}

impl Matcher for QTypeMatcher {
    fn matches(&self, qctx: &QueryContext) -> Result<bool> {
        let Some(question) = qctx.question() else {
            return Ok(false);
        };
        Ok(self.types.contains(&question.query_type()))
    }
}

/// Matches when any A/AAAA record in the context's response slot falls
/// inside the configured networks.
///
/// Replies without address records (including CNAME-only chains) never
/// match.
#[derive(Debug, Clone)]
pub struct ResponseIpMatcher {
    nets: IpSet,
}

impl ResponseIpMatcher {
    /// Wraps an IP set.
    pub fn new(nets: IpSet) -> Self {
        Self { nets }
    }

    /// Tests a reply directly, outside a query context.
    pub fn match_reply(&self, reply: &hickory_proto::op::Message) -> bool {
        msgutil::answer_ips(reply)
            .into_iter()
            .any(|ip| self.nets.contains(ip))
    }
}

impl Matcher for ResponseIpMatcher {
    fn matches(&self, qctx: &QueryContext) -> Result<bool> {
        Ok(qctx.response().is_some_and(|r| self.match_reply(r)))
    }
}
