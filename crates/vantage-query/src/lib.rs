//! # Vantage Query Context
//!
//! The per-request state that travels through the resolution pipeline:
//! the inbound question, the transport it arrived on, the response slot,
//! and the status tag stages use to short-circuit one another.

use hickory_proto::op::Message;
use std::net::SocketAddr;

pub mod msgutil;

/// Transport the query arrived on.
///
/// Stream clients can receive arbitrarily large replies, so upstream
/// exchanges on their behalf should prefer a non-truncated variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// UDP datagram.
    Datagram,
    /// TCP or any other byte-stream transport.
    Stream,
}

impl Transport {
    /// Returns true for byte-stream transports.
    pub const fn is_stream(&self) -> bool {
        matches!(self, Transport::Stream)
    }
}

/// Where a query currently stands in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No stage has produced a response yet.
    Pending,
    /// A stage produced a response that should be written to the client.
    Responded,
    /// The query was refused by policy (blacklist); the response, if any,
    /// is a synthesized negative answer.
    Rejected,
    /// The query should be answered with silence.
    Dropped,
    /// Resolution failed; the transport layer decides what to emit.
    Failed,
}

impl QueryStatus {
    /// Returns true once a stage has concluded the query one way or another.
    pub const fn is_final(&self) -> bool {
        !matches!(self, QueryStatus::Pending)
    }
}

/// Mutable per-request context, owned exclusively by one task while the
/// query is in flight.
#[derive(Debug, Clone)]
pub struct QueryContext {
    query: Message,
    client: SocketAddr,
    transport: Transport,
    response: Option<Message>,
    status: QueryStatus,
}

impl QueryContext {
    /// Creates a context for an inbound query.
    pub fn new(query: Message, client: SocketAddr, transport: Transport) -> Self {
        Self {
            query,
            client,
            transport,
            response: None,
            status: QueryStatus::Pending,
        }
    }

    /// The inbound query message.
    pub fn query(&self) -> &Message {
        &self.query
    }

    /// The first question of the query, if present.
    pub fn question(&self) -> Option<&hickory_proto::op::Query> {
        self.query.queries().first()
    }

    /// Client address, for diagnostics.
    pub fn client(&self) -> SocketAddr {
        self.client
    }

    /// Transport the query arrived on.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Current status tag.
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// The response slot.
    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    /// Sets the response and status in one step.
    ///
    /// The transaction ID of the stored reply is rewritten to match the
    /// inbound query so stages never leak a stale ID to the client.
    pub fn set_response(&mut self, mut response: Message, status: QueryStatus) {
        response.set_id(self.query.id());
        self.response = Some(response);
        self.status = status;
    }

    /// Marks the query as concluded without a response.
    pub fn set_status(&mut self, status: QueryStatus) {
        self.status = status;
    }

    /// Takes the response out of the context, leaving the status untouched.
    pub fn take_response(&mut self) -> Option<Message> {
        self.response.take()
    }
}

impl std::fmt::Display for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.question() {
            Some(q) => write!(
                f,
                "{} {} {} from {}",
                q.name(),
                q.query_class(),
                q.query_type(),
                self.client
            ),
            None => write!(f, "<no question> from {}", self.client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn query_msg(name: &str, rtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(0x2b0d);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
        msg
    }

    #[test]
    fn response_id_follows_query() {
        let query = query_msg("example.com.", RecordType::A);
        let mut qctx = QueryContext::new(
            query.clone(),
            "127.0.0.1:40000".parse().unwrap(),
            Transport::Datagram,
        );

        let mut reply = msgutil::reply_to(&query);
        reply.set_id(0x1111); // simulate a cached reply with a foreign ID
        qctx.set_response(reply, QueryStatus::Responded);

        assert_eq!(qctx.response().unwrap().id(), 0x2b0d);
        assert_eq!(qctx.status(), QueryStatus::Responded);
    }

    #[test]
    fn status_finality() {
        assert!(!QueryStatus::Pending.is_final());
        assert!(QueryStatus::Responded.is_final());
        assert!(QueryStatus::Rejected.is_final());
        assert!(QueryStatus::Dropped.is_final());
        assert!(QueryStatus::Failed.is_final());
    }
}
