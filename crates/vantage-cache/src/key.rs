//! Cache key implementation.

use hickory_proto::op::Message;
use hickory_proto::rr::rdata::opt::EdnsCode;
use hickory_proto::serialize::binary::BinEncodable;
use std::hash::{Hash, Hasher};

/// Fingerprint of a question: lowercased name, type, class, and the raw
/// EDNS client-subnet option when the client sent one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    name: String,
    qtype: u16,
    qclass: u16,
    subnet: Option<Vec<u8>>,
}

impl CacheKey {
    /// Derives the key from a query message.
    ///
    /// Returns `None` when the message carries no question.
    pub fn from_query(query: &Message) -> Option<Self> {
        let question = query.queries().first()?;

        let subnet = query
            .extensions()
            .as_ref()
            .and_then(|edns| edns.option(EdnsCode::Subnet))
            .and_then(|opt| opt.to_bytes().ok());

        Some(Self {
            name: question.name().to_lowercase().to_utf8(),
            qtype: question.query_type().into(),
            qclass: question.query_class().into(),
            subnet,
        })
    }

    /// The lowercased question name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.qtype.hash(state);
        self.qclass.hash(state);
        self.subnet.hash(state);
    }
}
