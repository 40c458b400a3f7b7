//! Hosts-file answer source.

use super::{domain::normalize, MatchError, Result};
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use vantage_query::msgutil;

/// TTL stamped on synthesized address records.
const HOSTS_TTL: u32 = 3600;

#[derive(Debug, Default, Clone)]
struct HostAddrs {
    v4: Vec<std::net::Ipv4Addr>,
    v6: Vec<std::net::Ipv6Addr>,
}

/// Static name-to-address table parsed from hosts files.
///
/// Classic hosts syntax: `ADDRESS NAME [NAME…]`, `#` comments. A name may
/// accumulate addresses across lines and files.
#[derive(Debug, Default, Clone)]
pub struct Hosts {
    entries: HashMap<String, HostAddrs>,
}

impl Hosts {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one address for a name.
    pub fn add(&mut self, name: &str, addr: IpAddr) {
        let entry = self.entries.entry(normalize(name)).or_default();
        match addr {
            IpAddr::V4(v4) => entry.v4.push(v4),
            IpAddr::V6(v6) => entry.v6.push(v6),
        }
    }

    /// Loads one or more hosts files, merging into this table.
    pub fn load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        for path in paths {
            for (line, text) in super::read_rule_lines(path.as_ref())? {
                let mut fields = text.split_whitespace();
                let addr_text = fields.next().unwrap_or_default();
                let addr: IpAddr = addr_text.parse().map_err(|_| MatchError::Parse {
                    path: path.as_ref().to_path_buf(),
                    line,
                    message: format!("invalid address {addr_text:?}"),
                })?;

                let mut any_name = false;
                for name in fields {
                    self.add(name, addr);
                    any_name = true;
                }
                if !any_name {
                    return Err(MatchError::Parse {
                        path: path.as_ref().to_path_buf(),
                        line,
                        message: "address without hostnames".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Number of names in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Answers a query from the table.
    ///
    /// Returns a synthesized reply when the question name is present and
    /// the qtype is A, AAAA or ANY; `None` otherwise. The reply carries
    /// AA=0, RA=1, NOERROR, and the question section verbatim.
    pub fn lookup(&self, query: &Message) -> Option<Message> {
        let question = query.queries().first()?;
        let qtype = question.query_type();
        if !matches!(qtype, RecordType::A | RecordType::AAAA | RecordType::ANY) {
            return None;
        }

        let addrs = self.entries.get(&normalize(&question.name().to_utf8()))?;
        let owner = question.name().clone();

        let mut reply = msgutil::reply_to(query);
        if matches!(qtype, RecordType::A | RecordType::ANY) {
            for v4 in &addrs.v4 {
                reply.add_answer(Record::from_rdata(
                    owner.clone(),
                    HOSTS_TTL,
                    RData::A(A::from(*v4)),
                ));
            }
        }
        if matches!(qtype, RecordType::AAAA | RecordType::ANY) {
            for v6 in &addrs.v6 {
                reply.add_answer(Record::from_rdata(
                    owner.clone(),
                    HOSTS_TTL,
                    RData::AAAA(AAAA::from(*v6)),
                ));
            }
        }
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, Query};
    use hickory_proto::rr::Name;
    use std::str::FromStr;

    fn query_msg(name: &str, rtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(3);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
        msg
    }

    fn table() -> Hosts {
        let mut hosts = Hosts::new();
        hosts.add("a.test", "10.0.0.1".parse().unwrap());
        hosts.add("a.test", "fd00::1".parse().unwrap());
        hosts
    }

    #[test]
    fn answers_matching_family() {
        let hosts = table();

        let reply = hosts.lookup(&query_msg("a.test.", RecordType::A)).unwrap();
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(
            msgutil::answer_ips(&reply),
            vec!["10.0.0.1".parse::<IpAddr>().unwrap()]
        );
        assert!(!reply.authoritative());
        assert!(reply.recursion_available());

        let reply = hosts.lookup(&query_msg("a.test.", RecordType::ANY)).unwrap();
        assert_eq!(reply.answers().len(), 2);
    }

    #[test]
    fn unknown_name_or_qtype_is_passed_through() {
        let hosts = table();
        assert!(hosts.lookup(&query_msg("b.test.", RecordType::A)).is_none());
        assert!(hosts.lookup(&query_msg("a.test.", RecordType::TXT)).is_none());
    }

    #[test]
    fn missing_family_yields_empty_noerror() {
        let mut hosts = Hosts::new();
        hosts.add("v4only.test", "10.0.0.9".parse().unwrap());

        let reply = hosts
            .lookup(&query_msg("v4only.test.", RecordType::AAAA))
            .unwrap();
        assert!(reply.answers().is_empty());
        assert_eq!(
            reply.response_code(),
            hickory_proto::op::ResponseCode::NoError
        );
    }
}
