//! Arbitrary-record answer source.

use super::{domain::normalize, MatchError, Result};
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::{A, AAAA, CNAME, PTR, TXT};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use vantage_query::msgutil;

/// TTL stamped on synthesized records.
const ARBITRARY_TTL: u32 = 3600;

type RecordKey = (String, RecordType, DNSClass);

/// Static table of arbitrary resource records keyed on
/// (name, qtype, qclass).
///
/// Line grammar: `NAME CLASS TYPE RDATA…`, e.g.
///
/// ```text
/// example.com IN A    192.0.2.1
/// example.com IN TXT  "hello"
/// alias.test  IN CNAME target.test
/// ```
///
/// Supported types: A, AAAA, CNAME, PTR, TXT. Several lines may share one
/// key; all of their records are returned together.
#[derive(Debug, Default, Clone)]
pub struct Arbitrary {
    records: HashMap<RecordKey, Vec<Record>>,
}

impl Arbitrary {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and adds a single rule line.
    pub fn add_rule(&mut self, rule: &str) -> std::result::Result<(), String> {
        let fields: Vec<&str> = rule.split_whitespace().collect();
        if fields.len() < 4 {
            return Err("expected NAME CLASS TYPE RDATA".to_string());
        }

        let name = Name::from_str(fields[0]).map_err(|e| e.to_string())?;
        let class = DNSClass::from_str(fields[1]).map_err(|e| e.to_string())?;
        let rtype = RecordType::from_str(fields[2]).map_err(|e| e.to_string())?;
        let rdata = parse_rdata(rtype, &fields[3..])?;

        let key = (normalize(fields[0]), rtype, class);
        let mut record = Record::from_rdata(name, ARBITRARY_TTL, rdata);
        record.set_dns_class(class);
        self.records.entry(key).or_default().push(record);
        Ok(())
    }

    /// Loads one or more rule files, merging into this table.
    pub fn load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        for path in paths {
            for (line, text) in super::read_rule_lines(path.as_ref())? {
                self.add_rule(&text).map_err(|message| MatchError::Parse {
                    path: path.as_ref().to_path_buf(),
                    line,
                    message,
                })?;
            }
        }
        Ok(())
    }

    /// Number of keys in the table.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Answers a query from the table, matching on (name, qtype, qclass).
    pub fn lookup(&self, query: &Message) -> Option<Message> {
        let question = query.queries().first()?;
        let key = (
            normalize(&question.name().to_utf8()),
            question.query_type(),
            question.query_class(),
        );
        let records = self.records.get(&key)?;

        let mut reply = msgutil::reply_to(query);
        reply.add_answers(records.iter().cloned());
        Some(reply)
    }
}

fn parse_rdata(rtype: RecordType, fields: &[&str]) -> std::result::Result<RData, String> {
    let first = fields[0];
    match rtype {
        RecordType::A => {
            let addr: std::net::Ipv4Addr = first.parse().map_err(|_| format!("invalid IPv4 address {first:?}"))?;
            Ok(RData::A(A::from(addr)))
        }
        RecordType::AAAA => {
            let addr: std::net::Ipv6Addr = first.parse().map_err(|_| format!("invalid IPv6 address {first:?}"))?;
            Ok(RData::AAAA(AAAA::from(addr)))
        }
        RecordType::CNAME => {
            let target = Name::from_str(first).map_err(|e| e.to_string())?;
            Ok(RData::CNAME(CNAME(target)))
        }
        RecordType::PTR => {
            let target = Name::from_str(first).map_err(|e| e.to_string())?;
            Ok(RData::PTR(PTR(target)))
        }
        RecordType::TXT => {
            let strings: Vec<String> = fields
                .iter()
                .map(|s| s.trim_matches('"').to_string())
                .collect();
            Ok(RData::TXT(TXT::new(strings)))
        }
        other => Err(format!("unsupported record type {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{MessageType, OpCode, Query};

    fn query_msg(name: &str, rtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(11);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
        msg
    }

    #[test]
    fn lookup_matches_name_type_class() {
        let mut arb = Arbitrary::new();
        arb.add_rule("example.com IN A 192.0.2.1").unwrap();
        arb.add_rule("example.com IN A 192.0.2.2").unwrap();
        arb.add_rule("example.com IN TXT \"v=spf1 -all\"").unwrap();

        let reply = arb.lookup(&query_msg("example.com.", RecordType::A)).unwrap();
        assert_eq!(reply.answers().len(), 2);

        let reply = arb.lookup(&query_msg("example.com.", RecordType::TXT)).unwrap();
        assert_eq!(reply.answers().len(), 1);
        assert!(matches!(reply.answers()[0].data(), RData::TXT(_)));

        assert!(arb.lookup(&query_msg("example.com.", RecordType::MX)).is_none());
        assert!(arb.lookup(&query_msg("other.com.", RecordType::A)).is_none());
    }

    #[test]
    fn cname_rule() {
        let mut arb = Arbitrary::new();
        arb.add_rule("alias.test IN CNAME target.test").unwrap();

        let reply = arb.lookup(&query_msg("alias.test.", RecordType::CNAME)).unwrap();
        match reply.answers()[0].data() {
            RData::CNAME(c) => assert_eq!(c.0.to_utf8(), "target.test"),
            other => panic!("unexpected rdata {other:?}"),
        }
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let mut arb = Arbitrary::new();
        assert!(arb.add_rule("example.com IN A").is_err());
        assert!(arb.add_rule("example.com IN A not-an-ip").is_err());
        assert!(arb.add_rule("example.com IN SRV 0 0 53 x.test").is_err());
    }
}
