//! DNS message helpers shared by the pipeline stages.

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::{RData, Record};
use std::net::IpAddr;

/// Builds an empty reply skeleton for a query: header flags set for a
/// response, the question section copied verbatim, RA set (we always
/// forward), AA clear.
pub fn reply_to(query: &Message) -> Message {
    let mut reply = Message::new();
    reply.set_id(query.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(OpCode::Query);
    reply.set_recursion_desired(query.recursion_desired());
    reply.set_recursion_available(true);
    reply.set_authoritative(false);
    reply.add_queries(query.queries().iter().cloned());
    reply
}

/// Builds a minimal NXDOMAIN reply for a query.
pub fn nxdomain_reply(query: &Message) -> Message {
    let mut reply = reply_to(query);
    reply.set_response_code(ResponseCode::NXDomain);
    reply
}

/// Returns the smallest TTL across the answer section, or `default` when
/// there are no answers.
pub fn min_answer_ttl(msg: &Message, default: u32) -> u32 {
    msg.answers().iter().map(Record::ttl).min().unwrap_or(default)
}

/// Overwrites the TTL of every resource record in the message.
pub fn set_ttl(msg: &mut Message, ttl: u32) {
    rewrite_ttl(msg, |_| ttl);
}

/// Clamps every resource record's TTL into `[min, max]`.
pub fn clamp_ttl(msg: &mut Message, min: u32, max: u32) {
    rewrite_ttl(msg, |t| t.clamp(min, max));
}

fn rewrite_ttl(msg: &mut Message, f: impl Fn(u32) -> u32) {
    let rewrite = |records: Vec<Record>| -> Vec<Record> {
        records
            .into_iter()
            .map(|mut r| {
                let ttl = f(r.ttl());
                r.set_ttl(ttl);
                r
            })
            .collect()
    };

    let answers = rewrite(msg.take_answers());
    msg.insert_answers(answers);
    let authorities = rewrite(msg.take_name_servers());
    msg.insert_name_servers(authorities);
    let additionals = rewrite(msg.take_additionals());
    msg.insert_additionals(additionals);
}

/// Collects every address carried by A/AAAA records in the answer section.
///
/// CNAME chains without terminal address records yield an empty vec.
pub fn answer_ips(msg: &Message) -> Vec<IpAddr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect()
}

/// Whether the reply is one worth keeping: NOERROR with at least one
/// answer record.
pub fn is_cacheable(msg: &Message) -> bool {
    msg.response_code() == ResponseCode::NoError && !msg.answers().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::{A, CNAME};
    use hickory_proto::rr::{Name, RecordType};
    use std::str::FromStr;

    fn query_msg(name: &str, rtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(0x4242);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
        msg
    }

    fn a_record(name: &str, ttl: u32, ip: [u8; 4]) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            ttl,
            RData::A(A::from(std::net::Ipv4Addr::from(ip))),
        )
    }

    #[test]
    fn reply_copies_question() {
        let query = query_msg("example.com.", RecordType::A);
        let reply = reply_to(&query);

        assert_eq!(reply.id(), query.id());
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.queries(), query.queries());
        assert!(reply.recursion_available());
        assert!(!reply.authoritative());
    }

    #[test]
    fn nxdomain_has_no_answers() {
        let query = query_msg("nope.example.", RecordType::AAAA);
        let reply = nxdomain_reply(&query);
        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert!(reply.answers().is_empty());
    }

    #[test]
    fn min_ttl_scans_answers() {
        let query = query_msg("example.com.", RecordType::A);
        let mut reply = reply_to(&query);
        reply.add_answer(a_record("example.com.", 300, [10, 0, 0, 1]));
        reply.add_answer(a_record("example.com.", 60, [10, 0, 0, 2]));

        assert_eq!(min_answer_ttl(&reply, 0), 60);
        assert_eq!(min_answer_ttl(&query, 17), 17);
    }

    #[test]
    fn ttl_rewrite_covers_all_sections() {
        let query = query_msg("example.com.", RecordType::A);
        let mut reply = reply_to(&query);
        reply.add_answer(a_record("example.com.", 300, [10, 0, 0, 1]));
        reply.add_name_server(a_record("ns.example.com.", 900, [10, 0, 0, 3]));

        set_ttl(&mut reply, 5);
        assert!(reply.answers().iter().all(|r| r.ttl() == 5));
        assert!(reply.name_servers().iter().all(|r| r.ttl() == 5));

        clamp_ttl(&mut reply, 30, 600);
        assert!(reply.answers().iter().all(|r| r.ttl() == 30));
    }

    #[test]
    fn answer_ips_skips_cnames() {
        let query = query_msg("alias.example.com.", RecordType::A);
        let mut reply = reply_to(&query);
        reply.add_answer(Record::from_rdata(
            Name::from_str("alias.example.com.").unwrap(),
            60,
            RData::CNAME(CNAME(Name::from_str("real.example.com.").unwrap())),
        ));
        assert!(answer_ips(&reply).is_empty());

        reply.add_answer(a_record("real.example.com.", 60, [192, 168, 1, 7]));
        assert_eq!(answer_ips(&reply), vec!["192.168.1.7".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn cacheable_requires_noerror_and_answers() {
        let query = query_msg("example.com.", RecordType::A);
        let empty = reply_to(&query);
        assert!(!is_cacheable(&empty));

        let nx = nxdomain_reply(&query);
        assert!(!is_cacheable(&nx));

        let mut ok = reply_to(&query);
        ok.add_answer(a_record("example.com.", 60, [1, 2, 3, 4]));
        assert!(is_cacheable(&ok));
    }
}
