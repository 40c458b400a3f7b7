//! Full-stack integration tests: loopback listeners, the real pipeline,
//! and real socket upstreams pointed at in-process responders.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use vantage_cache::{CacheConfig, ResponseCache};
use vantage_match::{DomainSet, Hosts, IpSet, QNameMatcher, ResponseIpMatcher};
use vantage_query::msgutil;
use vantage_resolver::{Dispatcher, Pool, SocketUpstream, SplitConfig};
use vantage_server::{Handler, Pipeline, TcpServer, UdpServer};

/// An in-process upstream: answers A queries from a fixed name table.
struct FakeResolver {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl FakeResolver {
    async fn spawn(records: HashMap<String, Ipv4Addr>) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                let Ok(query) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                let mut reply = msgutil::reply_to(&query);
                if let Some(question) = query.queries().first() {
                    let name = question.name().to_lowercase().to_utf8();
                    match records.get(&name) {
                        Some(ip) => {
                            reply.add_answer(Record::from_rdata(
                                question.name().clone(),
                                60,
                                RData::A(A::from(*ip)),
                            ));
                        }
                        None => {
                            reply.set_response_code(ResponseCode::NXDomain);
                        }
                    }
                }
                let _ = socket.send_to(&reply.to_vec().unwrap(), peer).await;
            }
        });

        Self { addr, hits }
    }

    fn pool(&self) -> Pool {
        vec![Arc::new(
            SocketUpstream::from_addr(&self.addr.to_string(), true).unwrap(),
        )]
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn query_wire(name: &str, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    msg.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));
    msg.to_vec().unwrap()
}

async fn udp_query(server: SocketAddr, name: &str, id: u16) -> Message {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(server).await.unwrap();
    socket.send(&query_wire(name, id)).await.unwrap();

    let mut buf = vec![0u8; 65535];
    let len = timeout(Duration::from_secs(5), socket.recv(&mut buf))
        .await
        .expect("query timed out")
        .unwrap();
    Message::from_vec(&buf[..len]).unwrap()
}

async fn tcp_query(server: SocketAddr, name: &str, id: u16) -> Message {
    let mut stream = TcpStream::connect(server).await.unwrap();
    let wire = query_wire(name, id);
    stream
        .write_all(&(wire.len() as u16).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&wire).await.unwrap();

    let mut len_buf = [0u8; 2];
    timeout(Duration::from_secs(5), stream.read_exact(&mut len_buf))
        .await
        .expect("query timed out")
        .unwrap();
    let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
    stream.read_exact(&mut buf).await.unwrap();
    Message::from_vec(&buf).unwrap()
}

fn answer_ip(reply: &Message) -> Ipv4Addr {
    match msgutil::answer_ips(reply)[0] {
        std::net::IpAddr::V4(ip) => ip,
        other => panic!("unexpected answer {other}"),
    }
}

async fn start_udp(handler: Arc<dyn Handler>) -> SocketAddr {
    let server = UdpServer::bind("127.0.0.1:0".parse().unwrap(), handler)
        .await
        .unwrap();
    let addr = server.local_addr();
    tokio::spawn(async move { server.run().await });
    addr
}

#[tokio::test]
async fn forwarder_pipeline_over_udp() {
    let upstream = FakeResolver::spawn(HashMap::from([(
        "up.test.".to_string(),
        Ipv4Addr::new(1, 2, 3, 4),
    )]))
    .await;

    let mut hosts = Hosts::new();
    hosts.add("a.test", "10.0.0.1".parse().unwrap());

    let mut blacklist = DomainSet::new();
    blacklist.add_rule("ads.test");

    let pipeline = Pipeline::new(Arc::new(Dispatcher::forwarder(upstream.pool())))
        .with_hosts(Arc::new(hosts))
        .with_blacklist(Arc::new(QNameMatcher::new(blacklist)))
        .with_cache(Arc::new(ResponseCache::new(CacheConfig::default())));

    let addr = start_udp(Arc::new(pipeline)).await;

    // Hosts answer, no upstream involved.
    let reply = udp_query(addr, "a.test.", 0x0001).await;
    assert_eq!(reply.id(), 0x0001);
    assert_eq!(answer_ip(&reply), Ipv4Addr::new(10, 0, 0, 1));
    assert_eq!(upstream.hits(), 0);

    // Blacklisted name.
    let reply = udp_query(addr, "ads.test.", 0x0002).await;
    assert_eq!(reply.response_code(), ResponseCode::NXDomain);
    assert_eq!(upstream.hits(), 0);

    // Forwarded, then served from cache with the new transaction id.
    let reply = udp_query(addr, "up.test.", 0x0003).await;
    assert_eq!(answer_ip(&reply), Ipv4Addr::new(1, 2, 3, 4));
    let hits_after_first = upstream.hits();
    assert_eq!(hits_after_first, 1);

    let reply = udp_query(addr, "up.test.", 0x0004).await;
    assert_eq!(reply.id(), 0x0004);
    assert_eq!(answer_ip(&reply), Ipv4Addr::new(1, 2, 3, 4));
    assert_eq!(upstream.hits(), hits_after_first, "second answer from cache");
}

#[tokio::test]
async fn forwarder_pipeline_over_tcp() {
    let upstream = FakeResolver::spawn(HashMap::from([(
        "tcp.test.".to_string(),
        Ipv4Addr::new(5, 6, 7, 8),
    )]))
    .await;

    let pipeline = Pipeline::new(Arc::new(Dispatcher::forwarder(upstream.pool())));
    let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(pipeline))
        .await
        .unwrap();
    let addr = server.local_addr();
    tokio::spawn(async move { server.run().await });

    let reply = tcp_query(addr, "tcp.test.", 0x0b0b).await;
    assert_eq!(reply.id(), 0x0b0b);
    assert_eq!(answer_ip(&reply), Ipv4Addr::new(5, 6, 7, 8));
}

#[tokio::test]
async fn split_horizon_prefers_validated_local_answers() {
    // The local resolver knows the intranet answer for intra.test but
    // returns a filtered public answer for pub.test.
    let local = FakeResolver::spawn(HashMap::from([
        ("intra.test.".to_string(), Ipv4Addr::new(192, 168, 1, 2)),
        ("pub.test.".to_string(), Ipv4Addr::new(127, 0, 0, 66)),
    ]))
    .await;
    let remote = FakeResolver::spawn(HashMap::from([
        ("intra.test.".to_string(), Ipv4Addr::new(1, 2, 3, 4)),
        ("pub.test.".to_string(), Ipv4Addr::new(93, 184, 216, 34)),
    ]))
    .await;

    let mut nets = IpSet::new();
    nets.add_rule("192.168.0.0/16").unwrap();

    let dispatcher = Dispatcher::split(SplitConfig {
        local: local.pool(),
        remote: remote.pool(),
        local_ips: ResponseIpMatcher::new(nets),
        local_domains: None,
        remote_domains: None,
        local_latency: Duration::from_millis(50),
    });

    let addr = start_udp(Arc::new(Pipeline::new(Arc::new(dispatcher)))).await;

    let reply = udp_query(addr, "intra.test.", 0x1a1a).await;
    assert_eq!(answer_ip(&reply), Ipv4Addr::new(192, 168, 1, 2));

    let reply = udp_query(addr, "pub.test.", 0x1b1b).await;
    assert_eq!(answer_ip(&reply), Ipv4Addr::new(93, 184, 216, 34));
}
