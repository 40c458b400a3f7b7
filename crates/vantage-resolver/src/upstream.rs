//! Concrete plain-transport upstream.

use super::addr::{Scheme, UpstreamAddr};
use super::{ResolverError, Result, Upstream};
use async_trait::async_trait;
use hickory_proto::op::Message;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, trace};

/// Per-exchange I/O timeout.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on idle connections kept per upstream.
const MAX_IDLE_CONNS: usize = 8;

struct IdleConn {
    stream: TcpStream,
    since: Instant,
}

/// An upstream speaking plain DNS over UDP or TCP.
///
/// UDP exchanges retry over TCP when the reply is truncated; stream
/// clients skip UDP entirely. TCP connections are reused until the
/// configured idle timeout. A `socks5` parameter routes the exchange
/// through a SOCKS5 CONNECT proxy — a proxied UDP upstream is exchanged
/// over TCP, never sent around the proxy. Encrypted schemes are
/// recognized by the address grammar but not implemented by this
/// transport.
pub struct SocketUpstream {
    addr: UpstreamAddr,
    trusted: bool,
    idle: Mutex<Vec<IdleConn>>,
}

impl SocketUpstream {
    /// Creates an upstream from a parsed address.
    pub fn new(addr: UpstreamAddr, trusted: bool) -> Self {
        Self {
            addr,
            trusted,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Parses the address and creates the upstream in one step.
    pub fn from_addr(addr: &str, trusted: bool) -> Result<Self> {
        Ok(Self::new(UpstreamAddr::parse(addr)?, trusted))
    }

    async fn dial_target(&self) -> Result<SocketAddr> {
        let authority = self.addr.dial_authority();
        let resolved = tokio::net::lookup_host(&authority).await?.next();
        resolved.ok_or_else(|| ResolverError::Addr {
            addr: self.addr.raw().to_string(),
            message: format!("{authority} did not resolve"),
        })
    }

    async fn exchange_udp(&self, query: &Message) -> Result<Message> {
        let target = self.dial_target().await?;
        let bind: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse().expect("constant address")
        } else {
            "[::]:0".parse().expect("constant address")
        };

        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;

        let wire = query
            .to_vec()
            .map_err(|e| ResolverError::Protocol(e.to_string()))?;
        socket.send(&wire).await?;

        let mut buf = vec![0u8; 65535];
        let len = timeout(EXCHANGE_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        let response =
            Message::from_vec(&buf[..len]).map_err(|e| ResolverError::Protocol(e.to_string()))?;

        if response.id() != query.id() {
            return Err(ResolverError::Protocol("response id mismatch".into()));
        }

        if response.truncated() {
            trace!(upstream = %self.addr, "response truncated, retrying over tcp");
            return self.exchange_tcp(query).await;
        }

        Ok(response)
    }

    async fn exchange_tcp(&self, query: &Message) -> Result<Message> {
        let wire = query
            .to_vec()
            .map_err(|e| ResolverError::Protocol(e.to_string()))?;

        // A reused connection may have been closed by the peer; retry once
        // on a fresh one before giving up.
        if let Some(mut conn) = self.checkout() {
            match tcp_roundtrip(&mut conn, &wire).await {
                Ok(response) => {
                    self.checkin(conn);
                    return verify_id(query, response);
                }
                Err(e) => {
                    debug!(upstream = %self.addr, error = %e, "idle connection failed, redialing");
                }
            }
        }

        let mut conn = self.connect_tcp().await?;
        let response = tcp_roundtrip(&mut conn, &wire).await?;
        self.checkin(conn);
        verify_id(query, response)
    }

    async fn connect_tcp(&self) -> Result<TcpStream> {
        match &self.addr.socks5 {
            Some(proxy) => {
                let proxy_addr = tokio::net::lookup_host(proxy.as_str())
                    .await?
                    .next()
                    .ok_or_else(|| ResolverError::Addr {
                        addr: self.addr.raw().to_string(),
                        message: format!("socks5 proxy {proxy} did not resolve"),
                    })?;
                let stream = timeout(EXCHANGE_TIMEOUT, TcpStream::connect(proxy_addr))
                    .await
                    .map_err(|_| ResolverError::Timeout)??;
                let (host, port) = self.addr.dial_host_port();
                socks5_connect(stream, &host, port).await
            }
            None => {
                let target = self.dial_target().await?;
                Ok(timeout(EXCHANGE_TIMEOUT, TcpStream::connect(target))
                    .await
                    .map_err(|_| ResolverError::Timeout)??)
            }
        }
    }

    fn checkout(&self) -> Option<TcpStream> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop() {
            if conn.since.elapsed() < self.addr.idle_timeout {
                return Some(conn.stream);
            }
            // Idled out; drop and keep looking.
        }
        None
    }

    fn checkin(&self, stream: TcpStream) {
        if self.addr.idle_timeout.is_zero() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNS {
            idle.push(IdleConn {
                stream,
                since: Instant::now(),
            });
        }
    }
}

#[async_trait]
impl Upstream for SocketUpstream {
    async fn exchange(&self, query: &Message, prefer_stream: bool) -> Result<Message> {
        // Fresh transaction ID per send; restored on the way out so the
        // caller sees the ID it asked with.
        let mut outbound = query.clone();
        outbound.set_id(rand::random());

        let mut response = match self.addr.scheme {
            // exchange_udp dials directly, so a proxied upstream must not
            // take this arm.
            Scheme::Udp if !prefer_stream && self.addr.socks5.is_none() => {
                self.exchange_udp(&outbound).await?
            }
            Scheme::Udp | Scheme::Tcp => self.exchange_tcp(&outbound).await?,
            other => {
                return Err(ResolverError::Protocol(format!(
                    "{} transport not implemented",
                    other.name()
                )))
            }
        };

        response.set_id(query.id());
        Ok(response)
    }

    fn address(&self) -> &str {
        self.addr.raw()
    }

    fn trusted(&self) -> bool {
        self.trusted
    }
}

fn verify_id(query: &Message, response: Message) -> Result<Message> {
    if response.id() != query.id() {
        return Err(ResolverError::Protocol("response id mismatch".into()));
    }
    Ok(response)
}

async fn tcp_roundtrip(stream: &mut TcpStream, wire: &[u8]) -> Result<Message> {
    let len = wire.len() as u16;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(wire).await?;

    let mut len_buf = [0u8; 2];
    timeout(EXCHANGE_TIMEOUT, stream.read_exact(&mut len_buf))
        .await
        .map_err(|_| ResolverError::Timeout)??;

    let resp_len = u16::from_be_bytes(len_buf) as usize;
    let mut resp_buf = vec![0u8; resp_len];
    timeout(EXCHANGE_TIMEOUT, stream.read_exact(&mut resp_buf))
        .await
        .map_err(|_| ResolverError::Timeout)??;

    Message::from_vec(&resp_buf).map_err(|e| ResolverError::Protocol(e.to_string()))
}

/// Minimal SOCKS5 CONNECT handshake (RFC 1928), no authentication.
async fn socks5_connect(mut stream: TcpStream, host: &str, port: u16) -> Result<TcpStream> {
    let err = |m: &str| ResolverError::Protocol(format!("socks5: {m}"));

    // Greeting: version 5, one method, no-auth.
    stream.write_all(&[0x05, 0x01, 0x00]).await?;
    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice != [0x05, 0x00] {
        return Err(err("proxy refused no-auth method"));
    }

    // CONNECT request with the target encoded by address kind.
    let mut request = vec![0x05, 0x01, 0x00];
    match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(v4)) => {
            request.push(0x01);
            request.extend_from_slice(&v4.octets());
        }
        Ok(std::net::IpAddr::V6(v6)) => {
            request.push(0x04);
            request.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(err("hostname too long"));
            }
            request.push(0x03);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(err(&format!("connect rejected, code {}", head[1])));
    }

    // Consume the bound address so the DNS stream starts clean.
    let skip = match head[3] {
        0x01 => 4,
        0x04 => 16,
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        _ => return Err(err("bad bound-address type")),
    };
    let mut bound = vec![0u8; skip + 2];
    stream.read_exact(&mut bound).await?;

    Ok(stream)
}
