//! Upstream address grammar.
//!
//! `[scheme://]host[:port][?netaddr=…&socks5=…&keepalive=SECS&…]`
//!
//! The default scheme is `udp`; the port defaults per scheme. `netaddr`
//! overrides the dial target, `socks5` routes the exchange through a
//! SOCKS5 proxy, `keepalive` bounds idle connection reuse in seconds.
//! Unknown query keys are ignored.

use super::{ResolverError, Result};
use std::time::Duration;
use url::Url;

/// Default idle timeout for reused connections.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream transport scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain DNS over UDP (with TCP fallback on truncation).
    Udp,
    /// Plain DNS over TCP.
    Tcp,
    /// DNS over TLS.
    Tls,
    /// DNS over HTTPS.
    Https,
    /// DNS over QUIC.
    Quic,
}

impl Scheme {
    /// Default port for the scheme.
    pub const fn default_port(&self) -> u16 {
        match self {
            Scheme::Udp | Scheme::Tcp => 53,
            Scheme::Tls | Scheme::Quic => 853,
            Scheme::Https => 443,
        }
    }

    /// The scheme name as written in addresses.
    pub const fn name(&self) -> &'static str {
        match self {
            Scheme::Udp => "udp",
            Scheme::Tcp => "tcp",
            Scheme::Tls => "tls",
            Scheme::Https => "https",
            Scheme::Quic => "quic",
        }
    }
}

/// A parsed upstream address.
#[derive(Debug, Clone)]
pub struct UpstreamAddr {
    /// Transport scheme.
    pub scheme: Scheme,
    /// Host (IP literal or name).
    pub host: String,
    /// Port, defaulted per scheme when absent.
    pub port: u16,
    /// Dial-target override (`netaddr`), `host[:port]`.
    pub dial_addr: Option<String>,
    /// SOCKS5 proxy address.
    pub socks5: Option<String>,
    /// Idle timeout for connection reuse (`keepalive`).
    pub idle_timeout: Duration,
    /// TCP pipelining hint (parsed, unused by the plain transports).
    pub enable_pipeline: bool,
    /// HTTP/3 hint (parsed, unused by the plain transports).
    pub enable_http3: bool,
    raw: String,
}

impl UpstreamAddr {
    /// Parses an address in the grammar above.
    pub fn parse(s: &str) -> Result<Self> {
        let text = if s.contains("://") {
            s.to_string()
        } else {
            format!("udp://{s}")
        };

        let err = |message: String| ResolverError::Addr {
            addr: s.to_string(),
            message,
        };

        let url = Url::parse(&text).map_err(|e| err(e.to_string()))?;

        let scheme = match url.scheme() {
            "udp" => Scheme::Udp,
            "tcp" => Scheme::Tcp,
            "tls" | "dot" => Scheme::Tls,
            "https" | "doh" => Scheme::Https,
            "quic" | "doq" => Scheme::Quic,
            other => return Err(err(format!("unknown scheme {other:?}"))),
        };

        let host = url
            .host_str()
            .ok_or_else(|| err("missing host".to_string()))?
            .trim_matches(['[', ']'])
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let mut dial_addr = None;
        let mut socks5 = None;
        let mut idle_timeout = DEFAULT_IDLE_TIMEOUT;
        let mut enable_pipeline = false;
        let mut enable_http3 = false;

        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "netaddr" if !v.is_empty() => dial_addr = Some(v.to_string()),
                "socks5" if !v.is_empty() => socks5 = Some(v.to_string()),
                "keepalive" => {
                    let secs: u64 = v
                        .parse()
                        .map_err(|_| err(format!("invalid keepalive {v:?}")))?;
                    idle_timeout = Duration::from_secs(secs);
                }
                "enable_pipeline" => enable_pipeline = v == "true" || v == "1",
                "enable_http3" => enable_http3 = v == "true" || v == "1",
                // Unknown keys are ignored for forward compatibility.
                _ => {}
            }
        }

        Ok(Self {
            scheme,
            host,
            port,
            dial_addr,
            socks5,
            idle_timeout,
            enable_pipeline,
            enable_http3,
            raw: s.to_string(),
        })
    }

    /// The address exactly as configured.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The `(host, port)` to dial, honoring the `netaddr` override.
    ///
    /// An override without a port inherits the address port. This is the
    /// target for direct dials and for SOCKS5 CONNECT requests alike.
    pub fn dial_host_port(&self) -> (String, u16) {
        let Some(dial) = &self.dial_addr else {
            return (self.host.clone(), self.port);
        };

        if let Some(rest) = dial.strip_prefix('[') {
            // [v6]:port or bracketed [v6]
            if let Some((host, port)) = rest.split_once("]:") {
                if let Ok(port) = port.parse() {
                    return (host.to_string(), port);
                }
            }
            return (rest.trim_end_matches(']').to_string(), self.port);
        }

        // A lone colon separates host and port; more than one means a
        // bare v6 literal without a port.
        if dial.chars().filter(|c| *c == ':').count() == 1 {
            if let Some((host, port)) = dial.split_once(':') {
                if let Ok(port) = port.parse() {
                    return (host.to_string(), port);
                }
            }
        }
        (dial.clone(), self.port)
    }

    /// `host:port` to dial, honoring the `netaddr` override.
    pub fn dial_authority(&self) -> String {
        let (host, port) = self.dial_host_port();
        if host.contains(':') {
            // Bare IPv6 literal needs brackets.
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        }
    }
}

impl std::fmt::Display for UpstreamAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme.name(), self.host, self.port)
    }
}
