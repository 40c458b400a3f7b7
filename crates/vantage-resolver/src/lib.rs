//! # Vantage Resolver
//!
//! Upstream exchange and the split-horizon dispatcher.
//!
//! ## Features
//!
//! - Parallel exchange across redundant upstreams, first acceptable reply
//!   wins, losers cancelled
//! - Trusted-resolver convention: negative rcodes from a trusted pool
//!   member conclude the pool instead of failing over
//! - Split-horizon dispatch: simple forwarding, domain-classified routing,
//!   and the IP-validated race between a local and a remote pool
//! - Plain UDP/TCP upstream transport with idle connection reuse, TCP
//!   fallback on truncation, dial-address override and SOCKS5 proxying

use async_trait::async_trait;
use hickory_proto::op::Message;
use std::sync::Arc;
use thiserror::Error;

pub mod addr;
pub mod dispatch;
pub mod exchange;
pub mod upstream;

pub use addr::{Scheme, UpstreamAddr};
pub use dispatch::{Dispatcher, SplitConfig};
pub use exchange::exchange_parallel;
pub use upstream::SocketUpstream;

/// Resolver error.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("timeout")]
    Timeout,

    #[error("no upstream available")]
    NoUpstream,

    #[error("all upstreams are failed: {last}")]
    AllFailed { last: String },

    #[error("query cancelled")]
    Cancelled,

    #[error("invalid upstream address {addr}: {message}")]
    Addr { addr: String, message: String },

    #[error("network error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// An upstream resolver endpoint.
///
/// The core treats the endpoint as opaque: it knows how to exchange one
/// message and whether its negative answers should be believed. Connection
/// management is the implementation's business.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Sends a query and awaits the reply.
    ///
    /// With `prefer_stream` set the exchange must not return a truncated
    /// reply (retrying over a stream transport as needed); stream clients
    /// are owed complete answers.
    async fn exchange(&self, query: &Message, prefer_stream: bool) -> Result<Message>;

    /// Configured address, for diagnostics.
    fn address(&self) -> &str;

    /// Whether SERVFAIL/REFUSED from this endpoint are authoritative.
    fn trusted(&self) -> bool;
}

/// An ordered list of upstreams; the first member is conventionally the
/// trusted one.
pub type Pool = Vec<Arc<dyn Upstream>>;
