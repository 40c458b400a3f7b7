//! # Vantage Server
//!
//! The resolution pipeline and the inbound UDP/TCP listeners.
//!
//! The pipeline is a fixed chain of stages — static answerers, blacklist,
//! cache, dispatcher, TTL clamp — each communicating only through the
//! query context. Listeners parse inbound packets, drive the pipeline,
//! and write whatever response it produces.

use async_trait::async_trait;
use hickory_proto::op::Message;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use vantage_query::QueryContext;

pub mod pipeline;
pub mod tcp;
pub mod udp;

pub use pipeline::Pipeline;
pub use tcp::TcpServer;
pub use udp::UdpServer;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Writes the reply for one query back to the client.
///
/// Called at most once, and only on the success path; when the handler
/// stays silent the transport layer decides what (if anything) to emit.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Sends the reply.
    async fn write(&mut self, reply: &Message) -> Result<()>;
}

/// Handles one inbound query.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Resolves the query in `qctx` and writes the reply, if any.
    ///
    /// The cancellation token is tied to the inbound request's lifetime;
    /// implementations must stop promptly once it fires.
    async fn serve(
        &self,
        cancel: &CancellationToken,
        qctx: &mut QueryContext,
        writer: &mut dyn ResponseWriter,
    );
}
