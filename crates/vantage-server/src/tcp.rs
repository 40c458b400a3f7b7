//! TCP listener.

use super::{Handler, ResponseWriter, Result, ServerError};
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use vantage_query::{QueryContext, Transport};

/// Idle timeout for client connections.
const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP DNS listener.
pub struct TcpServer {
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    local_addr: SocketAddr,
}

impl TcpServer {
    /// Binds a listener to the given address.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn Handler>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!(addr = %local_addr, "tcp listener bound");

        Ok(Self {
            listener,
            handler,
            local_addr,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves connections until the process exits.
    pub async fn run(&self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let handler = self.handler.clone();

            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, handler, peer).await {
                    debug!(client = %peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    handler: Arc<dyn Handler>,
    peer: SocketAddr,
) -> Result<()> {
    let (mut reader, writer) = stream.into_split();
    let mut writer = TcpResponseWriter { writer };

    loop {
        // Length-prefixed framing; an idle client is hung up on.
        let mut len_buf = [0u8; 2];
        match timeout(IDLE_TIMEOUT, reader.read_exact(&mut len_buf)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => return Ok(()), // EOF or idle
        }

        let len = u16::from_be_bytes(len_buf) as usize;
        let mut data = vec![0u8; len];
        timeout(IDLE_TIMEOUT, reader.read_exact(&mut data))
            .await
            .map_err(|_| ServerError::Protocol("read timed out mid-message".into()))??;

        let query = match Message::from_vec(&data) {
            Ok(msg) => msg,
            Err(e) => {
                trace!(client = %peer, error = %e, "dropping malformed message");
                return Ok(());
            }
        };

        let mut qctx = QueryContext::new(query, peer, Transport::Stream);
        let cancel = CancellationToken::new();
        handler.serve(&cancel, &mut qctx, &mut writer).await;
    }
}

struct TcpResponseWriter {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl ResponseWriter for TcpResponseWriter {
    async fn write(&mut self, reply: &Message) -> Result<()> {
        let wire = reply
            .to_vec()
            .map_err(|e| ServerError::Protocol(e.to_string()))?;

        self.writer
            .write_all(&(wire.len() as u16).to_be_bytes())
            .await?;
        self.writer.write_all(&wire).await?;
        Ok(())
    }
}
