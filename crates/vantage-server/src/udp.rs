//! UDP listener.

use super::{Handler, ResponseWriter, Result};
use async_trait::async_trait;
use hickory_proto::op::Message;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};
use vantage_query::{QueryContext, Transport};

/// Fallback response size for clients without EDNS.
const MIN_UDP_SIZE: usize = 512;

/// UDP DNS listener.
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    handler: Arc<dyn Handler>,
    local_addr: SocketAddr,
}

impl UdpServer {
    /// Binds a listener to the given address.
    pub async fn bind(addr: SocketAddr, handler: Arc<dyn Handler>) -> Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;

        info!(addr = %local_addr, "udp listener bound");

        Ok(Self {
            socket: Arc::new(socket),
            handler,
            local_addr,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves queries until the process exits.
    pub async fn run(&self) -> Result<()> {
        let mut buf = vec![0u8; 65535];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => {
                    let data = buf[..len].to_vec();
                    let socket = self.socket.clone();
                    let handler = self.handler.clone();

                    tokio::spawn(async move {
                        serve_packet(socket, handler, data, src).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "udp receive failed");
                }
            }
        }
    }
}

async fn serve_packet(
    socket: Arc<UdpSocket>,
    handler: Arc<dyn Handler>,
    data: Vec<u8>,
    src: SocketAddr,
) {
    let query = match Message::from_vec(&data) {
        Ok(msg) => msg,
        Err(e) => {
            trace!(client = %src, error = %e, "dropping malformed packet");
            return;
        }
    };

    let max_size = query
        .extensions()
        .as_ref()
        .map(|edns| edns.max_payload() as usize)
        .unwrap_or(MIN_UDP_SIZE)
        .max(MIN_UDP_SIZE);

    let mut qctx = QueryContext::new(query, src, Transport::Datagram);
    let mut writer = UdpResponseWriter {
        socket,
        peer: src,
        max_size,
    };

    let cancel = CancellationToken::new();
    handler.serve(&cancel, &mut qctx, &mut writer).await;
}

struct UdpResponseWriter {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    max_size: usize,
}

#[async_trait]
impl ResponseWriter for UdpResponseWriter {
    async fn write(&mut self, reply: &Message) -> Result<()> {
        let wire = reply
            .to_vec()
            .map_err(|e| super::ServerError::Protocol(e.to_string()))?;

        let wire = if wire.len() > self.max_size {
            truncated_variant(reply)?
        } else {
            wire
        };

        self.socket.send_to(&wire, self.peer).await?;
        Ok(())
    }
}

/// Datagram clients that cannot take the full reply get an empty reply
/// with TC set, prompting a retry over TCP.
fn truncated_variant(reply: &Message) -> Result<Vec<u8>> {
    let mut truncated = reply.clone();
    truncated.take_answers();
    truncated.take_name_servers();
    truncated.take_additionals();
    truncated.set_truncated(true);
    truncated
        .to_vec()
        .map_err(|e| super::ServerError::Protocol(e.to_string()))
}
