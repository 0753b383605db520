use crate::proxy_protocol::read_proxy_header;
use async_trait::async_trait;
use portal_core::{BoxedIo, ConnectionContext, OverlayListener};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::debug;

/// Deadline for a PROXY header to arrive on a fresh connection.
pub const PROXY_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Plain TCP listener, optionally requiring a PROXY header on every
/// connection.
pub struct TcpOverlayListener {
    listener: TcpListener,
    proxy_protocol: bool,
    header_timeout: Duration,
}

impl TcpOverlayListener {
    pub async fn bind(addr: impl ToSocketAddrs, proxy_protocol: bool) -> io::Result<Self> {
        Ok(Self::from_listener(TcpListener::bind(addr).await?, proxy_protocol))
    }

    pub fn from_listener(listener: TcpListener, proxy_protocol: bool) -> Self {
        Self {
            listener,
            proxy_protocol,
            header_timeout: PROXY_HEADER_TIMEOUT,
        }
    }

    pub fn with_header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    pub fn requires_proxy_header(&self) -> bool {
        self.proxy_protocol
    }
}

#[async_trait]
impl OverlayListener for TcpOverlayListener {
    async fn accept(&self) -> io::Result<(BoxedIo, ConnectionContext)> {
        let (stream, peer) = self.listener.accept().await?;
        let _ = stream.set_nodelay(true);
        Ok((Box::new(stream), ConnectionContext::from_peer(peer)))
    }

    async fn handshake(&self, mut io: BoxedIo, ctx: ConnectionContext) -> io::Result<(BoxedIo, ConnectionContext)> {
        if !self.proxy_protocol {
            return Ok((io, ctx));
        }
        let header = tokio::time::timeout(self.header_timeout, read_proxy_header(&mut io))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for PROXY header"))??;

        let ctx = match header.source {
            Some(source) => {
                debug!(peer = %ctx.remote_addr, client = %source, "PROXY header accepted");
                ConnectionContext {
                    remote_addr: source.to_string(),
                    client_ip: Some(source.ip().to_canonical()),
                }
            }
            None => ctx,
        };
        Ok((io, ctx))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
