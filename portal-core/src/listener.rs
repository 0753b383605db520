use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream handed out by an overlay listener.
pub trait OverlayIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> OverlayIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedIo = Box<dyn OverlayIo>;

/// Per-connection facts supplied by the network layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionContext {
    /// Transport-layer peer, usually `ip:port`.
    pub remote_addr: String,
    /// Original client address when the network knows it (funnel ingress,
    /// PROXY protocol). Outranks every header.
    pub client_ip: Option<IpAddr>,
}

impl ConnectionContext {
    pub fn from_peer(peer: SocketAddr) -> Self {
        Self {
            remote_addr: peer.to_string(),
            client_ip: None,
        }
    }
}

/// A listener bound by the overlay network collaborator.
#[async_trait]
pub trait OverlayListener: Send + Sync {
    /// Accept the next raw connection. Must not perform per-connection I/O.
    async fn accept(&self) -> io::Result<(BoxedIo, ConnectionContext)>;

    /// Per-connection preamble (e.g. PROXY header), run off the accept loop.
    async fn handshake(
        &self,
        io: BoxedIo,
        ctx: ConnectionContext,
    ) -> io::Result<(BoxedIo, ConnectionContext)> {
        Ok((io, ctx))
    }

    fn local_addr(&self) -> io::Result<SocketAddr>;
}
