//! Raw TCP tunnel carrier
//!
//! The thinnest possible carrier: chunks map directly onto socket reads
//! and writes, and the kernel's stream ordering is the only framing.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use crate::{
    TransportResult, TunnelConnection, TunnelListener, TunnelReader, TunnelWriter,
};

const READ_CHUNK: usize = 8 * 1024;

/// One established TCP tunnel.
pub struct TcpTunnel {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpTunnel {
    /// Dial the remote side. Client use only.
    pub async fn connect(host: &str, port: u16) -> TransportResult<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }

    /// Wrap an accepted socket. Server use only.
    pub fn from_accepted(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer: Some(peer) }
    }
}

impl TunnelConnection for TcpTunnel {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn split(self: Box<Self>) -> (Box<dyn TunnelWriter>, Box<dyn TunnelReader>) {
        let (read, write) = self.stream.into_split();
        (
            Box::new(TcpTunnelWriter { half: write }),
            Box::new(TcpTunnelReader { half: read }),
        )
    }
}

struct TcpTunnelWriter {
    half: OwnedWriteHalf,
}

#[async_trait]
impl TunnelWriter for TcpTunnelWriter {
    async fn send(&mut self, data: Bytes) -> TransportResult<()> {
        self.half.write_all(&data).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        self.half.shutdown().await?;
        Ok(())
    }
}

struct TcpTunnelReader {
    half: OwnedReadHalf,
}

#[async_trait]
impl TunnelReader for TcpTunnelReader {
    async fn recv(&mut self) -> TransportResult<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = self.half.read_buf(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(buf.freeze()))
        }
    }
}

/// Acceptor for inbound TCP tunnels.
pub struct TcpTunnelListener {
    inner: TcpListener,
}

impl TcpTunnelListener {
    pub async fn bind(host: &str, port: u16) -> TransportResult<Self> {
        let inner = TcpListener::bind((host, port)).await?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl TunnelListener for TcpTunnelListener {
    async fn accept(&mut self) -> TransportResult<Box<dyn TunnelConnection>> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpTunnel::from_accepted(stream, peer)))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}
