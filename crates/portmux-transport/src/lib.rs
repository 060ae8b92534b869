//! Tunnel transport abstraction
//!
//! A tunnel is a bidirectional byte channel between the local and remote
//! sides. Everything above this layer works against the traits defined
//! here; the concrete carrier (raw TCP in this crate, WebSocket in
//! `portmux-transport-websocket`) is chosen once, when the tunnel is
//! dialed or bound, and never examined again.

pub mod addr;
pub mod tcp;

pub use addr::{AddrError, TunnelAddr, TunnelScheme};
pub use tcp::{TcpTunnel, TcpTunnelListener};

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid tunnel address: {0}")]
    Addr(#[from] AddrError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Write half of an established tunnel.
///
/// One writer task per tunnel drains a channel into this; that single
/// consumer is what keeps frames from interleaving mid-message.
#[async_trait]
pub trait TunnelWriter: Send {
    /// Send one chunk of tunnel payload bytes.
    async fn send(&mut self, data: Bytes) -> TransportResult<()>;

    /// Flush and close the write direction.
    async fn shutdown(&mut self) -> TransportResult<()>;
}

/// Read half of an established tunnel.
#[async_trait]
pub trait TunnelReader: Send {
    /// Receive the next chunk of tunnel payload bytes.
    ///
    /// Returns `Ok(None)` on a clean end of stream. Chunk boundaries
    /// carry no meaning; callers reassemble frames themselves.
    async fn recv(&mut self) -> TransportResult<Option<Bytes>>;
}

/// An established tunnel, before it is split into its two halves.
pub trait TunnelConnection: Send {
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Split into independently-owned write and read halves.
    fn split(self: Box<Self>) -> (Box<dyn TunnelWriter>, Box<dyn TunnelReader>);
}

/// Server-side acceptor for inbound tunnels.
#[async_trait]
pub trait TunnelListener: Send {
    async fn accept(&mut self) -> TransportResult<Box<dyn TunnelConnection>>;

    fn local_addr(&self) -> TransportResult<SocketAddr>;
}
