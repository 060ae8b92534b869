//! WebSocket tunnel connection
//!
//! The read half owns a raw byte buffer plus a pending-message slot for
//! fragmented messages; a drain step decodes as many complete frames as
//! the buffer holds before touching the socket again. Only payload from
//! completed messages is surfaced.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use portmux_transport::{
    TransportError, TransportResult, TunnelConnection, TunnelListener, TunnelReader, TunnelWriter,
};

use crate::frame::{
    decode_frame, encode_frame, OP_BINARY, OP_CLOSE, OP_CONTINUATION, OP_PING, OP_PONG,
};
use crate::handshake;

/// One established WebSocket tunnel.
pub struct WsTunnel {
    stream: TcpStream,
    peer: Option<SocketAddr>,
    /// Client frames are masked; server frames are not.
    mask_outgoing: bool,
    /// Framed bytes that arrived together with the handshake response.
    leftover: BytesMut,
}

impl WsTunnel {
    /// Dial and upgrade. Client use only.
    pub async fn connect(host: &str, port: u16) -> TransportResult<Self> {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        let leftover = handshake::client(&mut stream, host, port).await?;
        Ok(Self { stream, peer, mask_outgoing: true, leftover })
    }

    async fn accept(mut stream: TcpStream, peer: SocketAddr) -> TransportResult<Self> {
        let leftover = handshake::server(&mut stream).await?;
        Ok(Self { stream, peer: Some(peer), mask_outgoing: false, leftover })
    }
}

impl TunnelConnection for WsTunnel {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn split(self: Box<Self>) -> (Box<dyn TunnelWriter>, Box<dyn TunnelReader>) {
        let (read, write) = self.stream.into_split();
        (
            Box::new(WsTunnelWriter { half: write, mask_outgoing: self.mask_outgoing }),
            Box::new(WsTunnelReader { half: read, raw: self.leftover, pending: None }),
        )
    }
}

struct WsTunnelWriter {
    half: OwnedWriteHalf,
    mask_outgoing: bool,
}

#[async_trait]
impl TunnelWriter for WsTunnelWriter {
    async fn send(&mut self, data: Bytes) -> TransportResult<()> {
        let mask = self.mask_outgoing.then(rand::random::<[u8; 4]>);
        let wire = encode_frame(OP_BINARY, &data, mask);
        self.half.write_all(&wire).await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> TransportResult<()> {
        let mask = self.mask_outgoing.then(rand::random::<[u8; 4]>);
        let wire = encode_frame(OP_CLOSE, &[], mask);
        let _ = self.half.write_all(&wire).await;
        self.half.shutdown().await?;
        Ok(())
    }
}

struct WsTunnelReader {
    half: OwnedReadHalf,
    /// Undecoded wire bytes.
    raw: BytesMut,
    /// Payload of a fragmented message awaiting its FIN frame.
    pending: Option<BytesMut>,
}

#[async_trait]
impl TunnelReader for WsTunnelReader {
    async fn recv(&mut self) -> TransportResult<Option<Bytes>> {
        loop {
            // Drain every complete frame already buffered before
            // touching the socket again.
            while let Some(frame) = decode_frame(&mut self.raw)? {
                match frame.opcode {
                    OP_BINARY => {
                        if frame.fin {
                            if self.pending.is_some() {
                                return Err(TransportError::Protocol(
                                    "new message before continuation finished".to_string(),
                                ));
                            }
                            return Ok(Some(frame.payload));
                        }
                        self.pending = Some(BytesMut::from(&frame.payload[..]));
                    }
                    OP_CONTINUATION => {
                        let mut pending = self.pending.take().ok_or_else(|| {
                            TransportError::Protocol(
                                "continuation frame without a message".to_string(),
                            )
                        })?;
                        pending.extend_from_slice(&frame.payload);
                        if frame.fin {
                            return Ok(Some(pending.freeze()));
                        }
                        self.pending = Some(pending);
                    }
                    OP_PING | OP_PONG => {
                        // Neither side of a tunnel sends pings; nothing
                        // to answer.
                    }
                    OP_CLOSE => return Ok(None),
                    other => {
                        return Err(TransportError::Protocol(format!(
                            "unexpected frame opcode {:#x}",
                            other
                        )));
                    }
                }
            }

            let n = self.half.read_buf(&mut self.raw).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }
}

/// Acceptor for inbound WebSocket tunnels. The upgrade handshake runs
/// as part of `accept`.
pub struct WsTunnelListener {
    inner: TcpListener,
}

impl WsTunnelListener {
    pub async fn bind(host: &str, port: u16) -> TransportResult<Self> {
        let inner = TcpListener::bind((host, port)).await?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl TunnelListener for WsTunnelListener {
    async fn accept(&mut self) -> TransportResult<Box<dyn TunnelConnection>> {
        let (stream, peer) = self.inner.accept().await?;
        stream.set_nodelay(true)?;
        let tunnel = WsTunnel::accept(stream, peer).await?;
        Ok(Box::new(tunnel))
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }
}
