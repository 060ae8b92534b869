//! Frame codec for the tunnel control protocol
//!
//! Wire layout, network byte order throughout:
//!
//! ```text
//! OPEN        : 0x0001 | (id:48 << 16 | port:16):u64
//! HEARTBEAT   : 0x0002
//! DATA        : 0x0003 | (id:48 << 16):u64 | length:u32 | payload[length]
//! CLOSE       : 0x0004 | (id:48 << 16):u64
//! ```
//!
//! The low 16 bits of the packed `u64` carry the backend port for OPEN
//! and are zero for DATA and CLOSE.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::id::ConnectionId;

pub const OP_OPEN: u16 = 0x0001;
pub const OP_HEARTBEAT: u16 = 0x0002;
pub const OP_DATA: u16 = 0x0003;
pub const OP_CLOSE: u16 = 0x0004;

const ID_PORT_LEN: usize = 8;
const HEADER_OPEN: usize = 2 + ID_PORT_LEN;
const HEADER_CLOSE: usize = 2 + ID_PORT_LEN;
const HEADER_DATA: usize = 2 + ID_PORT_LEN + 4;

/// Codec errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),
}

/// One control-protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A new application connection; the remote side should dial
    /// `127.0.0.1:port` and route it under `id`.
    Open { id: ConnectionId, port: u16 },
    /// Keepalive, absorbed silently on receipt.
    Heartbeat,
    /// Application bytes for an established id.
    Data { id: ConnectionId, payload: Bytes },
    /// Teardown of one id; the other ids on the tunnel are unaffected.
    Close { id: ConnectionId },
}

impl Frame {
    /// Encode the frame to its wire bytes.
    pub fn encode(&self) -> Bytes {
        match self {
            Frame::Open { id, port } => {
                let mut buf = BytesMut::with_capacity(HEADER_OPEN);
                buf.put_u16(OP_OPEN);
                buf.put_u64(id.pack(*port));
                buf.freeze()
            }
            Frame::Heartbeat => {
                let mut buf = BytesMut::with_capacity(2);
                buf.put_u16(OP_HEARTBEAT);
                buf.freeze()
            }
            Frame::Data { id, payload } => {
                let mut buf = BytesMut::with_capacity(HEADER_DATA + payload.len());
                buf.put_u16(OP_DATA);
                buf.put_u64(id.pack(0));
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
                buf.freeze()
            }
            Frame::Close { id } => {
                let mut buf = BytesMut::with_capacity(HEADER_CLOSE);
                buf.put_u16(OP_CLOSE);
                buf.put_u64(id.pack(0));
                buf.freeze()
            }
        }
    }
}

/// Streaming decoder over the tunnel byte stream.
///
/// Transport reads are appended with [`extend`](FrameDecoder::extend);
/// [`next`](FrameDecoder::next) then yields every complete frame in turn.
/// A frame is only yielded once all of its bytes, payload included, have
/// arrived; a buffer holding just a prefix yields `Ok(None)`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the tunnel transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if the buffer holds one.
    pub fn next(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let op = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        match op {
            OP_HEARTBEAT => {
                self.buf.advance(2);
                Ok(Some(Frame::Heartbeat))
            }
            OP_OPEN => {
                if self.buf.len() < HEADER_OPEN {
                    return Ok(None);
                }
                self.buf.advance(2);
                let (id, port) = ConnectionId::unpack(self.buf.get_u64());
                Ok(Some(Frame::Open { id, port }))
            }
            OP_CLOSE => {
                if self.buf.len() < HEADER_CLOSE {
                    return Ok(None);
                }
                self.buf.advance(2);
                let (id, _) = ConnectionId::unpack(self.buf.get_u64());
                Ok(Some(Frame::Close { id }))
            }
            OP_DATA => {
                if self.buf.len() < HEADER_DATA {
                    return Ok(None);
                }
                let length = u32::from_be_bytes([
                    self.buf[10],
                    self.buf[11],
                    self.buf[12],
                    self.buf[13],
                ]) as usize;
                if self.buf.len() < HEADER_DATA + length {
                    return Ok(None);
                }
                self.buf.advance(2);
                let (id, _) = ConnectionId::unpack(self.buf.get_u64());
                self.buf.advance(4);
                let payload = self.buf.split_to(length).freeze();
                Ok(Some(Frame::Data { id, payload }))
            }
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}
