//! RFC 6455 frame encoding and decoding
//!
//! Length encoding follows the RFC thresholds: 7-bit inline below 126,
//! 16-bit extended up to 0xFFFF, 64-bit extended beyond. Masked frames
//! are unmasked during decode; callers see plain payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use portmux_transport::{TransportError, TransportResult};

pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;

/// One decoded WebSocket frame, unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Bytes,
}

/// Encode one frame. Frames are never fragmented on send, so FIN is
/// always set. `mask` carries the client's masking key; the server
/// sends unmasked.
pub fn encode_frame(opcode: u8, payload: &[u8], mask: Option<[u8; 4]>) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 14);

    buf.put_u8(FIN_BIT | (opcode & 0x0F));

    let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
    let len = payload.len();
    if len < 126 {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= 0xFFFF {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(payload);
            for (i, byte) in buf[start..].iter_mut().enumerate() {
                *byte ^= key[i % 4];
            }
        }
        None => buf.put_slice(payload),
    }

    buf.freeze()
}

/// Decode one complete frame from the front of `buf`, consuming its
/// bytes. Returns `Ok(None)` while the buffer holds only a prefix.
pub fn decode_frame(buf: &mut BytesMut) -> TransportResult<Option<WsFrame>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let b1 = buf[1];
    let fin = b0 & FIN_BIT != 0;
    let opcode = b0 & 0x0F;
    let masked = b1 & MASK_BIT != 0;

    let mut header = 2usize;
    let payload_len = match b1 & 0x7F {
        126 => {
            if buf.len() < header + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
            header += 2;
            len
        }
        127 => {
            if buf.len() < header + 8 {
                return Ok(None);
            }
            let mut be = [0u8; 8];
            be.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(be);
            if len > usize::MAX as u64 {
                return Err(TransportError::Protocol(format!(
                    "frame payload length {} exceeds addressable memory",
                    len
                )));
            }
            header += 8;
            len as usize
        }
        len => len as usize,
    };

    let mask = if masked {
        if buf.len() < header + 4 {
            return Ok(None);
        }
        let key = [
            buf[header],
            buf[header + 1],
            buf[header + 2],
            buf[header + 3],
        ];
        header += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < header + payload_len {
        return Ok(None);
    }

    buf.advance(header);
    let mut payload = buf.split_to(payload_len);
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Some(WsFrame { fin, opcode, payload: payload.freeze() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(payload: &[u8], mask: Option<[u8; 4]>) -> WsFrame {
        let wire = encode_frame(OP_BINARY, payload, mask);
        let mut buf = BytesMut::from(&wire[..]);
        let frame = decode_frame(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decode left bytes behind");
        frame
    }

    #[test]
    fn test_short_frame_unmasked() {
        let wire = encode_frame(OP_BINARY, b"hi", None);
        assert_eq!(&wire[..], &[0x82, 0x02, b'h', b'i']);

        let frame = round_trip(b"hi", None);
        assert!(frame.fin);
        assert_eq!(frame.opcode, OP_BINARY);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[test]
    fn test_masked_frame_round_trips() {
        let key = [0x12, 0x34, 0x56, 0x78];
        let wire = encode_frame(OP_BINARY, b"masked payload", Some(key));

        // Mask bit set, key present, payload scrambled on the wire.
        assert_eq!(wire[1] & 0x80, 0x80);
        assert_eq!(&wire[2..6], &key);
        assert_ne!(&wire[6..], b"masked payload");

        let frame = round_trip(b"masked payload", Some(key));
        assert_eq!(&frame.payload[..], b"masked payload");
    }

    #[test]
    fn test_seven_bit_length_boundary() {
        // 125 bytes is the largest inline length.
        let payload = vec![0xAB; 125];
        let wire = encode_frame(OP_BINARY, &payload, None);
        assert_eq!(wire[1], 125);
        assert_eq!(round_trip(&payload, None).payload.len(), 125);
    }

    #[test]
    fn test_sixteen_bit_extended_length() {
        // 126 bytes is the first to need the 16-bit form, per the RFC.
        let payload = vec![0xCD; 126];
        let wire = encode_frame(OP_BINARY, &payload, None);
        assert_eq!(wire[1], 126);
        assert_eq!(u16::from_be_bytes([wire[2], wire[3]]), 126);
        assert_eq!(round_trip(&payload, None).payload.len(), 126);

        let payload = vec![0xCD; 0xFFFF];
        let wire = encode_frame(OP_BINARY, &payload, None);
        assert_eq!(wire[1], 126);
    }

    #[test]
    fn test_sixty_four_bit_extended_length() {
        let payload = vec![0xEF; 0x1_0000];
        let wire = encode_frame(OP_BINARY, &payload, None);
        assert_eq!(wire[1], 127);
        let mut be = [0u8; 8];
        be.copy_from_slice(&wire[2..10]);
        assert_eq!(u64::from_be_bytes(be), 0x1_0000);
        assert_eq!(round_trip(&payload, None).payload.len(), 0x1_0000);
    }

    #[test]
    fn test_partial_header_and_payload_yield_none() {
        let wire = encode_frame(OP_BINARY, &vec![0x11; 300], Some([1, 2, 3, 4]));

        for cut in [1, 2, 3, 5, 7, wire.len() - 1] {
            let mut buf = BytesMut::from(&wire[..cut]);
            assert!(decode_frame(&mut buf).unwrap().is_none(), "cut at {}", cut);
            // Nothing may be consumed until the frame is complete.
            assert_eq!(buf.len(), cut);
        }
    }

    #[test]
    fn test_two_frames_queued_in_one_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(OP_BINARY, b"first", None));
        buf.extend_from_slice(&encode_frame(OP_BINARY, b"second", None));

        let a = decode_frame(&mut buf).unwrap().unwrap();
        let b = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&a.payload[..], b"first");
        assert_eq!(&b.payload[..], b"second");
        assert!(decode_frame(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_continuation_frame_decodes_without_fin() {
        // Hand-built: binary frame without FIN, then a continuation with FIN.
        let mut buf = BytesMut::new();
        buf.put_u8(OP_BINARY); // FIN clear
        buf.put_u8(3);
        buf.put_slice(b"abc");
        buf.put_u8(0x80 | OP_CONTINUATION);
        buf.put_u8(3);
        buf.put_slice(b"def");

        let first = decode_frame(&mut buf).unwrap().unwrap();
        assert!(!first.fin);
        assert_eq!(first.opcode, OP_BINARY);
        assert_eq!(&first.payload[..], b"abc");

        let second = decode_frame(&mut buf).unwrap().unwrap();
        assert!(second.fin);
        assert_eq!(second.opcode, OP_CONTINUATION);
        assert_eq!(&second.payload[..], b"def");
    }
}
