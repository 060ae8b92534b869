//! WebSocket tunnel carrier
//!
//! Implements the RFC 6455 subset the tunnel needs: the HTTP/1.1 upgrade
//! handshake, binary frames with client-side masking, and coalescing of
//! continuation frames. Control-protocol bytes ride inside binary
//! messages; upper layers never see WebSocket headers.
//!
//! Useful where a raw TCP tunnel is blocked but HTTP traffic passes.

pub mod connection;
pub mod frame;
pub mod handshake;

pub use connection::{WsTunnel, WsTunnelListener};
