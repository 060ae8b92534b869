//! 48-bit connection identifiers
//!
//! An application connection is identified by its peer address on the
//! local side: `(ipv4 << 16) | peer_port`. The value is unique among
//! simultaneously-open connections of one local side, and fits the high
//! 48 bits of the `u64` that OPEN/DATA/CLOSE frames carry on the wire.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Identifier for one multiplexed application connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Largest representable id (48 bits).
    pub const MAX: u64 = (1 << 48) - 1;

    /// Build an id from a raw 48-bit value. Higher bits are discarded.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw & Self::MAX)
    }

    /// Derive the id from an accepted app-client peer address.
    ///
    /// Returns `None` for peers without an IPv4 representation; the id
    /// scheme has no room for IPv6 addresses.
    pub fn from_peer(peer: SocketAddr) -> Option<Self> {
        let ip: Ipv4Addr = match peer.ip() {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => v6.to_ipv4_mapped()?,
        };
        let ip = u64::from(u32::from(ip));
        Some(Self((ip << 16) | u64::from(peer.port())))
    }

    /// Pack the id together with a port into the wire `u64`:
    /// id in the high 48 bits, port in the low 16.
    pub fn pack(self, port: u16) -> u64 {
        (self.0 << 16) | u64::from(port)
    }

    /// Split a wire `u64` into id and port.
    pub fn unpack(packed: u64) -> (Self, u16) {
        (Self(packed >> 16), (packed & 0xFFFF) as u16)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ip = Ipv4Addr::from((self.0 >> 16) as u32);
        let port = (self.0 & 0xFFFF) as u16;
        write!(f, "{}:{}", ip, port)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self)
    }
}
