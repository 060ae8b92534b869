//! Tunnel Control Protocol
//!
//! This crate defines the control-protocol frames exchanged between the
//! local and remote sides of a tunnel, the 48-bit connection identifiers
//! used to multiplex application connections, and the routing table each
//! side keeps for its live connections.

pub mod frame;
pub mod id;
pub mod table;

pub use frame::{Frame, FrameDecoder, FrameError};
pub use id::ConnectionId;
pub use table::{ConnTable, TableError};

/// Read size for application sockets; one read becomes one DATA frame.
pub const APP_CHUNK_SIZE: usize = 1024;
