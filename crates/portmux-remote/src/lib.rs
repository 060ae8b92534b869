//! Remote side of the tunnel
//!
//! The half behind the firewall. Accepts tunnels from the local side
//! and, for every OPEN frame, dials the real backend on loopback and
//! shuttles bytes both ways.

pub mod config;
mod session;

pub use config::{ConfigError, RemoteConfig};

use std::net::SocketAddr;

use thiserror::Error;
use tracing::{error, info};

use portmux_proto::FrameError;
use portmux_transport::{
    TcpTunnelListener, TransportError, TunnelAddr, TunnelListener, TunnelScheme,
};
use portmux_transport_websocket::WsTunnelListener;

/// Remote-side errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// The remote server, bound and ready to serve.
pub struct RemoteServer {
    listener: Box<dyn TunnelListener>,
}

impl RemoteServer {
    /// Bind the tunnel acceptor. Bind failures are fatal at startup.
    pub async fn bind(addr: &TunnelAddr) -> Result<Self, RemoteError> {
        let listener: Box<dyn TunnelListener> = match addr.scheme {
            TunnelScheme::Tcp => {
                Box::new(TcpTunnelListener::bind(&addr.host, addr.port).await?)
            }
            TunnelScheme::Ws => Box::new(WsTunnelListener::bind(&addr.host, addr.port).await?),
        };
        info!("accepting tunnels on {}", addr);
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RemoteError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept tunnels forever; each one is served on its own task.
    pub async fn serve(mut self) -> Result<(), RemoteError> {
        loop {
            match self.listener.accept().await {
                Ok(conn) => {
                    tokio::spawn(session::run(conn));
                }
                Err(e) => {
                    // A failed accept (bad WebSocket handshake, reset
                    // mid-upgrade) only costs that one tunnel attempt.
                    error!("tunnel accept failed: {}", e);
                }
            }
        }
    }
}
