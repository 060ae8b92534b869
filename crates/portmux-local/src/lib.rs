//! Local side of the tunnel
//!
//! The publicly-reachable half. Listens on one port per configured
//! service, multiplexes every accepted app-client connection over the
//! tunnel to its remote, and keeps each tunnel alive with heartbeats
//! and an infinite reconnect loop.

pub mod config;
mod proxy;
mod tunnel;

pub use config::{ConfigError, LocalConfig, ProxyConfig, RemoteEndpoint};
pub use tunnel::{HEARTBEAT_INTERVAL, RECONNECT_DELAY};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use portmux_proto::{ConnTable, FrameError};
use portmux_transport::TransportError;

use tunnel::TunnelHandle;

/// Local-side errors
#[derive(Debug, Error)]
pub enum LocalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("tunnel '{0}' is not connected")]
    TunnelDown(String),

    #[error("no remote servers configured")]
    NoRemotes,

    #[error("duplicate remote server name '{0}'")]
    DuplicateRemote(String),

    #[error("proxy '{kind}' on port {port} routes through unknown remote '{name}'")]
    UnknownRemote {
        kind: String,
        port: u16,
        name: String,
    },
}

/// Routing record for one live app-client connection.
#[derive(Clone)]
pub(crate) struct AppClientEntry {
    /// Write handle into the app-client socket's write task. An empty
    /// chunk tells the task to close.
    pub sender: mpsc::Sender<Bytes>,
    /// Tunnel this id is routed through.
    pub remote_name: String,
}

/// The local server, ready to start.
pub struct LocalServer {
    config: LocalConfig,
}

impl LocalServer {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    /// Bind every proxy port, then spawn the tunnel runtimes, heartbeat
    /// tasks and proxy accept loops. Bind and validation failures are
    /// fatal here; everything after runs until shutdown.
    pub async fn start(self) -> Result<LocalHandle, LocalError> {
        let LocalConfig { remote_servers, proxy_list } = self.config;
        if remote_servers.is_empty() {
            return Err(LocalError::NoRemotes);
        }

        let mut handles: HashMap<String, Arc<TunnelHandle>> = HashMap::new();
        for remote in remote_servers {
            if handles.contains_key(&remote.name) {
                return Err(LocalError::DuplicateRemote(remote.name));
            }
            let handle = TunnelHandle::new(remote.name.clone(), remote.addr);
            handles.insert(remote.name, Arc::new(handle));
        }

        let table: ConnTable<AppClientEntry> = ConnTable::new();
        let mut tasks = Vec::new();
        let mut proxy_addrs = Vec::new();

        // Bind everything before spawning anything so a bad config
        // fails whole, not half-started.
        let mut bound = Vec::new();
        for proxy in proxy_list {
            let handle = handles
                .get(&proxy.remote_name)
                .ok_or_else(|| LocalError::UnknownRemote {
                    kind: proxy.kind.clone(),
                    port: proxy.local,
                    name: proxy.remote_name.clone(),
                })?
                .clone();
            let listener = TcpListener::bind(("0.0.0.0", proxy.local)).await?;
            let addr = listener.local_addr()?;
            info!(
                "proxy '{}' listening on {} -> {}:{}",
                proxy.kind, addr, proxy.remote_name, proxy.remote
            );
            proxy_addrs.push(addr);
            bound.push((listener, proxy, handle));
        }

        for (listener, proxy, handle) in bound {
            tasks.push(tokio::spawn(proxy::run(
                listener,
                proxy.remote,
                handle,
                table.clone(),
            )));
        }

        for handle in handles.values() {
            tasks.push(tokio::spawn(tunnel::run(handle.clone(), table.clone())));
            tasks.push(tokio::spawn(tunnel::heartbeat(handle.clone())));
        }

        Ok(LocalHandle {
            proxy_addrs,
            tunnels: handles.into_values().collect(),
            tasks,
        })
    }
}

/// Handle over a running local server.
pub struct LocalHandle {
    proxy_addrs: Vec<SocketAddr>,
    tunnels: Vec<Arc<TunnelHandle>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalHandle {
    /// Bound address of each configured proxy, in config order.
    pub fn proxy_addrs(&self) -> &[SocketAddr] {
        &self.proxy_addrs
    }

    /// Wait until every tunnel is connected, or the timeout passes.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.tunnels.iter().all(|tunnel| tunnel.is_connected()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Stop every task. In-flight connections are dropped.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
