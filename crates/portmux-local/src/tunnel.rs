//! Tunnel lifetime management on the local side
//!
//! One runtime task per configured remote drives the dial / serve /
//! teardown cycle forever. While a tunnel is connected, its frames are
//! funneled through a single writer task fed by an mpsc channel; that
//! channel is the serialisation point for everything the proxies emit.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use portmux_proto::{ConnTable, Frame, FrameDecoder};
use portmux_transport::{
    TcpTunnel, TransportResult, TunnelAddr, TunnelConnection, TunnelReader, TunnelScheme,
    TunnelWriter,
};
use portmux_transport_websocket::WsTunnel;

use crate::{AppClientEntry, LocalError};

/// Dial-retry cadence while a tunnel is down.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Keepalive cadence while a tunnel is up.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const OUTBOUND_QUEUE: usize = 256;

/// Shared send-side handle for one configured remote.
///
/// Proxies hold this; `send` fails fast while the tunnel is down so an
/// app client can be refused without queueing into nowhere.
pub(crate) struct TunnelHandle {
    name: String,
    addr: TunnelAddr,
    outbound: RwLock<Option<mpsc::Sender<Bytes>>>,
}

impl TunnelHandle {
    pub fn new(name: String, addr: TunnelAddr) -> Self {
        Self { name, addr, outbound: RwLock::new(None) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.read().unwrap().is_some()
    }

    /// Queue a frame for the writer task.
    pub async fn send(&self, frame: &Frame) -> Result<(), LocalError> {
        let sender = { self.outbound.read().unwrap().clone() };
        match sender {
            Some(sender) => sender
                .send(frame.encode())
                .await
                .map_err(|_| LocalError::TunnelDown(self.name.clone())),
            None => Err(LocalError::TunnelDown(self.name.clone())),
        }
    }

    fn set_channel(&self, sender: Option<mpsc::Sender<Bytes>>) {
        *self.outbound.write().unwrap() = sender;
    }
}

async fn dial(addr: &TunnelAddr) -> TransportResult<Box<dyn TunnelConnection>> {
    match addr.scheme {
        TunnelScheme::Tcp => {
            let tunnel = TcpTunnel::connect(&addr.host, addr.port).await?;
            Ok(Box::new(tunnel))
        }
        TunnelScheme::Ws => {
            let tunnel = WsTunnel::connect(&addr.host, addr.port).await?;
            Ok(Box::new(tunnel))
        }
    }
}

/// Dial / serve / teardown loop for one tunnel. Runs forever.
pub(crate) async fn run(handle: Arc<TunnelHandle>, table: ConnTable<AppClientEntry>) {
    loop {
        let conn = match dial(&handle.addr).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(
                    tunnel = %handle.name,
                    "connecting to {} failed: {}, retrying shortly",
                    handle.addr, e
                );
                sleep(RECONNECT_DELAY).await;
                continue;
            }
        };
        info!(tunnel = %handle.name, "connected to {}", handle.addr);

        let (writer, reader) = conn.split();
        let (sender, receiver) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
        handle.set_channel(Some(sender));

        let mut writer_task = tokio::spawn(write_loop(writer, receiver));

        tokio::select! {
            result = read_loop(reader, &table) => match result {
                Ok(()) => info!(tunnel = %handle.name, "tunnel closed by remote side"),
                Err(e) => error!(tunnel = %handle.name, "tunnel failed: {}", e),
            },
            _ = &mut writer_task => {
                error!(tunnel = %handle.name, "tunnel write side ended");
            }
        }

        handle.set_channel(None);
        writer_task.abort();

        // Every id routed through this tunnel is lost; dropping the
        // entries closes the app-client sockets via their channels.
        let dropped = table.remove_matching(|_, entry| entry.remote_name == handle.name);
        if !dropped.is_empty() {
            warn!(
                tunnel = %handle.name,
                "dropping {} in-flight connections",
                dropped.len()
            );
        }
        drop(dropped);

        sleep(RECONNECT_DELAY).await;
    }
}

/// Emit HEARTBEAT every interval; skipped silently while down.
pub(crate) async fn heartbeat(handle: Arc<TunnelHandle>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    interval.tick().await; // the first tick fires immediately
    loop {
        interval.tick().await;
        if handle.send(&Frame::Heartbeat).await.is_err() {
            debug!(tunnel = %handle.name, "heartbeat skipped, tunnel down");
        }
    }
}

async fn write_loop(mut writer: Box<dyn TunnelWriter>, mut receiver: mpsc::Receiver<Bytes>) {
    while let Some(chunk) = receiver.recv().await {
        if let Err(e) = writer.send(chunk).await {
            error!("tunnel write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Decode inbound frames and route them to the owning app client.
async fn read_loop(
    mut reader: Box<dyn TunnelReader>,
    table: &ConnTable<AppClientEntry>,
) -> Result<(), LocalError> {
    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = match reader.recv().await? {
            Some(chunk) => chunk,
            None => return Ok(()),
        };
        decoder.extend(&chunk);

        while let Some(frame) = decoder.next()? {
            match frame {
                Frame::Data { id, payload } => match table.lookup(id) {
                    Some(entry) => {
                        if entry.sender.send(payload).await.is_err() {
                            debug!(%id, "app client gone, dropping payload");
                        }
                    }
                    None => debug!(%id, "data for unknown connection, dropped"),
                },
                Frame::Close { id } => {
                    if let Some(entry) = table.remove(id) {
                        debug!(%id, "closed by remote side");
                        let _ = entry.sender.send(Bytes::new()).await;
                    }
                }
                Frame::Heartbeat => {}
                Frame::Open { id, .. } => {
                    warn!(%id, "unexpected OPEN from remote side, dropped");
                }
            }
        }
    }
}
