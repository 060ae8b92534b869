//! Per-tunnel session on the remote side
//!
//! Each accepted tunnel gets its own routing table and frame loop.
//! OPEN dials the backend on loopback, DATA and CLOSE route through the
//! table, and a tunnel-level failure sweeps every backend the tunnel
//! owned. Ids from different tunnels never meet.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use portmux_proto::{ConnTable, ConnectionId, Frame, FrameDecoder, APP_CHUNK_SIZE};
use portmux_transport::{TunnelConnection, TunnelReader, TunnelWriter};

use crate::RemoteError;

const OUTBOUND_QUEUE: usize = 256;
const BACKEND_QUEUE: usize = 64;

/// Routing record for one live backend connection.
#[derive(Clone)]
struct BackendEntry {
    /// Write handle into the backend socket's write task. An empty
    /// chunk tells the task to close.
    sender: mpsc::Sender<Bytes>,
}

/// Serve one accepted tunnel until it fails or closes.
pub(crate) async fn run(conn: Box<dyn TunnelConnection>) {
    let peer = conn.peer_addr();
    match peer {
        Some(peer) => info!("tunnel established from {}", peer),
        None => info!("tunnel established"),
    }

    let (writer, reader) = conn.split();
    let (sender, receiver) = mpsc::channel::<Bytes>(OUTBOUND_QUEUE);
    let mut writer_task = tokio::spawn(write_loop(writer, receiver));

    let table: ConnTable<BackendEntry> = ConnTable::new();

    tokio::select! {
        result = frame_loop(reader, &sender, &table) => match result {
            Ok(()) => info!("tunnel closed by local side"),
            Err(e) => error!("tunnel failed: {}", e),
        },
        _ = &mut writer_task => {
            error!("tunnel write side ended");
        }
    }
    writer_task.abort();

    // Drop every backend this tunnel owned; closing the channels makes
    // the write tasks shut the sockets down.
    let dropped = table.drain();
    if !dropped.is_empty() {
        debug!("closing {} backend connections", dropped.len());
    }
    drop(dropped);

    if let Some(peer) = peer {
        info!("tunnel from {} torn down", peer);
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

/// Decode and service inbound frames until the tunnel ends.
async fn frame_loop(
    mut reader: Box<dyn TunnelReader>,
    outbound: &mpsc::Sender<Bytes>,
    table: &ConnTable<BackendEntry>,
) -> Result<(), RemoteError> {
    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = match reader.recv().await? {
            Some(chunk) => chunk,
            None => return Ok(()),
        };
        decoder.extend(&chunk);

        while let Some(frame) = decoder.next()? {
            match frame {
                Frame::Open { id, port } => {
                    open_backend(id, port, outbound, table).await;
                }
                Frame::Data { id, payload } => match table.lookup(id) {
                    Some(entry) => {
                        if entry.sender.send(payload).await.is_err() {
                            debug!(%id, "backend gone, dropping payload");
                        }
                    }
                    None => debug!(%id, "data for unknown connection, dropped"),
                },
                Frame::Close { id } => match table.remove(id) {
                    Some(entry) => {
                        debug!(%id, "closed by local side");
                        let _ = entry.sender.send(Bytes::new()).await;
                    }
                    None => debug!(%id, "close for unknown connection, dropped"),
                },
                Frame::Heartbeat => {}
            }
        }
    }
}

/// Dial the backend for a fresh OPEN. Failure answers CLOSE and leaves
/// nothing registered.
async fn open_backend(
    id: ConnectionId,
    port: u16,
    outbound: &mpsc::Sender<Bytes>,
    table: &ConnTable<BackendEntry>,
) {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let socket = match TcpStream::connect(addr).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%id, "backend {} refused: {}", addr, e);
            let _ = outbound.send(Frame::Close { id }.encode()).await;
            return;
        }
    };
    debug!(%id, "backend {} connected", addr);

    let (sender, receiver) = mpsc::channel::<Bytes>(BACKEND_QUEUE);
    if table.insert(id, BackendEntry { sender }).is_err() {
        warn!(%id, "connection id still live, dropping duplicate OPEN");
        return;
    }

    let (read_half, write_half) = socket.into_split();
    tokio::spawn(write_to_backend(write_half, receiver));
    tokio::spawn(read_from_backend(
        read_half,
        id,
        outbound.clone(),
        table.clone(),
    ));
}

/// Backend socket → DATA frames; EOF or error becomes CLOSE.
async fn read_from_backend(
    mut read_half: OwnedReadHalf,
    id: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
    table: ConnTable<BackendEntry>,
) {
    let mut buf = [0u8; APP_CHUNK_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(%id, "backend hit EOF");
                break;
            }
            Ok(n) => {
                let frame = Frame::Data {
                    id,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                if outbound.send(frame.encode()).await.is_err() {
                    // Tunnel gone; the session teardown sweeps the table.
                    return;
                }
            }
            Err(e) => {
                debug!(%id, "backend read failed: {}", e);
                break;
            }
        }
    }

    // Only announce CLOSE if the id is still ours to close.
    if table.remove(id).is_some() {
        let _ = outbound.send(Frame::Close { id }.encode()).await;
    }
}

/// DATA payloads → backend socket. An empty chunk is the close marker.
async fn write_to_backend(mut write_half: OwnedWriteHalf, mut receiver: mpsc::Receiver<Bytes>) {
    while let Some(chunk) = receiver.recv().await {
        if chunk.is_empty() {
            break;
        }
        if let Err(e) = write_half.write_all(&chunk).await {
            debug!("backend write failed: {}", e);
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
