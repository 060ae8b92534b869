//! Per-service proxy listener
//!
//! Accepts app-client sockets on the configured port, announces each
//! one with OPEN and streams its bytes as DATA frames. Everything here
//! is scoped to a single connection id; nothing that goes wrong with
//! one app client touches the tunnel or the other ids.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use portmux_proto::{ConnTable, ConnectionId, Frame, APP_CHUNK_SIZE};

use crate::tunnel::TunnelHandle;
use crate::AppClientEntry;

const APP_QUEUE: usize = 64;

/// Accept loop for one configured service.
pub(crate) async fn run(
    listener: TcpListener,
    remote_port: u16,
    handle: Arc<TunnelHandle>,
    table: ConnTable<AppClientEntry>,
) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let id = match ConnectionId::from_peer(peer) {
                    Some(id) => id,
                    None => {
                        warn!("refusing app client {}: no IPv4 representation", peer);
                        continue;
                    }
                };
                debug!(%id, "accepted app client for backend port {}", remote_port);

                let handle = handle.clone();
                let table = table.clone();
                tokio::spawn(async move {
                    serve_app_client(socket, id, remote_port, handle, table).await;
                });
            }
            Err(e) => {
                error!("accept failed: {}", e);
            }
        }
    }
}

/// Drive one app-client socket for its whole lifetime.
async fn serve_app_client(
    socket: TcpStream,
    id: ConnectionId,
    remote_port: u16,
    handle: Arc<TunnelHandle>,
    table: ConnTable<AppClientEntry>,
) {
    let (sender, receiver) = mpsc::channel::<Bytes>(APP_QUEUE);
    let entry = AppClientEntry {
        sender,
        remote_name: handle.name().to_string(),
    };
    if table.insert(id, entry).is_err() {
        warn!(%id, "connection id still live, refusing new app client");
        return;
    }

    let open = Frame::Open { id, port: remote_port };
    if handle.send(&open).await.is_err() {
        // Tunnel down: close the socket right away, no frame to send it on.
        debug!(%id, "tunnel down at accept, refusing app client");
        table.remove(id);
        return;
    }

    let (mut read_half, write_half) = socket.into_split();
    let mut write_task = tokio::spawn(write_to_app_client(write_half, receiver));

    tokio::select! {
        _ = read_from_app_client(&mut read_half, id, &handle) => {}
        _ = &mut write_task => {}
    }
    write_task.abort();
    drop(read_half);

    // Still registered means this side initiated the teardown and the
    // remote side has not been told yet.
    if table.remove(id).is_some() {
        let _ = handle.send(&Frame::Close { id }).await;
    }
    debug!(%id, "app client closed");
}

/// App-client socket → DATA frames, until EOF or tunnel loss.
async fn read_from_app_client(
    read_half: &mut OwnedReadHalf,
    id: ConnectionId,
    handle: &TunnelHandle,
) {
    let mut buf = [0u8; APP_CHUNK_SIZE];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(%id, "app client hit EOF");
                return;
            }
            Ok(n) => {
                let frame = Frame::Data {
                    id,
                    payload: Bytes::copy_from_slice(&buf[..n]),
                };
                if handle.send(&frame).await.is_err() {
                    debug!(%id, "tunnel down mid-stream, dropping app client");
                    return;
                }
            }
            Err(e) => {
                debug!(%id, "app client read failed: {}", e);
                return;
            }
        }
    }
}

/// DATA payloads → app-client socket. An empty chunk is the close marker.
async fn write_to_app_client(mut write_half: OwnedWriteHalf, mut receiver: mpsc::Receiver<Bytes>) {
    while let Some(chunk) = receiver.recv().await {
        if chunk.is_empty() {
            break;
        }
        if let Err(e) = write_half.write_all(&chunk).await {
            debug!("app client write failed: {}", e);
            break;
        }
    }
    let _ = write_half.shutdown().await;
}
