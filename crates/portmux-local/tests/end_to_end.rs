//! End-to-end scenarios: a local side and a remote side wired through a
//! real tunnel, with echo backends on loopback.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use portmux_local::{LocalConfig, LocalHandle, LocalServer, ProxyConfig, RemoteEndpoint};
use portmux_remote::RemoteServer;
use portmux_transport::{TunnelAddr, TunnelScheme};

const WAIT: Duration = Duration::from_secs(5);

/// Echo server on loopback; returns its port.
async fn echo_backend() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let (mut sock, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

fn local_config(tunnel: TunnelAddr, backend_port: u16) -> LocalConfig {
    LocalConfig {
        remote_servers: vec![RemoteEndpoint { name: "r1".to_string(), addr: tunnel }],
        proxy_list: vec![ProxyConfig {
            kind: "tcp".to_string(),
            local: 0,
            remote: backend_port,
            remote_name: "r1".to_string(),
        }],
    }
}

/// Remote server + local server, both on ephemeral ports. Returns the
/// proxy port and the (kept-alive) local handle.
async fn start_stack(scheme: TunnelScheme, backend_port: u16) -> (SocketAddr, LocalHandle) {
    let bind: TunnelAddr = format!("{}://127.0.0.1:0", scheme).parse().unwrap();
    let remote = RemoteServer::bind(&bind).await.unwrap();
    let tunnel_port = remote.local_addr().unwrap().port();
    tokio::spawn(async move {
        remote.serve().await.unwrap();
    });

    let tunnel: TunnelAddr = format!("{}://127.0.0.1:{}", scheme, tunnel_port)
        .parse()
        .unwrap();
    let handle = LocalServer::new(local_config(tunnel, backend_port))
        .start()
        .await
        .unwrap();
    assert!(handle.wait_connected(WAIT).await, "tunnel did not come up");

    let proxy = handle.proxy_addrs()[0];
    (proxy, handle)
}

async fn connect_proxy(proxy: SocketAddr) -> TcpStream {
    TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap()
}

#[tokio::test]
async fn test_echo_over_tcp_tunnel() {
    let backend = echo_backend().await;
    let (proxy, _handle) = start_stack(TunnelScheme::Tcp, backend).await;

    let mut client = connect_proxy(proxy).await;
    client.write_all(b"ping\n").await.unwrap();

    let mut buf = [0u8; 5];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("no echo before timeout")
        .unwrap();
    assert_eq!(&buf, b"ping\n");
}

#[tokio::test]
async fn test_echo_over_websocket_tunnel() {
    let backend = echo_backend().await;
    let (proxy, _handle) = start_stack(TunnelScheme::Ws, backend).await;

    let mut client = connect_proxy(proxy).await;
    client.write_all(b"ping\n").await.unwrap();

    let mut buf = [0u8; 5];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("no echo before timeout")
        .unwrap();
    assert_eq!(&buf, b"ping\n");
}

#[tokio::test]
async fn test_open_to_closed_backend_port() {
    // Reserve a port, then free it so nothing listens there.
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (proxy, _handle) = start_stack(TunnelScheme::Tcp, closed).await;

    let mut client = connect_proxy(proxy).await;

    // The client sends nothing; the remote side's failed dial must
    // close our socket without any data arriving.
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, client.read(&mut buf))
        .await
        .expect("socket not closed before timeout")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_three_concurrent_connections_no_cross_talk() {
    let backend = echo_backend().await;
    let (proxy, _handle) = start_stack(TunnelScheme::Tcp, backend).await;

    let mut tasks = Vec::new();
    for message in [&b"AAAA"[..], b"BBBB", b"CCCC"] {
        tasks.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();
            client.write_all(message).await.unwrap();

            let mut buf = [0u8; 4];
            timeout(WAIT, client.read_exact(&mut buf))
                .await
                .expect("no echo before timeout")
                .unwrap();
            assert_eq!(&buf[..], message, "cross-talk between connections");
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_one_mebibyte_round_trip() {
    let backend = echo_backend().await;
    let (proxy, _handle) = start_stack(TunnelScheme::Tcp, backend).await;

    let payload: Vec<u8> = (0u32..(1 << 20)).map(|i| (i.wrapping_mul(31) % 251) as u8).collect();

    let client = connect_proxy(proxy).await;
    let (mut read_half, mut write_half) = client.into_split();

    // Write and read concurrently; the echo path is full duplex and a
    // one-sided test would fill every buffer in the chain.
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        write_half.write_all(&payload).await.unwrap();
        write_half // keep the write side open until the echo is in
    });

    let mut received = vec![0u8; expected.len()];
    timeout(Duration::from_secs(30), read_half.read_exact(&mut received))
        .await
        .expect("echo incomplete before timeout")
        .unwrap();
    assert_eq!(received, expected, "payload corrupted in transit");

    drop(writer.await.unwrap());
}

#[tokio::test]
async fn test_client_refused_while_tunnel_down() {
    // Point the tunnel at a port nothing listens on.
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let tunnel: TunnelAddr = format!("tcp://127.0.0.1:{}", dead).parse().unwrap();
    let handle = LocalServer::new(local_config(tunnel, 9))
        .start()
        .await
        .unwrap();
    let proxy = handle.proxy_addrs()[0];

    // The proxy port accepts, but with no tunnel the socket must be
    // dropped immediately and no frame goes anywhere.
    let mut client = connect_proxy(proxy).await;
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, client.read(&mut buf))
        .await
        .expect("socket not closed before timeout")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_local_retries_until_remote_appears() {
    let backend = echo_backend().await;

    // Pick a port for the remote server but don't bind it yet.
    let tunnel_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let tunnel: TunnelAddr = format!("tcp://127.0.0.1:{}", tunnel_port).parse().unwrap();

    let handle = LocalServer::new(local_config(tunnel.clone(), backend))
        .start()
        .await
        .unwrap();
    assert!(
        !handle.wait_connected(Duration::from_millis(300)).await,
        "nothing to connect to yet"
    );

    // Bring the remote side up; the dial-retry loop must find it.
    let remote = RemoteServer::bind(&tunnel).await.unwrap();
    tokio::spawn(async move {
        remote.serve().await.unwrap();
    });
    assert!(
        handle.wait_connected(Duration::from_secs(10)).await,
        "reconnect never succeeded"
    );

    let mut client = TcpStream::connect(("127.0.0.1", handle.proxy_addrs()[0].port()))
        .await
        .unwrap();
    client.write_all(b"after reconnect").await.unwrap();
    let mut buf = [0u8; 15];
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("no echo before timeout")
        .unwrap();
    assert_eq!(&buf, b"after reconnect");
}

// A full minute of idle time; run manually.
#[tokio::test]
#[ignore]
async fn test_idle_tunnel_survives_on_heartbeats() {
    let backend = echo_backend().await;
    let (proxy, _handle) = start_stack(TunnelScheme::Tcp, backend).await;

    let mut client = connect_proxy(proxy).await;
    client.write_all(b"before").await.unwrap();
    let mut buf = [0u8; 6];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    // Same connection, same tunnel, a minute later.
    client.write_all(b"after!").await.unwrap();
    timeout(WAIT, client.read_exact(&mut buf))
        .await
        .expect("tunnel or connection died while idle")
        .unwrap();
    assert_eq!(&buf, b"after!");
}
