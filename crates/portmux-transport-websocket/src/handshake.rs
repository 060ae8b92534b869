//! HTTP/1.1 upgrade handshake
//!
//! Both directions return any bytes that arrived after the header
//! terminator; those already belong to the framed stream and are handed
//! to the connection's read buffer.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use portmux_transport::{TransportError, TransportResult};

/// Fixed GUID from RFC 6455 §1.3.
pub const WS_MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The key sent on every client handshake. Both ends of a tunnel are
/// this implementation, so the nonce buys nothing.
pub const CLIENT_KEY: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

const MAX_HEAD: usize = 8 * 1024;

/// `Sec-WebSocket-Accept` value for a handshake key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_MAGIC_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Client side: send the upgrade request, require `101 Switching
/// Protocols` back. Returns leftover post-header bytes.
pub async fn client(stream: &mut TcpStream, host: &str, port: u16) -> TransportResult<BytesMut> {
    let request = format!(
        "GET / HTTP/1.1\r\n\
         Host: {}:{}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        host, port, CLIENT_KEY
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = BytesMut::with_capacity(1024);
    let head_end = read_head(stream, &mut buf).await?;
    let head = buf.split_to(head_end);

    let (status_line, _headers) = parse_head(&head)?;
    if !status_line.starts_with("HTTP/1.1 101") {
        return Err(TransportError::Handshake(format!(
            "expected 101 Switching Protocols, got '{}'",
            status_line
        )));
    }

    Ok(buf)
}

/// Server side: parse the upgrade request and reply 101, or reply 400
/// and fail the accept. Returns leftover post-header bytes.
pub async fn server(stream: &mut TcpStream) -> TransportResult<BytesMut> {
    let mut buf = BytesMut::with_capacity(1024);
    let head_end = read_head(stream, &mut buf).await?;
    let head = buf.split_to(head_end);

    let (_request_line, headers) = parse_head(&head)?;

    let is_upgrade = header(&headers, "connection")
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false)
        && header(&headers, "upgrade")
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
    let key = header(&headers, "sec-websocket-key");

    let key = match (is_upgrade, key) {
        (true, Some(key)) => key,
        _ => {
            let response = "HTTP/1.1 400 Bad Request\r\n\
                 Content-Type: text/plain\r\n\
                 Connection: close\r\n\
                 \r\n\
                 Incorrect request";
            stream.write_all(response.as_bytes()).await?;
            return Err(TransportError::Handshake(
                "not a WebSocket upgrade request".to_string(),
            ));
        }
    };

    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(key)
    );
    stream.write_all(response.as_bytes()).await?;

    Ok(buf)
}

/// Read until the `\r\n\r\n` header terminator; returns the offset just
/// past it. Bytes beyond stay in `buf` for the caller.
async fn read_head(stream: &mut TcpStream, buf: &mut BytesMut) -> TransportResult<usize> {
    loop {
        if let Some(pos) = find_terminator(buf) {
            return Ok(pos + 4);
        }
        if buf.len() > MAX_HEAD {
            return Err(TransportError::Handshake(
                "handshake header too large".to_string(),
            ));
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(TransportError::Handshake(
                "connection closed during handshake".to_string(),
            ));
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

/// Split a header block into its first line and lowercase-keyed headers.
fn parse_head(head: &[u8]) -> TransportResult<(String, Vec<(String, String)>)> {
    let text = std::str::from_utf8(head)
        .map_err(|_| TransportError::Handshake("non-UTF-8 handshake header".to_string()))?;

    let mut lines = text.split("\r\n");
    let first = lines.next().unwrap_or("").to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    Ok((first, headers))
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}
