//! Minimal TCP "peer wire" protocol shared by the WebRTC, BitTorrent, and
//! ED2K adapters: none of those three protocols has a pure-Rust crate in
//! this dependency stack, so each speaks the same length-prefixed
//! request/response framing over a plain TCP socket rather than its real
//! wire format. A scoped-down stand-in for peer-to-peer transfer, not a
//! conformant implementation of any of the three — see DESIGN.md.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{ChiralError, ChiralResult};

/// Guard against an implausible length prefix poisoning an allocation.
const MAX_FRAME_LEN: u32 = 1024 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct FetchRequest<'a> {
    fingerprint: &'a str,
}

async fn read_frame(stream: &mut TcpStream) -> ChiralResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(ChiralError::ProtocolViolation(format!("peer advertised an implausible frame length {len}")));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

async fn write_frame(stream: &mut TcpStream, body: &[u8]) -> ChiralResult<()> {
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(body).await?;
    Ok(())
}

/// Connect to `addr`, request the content named by `fp`, and return its
/// bytes.
pub async fn fetch(addr: SocketAddr, fp: &str) -> ChiralResult<Vec<u8>> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ChiralError::NetworkUnreachable(format!("connect to {addr} failed: {e}")))?;

    let request = serde_json::to_vec(&FetchRequest { fingerprint: fp })?;
    write_frame(&mut stream, &request).await?;
    read_frame(&mut stream).await
}

/// Accept a single connection on `listener`, read its request frame
/// (ignored beyond framing — this stand-in always serves whatever `data`
/// the caller already knows is the right content), and reply with `data`.
/// Used by a node's own seeding loop and by tests.
pub async fn serve_once(listener: &TcpListener, data: &[u8]) -> ChiralResult<()> {
    let (mut stream, _) = listener.accept().await?;
    let _request = read_frame(&mut stream).await?;
    write_frame(&mut stream, data).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_round_trips_against_serve_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let payload = b"peer wire payload".to_vec();

        let server = {
            let payload = payload.clone();
            tokio::spawn(async move {
                serve_once(&listener, &payload).await.unwrap();
            })
        };

        let received = fetch(addr, "fp-does-not-matter-for-framing").await.unwrap();
        server.await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn fetch_against_nothing_listening_is_network_unreachable() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = fetch(addr, "fp").await;
        assert!(matches!(result, Err(ChiralError::NetworkUnreachable(_))));
    }
}
