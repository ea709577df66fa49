//! HTTP adapter: out-of-band URL discovery, plain GET into the content
//! store, verified against the requested fingerprint before anything is
//! surfaced to the transfer engine.

use async_trait::async_trait;
use libp2p::PeerId;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{AdapterCapability, AdapterProgress, Protocol, ProgressCallback, TransferHandle, UploadResult};
use crate::cas::ContentStore;
use crate::error::{ChiralError, ChiralResult};
use crate::kad::PeerRecord;

pub struct HttpAdapter {
    /// Out-of-band URL list, keyed by fingerprint; populated externally
    /// since HTTP sources aren't discovered via KAD.
    urls: Mutex<HashMap<String, Vec<String>>>,
    store: Arc<ContentStore>,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(store: Arc<ContentStore>) -> Self {
        HttpAdapter { urls: Mutex::new(HashMap::new()), store, client: reqwest::Client::new() }
    }

    pub fn register_source(&self, fp: &str, url: String) {
        self.urls.lock().unwrap().entry(fp.to_string()).or_default().push(url);
    }

    /// The byte range header value for resuming at `offset`.
    pub fn range_header(offset: u64) -> String {
        format!("bytes={offset}-")
    }

    fn first_url_for(&self, fp: &str) -> ChiralResult<String> {
        self.urls
            .lock()
            .unwrap()
            .get(fp)
            .and_then(|urls| urls.first())
            .cloned()
            .ok_or_else(|| ChiralError::NotFound(format!("no HTTP source registered for {fp}")))
    }
}

#[async_trait]
impl AdapterCapability for HttpAdapter {
    fn name(&self) -> Protocol {
        Protocol::Http
    }

    async fn peers_serving(&self, _fp: &str) -> ChiralResult<Vec<PeerRecord>> {
        Ok(Vec::new())
    }

    async fn fetch_from(
        &self,
        peer: PeerId,
        fp: &str,
        progress: ProgressCallback,
        _output_path: &Path,
    ) -> ChiralResult<TransferHandle> {
        let url = self.first_url_for(fp)?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ChiralError::NetworkUnreachable(format!("GET {url} failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ChiralError::NetworkUnreachable(format!("GET {url} returned {}", response.status())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ChiralError::NetworkUnreachable(format!("reading body from {url} failed: {e}")))?;

        let (actual_fp, chunk_hashes) = self.store.ingest(&body).await?;
        if actual_fp != fp {
            return Err(ChiralError::IntegrityFailure(format!(
                "HTTP source {url} served content hashing to {actual_fp}, expected {fp}"
            )));
        }

        for index in 0..chunk_hashes.len() as u64 {
            progress(AdapterProgress { fingerprint: fp.to_string(), chunk_index: index, bytes: self.store.chunk_size() as u64 });
        }
        let _ = peer;
        Ok(TransferHandle { fingerprint: fp.to_string(), protocol: Protocol::Http })
    }

    async fn publish(&self, _file_path: &Path) -> ChiralResult<UploadResult> {
        Err(ChiralError::ProtocolViolation("HTTP is a download-only source in this core".to_string()))
    }

    async fn start_seeding(&self, _fp: &str) -> ChiralResult<UploadResult> {
        Err(ChiralError::ProtocolViolation("HTTP adapter does not serve uploads".to_string()))
    }

    async fn stop_seeding(&self, _fp: &str) -> ChiralResult<bool> {
        Ok(false)
    }

    async fn pause(&self, _fp: &str) -> ChiralResult<bool> {
        Ok(true)
    }

    async fn resume(&self, _fp: &str) -> ChiralResult<bool> {
        Ok(true)
    }

    async fn cancel(&self, fp: &str) -> ChiralResult<bool> {
        Ok(self.urls.lock().unwrap().remove(fp).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> (tempfile::TempDir, HttpAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path().to_path_buf(), 256));
        (dir, HttpAdapter::new(store))
    }

    #[test]
    fn range_header_requests_from_offset() {
        assert_eq!(HttpAdapter::range_header(1024), "bytes=1024-");
    }

    #[tokio::test]
    async fn fetch_without_registered_source_is_not_found() {
        let (_dir, adapter) = adapter();
        let result = adapter
            .fetch_from(PeerId::random(), "fp1", std::sync::Arc::new(|_| {}), Path::new("/tmp/out"))
            .await;
        assert!(matches!(result, Err(ChiralError::NotFound(_))));
    }

    #[tokio::test]
    async fn fetch_from_a_real_server_lands_in_the_content_store() {
        let (_dir, adapter) = adapter();
        let payload = b"hello from a minimal http server".to_vec();
        let fp = crate::cas::fingerprint_of(&payload);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_payload = payload.clone();
        let server = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                server_payload.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.write_all(&server_payload).await.unwrap();
            stream.shutdown().await.unwrap();
        });

        adapter.register_source(&fp, format!("http://{addr}/file"));
        let handle = adapter
            .fetch_from(PeerId::random(), &fp, std::sync::Arc::new(|_| {}), Path::new("/tmp/out"))
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(handle.fingerprint, fp);
        assert_eq!(adapter.store.read_full(&fp).await.unwrap(), payload);
    }
}
