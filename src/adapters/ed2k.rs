//! ED2K adapter: out-of-band source lists, every chunk re-verified before
//! it's surfaced to the transfer engine. Upload is not supported — this
//! network is read-only for this core.

use async_trait::async_trait;
use libp2p::PeerId;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{peer_wire, AdapterCapability, AdapterProgress, Protocol, ProgressCallback, TransferHandle, UploadResult};
use crate::cas::ContentStore;
use crate::error::{ChiralError, ChiralResult};
use crate::kad::PeerRecord;

pub struct Ed2kAdapter {
    /// `host:port` of a source server/peer, out-of-band per-fingerprint.
    sources: Mutex<HashMap<String, Vec<String>>>,
    store: Arc<ContentStore>,
}

impl Ed2kAdapter {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Ed2kAdapter { sources: Mutex::new(HashMap::new()), store }
    }

    pub fn register_source(&self, fp: &str, source: String) {
        self.sources.lock().unwrap().entry(fp.to_string()).or_default().push(source);
    }
}

#[async_trait]
impl AdapterCapability for Ed2kAdapter {
    fn name(&self) -> Protocol {
        Protocol::Ed2k
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
        let source = {
            let sources = self.sources.lock().unwrap();
            sources
                .get(fp)
                .and_then(|s| s.first())
                .cloned()
                .ok_or_else(|| ChiralError::NotFound(format!("no ED2K source registered for {fp}")))?
        };
        let addr: std::net::SocketAddr = source
            .parse()
            .map_err(|_| ChiralError::ProtocolViolation(format!("ED2K source {source} is not a host:port address")))?;

        let data = peer_wire::fetch(addr, fp).await?;
        let (actual_fp, chunk_hashes) = self.store.ingest(&data).await?;
        if actual_fp != fp {
            return Err(ChiralError::IntegrityFailure(format!(
                "ED2K source {source} served content hashing to {actual_fp}, expected {fp}"
            )));
        }
        for index in 0..chunk_hashes.len() as u64 {
            progress(AdapterProgress { fingerprint: fp.to_string(), chunk_index: index, bytes: self.store.chunk_size() as u64 });
        }
        let _ = peer;
        Ok(TransferHandle { fingerprint: fp.to_string(), protocol: Protocol::Ed2k })
    }

    async fn publish(&self, _file_path: &Path) -> ChiralResult<UploadResult> {
        Err(ChiralError::ProtocolViolation("ED2K does not support publish in this core".to_string()))
    }

    async fn start_seeding(&self, _fp: &str) -> ChiralResult<UploadResult> {
        Err(ChiralError::ProtocolViolation("ED2K upload is not supported".to_string()))
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
        Ok(self.sources.lock().unwrap().remove(fp).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> (tempfile::TempDir, Ed2kAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path().to_path_buf(), 256));
        (dir, Ed2kAdapter::new(store))
    }

    #[tokio::test]
    async fn upload_operations_are_rejected() {
        let (_dir, adapter) = adapter();
        assert!(adapter.start_seeding("fp1").await.is_err());
        assert!(adapter.publish(Path::new("/tmp/f")).await.is_err());
    }

    #[tokio::test]
    async fn source_not_a_socket_address_is_a_protocol_violation() {
        let (_dir, adapter) = adapter();
        adapter.register_source("fp1", "not-a-host-port".to_string());
        let result = adapter
            .fetch_from(PeerId::random(), "fp1", std::sync::Arc::new(|_| {}), Path::new("/tmp/out"))
            .await;
        assert!(matches!(result, Err(ChiralError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn fetch_from_a_registered_source_lands_in_the_content_store() {
        let (_dir, adapter) = adapter();
        let payload = b"ed2k payload".to_vec();
        let fp = crate::cas::fingerprint_of(&payload);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_payload = payload.clone();
        let server = tokio::spawn(async move {
            peer_wire::serve_once(&listener, &server_payload).await.unwrap();
        });

        adapter.register_source(&fp, addr.to_string());
        let handle = adapter
            .fetch_from(PeerId::random(), &fp, std::sync::Arc::new(|_| {}), Path::new("/tmp/out"))
            .await
            .unwrap();
        server.await.unwrap();

        assert_eq!(handle.fingerprint, fp);
        assert_eq!(adapter.store.read_full(&fp).await.unwrap(), payload);
    }
}
