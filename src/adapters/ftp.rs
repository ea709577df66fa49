//! FTP adapter: out-of-band URL and credentials, passive-mode retrieval.
//! Verifies the remote size before transferring and the content hash after.

use async_trait::async_trait;
use libp2p::PeerId;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::ftp_client;
use super::{AdapterCapability, AdapterProgress, Protocol, ProgressCallback, TransferHandle, UploadResult};
use crate::cas::ContentStore;
use crate::error::{ChiralError, ChiralResult};
use crate::kad::PeerRecord;

#[derive(Debug, Clone)]
pub struct FtpSource {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub expected_size: u64,
}

/// `ftp://host[:port]/path` split into connection parameters. No query
/// string or userinfo-in-URL support — credentials travel separately on
/// `FtpSource`.
fn parse_ftp_url(url: &str) -> ChiralResult<(String, u16, String)> {
    let rest = url
        .strip_prefix("ftp://")
        .ok_or_else(|| ChiralError::ProtocolViolation(format!("not an ftp:// URL: {url}")))?;
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let (host, port) = match authority.split_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().map_err(|_| ChiralError::ProtocolViolation(format!("bad port in {url}")))?),
        None => (authority.to_string(), 21),
    };
    Ok((host, port, format!("/{path}")))
}

pub struct FtpAdapter {
    sources: Mutex<HashMap<String, FtpSource>>,
    store: Arc<ContentStore>,
}

impl FtpAdapter {
    pub fn new(store: Arc<ContentStore>) -> Self {
        FtpAdapter { sources: Mutex::new(HashMap::new()), store }
    }

    pub fn register_source(&self, fp: &str, source: FtpSource) {
        self.sources.lock().unwrap().insert(fp.to_string(), source);
    }
}

#[async_trait]
impl AdapterCapability for FtpAdapter {
    fn name(&self) -> Protocol {
        Protocol::Ftp
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
                .cloned()
                .ok_or_else(|| ChiralError::NotFound(format!("no FTP source registered for {fp}")))?
        };
        if source.expected_size == 0 {
            return Err(ChiralError::ProtocolViolation("remote reported zero size on STAT/SIZE".to_string()));
        }

        let (host, port, path) = parse_ftp_url(&source.url)?;
        let data = ftp_client::retrieve(&host, port, source.username.as_deref(), source.password.as_deref(), &path).await?;
        if data.len() as u64 != source.expected_size {
            return Err(ChiralError::IntegrityFailure(format!(
                "FTP source {} served {} bytes, expected {}",
                source.url,
                data.len(),
                source.expected_size
            )));
        }

        let (actual_fp, chunk_hashes) = self.store.ingest(&data).await?;
        if actual_fp != fp {
            return Err(ChiralError::IntegrityFailure(format!(
                "FTP source {} served content hashing to {actual_fp}, expected {fp}",
                source.url
            )));
        }

        for index in 0..chunk_hashes.len() as u64 {
            progress(AdapterProgress { fingerprint: fp.to_string(), chunk_index: index, bytes: self.store.chunk_size() as u64 });
        }
        let _ = peer;
        Ok(TransferHandle { fingerprint: fp.to_string(), protocol: Protocol::Ftp })
    }

    async fn publish(&self, _file_path: &Path) -> ChiralResult<UploadResult> {
        Err(ChiralError::ProtocolViolation("FTP is a download-only source in this core".to_string()))
    }

    async fn start_seeding(&self, _fp: &str) -> ChiralResult<UploadResult> {
        Err(ChiralError::ProtocolViolation("FTP adapter does not serve uploads".to_string()))
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

    fn adapter() -> (tempfile::TempDir, FtpAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ContentStore::new(dir.path().to_path_buf(), 256));
        (dir, FtpAdapter::new(store))
    }

    #[test]
    fn parse_ftp_url_splits_host_port_and_path() {
        assert_eq!(parse_ftp_url("ftp://example.com/file.bin").unwrap(), ("example.com".to_string(), 21, "/file.bin".to_string()));
        assert_eq!(parse_ftp_url("ftp://example.com:2121/a/b").unwrap(), ("example.com".to_string(), 2121, "/a/b".to_string()));
    }

    #[tokio::test]
    async fn rejects_sources_reporting_zero_size() {
        let (_dir, adapter) = adapter();
        adapter.register_source(
            "fp1",
            FtpSource { url: "ftp://host/file".to_string(), username: None, password: None, expected_size: 0 },
        );

        let result = adapter
            .fetch_from(PeerId::random(), "fp1", std::sync::Arc::new(|_| {}), Path::new("/tmp/out"))
            .await;
        assert!(matches!(result, Err(ChiralError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn fetch_without_registered_source_is_not_found() {
        let (_dir, adapter) = adapter();
        let result = adapter
            .fetch_from(PeerId::random(), "fp1", std::sync::Arc::new(|_| {}), Path::new("/tmp/out"))
            .await;
        assert!(matches!(result, Err(ChiralError::NotFound(_))));
    }
}
