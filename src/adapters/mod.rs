//! Protocol adapters: per-transport downloaders and seeders behind one
//! capability set. A tagged enum, not dynamic dispatch by name string —
//! lookup is by variant, matching the redesign away from stringly-typed
//! adapter registries.

pub mod bittorrent;
pub mod ed2k;
pub mod ftp;
mod ftp_client;
pub mod http;
pub mod peer_wire;
pub mod webrtc;

use async_trait::async_trait;
use libp2p::PeerId;
use std::path::Path;

use crate::error::ChiralResult;
use crate::kad::PeerRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    WebRtc,
    BitTorrent,
    Http,
    Ftp,
    Ed2k,
}

/// A running fetch; adapters keep a handle alive and poll it for progress.
pub struct TransferHandle {
    pub fingerprint: String,
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub fingerprint: String,
    pub announced: bool,
}

/// Normalized progress, translated from adapter-native vocabulary at the
/// boundary — TE never sees adapter-specific event types.
#[derive(Debug, Clone)]
pub struct AdapterProgress {
    pub fingerprint: String,
    pub chunk_index: u64,
    pub bytes: u64,
}

pub type ProgressCallback = std::sync::Arc<dyn Fn(AdapterProgress) + Send + Sync>;

/// Common capability set every transport-specific adapter implements.
#[async_trait]
pub trait AdapterCapability: Send + Sync {
    fn name(&self) -> Protocol;
    async fn peers_serving(&self, fp: &str) -> ChiralResult<Vec<PeerRecord>>;
    async fn fetch_from(
        &self,
        peer: PeerId,
        fp: &str,
        progress: ProgressCallback,
        output_path: &Path,
    ) -> ChiralResult<TransferHandle>;
    async fn publish(&self, file_path: &Path) -> ChiralResult<UploadResult>;
    async fn start_seeding(&self, fp: &str) -> ChiralResult<UploadResult>;
    async fn stop_seeding(&self, fp: &str) -> ChiralResult<bool>;
    async fn pause(&self, fp: &str) -> ChiralResult<bool>;
    async fn resume(&self, fp: &str) -> ChiralResult<bool>;
    async fn cancel(&self, fp: &str) -> ChiralResult<bool>;
}

/// A tagged sum type over the five adapters, so the transfer engine can
/// hold a homogeneous collection without dynamic dispatch by name.
pub enum Adapter {
    WebRtc(webrtc::WebRtcAdapter),
    BitTorrent(bittorrent::BitTorrentAdapter),
    Http(http::HttpAdapter),
    Ftp(ftp::FtpAdapter),
    Ed2k(ed2k::Ed2kAdapter),
}

impl Adapter {
    pub fn protocol(&self) -> Protocol {
        match self {
            Adapter::WebRtc(_) => Protocol::WebRtc,
            Adapter::BitTorrent(_) => Protocol::BitTorrent,
            Adapter::Http(_) => Protocol::Http,
            Adapter::Ftp(_) => Protocol::Ftp,
            Adapter::Ed2k(_) => Protocol::Ed2k,
        }
    }

    pub fn as_capability(&self) -> &dyn AdapterCapability {
        match self {
            Adapter::WebRtc(a) => a,
            Adapter::BitTorrent(a) => a,
            Adapter::Http(a) => a,
            Adapter::Ftp(a) => a,
            Adapter::Ed2k(a) => a,
        }
    }
}
