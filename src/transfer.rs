//! Transfer Engine: owns a transfer's lifecycle end to end — chunk
//! scheduling across adapters, checkpointing, reassembly, and a single
//! normalized progress event regardless of which adapter delivered bytes.

use libp2p::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

use crate::adapters::Protocol;
use crate::cas::ContentStore;
use crate::error::{ChiralError, ChiralResult};
use crate::reputation::ReputationTracker;

pub const DEFAULT_DESIRED_PARALLELISM: usize = 4;
pub const DEFAULT_PER_PEER_CAP: usize = 2;
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CHECKPOINT_CHUNK_COUNT: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Queued,
    Started,
    Downloading,
    Paused,
    Completed,
    Failed,
    Canceled,
}

#[derive(Debug, Clone)]
pub enum FailureReason {
    Retryable(String),
    Integrity(String),
}

/// One normalized progress event, emitted regardless of adapter.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub transfer_id: String,
    pub downloaded: u64,
    pub total: u64,
    pub percentage: f64,
    pub down_bps: f64,
    pub up_bps: f64,
    pub active_sources: usize,
    pub eta: Option<Duration>,
    pub state: TransferState,
}

/// Persisted resume state for a transfer. Peer ids are stored as their
/// string form rather than `PeerId` directly so the type derives `Serialize`
/// cleanly; `taken_at_unix_secs` is wall-clock (`Instant` has no stable
/// on-disk representation) so it survives a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub fingerprint: String,
    pub bitmap: HashSet<u64>,
    pub bytes: u64,
    pub sources: Vec<String>,
    pub taken_at_unix_secs: u64,
}

struct ChunkAssignment {
    peer: PeerId,
    protocol: Protocol,
    attempts: usize,
    assigned_at: Instant,
}

/// A single download, owned exclusively by the engine. Adapters submit
/// events to it through `record_chunk_*`; they never mutate its fields
/// directly.
pub struct Transfer {
    pub id: String,
    pub fingerprint: String,
    pub name: String,
    pub expected_size: u64,
    pub chunk_size: usize,
    pub total_chunks: u64,
    pub state: TransferState,
    bitmap: HashSet<u64>,
    downloaded: u64,
    in_flight: HashMap<u64, ChunkAssignment>,
    sources: HashSet<PeerId>,
    started_at: Option<Instant>,
    last_checkpoint_at: Option<Instant>,
    chunks_since_checkpoint: usize,
    keep_partial_on_cancel: bool,
}

impl Transfer {
    pub fn new(id: String, fingerprint: String, name: String, expected_size: u64, chunk_size: usize) -> Self {
        let total_chunks = if expected_size == 0 {
            0
        } else {
            (expected_size + chunk_size as u64 - 1) / chunk_size as u64
        };
        Transfer {
            id,
            fingerprint,
            name,
            expected_size,
            chunk_size,
            total_chunks,
            state: TransferState::Queued,
            bitmap: HashSet::new(),
            downloaded: 0,
            in_flight: HashMap::new(),
            sources: HashSet::new(),
            started_at: None,
            last_checkpoint_at: None,
            chunks_since_checkpoint: 0,
            keep_partial_on_cancel: true,
        }
    }

    pub fn restore_from_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.bitmap = checkpoint.bitmap;
        self.downloaded = checkpoint.bytes;
        self.sources = checkpoint.sources.iter().filter_map(|s| s.parse().ok()).collect();
        self.state = TransferState::Paused;
    }

    /// Write a checkpoint for this transfer to `<store_root>/transfers/<id>.ckpt`.
    pub async fn persist_checkpoint(&mut self, store_root: &std::path::Path) -> ChiralResult<()> {
        let checkpoint = self.checkpoint();
        save_checkpoint(store_root, &self.id, &checkpoint).await
    }

    /// Restore this transfer's bitmap/sources from its on-disk checkpoint,
    /// if one exists. Returns `false` (and leaves state untouched) when no
    /// checkpoint is present, e.g. a transfer started fresh.
    pub async fn restore_from_disk(&mut self, store_root: &std::path::Path) -> ChiralResult<bool> {
        match load_checkpoint(store_root, &self.id).await? {
            Some(checkpoint) => {
                self.restore_from_checkpoint(checkpoint);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn start(&mut self) {
        if self.state == TransferState::Queued {
            self.state = TransferState::Started;
            self.started_at = Some(Instant::now());
        }
    }

    /// A chunk was assigned to `peer` via `protocol`. Transitions
    /// `Started -> Downloading` on the first write.
    pub fn assign_chunk(&mut self, index: u64, peer: PeerId, protocol: Protocol) {
        self.in_flight.insert(index, ChunkAssignment { peer, protocol, attempts: 1, assigned_at: Instant::now() });
        self.sources.insert(peer);
    }

    /// Record a successfully verified chunk write. The byte accounting
    /// invariant (`sum of bitmap bytes == downloaded`) is maintained here.
    pub fn record_chunk_success(&mut self, index: u64, bytes: u64) {
        if self.state == TransferState::Started {
            self.state = TransferState::Downloading;
        }
        self.in_flight.remove(&index);
        if self.bitmap.insert(index) {
            self.downloaded += bytes;
        }
        self.chunks_since_checkpoint += 1;
    }

    /// A chunk request failed or timed out: credit the peer with a
    /// failure (via `reputation`), re-queue the chunk, track the attempt
    /// count, and surface `failed` once `max_attempts` is exhausted.
    pub fn record_chunk_failure(
        &mut self,
        index: u64,
        reputation: &mut ReputationTracker,
        outcome_kind: crate::reputation::InteractionKind,
        max_attempts: usize,
    ) -> ChiralResult<()> {
        let attempts = self
            .in_flight
            .get(&index)
            .map(|a| a.attempts)
            .unwrap_or(0);

        if let Some(assignment) = self.in_flight.remove(&index) {
            reputation.record_interaction(
                assignment.peer,
                outcome_kind,
                crate::reputation::Outcome { success: false, bytes: 0, duration: assignment.assigned_at.elapsed() },
            );
        }

        if attempts >= max_attempts {
            self.state = TransferState::Failed;
            return Err(ChiralError::NetworkUnreachable(format!(
                "chunk {index} of {} failed after {attempts} attempts",
                self.fingerprint
            )));
        }
        Ok(())
    }

    pub fn missing_chunks(&self) -> Vec<u64> {
        (0..self.total_chunks)
            .filter(|i| !self.bitmap.contains(i) && !self.in_flight.contains_key(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.bitmap.len() as u64 == self.total_chunks
    }

    /// Finalize via CAS, verifying the full-file hash. Only on success does
    /// the transfer transition to `completed`.
    pub async fn try_complete(&mut self, store: &ContentStore, chunk_hashes: &[String]) -> ChiralResult<()> {
        if !self.is_complete() {
            return Err(ChiralError::ResourceExhausted("bitmap is not yet full".to_string()));
        }
        match store.finalize(&self.fingerprint, chunk_hashes).await {
            Ok(()) => {
                self.state = TransferState::Completed;
                Ok(())
            }
            Err(ChiralError::IntegrityFailure(msg)) => {
                self.state = TransferState::Failed;
                Err(ChiralError::IntegrityFailure(msg))
            }
            Err(e) => Err(e),
        }
    }

    pub fn pause(&mut self) {
        if self.state == TransferState::Downloading {
            // Discard partial chunks currently in flight; they're re-requested
            // from the current offset on resume.
            self.in_flight.clear();
            self.state = TransferState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == TransferState::Paused {
            self.state = TransferState::Downloading;
        }
    }

    pub fn cancel(&mut self, keep_partial: bool) {
        self.keep_partial_on_cancel = keep_partial;
        self.in_flight.clear();
        self.sources.clear();
        self.state = TransferState::Canceled;
    }

    pub fn keeps_partial(&self) -> bool {
        self.keep_partial_on_cancel
    }

    pub fn should_checkpoint(&self, interval: Duration, chunk_count_trigger: usize) -> bool {
        let elapsed_ok = self.last_checkpoint_at.map(|t| t.elapsed() >= interval).unwrap_or(true);
        elapsed_ok || self.chunks_since_checkpoint >= chunk_count_trigger
    }

    pub fn checkpoint(&mut self) -> Checkpoint {
        self.last_checkpoint_at = Some(Instant::now());
        self.chunks_since_checkpoint = 0;
        Checkpoint {
            version: 1,
            fingerprint: self.fingerprint.clone(),
            bitmap: self.bitmap.clone(),
            bytes: self.downloaded,
            sources: self.sources.iter().map(|p| p.to_string()).collect(),
            taken_at_unix_secs: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
        }
    }

    pub fn progress_event(&self, down_bps: f64, up_bps: f64) -> TransferEvent {
        let percentage = if self.expected_size == 0 {
            100.0
        } else {
            self.downloaded as f64 / self.expected_size as f64 * 100.0
        };
        let eta = if down_bps > 0.0 && self.downloaded < self.expected_size {
            Some(Duration::from_secs_f64((self.expected_size - self.downloaded) as f64 / down_bps))
        } else {
            None
        };
        TransferEvent {
            transfer_id: self.id.clone(),
            downloaded: self.downloaded,
            total: self.expected_size,
            percentage,
            down_bps,
            up_bps,
            active_sources: self.sources.len(),
            eta,
            state: self.state,
        }
    }
}

/// Ranks missing chunks against idle, healthy peers; callers feed the
/// result to the relevant adapter's `fetch_from`.
pub struct Scheduler {
    pub desired_parallelism: usize,
    pub per_peer_cap: usize,
}

impl Scheduler {
    pub fn new(desired_parallelism: usize, per_peer_cap: usize) -> Self {
        Scheduler { desired_parallelism, per_peer_cap }
    }

    /// Assign as many missing chunks as `desired_parallelism` allows,
    /// respecting each peer's cap, ranking candidates by reputation score
    /// and breaking ties by earliest chunk index.
    pub fn plan(
        &self,
        missing: &[u64],
        candidates: &[(PeerId, Protocol)],
        reputation: &ReputationTracker,
        in_flight_per_peer: &HashMap<PeerId, usize>,
    ) -> Vec<(u64, PeerId, Protocol)> {
        let mut ranked: Vec<&(PeerId, Protocol)> = candidates.iter().collect();
        let scores: HashMap<PeerId, f64> = reputation
            .snapshot(candidates.len().max(1))
            .into_iter()
            .map(|s| (s.peer, s.score))
            .collect();
        ranked.sort_by(|a, b| {
            let score_a = scores.get(&a.0).copied().unwrap_or(0.0);
            let score_b = scores.get(&b.0).copied().unwrap_or(0.0);
            score_b.partial_cmp(&score_a).unwrap()
        });

        let mut plan = Vec::new();
        let mut used: HashMap<PeerId, usize> = in_flight_per_peer.clone();

        for &index in missing.iter().take(self.desired_parallelism) {
            if let Some((peer, protocol)) = ranked.iter().find(|(p, _)| {
                *used.get(p).unwrap_or(&0) < self.per_peer_cap
            }) {
                plan.push((index, *peer, *protocol));
                *used.entry(*peer).or_insert(0) += 1;
            }
        }
        plan
    }
}

pub fn checkpoint_path(store_root: &std::path::Path, transfer_id: &str) -> PathBuf {
    store_root.join("transfers").join(format!("{transfer_id}.ckpt"))
}

/// Bincode-encode `checkpoint` and write it atomically to its checkpoint
/// path under `store_root`.
pub async fn save_checkpoint(
    store_root: &std::path::Path,
    transfer_id: &str,
    checkpoint: &Checkpoint,
) -> ChiralResult<()> {
    let path = checkpoint_path(store_root, transfer_id);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let encoded = bincode::serialize(checkpoint)
        .map_err(|e| ChiralError::Generic(format!("failed to encode checkpoint: {e}")))?;

    let tmp = path.with_extension("ckpt.tmp");
    {
        let mut f = tokio::fs::File::create(&tmp).await?;
        f.write_all(&encoded).await?;
        f.flush().await?;
    }
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

/// Read and decode a transfer's checkpoint from disk, if one exists.
pub async fn load_checkpoint(store_root: &std::path::Path, transfer_id: &str) -> ChiralResult<Option<Checkpoint>> {
    let path = checkpoint_path(store_root, transfer_id);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let checkpoint = bincode::deserialize(&bytes)
                .map_err(|e| ChiralError::Generic(format!("corrupt checkpoint at {path:?}: {e}")))?;
            Ok(Some(checkpoint))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ChiralError::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reputation::{InteractionKind, Outcome};

    fn peer() -> PeerId {
        PeerId::random()
    }

    #[test]
    fn downloaded_equals_sum_of_bitmap_bytes() {
        let mut t = Transfer::new("t1".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        t.start();
        t.assign_chunk(0, peer(), Protocol::Http);
        t.record_chunk_success(0, 256);
        t.assign_chunk(1, peer(), Protocol::Http);
        t.record_chunk_success(1, 256);

        assert_eq!(t.downloaded, 512);
        assert_eq!(t.state, TransferState::Downloading);
    }

    #[test]
    fn duplicate_chunk_success_does_not_double_count() {
        let mut t = Transfer::new("t1".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        t.record_chunk_success(0, 256);
        t.record_chunk_success(0, 256);
        assert_eq!(t.downloaded, 256);
    }

    #[test]
    fn pause_then_resume_keeps_downloaded_non_decreasing() {
        let mut t = Transfer::new("t1".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        t.start();
        t.record_chunk_success(0, 256);
        t.state = TransferState::Downloading;
        let before = t.downloaded;
        t.pause();
        t.resume();
        assert!(t.downloaded >= before);
        assert!(t.in_flight.is_empty());
    }

    #[test]
    fn failure_after_max_attempts_fails_the_transfer() {
        let mut t = Transfer::new("t1".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        let mut reputation = ReputationTracker::new();
        let p = peer();
        t.assign_chunk(0, p, Protocol::Http);
        if let Some(a) = t.in_flight.get_mut(&0) {
            a.attempts = 5;
        }
        let result = t.record_chunk_failure(0, &mut reputation, InteractionKind::ChunkFetch, 5);
        assert!(result.is_err());
        assert_eq!(t.state, TransferState::Failed);
    }

    #[test]
    fn cancel_clears_in_flight_and_sources() {
        let mut t = Transfer::new("t1".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        t.assign_chunk(0, peer(), Protocol::Http);
        t.cancel(true);
        assert_eq!(t.state, TransferState::Canceled);
        assert!(t.in_flight.is_empty());
        assert!(t.sources.is_empty());
    }

    #[test]
    fn scheduler_respects_per_peer_cap() {
        let scheduler = Scheduler::new(4, 2);
        let reputation = ReputationTracker::new();
        let p1 = peer();
        let candidates = vec![(p1, Protocol::Http)];
        let missing = vec![0, 1, 2, 3];
        let mut in_flight = HashMap::new();
        in_flight.insert(p1, 2);

        let plan = scheduler.plan(&missing, &candidates, &reputation, &in_flight);
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn empty_file_completes_with_zero_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path().to_path_buf(), 256 * 1024);
        let (fingerprint, hashes) = store.ingest(&[]).await.unwrap();

        let mut t = Transfer::new("t1".to_string(), fingerprint.clone(), "empty".to_string(), 0, 256 * 1024);
        assert!(t.is_complete());
        t.try_complete(&store, &hashes).await.unwrap();
        assert_eq!(t.state, TransferState::Completed);
    }

    #[tokio::test]
    async fn checkpoint_survives_a_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = Transfer::new("t3".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        t.start();
        t.assign_chunk(0, peer(), Protocol::Http);
        t.record_chunk_success(0, 256);
        t.persist_checkpoint(dir.path()).await.unwrap();

        assert!(checkpoint_path(dir.path(), "t3").exists());

        let mut restarted = Transfer::new("t3".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        let restored = restarted.restore_from_disk(dir.path()).await.unwrap();
        assert!(restored);
        assert_eq!(restarted.downloaded, 256);
        assert_eq!(restarted.missing_chunks().len(), t.missing_chunks().len());
    }

    #[tokio::test]
    async fn restore_from_disk_is_false_without_a_prior_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = Transfer::new("t4".to_string(), "fp".to_string(), "file".to_string(), 1024, 256);
        assert!(!t.restore_from_disk(dir.path()).await.unwrap());
    }
}
