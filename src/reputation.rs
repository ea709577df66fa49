//! Peer health & reputation: a rolling window of recent interactions per
//! peer, collapsed into a score used to rank scheduling candidates.

use libp2p::PeerId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const WINDOW_SIZE: usize = 32;
const CONSECUTIVE_FAILURE_DEMOTION: u32 = 3;
const PROXY_LATENCY_THRESHOLD_MS: f64 = 50.0;
const PROXY_MIN_COVERAGE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    ChunkFetch,
    ControlMessage,
    Probe,
}

#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub success: bool,
    pub bytes: u64,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Online,
    Offline,
    Connecting,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct Interaction {
    success: bool,
    bytes: u64,
    duration: Duration,
    at: Instant,
}

struct PeerWindow {
    interactions: VecDeque<Interaction>,
    consecutive_failures: u32,
    last_ok_at: Option<Instant>,
    last_err_at: Option<Instant>,
    status: PeerStatus,
}

impl PeerWindow {
    fn new() -> Self {
        PeerWindow {
            interactions: VecDeque::with_capacity(WINDOW_SIZE),
            consecutive_failures: 0,
            last_ok_at: None,
            last_err_at: None,
            status: PeerStatus::Connecting,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        if self.interactions.len() == WINDOW_SIZE {
            self.interactions.pop_front();
        }
        self.interactions.push_back(Interaction {
            success: outcome.success,
            bytes: outcome.bytes,
            duration: outcome.duration,
            at: Instant::now(),
        });

        if outcome.success {
            self.consecutive_failures = 0;
            self.last_ok_at = Some(Instant::now());
            self.status = PeerStatus::Online;
        } else {
            self.consecutive_failures += 1;
            self.last_err_at = Some(Instant::now());
            if self.consecutive_failures >= CONSECUTIVE_FAILURE_DEMOTION {
                self.status = PeerStatus::Error;
            }
        }
    }

    fn latency_ms(&self) -> f64 {
        if self.interactions.is_empty() {
            return f64::MAX;
        }
        let total: Duration = self.interactions.iter().map(|i| i.duration).sum();
        total.as_secs_f64() * 1000.0 / self.interactions.len() as f64
    }

    fn throughput_bps(&self) -> f64 {
        let successful: Vec<&Interaction> = self.interactions.iter().filter(|i| i.success).collect();
        if successful.is_empty() {
            return 0.0;
        }
        let total_bytes: u64 = successful.iter().map(|i| i.bytes).sum();
        let total_secs: f64 = successful.iter().map(|i| i.duration.as_secs_f64()).sum::<f64>().max(0.001);
        total_bytes as f64 / total_secs
    }

    fn success_rate(&self) -> f64 {
        if self.interactions.is_empty() {
            return 0.0;
        }
        let successes = self.interactions.iter().filter(|i| i.success).count();
        successes as f64 / self.interactions.len() as f64
    }

    fn freshness(&self) -> f64 {
        match self.last_ok_at {
            Some(t) => {
                let age = t.elapsed().as_secs_f64();
                (1.0 - age / 600.0).clamp(0.0, 1.0)
            }
            None => 0.0,
        }
    }

    /// Weighted sum: throughput 0.5, success rate 0.3, freshness 0.2.
    /// Throughput is normalized against a generous 10 MiB/s reference so the
    /// weighted components stay within [0,1].
    fn score(&self) -> f64 {
        let throughput_norm = (self.throughput_bps() / (10.0 * 1024.0 * 1024.0)).min(1.0);
        throughput_norm * 0.5 + self.success_rate() * 0.3 + self.freshness() * 0.2
    }
}

pub struct PeerSnapshot {
    pub peer: PeerId,
    pub score: f64,
    pub latency_ms: f64,
    pub throughput_bps: f64,
    pub status: PeerStatus,
}

/// Owns per-peer rolling metrics; the sole mutator of peer health state.
pub struct ReputationTracker {
    peers: HashMap<PeerId, PeerWindow>,
}

impl ReputationTracker {
    pub fn new() -> Self {
        ReputationTracker { peers: HashMap::new() }
    }

    pub fn record_interaction(&mut self, peer: PeerId, _kind: InteractionKind, outcome: Outcome) {
        self.peers.entry(peer).or_insert_with(PeerWindow::new).record(outcome);
    }

    pub fn status(&self, peer: &PeerId) -> PeerStatus {
        self.peers.get(peer).map(|w| w.status).unwrap_or(PeerStatus::Connecting)
    }

    /// Top-N peers by score, ties broken by lowest latency then most
    /// recent success.
    pub fn snapshot(&self, limit: usize) -> Vec<PeerSnapshot> {
        let mut snapshots: Vec<PeerSnapshot> = self
            .peers
            .iter()
            .map(|(peer, window)| PeerSnapshot {
                peer: *peer,
                score: window.score(),
                latency_ms: window.latency_ms(),
                throughput_bps: window.throughput_bps(),
                status: window.status,
            })
            .collect();

        snapshots.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap()
                .then_with(|| a.latency_ms.partial_cmp(&b.latency_ms).unwrap())
        });
        snapshots.truncate(limit);
        snapshots
    }

    /// True iff any peer's latency is below the proxy-preferred threshold
    /// and the tracker has at least the minimum coverage of known peers.
    pub fn should_use_proxy_routing(&self) -> bool {
        if self.peers.len() < PROXY_MIN_COVERAGE {
            return false;
        }
        self.peers.values().any(|w| w.latency_ms() < PROXY_LATENCY_THRESHOLD_MS)
    }
}

impl Default for ReputationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool, bytes: u64, millis: u64) -> Outcome {
        Outcome { success, bytes, duration: Duration::from_millis(millis) }
    }

    #[test]
    fn three_consecutive_failures_demote_to_error() {
        let mut tracker = ReputationTracker::new();
        let peer = PeerId::random();

        tracker.record_interaction(peer, InteractionKind::ChunkFetch, outcome(true, 1024, 10));
        assert_eq!(tracker.status(&peer), PeerStatus::Online);

        for _ in 0..3 {
            tracker.record_interaction(peer, InteractionKind::ChunkFetch, outcome(false, 0, 10));
        }
        assert_eq!(tracker.status(&peer), PeerStatus::Error);
    }

    #[test]
    fn snapshot_ranks_higher_throughput_first() {
        let mut tracker = ReputationTracker::new();
        let fast = PeerId::random();
        let slow = PeerId::random();

        for _ in 0..5 {
            tracker.record_interaction(fast, InteractionKind::ChunkFetch, outcome(true, 1024 * 1024, 50));
            tracker.record_interaction(slow, InteractionKind::ChunkFetch, outcome(true, 1024, 500));
        }

        let snapshot = tracker.snapshot(2);
        assert_eq!(snapshot[0].peer, fast);
    }

    #[test]
    fn proxy_routing_requires_coverage_and_low_latency() {
        let mut tracker = ReputationTracker::new();
        let peer = PeerId::random();
        tracker.record_interaction(peer, InteractionKind::Probe, outcome(true, 1, 5));
        assert!(!tracker.should_use_proxy_routing());

        for _ in 0..3 {
            let p = PeerId::random();
            tracker.record_interaction(p, InteractionKind::Probe, outcome(true, 1, 5));
        }
        assert!(tracker.should_use_proxy_routing());
    }
}
