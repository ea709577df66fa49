//! Kademlia overlay: peer routing, content provider records, and signed
//! metadata records, driving a real `libp2p::kad::Behaviour` over a TCP/
//! noise/yamux swarm. `KadOverlay` is the policy layer above that swarm —
//! republish scheduling, dedup, signature freshness — that the rest of the
//! core talks to; XOR-distance routing itself lives in `kad::Behaviour`'s
//! k-buckets, not reimplemented here.

use futures::StreamExt as _;
use libp2p::kad::{self, store::MemoryStore, GetProvidersOk, GetRecordOk, QueryResult, Record, RecordKey};
use libp2p::swarm::{NetworkBehaviour, Swarm, SwarmEvent};
use libp2p::{identity, noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, SwarmBuilder};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{ChiralError, ChiralResult};
use crate::signer::Signer;

pub const DEFAULT_REPLICATION_FACTOR: usize = 20;
pub const DEFAULT_T_REPUBLISH: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_T_EXPIRE: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "ChiralBehaviourEvent")]
pub struct ChiralBehaviour {
    pub kad: kad::Behaviour<MemoryStore>,
}

#[derive(Debug)]
pub enum ChiralBehaviourEvent {
    Kad(kad::Event),
}

impl From<kad::Event> for ChiralBehaviourEvent {
    fn from(event: kad::Event) -> Self {
        ChiralBehaviourEvent::Kad(event)
    }
}

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub addresses: Vec<Multiaddr>,
}

/// A provider record: `(fp, peer)`, republished periodically and expiring
/// if not refreshed.
#[derive(Debug, Clone)]
struct ProviderEntry {
    peer: PeerId,
    last_announced: Instant,
}

/// A signed record: carries a monotonic sequence number so readers can
/// reject stale writes.
#[derive(Debug, Clone)]
pub struct SignedRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub sequence: u64,
    pub publisher: PeerId,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub peer_count: usize,
    pub last_bootstrap_at: Option<Instant>,
    pub last_peer_event_at: Option<Instant>,
    pub last_error: Option<String>,
    pub consecutive_bootstrap_failures: u32,
}

/// Owns the real `Swarm<ChiralBehaviour>` plus the republish/dedup/
/// signature-freshness bookkeeping the rest of the core talks to.
pub struct KadOverlay {
    swarm: Swarm<ChiralBehaviour>,
    providers: HashMap<RecordKey, Vec<ProviderEntry>>,
    signed_records: HashMap<Vec<u8>, SignedRecord>,
    known_peers: HashMap<PeerId, PeerRecord>,
    last_bootstrap_at: Option<Instant>,
    last_peer_event_at: Option<Instant>,
    last_error: Option<String>,
    consecutive_bootstrap_failures: u32,
}

impl KadOverlay {
    /// Build the swarm for `keypair` and start listening on `listen_port`
    /// (0 for an ephemeral port).
    pub fn new(keypair: identity::Keypair, listen_port: u16) -> ChiralResult<Self> {
        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(tcp::Config::default(), noise::Config::new, yamux::Config::default)
            .map_err(|e| ChiralError::Config(format!("failed to configure transport: {e}")))?
            .with_behaviour(|key| {
                let peer_id = key.public().to_peer_id();
                let store = MemoryStore::new(peer_id);
                let mut kad = kad::Behaviour::with_config(
                    peer_id,
                    store,
                    kad::Config::new(StreamProtocol::new("/chiral/kad/1.0.0")),
                );
                kad.set_mode(Some(kad::Mode::Server));
                ChiralBehaviour { kad }
            })
            .map_err(|e| ChiralError::Config(format!("failed to configure behaviour: {e}")))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(120)))
            .build();

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{listen_port}")
            .parse()
            .map_err(|e| ChiralError::Config(format!("invalid listen address: {e}")))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| ChiralError::Config(format!("failed to listen: {e}")))?;

        Ok(KadOverlay {
            swarm,
            providers: HashMap::new(),
            signed_records: HashMap::new(),
            known_peers: HashMap::new(),
            last_bootstrap_at: None,
            last_peer_event_at: None,
            last_error: None,
            consecutive_bootstrap_failures: 0,
        })
    }

    pub fn local_peer_id(&self) -> PeerId {
        *self.swarm.local_peer_id()
    }

    /// Resolve bootstrap DNS names to multiaddresses, dial each one, and
    /// kick off a routing-table bootstrap. Failures are surfaced via the
    /// returned error but are never treated as fatal by callers; the
    /// bootstrap failure counter is bumped instead.
    pub async fn resolve_bootstrap(&mut self, domains: &[String]) -> ChiralResult<Vec<Multiaddr>> {
        let mut resolved = Vec::new();
        for domain in domains {
            match tokio::net::lookup_host((domain.as_str(), 4001)).await {
                Ok(addrs) => {
                    for addr in addrs {
                        if let Ok(multiaddr) = format!("/ip4/{}/tcp/4001", addr.ip())
                            .parse::<Multiaddr>()
                        {
                            resolved.push(multiaddr);
                        }
                    }
                }
                Err(e) => {
                    self.consecutive_bootstrap_failures += 1;
                    self.last_error = Some(format!("bootstrap DNS resolution failed for {domain}: {e}"));
                }
            }
        }
        for addr in &resolved {
            let _ = self.swarm.dial(addr.clone());
        }
        if !resolved.is_empty() {
            self.consecutive_bootstrap_failures = 0;
            self.last_bootstrap_at = Some(Instant::now());
            let _ = self.swarm.behaviour_mut().kad.bootstrap();
        }
        Ok(resolved)
    }

    pub fn record_peer_event(&mut self, peer: PeerRecord) {
        self.last_peer_event_at = Some(Instant::now());
        for addr in &peer.addresses {
            self.swarm.behaviour_mut().kad.add_address(&peer.peer_id, addr.clone());
        }
        self.known_peers.insert(peer.peer_id, peer);
    }

    /// Announce this node as a provider for `fp` in the real DHT, and
    /// refresh the local republish-window mirror used by `needs_republish`.
    /// Re-announcing before `T_republish` has elapsed only refreshes
    /// `last_announced`.
    pub fn announce_provider(&mut self, fp: &[u8]) -> ChiralResult<()> {
        let key = RecordKey::new(&fp);
        self.swarm
            .behaviour_mut()
            .kad
            .start_providing(key.clone())
            .map_err(|e| ChiralError::Generic(format!("failed to start providing: {e}")))?;

        let local = self.local_peer_id();
        let entries = self.providers.entry(key).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| e.peer == local) {
            existing.last_announced = Instant::now();
        } else {
            entries.push(ProviderEntry { peer: local, last_announced: Instant::now() });
        }
        Ok(())
    }

    /// Query the DHT for providers of `fp`, merging the result with the
    /// local republish-window mirror and pruning mirror entries stale
    /// beyond `t_expire`. Bounded by `DEFAULT_QUERY_TIMEOUT`.
    pub async fn find_providers(&mut self, fp: &[u8], t_expire: Duration) -> Vec<PeerId> {
        let key = RecordKey::new(&fp);
        let query_id = self.swarm.behaviour_mut().kad.get_providers(key.clone());

        let mut found: Vec<PeerId> = Vec::new();
        let deadline = tokio::time::Instant::now() + DEFAULT_QUERY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            let next = tokio::time::timeout(remaining, self.swarm.select_next_some()).await;
            match next {
                Ok(SwarmEvent::Behaviour(ChiralBehaviourEvent::Kad(kad::Event::OutboundQueryProgressed {
                    id,
                    result: QueryResult::GetProviders(result),
                    ..
                }))) if id == query_id => match result {
                    Ok(GetProvidersOk::FoundProviders { providers, .. }) => found.extend(providers),
                    Ok(GetProvidersOk::FinishedWithNoAdditionalRecord { .. }) => break,
                    Err(e) => {
                        self.last_error = Some(format!("get_providers failed: {e:?}"));
                        break;
                    }
                },
                Ok(_) => continue,
                Err(_) => break, // timed out waiting on the swarm
            }
        }

        if let Some(entries) = self.providers.get_mut(&key) {
            entries.retain(|e| e.last_announced.elapsed() < t_expire);
            for entry in entries.iter() {
                if !found.contains(&entry.peer) {
                    found.push(entry.peer);
                }
            }
        }
        found
    }

    /// Whether `fp`'s providers need republishing (older than `T_republish`).
    pub fn needs_republish(&self, fp: &[u8], t_republish: Duration) -> bool {
        let key = RecordKey::new(&fp);
        let local = self.local_peer_id();
        match self.providers.get(&key) {
            Some(entries) => entries
                .iter()
                .find(|e| e.peer == local)
                .map(|e| e.last_announced.elapsed() >= t_republish)
                .unwrap_or(true),
            None => true,
        }
    }

    /// Put a signed record into both the real DHT and the local cache,
    /// rejecting it if an existing record for the same key has a sequence
    /// number that is not strictly greater.
    pub fn put_record(&mut self, record: SignedRecord) -> ChiralResult<()> {
        if let Some(existing) = self.signed_records.get(&record.key) {
            if record.sequence <= existing.sequence {
                return Ok(()); // silently ignored per the monotonic sequence rule
            }
        }

        let kad_record = to_kad_record(&record);
        self.swarm
            .behaviour_mut()
            .kad
            .put_record(kad_record, kad::Quorum::One)
            .map_err(|e| ChiralError::Generic(format!("failed to put record: {e}")))?;

        self.signed_records.insert(record.key.clone(), record);
        Ok(())
    }

    pub fn get_record(&self, key: &[u8]) -> Option<&SignedRecord> {
        self.signed_records.get(key)
    }

    /// Query the DHT directly for a raw record not already present in the
    /// local signed-record cache. Bounded by `DEFAULT_QUERY_TIMEOUT`.
    pub async fn fetch_record(&mut self, key: &[u8]) -> Option<Record> {
        let record_key = RecordKey::new(&key);
        let query_id = self.swarm.behaviour_mut().kad.get_record(record_key);

        let deadline = tokio::time::Instant::now() + DEFAULT_QUERY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let next = tokio::time::timeout(remaining, self.swarm.select_next_some()).await;
            match next {
                Ok(SwarmEvent::Behaviour(ChiralBehaviourEvent::Kad(kad::Event::OutboundQueryProgressed {
                    id,
                    result: QueryResult::GetRecord(result),
                    ..
                }))) if id == query_id => {
                    return match result {
                        Ok(GetRecordOk::FoundRecord(peer_record)) => Some(peer_record.record),
                        Ok(GetRecordOk::FinishedWithNoAdditionalRecord { .. }) => None,
                        Err(e) => {
                            self.last_error = Some(format!("get_record failed: {e:?}"));
                            None
                        }
                    };
                }
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Validate a record's signature before accepting it from a remote peer.
    pub fn validate_incoming(
        &self,
        record: &SignedRecord,
        publisher_public_key: &libp2p::identity::PublicKey,
    ) -> ChiralResult<()> {
        let mut payload = record.key.clone();
        payload.extend_from_slice(&record.value);
        payload.extend_from_slice(&record.sequence.to_be_bytes());
        payload.extend_from_slice(record.publisher.to_bytes().as_slice());

        if !crate::signer::verify(publisher_public_key, &payload, &record.signature) {
            return Err(ChiralError::Unauthorized("record signature verification failed".to_string()));
        }
        Ok(())
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            peer_count: self.known_peers.len(),
            last_bootstrap_at: self.last_bootstrap_at,
            last_peer_event_at: self.last_peer_event_at,
            last_error: self.last_error.clone(),
            consecutive_bootstrap_failures: self.consecutive_bootstrap_failures,
        }
    }
}

/// Build the payload signed over a record: `(key, value, sequence, publisher)`.
pub fn signing_payload(key: &[u8], value: &[u8], sequence: u64, publisher: &PeerId) -> Vec<u8> {
    let mut payload = key.to_vec();
    payload.extend_from_slice(value);
    payload.extend_from_slice(&sequence.to_be_bytes());
    payload.extend_from_slice(publisher.to_bytes().as_slice());
    payload
}

/// Sign and construct a `SignedRecord` using the narrow signer interface.
pub fn sign_record(
    signer: &dyn Signer,
    publisher: PeerId,
    key: Vec<u8>,
    value: Vec<u8>,
    sequence: u64,
) -> ChiralResult<SignedRecord> {
    let payload = signing_payload(&key, &value, sequence, &publisher);
    let signature = signer.sign(&payload)?;
    Ok(SignedRecord { key, value, sequence, publisher, signature })
}

/// Convert a `SignedRecord` into the underlying `libp2p::kad::Record` for
/// insertion into the DHT store.
pub fn to_kad_record(record: &SignedRecord) -> Record {
    Record {
        key: RecordKey::new(&record.key),
        value: record.value.clone(),
        publisher: Some(record.publisher),
        expires: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalSigner;

    fn overlay() -> KadOverlay {
        KadOverlay::new(identity::Keypair::generate_ed25519(), 0).unwrap()
    }

    #[tokio::test]
    async fn announce_and_find_providers_round_trips() {
        let mut o = overlay();
        let peer_id = o.local_peer_id();
        o.announce_provider(b"fingerprint-123").unwrap();

        let providers = o.find_providers(b"fingerprint-123", DEFAULT_T_EXPIRE).await;
        assert!(providers.contains(&peer_id));
    }

    #[test]
    fn expired_providers_are_pruned_from_the_mirror() {
        let mut o = overlay();
        o.announce_provider(b"fp").unwrap();
        assert!(o.needs_republish(b"fp", Duration::from_nanos(1)));
    }

    #[test]
    fn lower_sequence_record_is_ignored() {
        let mut o = overlay();
        let peer_id = o.local_peer_id();
        let signer = LocalSigner::generate();

        let newer = sign_record(&signer, peer_id, b"k".to_vec(), b"v2".to_vec(), 2).unwrap();
        o.put_record(newer).unwrap();

        let older = sign_record(&signer, peer_id, b"k".to_vec(), b"v1".to_vec(), 1).unwrap();
        o.put_record(older).unwrap();

        assert_eq!(o.get_record(b"k").unwrap().value, b"v2".to_vec());
    }

    #[test]
    fn signature_validates_against_publisher_key() {
        let o = overlay();
        let peer_id = o.local_peer_id();
        let keypair = libp2p::identity::Keypair::generate_ed25519();
        let signer = LocalSigner::from_keypair(keypair.clone());

        let record = sign_record(&signer, peer_id, b"k".to_vec(), b"v".to_vec(), 1).unwrap();
        assert!(o.validate_incoming(&record, &keypair.public()).is_ok());
    }
}
