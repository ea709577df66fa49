//! NAT traversal: reachability classification, a bounded relay reservation
//! cache, transport preference, and hole-punch coordination. Grounded in the
//! same candidate/reservation bookkeeping a Kademlia relay manager uses, cut
//! down to what the transfer engine needs to pick a transport per peer.

use libp2p::{Multiaddr, PeerId};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::{ChiralError, ChiralResult};

const DEFAULT_MAX_RELAY_RESERVATIONS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Public,
    BehindNat,
    Relayed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportKind {
    DirectTcp,
    DirectQuic,
    Relayed,
}

/// Preference order used when dialing a peer: direct TCP, then direct
/// QUIC/UDP, then relayed as the fallback.
pub const TRANSPORT_PREFERENCE: [TransportKind; 3] =
    [TransportKind::DirectTcp, TransportKind::DirectQuic, TransportKind::Relayed];

#[derive(Debug)]
pub struct DialOutcome {
    pub reachability: Reachability,
    pub transport_used: TransportKind,
    pub rtt: Duration,
}

struct RelayReservation {
    relay_peer: PeerId,
    relay_addr: Multiaddr,
}

/// Owns local reachability classification and the relay reservation cache.
/// Never advertises as a content provider while acting purely as a
/// bootstrap relay for others.
pub struct NatTraversal {
    reachability: Reachability,
    relay_reservations: LruCache<PeerId, RelayReservation>,
    socks5_proxy: Option<String>,
    acting_as_pure_relay: bool,
}

impl NatTraversal {
    pub fn new(max_relay_reservations: usize, socks5_proxy: Option<String>) -> Self {
        let cap = NonZeroUsize::new(max_relay_reservations.max(1))
            .unwrap_or(NonZeroUsize::new(DEFAULT_MAX_RELAY_RESERVATIONS).unwrap());
        NatTraversal {
            reachability: Reachability::BehindNat,
            relay_reservations: LruCache::new(cap),
            socks5_proxy,
            acting_as_pure_relay: false,
        }
    }

    /// Reclassify local reachability from an external address observation
    /// (from libp2p identify) and the current count of held reservations.
    pub fn observe_external_address(&mut self, confirmed_public: bool) {
        self.reachability = if confirmed_public {
            Reachability::Public
        } else if !self.relay_reservations.is_empty() {
            Reachability::Relayed
        } else {
            Reachability::BehindNat
        };
    }

    pub fn reachability(&self) -> Reachability {
        self.reachability
    }

    pub fn set_pure_relay_mode(&mut self, pure_relay: bool) {
        self.acting_as_pure_relay = pure_relay;
    }

    /// Whether this node should announce itself as a content provider. A
    /// node acting purely as a bootstrap relay never does.
    pub fn may_announce_provider(&self) -> bool {
        !self.acting_as_pure_relay
    }

    /// Record a new relay reservation, evicting the least-recently-used
    /// entry if the cache is at capacity.
    pub fn add_relay_reservation(&mut self, relay_peer: PeerId, relay_addr: Multiaddr) {
        self.relay_reservations.put(relay_peer, RelayReservation { relay_peer, relay_addr });
    }

    pub fn relay_reservation_count(&self) -> usize {
        self.relay_reservations.len()
    }

    pub fn has_relay_reservation(&mut self, relay_peer: &PeerId) -> bool {
        self.relay_reservations.get(relay_peer).is_some()
    }

    pub fn socks5_proxy(&self) -> Option<&str> {
        self.socks5_proxy.as_deref()
    }

    /// Choose a transport for dialing `peer`, given whether the remote also
    /// reports being behind a NAT (in which case hole-punching is
    /// attempted before falling back to a relayed circuit).
    pub fn choose_transport(&mut self, peer_behind_nat: bool) -> ChiralResult<TransportKind> {
        match self.reachability {
            Reachability::Public => Ok(TransportKind::DirectTcp),
            Reachability::BehindNat if !peer_behind_nat => Ok(TransportKind::DirectQuic),
            Reachability::BehindNat | Reachability::Relayed => {
                if self.relay_reservations.is_empty() {
                    Err(ChiralError::NetworkUnreachable("relay-exhausted".to_string()))
                } else {
                    Ok(TransportKind::Relayed)
                }
            }
        }
    }

    /// Simulate hole-punch coordination: both sides must report being
    /// behind a NAT and a relay circuit must already be reserved.
    pub fn attempt_hole_punch(&self, local_behind_nat: bool, remote_behind_nat: bool) -> ChiralResult<()> {
        if !local_behind_nat || !remote_behind_nat {
            return Err(ChiralError::ProtocolViolation(
                "hole-punch requires both peers to report NAT".to_string(),
            ));
        }
        if self.relay_reservations.is_empty() {
            return Err(ChiralError::NetworkUnreachable("hole-punch-failed".to_string()));
        }
        Ok(())
    }
}
