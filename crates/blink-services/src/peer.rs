//! Peer registry — who is nearby, as last heard from their presence
//! advertisements.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use blink_core::{Gender, PeerHash};

/// Tracked state for a discovered peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerRecord {
    pub hash: PeerHash,
    pub display_name: String,
    pub gender: Gender,

    /// RSSI of the most recent presence frame, if the radio reports one.
    pub signal_strength: Option<i16>,

    /// Last time a presence frame from this peer was seen.
    #[serde(skip)]
    pub last_seen_at: Instant,
}

/// Shared between the engine (sole writer) and any number of readers.
/// Keyed on peer hash; last write wins.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerHash, PeerRecord>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `record.hash`.
    pub fn upsert(&self, record: PeerRecord) {
        self.peers.insert(record.hash, record);
    }

    /// Refresh liveness without touching the advertised fields.
    /// Returns false if the peer is unknown.
    pub fn touch(&self, hash: &PeerHash, signal_strength: Option<i16>, now: Instant) -> bool {
        match self.peers.get_mut(hash) {
            Some(mut entry) => {
                entry.last_seen_at = now;
                if signal_strength.is_some() {
                    entry.signal_strength = signal_strength;
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, hash: &PeerHash) -> Option<PeerRecord> {
        self.peers.get(hash).map(|entry| entry.clone())
    }

    /// Copy of every record. Order is unspecified.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Drop peers not seen for `max_age`. Returns how many were removed.
    pub fn prune_older_than(&self, max_age: Duration, now: Instant) -> usize {
        let before = self.peers.len();
        self.peers
            .retain(|_, record| now.saturating_duration_since(record.last_seen_at) < max_age);
        before - self.peers.len()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
