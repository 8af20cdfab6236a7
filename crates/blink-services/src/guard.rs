//! Replay/duplicate suppression and match-request cooldown.
//!
//! Every advertisement is observed many times while a burst is on air, so
//! the receive path must collapse repeats into one dispatch. Two tables:
//!
//! - dedup: `(sender, kind, discriminator) → last seen`, short window,
//!   applied to every kind.
//! - cooldown: `sender → last accepted match request`, longer window. For
//!   match requests this table is authoritative and a throttled request does
//!   not touch the dedup table.
//!
//! A third table throttles our own outbound match requests per target.
//!
//! Both tables are swept lazily on every call, so memory stays bounded by
//! the number of senders seen within one window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use blink_core::{PacketKind, PeerHash};

/// Identity of a logical message for duplicate suppression.
///
/// `discriminator` is the msg_id for chat (distinct messages from one sender
/// routinely arrive within a window) and zero for every other kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub sender: PeerHash,
    pub kind: PacketKind,
    pub discriminator: u8,
}

impl DedupKey {
    pub fn new(sender: PeerHash, kind: PacketKind, msg_id: u8) -> Self {
        let discriminator = if kind == PacketKind::Chat { msg_id } else { 0 };
        Self {
            sender,
            kind,
            discriminator,
        }
    }
}

/// Outcome of [`Guard::should_process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Same logical message seen within the dedup window.
    Duplicate,
    /// Match request from a sender still in cooldown.
    Cooldown,
}

pub struct Guard {
    dedup: HashMap<DedupKey, Instant>,
    cooldown: HashMap<PeerHash, Instant>,
    outbound: HashMap<PeerHash, Instant>,
    dedup_window: Duration,
    cooldown_window: Duration,
}

impl Guard {
    pub fn new(dedup_window: Duration, cooldown_window: Duration) -> Self {
        Self {
            dedup: HashMap::new(),
            cooldown: HashMap::new(),
            outbound: HashMap::new(),
            dedup_window,
            cooldown_window,
        }
    }

    /// Decide whether a reassembled message should be dispatched, recording
    /// it if so.
    pub fn should_process(&mut self, key: DedupKey, now: Instant) -> Verdict {
        self.sweep(now);

        if key.kind == PacketKind::MatchRequest && self.cooldown.contains_key(&key.sender) {
            return Verdict::Cooldown;
        }

        if self.dedup.contains_key(&key) {
            return Verdict::Duplicate;
        }

        self.dedup.insert(key, now);
        if key.kind == PacketKind::MatchRequest {
            self.cooldown.insert(key.sender, now);
        }
        Verdict::Accept
    }

    /// Local throttle: may we queue a match request to `target` now?
    /// Records the attempt when allowed.
    pub fn try_send_match_request(&mut self, target: PeerHash, now: Instant) -> bool {
        let window = self.cooldown_window;
        self.outbound
            .retain(|_, at| now.saturating_duration_since(*at) < window);
        if self.outbound.contains_key(&target) {
            return false;
        }
        self.outbound.insert(target, now);
        true
    }

    /// Remaining local cooldown before another request to `target`.
    pub fn outbound_cooldown_remaining(&self, target: &PeerHash, now: Instant) -> Option<Duration> {
        let at = self.outbound.get(target)?;
        self.cooldown_window
            .checked_sub(now.saturating_duration_since(*at))
            .filter(|d| !d.is_zero())
    }

    fn sweep(&mut self, now: Instant) {
        let dedup_window = self.dedup_window;
        let cooldown_window = self.cooldown_window;
        self.dedup
            .retain(|_, at| now.saturating_duration_since(*at) < dedup_window);
        self.cooldown
            .retain(|_, at| now.saturating_duration_since(*at) < cooldown_window);
    }

    /// Live entries in (dedup, cooldown) tables.
    pub fn len(&self) -> (usize, usize) {
        (self.dedup.len(), self.cooldown.len())
    }
}
