//! Collaborator stores — where match state and chat history live.
//!
//! The engine only calls into these; persistence is the host's business.
//! The in-memory implementations back the daemon and the tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;

use blink_core::{Gender, PeerHash};

/// Match lifecycle storage.
pub trait MatchStore: Send + Sync {
    /// A peer asked to match with us.
    fn store_pending_request(&self, from: PeerHash, gender: Gender);

    /// Both sides agreed.
    fn finalize_match(&self, peer: PeerHash, gender: Gender);

    /// Any reason the match no longer exists: rejected, unmatched, blocked.
    fn remove_match(&self, peer: PeerHash);

    /// Local or remote block. Stores that track blocks override this.
    fn block_peer(&self, peer: PeerHash) {
        self.remove_match(peer);
    }

    /// Frames from blocked peers are dropped before dispatch.
    fn is_blocked(&self, _peer: &PeerHash) -> bool {
        false
    }

    /// Gender announced by a pending request from `peer`.
    fn pending_gender(&self, _peer: &PeerHash) -> Option<Gender> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Chat history storage.
pub trait ChatStore: Send + Sync {
    fn append_message(&self, peer: PeerHash, text: &str, direction: Direction);
}

// ── In-memory implementations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    Pending(Gender),
    Matched(Gender),
}

#[derive(Clone, Default)]
pub struct MemoryMatchStore {
    matches: Arc<DashMap<PeerHash, MatchState>>,
    blocked: Arc<Mutex<HashSet<PeerHash>>>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, peer: &PeerHash) -> Option<MatchState> {
        self.matches.get(peer).map(|s| *s)
    }

    pub fn matched(&self) -> Vec<PeerHash> {
        self.matches
            .iter()
            .filter(|e| matches!(e.value(), MatchState::Matched(_)))
            .map(|e| *e.key())
            .collect()
    }

    pub fn unblock(&self, peer: &PeerHash) {
        if let Ok(mut blocked) = self.blocked.lock() {
            blocked.remove(peer);
        }
    }
}

impl MatchStore for MemoryMatchStore {
    fn store_pending_request(&self, from: PeerHash, gender: Gender) {
        // an existing match is not downgraded by a repeated request
        self.matches
            .entry(from)
            .or_insert(MatchState::Pending(gender));
    }

    fn finalize_match(&self, peer: PeerHash, gender: Gender) {
        self.matches.insert(peer, MatchState::Matched(gender));
    }

    fn remove_match(&self, peer: PeerHash) {
        self.matches.remove(&peer);
    }

    fn block_peer(&self, peer: PeerHash) {
        self.remove_match(peer);
        if let Ok(mut blocked) = self.blocked.lock() {
            blocked.insert(peer);
        }
    }

    fn is_blocked(&self, peer: &PeerHash) -> bool {
        self.blocked
            .lock()
            .map(|blocked| blocked.contains(peer))
            .unwrap_or(false)
    }

    fn pending_gender(&self, peer: &PeerHash) -> Option<Gender> {
        match self.state(peer)? {
            MatchState::Pending(gender) => Some(gender),
            MatchState::Matched(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatEntry {
    pub text: String,
    pub direction: Direction,
}

/// Chat history per peer, in arrival order.
#[derive(Clone, Default)]
pub struct MemoryChatStore {
    messages: Arc<DashMap<PeerHash, Vec<ChatEntry>>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self, peer: &PeerHash) -> Vec<ChatEntry> {
        self.messages
            .get(peer)
            .map(|msgs| msgs.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, peer: &PeerHash) -> usize {
        self.messages.get(peer).map(|msgs| msgs.len()).unwrap_or(0)
    }
}

impl ChatStore for MemoryChatStore {
    fn append_message(&self, peer: PeerHash, text: &str, direction: Direction) {
        self.messages.entry(peer).or_default().push(ChatEntry {
            text: text.to_owned(),
            direction,
        });
    }
}
