//! Routes observed frames to the protocol handlers.
//!
//! Every frame passes the same gate before anything acts on it:
//! decode → own/addressing/blocked filter → reassembly → dedup guard →
//! dispatch by kind. Each stage can drop; nothing on this path is fatal.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::Instant;

use blink_core::config::ProtocolConfig;
use blink_core::message::match_gender;
use blink_core::wire::{self, PacketKind};
use blink_core::{PeerHash, Presence};
use blink_services::{
    ChatStore, DedupKey, Direction, Event, Guard, LogicalMessage, MatchStore, PeerRecord,
    PeerRegistry, Reassembler, Verdict,
};

/// What became of a frame or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dispatched(PacketKind),
    /// Chunk stored, message not yet complete.
    Buffered,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Decode,
    OwnFrame,
    NotAddressedToMe,
    Blocked,
    Duplicate,
    Cooldown,
    InvalidPayload,
}

pub struct Router {
    local: PeerHash,
    reassembler: Reassembler,
    guard: Guard,
    registry: PeerRegistry,
    matches: Arc<dyn MatchStore>,
    chats: Arc<dyn ChatStore>,
    events: broadcast::Sender<Event>,
}

impl Router {
    pub fn new(
        local: PeerHash,
        config: &ProtocolConfig,
        registry: PeerRegistry,
        matches: Arc<dyn MatchStore>,
        chats: Arc<dyn ChatStore>,
        events: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            local,
            reassembler: Reassembler::new(config.reassembly_timeout(), config.max_reassembly_buffers),
            guard: Guard::new(config.dedup_window(), config.match_cooldown()),
            registry,
            matches,
            chats,
            events,
        }
    }

    pub fn set_local(&mut self, local: PeerHash) {
        self.local = local;
    }

    /// The guard also throttles our own match requests.
    pub fn guard_mut(&mut self) -> &mut Guard {
        &mut self.guard
    }

    /// Expire stale reassembly buffers.
    pub fn sweep(&mut self, now: Instant) -> usize {
        self.reassembler.sweep(now)
    }

    /// Full receive path for one observed advertisement.
    pub fn handle_frame(&mut self, bytes: &[u8], signal_strength: Option<i16>, now: Instant) -> Disposition {
        let packet = match wire::decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::trace!(len = bytes.len(), error = %e, "undecodable frame dropped");
                return Disposition::Dropped(DropReason::Decode);
            }
        };

        if let Some(reason) = self.filter(packet.sender, packet.kind, packet.target) {
            return Disposition::Dropped(reason);
        }

        match self.reassembler.ingest(packet, signal_strength, now) {
            Some(message) => self.accept(message, now),
            None => Disposition::Buffered,
        }
    }

    /// Receive path for an already reassembled message.
    pub fn handle(&mut self, message: LogicalMessage, now: Instant) -> Disposition {
        if let Some(reason) = self.filter(message.sender, message.kind, message.target) {
            return Disposition::Dropped(reason);
        }
        self.accept(message, now)
    }

    fn filter(&self, sender: PeerHash, kind: PacketKind, target: PeerHash) -> Option<DropReason> {
        if sender == self.local {
            tracing::trace!("own frame ignored");
            return Some(DropReason::OwnFrame);
        }
        if kind.is_addressed() && target != self.local {
            tracing::trace!(?kind, %target, "frame for another device");
            return Some(DropReason::NotAddressedToMe);
        }
        if self.matches.is_blocked(&sender) {
            tracing::trace!(peer = %sender, "frame from blocked peer");
            return Some(DropReason::Blocked);
        }
        None
    }

    fn accept(&mut self, message: LogicalMessage, now: Instant) -> Disposition {
        let key = DedupKey::new(message.sender, message.kind, message.msg_id);
        match self.guard.should_process(key, now) {
            Verdict::Accept => self.dispatch(message, now),
            Verdict::Duplicate if message.kind == PacketKind::Presence => {
                self.refresh_presence(message, now)
            }
            Verdict::Duplicate => {
                tracing::trace!(peer = %message.sender, kind = ?message.kind, "duplicate suppressed");
                Disposition::Dropped(DropReason::Duplicate)
            }
            Verdict::Cooldown => {
                tracing::debug!(peer = %message.sender, "match request in cooldown");
                Disposition::Dropped(DropReason::Cooldown)
            }
        }
    }

    /// A presence repeat inside the dedup window only refreshes liveness,
    /// unless the name or gender behind the hash changed.
    fn refresh_presence(&mut self, message: LogicalMessage, now: Instant) -> Disposition {
        let changed = match (
            Presence::decode(&message.payload),
            self.registry.get(&message.sender),
        ) {
            (Some(presence), Some(known)) => {
                presence.display_name != known.display_name || presence.gender != known.gender
            }
            (Some(_), None) => true,
            (None, _) => false,
        };
        if changed {
            tracing::debug!(peer = %message.sender, "presence changed within dedup window");
            return self.dispatch(message, now);
        }

        self.registry
            .touch(&message.sender, message.signal_strength, now);
        tracing::trace!(peer = %message.sender, "duplicate presence refreshed");
        Disposition::Dropped(DropReason::Duplicate)
    }

    fn dispatch(&mut self, message: LogicalMessage, now: Instant) -> Disposition {
        let from = message.sender;
        let kind = message.kind;

        let event = match kind {
            PacketKind::Presence => {
                let Some(presence) = Presence::decode(&message.payload) else {
                    tracing::debug!(peer = %from, "empty presence payload");
                    return Disposition::Dropped(DropReason::InvalidPayload);
                };
                self.registry.upsert(PeerRecord {
                    hash: from,
                    display_name: presence.display_name.clone(),
                    gender: presence.gender,
                    signal_strength: message.signal_strength,
                    last_seen_at: now,
                });
                Event::PresenceUpdated {
                    peer: from,
                    display_name: presence.display_name,
                    gender: presence.gender,
                    signal_strength: message.signal_strength,
                }
            }
            PacketKind::MatchRequest => {
                let gender = match_gender(&message.payload);
                self.matches.store_pending_request(from, gender);
                Event::MatchRequested { from, gender }
            }
            PacketKind::MatchAccept => {
                let gender = match_gender(&message.payload);
                self.matches.finalize_match(from, gender);
                Event::MatchAccepted { from, gender }
            }
            PacketKind::MatchReject => {
                self.matches.remove_match(from);
                Event::MatchRejected { from }
            }
            PacketKind::Chat => {
                let text = match String::from_utf8(message.payload) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::debug!(peer = %from, error = %e, "chat is not valid UTF-8");
                        return Disposition::Dropped(DropReason::InvalidPayload);
                    }
                };
                self.chats.append_message(from, &text, Direction::Incoming);
                Event::ChatReceived { from, text }
            }
            PacketKind::Unmatch => {
                self.matches.remove_match(from);
                Event::Unmatched { from }
            }
            PacketKind::Block => {
                self.matches.remove_match(from);
                Event::Blocked { from }
            }
        };

        tracing::debug!(peer = %from, ?kind, "message dispatched");
        let _ = self.events.send(event);
        Disposition::Dispatched(kind)
    }
}
