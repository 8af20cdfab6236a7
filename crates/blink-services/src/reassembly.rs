//! Chunk reassembly — turns multi-packet chat bursts back into one
//! logical message.
//!
//! Buffers are keyed by `(sender, msg_id)`. The medium gives no delivery
//! guarantee: a message missing a chunk when its buffer times out is lost,
//! and nobody is told.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use blink_core::wire::Packet;
use blink_core::{PacketKind, PeerHash};

/// A complete payload a protocol handler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalMessage {
    pub sender: PeerHash,
    pub target: PeerHash,
    pub kind: PacketKind,
    pub msg_id: u8,
    pub payload: Vec<u8>,
    /// Signal strength of the packet that completed the message.
    pub signal_strength: Option<i16>,
}

impl LogicalMessage {
    fn from_single(packet: Packet, signal_strength: Option<i16>) -> Self {
        Self {
            sender: packet.sender,
            target: packet.target,
            kind: packet.kind,
            msg_id: packet.msg_id,
            payload: packet.payload,
            signal_strength,
        }
    }
}

type BufferKey = (PeerHash, u8);

/// Fragments of one message seen so far.
struct Partial {
    kind: PacketKind,
    target: PeerHash,
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    /// Last time a new fragment arrived. The timeout measures silence, so a
    /// long burst is not cut off while chunks keep coming.
    last_chunk_at: Instant,
}

impl Partial {
    fn new(packet: &Packet, now: Instant) -> Self {
        Self {
            kind: packet.kind,
            target: packet.target,
            fragments: vec![None; packet.chunk_total as usize],
            received: 0,
            last_chunk_at: now,
        }
    }

    fn matches(&self, packet: &Packet) -> bool {
        self.kind == packet.kind
            && self.target == packet.target
            && self.fragments.len() == packet.chunk_total as usize
    }

    fn insert(&mut self, index: u8, payload: Vec<u8>, now: Instant) {
        let Some(slot) = self.fragments.get_mut(index as usize) else {
            return;
        };
        if slot.is_none() {
            *slot = Some(payload);
            self.received += 1;
            self.last_chunk_at = now;
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.fragments.len()
    }

    fn concat(self) -> Vec<u8> {
        self.fragments.into_iter().flatten().flatten().collect()
    }
}

/// Per-device reassembly table.
pub struct Reassembler {
    partial: HashMap<BufferKey, Partial>,
    /// Recently completed messages; late repeats of their chunks are ignored.
    completed: HashMap<BufferKey, Instant>,
    timeout: Duration,
    max_buffers: usize,
}

impl Reassembler {
    pub fn new(timeout: Duration, max_buffers: usize) -> Self {
        Self {
            partial: HashMap::new(),
            completed: HashMap::new(),
            timeout,
            max_buffers: max_buffers.max(1),
        }
    }

    /// Feed one decoded packet. Returns the logical message once it is
    /// complete.
    pub fn ingest(
        &mut self,
        packet: Packet,
        signal_strength: Option<i16>,
        now: Instant,
    ) -> Option<LogicalMessage> {
        if packet.chunk_total <= 1 {
            return Some(LogicalMessage::from_single(packet, signal_strength));
        }

        if packet.chunk_index >= packet.chunk_total {
            tracing::trace!(
                sender = %packet.sender,
                index = packet.chunk_index,
                total = packet.chunk_total,
                "chunk index out of range"
            );
            return None;
        }

        self.sweep(now);

        let key = (packet.sender, packet.msg_id);
        if self.completed.contains_key(&key) {
            tracing::trace!(sender = %packet.sender, msg_id = packet.msg_id, "chunk of completed message ignored");
            return None;
        }

        match self.partial.get(&key).map(|p| p.matches(&packet)) {
            Some(true) => {}
            Some(false) => {
                // msg_id wrapped around or the sender restarted mid-message
                self.partial.insert(key, Partial::new(&packet, now));
            }
            None => {
                self.make_room();
                self.partial.insert(key, Partial::new(&packet, now));
            }
        }

        let buffer = self.partial.get_mut(&key)?;
        buffer.insert(packet.chunk_index, packet.payload, now);
        if !buffer.is_complete() {
            tracing::trace!(
                sender = %packet.sender,
                msg_id = packet.msg_id,
                received = buffer.received,
                total = packet.chunk_total,
                "chunk buffered"
            );
            return None;
        }

        let buffer = self.partial.remove(&key)?;
        self.completed.insert(key, now);
        Some(LogicalMessage {
            sender: packet.sender,
            target: buffer.target,
            kind: buffer.kind,
            msg_id: packet.msg_id,
            payload: buffer.concat(),
            signal_strength,
        })
    }

    /// Drop buffers that have gone the reassembly timeout without a new
    /// chunk. Returns how many incomplete messages were lost.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.partial.len();
        self.partial.retain(|(sender, msg_id), p| {
            let keep = now.saturating_duration_since(p.last_chunk_at) < timeout;
            if !keep {
                tracing::debug!(
                    sender = %sender,
                    msg_id,
                    received = p.received,
                    total = p.fragments.len(),
                    "reassembly timed out, message lost"
                );
            }
            keep
        });
        self.completed
            .retain(|_, at| now.saturating_duration_since(*at) < timeout);
        before - self.partial.len()
    }

    /// Number of open (incomplete) buffers.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    fn make_room(&mut self) {
        while self.partial.len() >= self.max_buffers {
            let oldest = self
                .partial
                .iter()
                .min_by_key(|(_, p)| p.last_chunk_at)
                .map(|(k, _)| *k);
            match oldest {
                Some(key) => {
                    tracing::debug!(sender = %key.0, msg_id = key.1, "reassembly table full, evicting oldest");
                    self.partial.remove(&key);
                }
                None => break,
            }
        }
    }
}
