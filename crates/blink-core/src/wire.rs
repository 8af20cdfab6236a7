//! Blink wire format — the frames carried in a single radio advertisement.
//!
//! These types ARE the protocol. Every offset is fixed and every field is a
//! single byte or a byte array, so the layout is identical on every
//! platform. There are two header layouts, selected by packet kind:
//!
//! ```text
//! generic (13 + payload):  version kind sender[4] target[4] msg_id idx total payload[0..=11]
//! match   (14):            version kind sender[4] gender target[4] msg_id idx total
//! ```
//!
//! Match frames carry the sender's gender between the two hashes. Existing
//! peers expect exactly this, so the layouts must not be unified.
//!
//! Headers derive zerocopy traits; decoding copies them out of the frame and
//! never indexes past the end of the input.

use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::identity::{PeerHash, PEER_HASH_LEN};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Largest payload the medium accepts in one advertisement.
pub const MAX_FRAME_LEN: usize = 24;

/// Header size of the generic layout.
pub const GENERIC_HEADER_LEN: usize = 13;

/// Full frame size of the match layout (gender included).
pub const MATCH_FRAME_LEN: usize = 14;

/// Payload bytes that fit after a generic header.
pub const MAX_PAYLOAD: usize = MAX_FRAME_LEN - GENERIC_HEADER_LEN;

/// Most chunks one logical message can be split into.
pub const MAX_CHUNKS: usize = u8::MAX as usize;

// ── Packet kind ───────────────────────────────────────────────────────────────

/// Frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PacketKind {
    Presence = 0x01,
    MatchRequest = 0x02,
    MatchAccept = 0x03,
    MatchReject = 0x04,
    Chat = 0x05,
    Unmatch = 0x06,
    Block = 0x07,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Presence),
            0x02 => Some(Self::MatchRequest),
            0x03 => Some(Self::MatchAccept),
            0x04 => Some(Self::MatchReject),
            0x05 => Some(Self::Chat),
            0x06 => Some(Self::Unmatch),
            0x07 => Some(Self::Block),
            _ => None,
        }
    }

    /// Request/accept/reject use the match layout.
    pub fn is_match(self) -> bool {
        matches!(
            self,
            Self::MatchRequest | Self::MatchAccept | Self::MatchReject
        )
    }

    /// Everything but presence names a target.
    pub fn is_addressed(self) -> bool {
        self != Self::Presence
    }
}

impl From<PacketKind> for u8 {
    fn from(k: PacketKind) -> u8 {
        k as u8
    }
}

// ── Headers ───────────────────────────────────────────────────────────────────

/// Header of presence, chat, unmatch and block frames.
///
/// Wire size: 13 bytes. Payload follows immediately; its length is the frame
/// length minus this header.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct GenericHeader {
    pub version: u8,
    pub kind: u8,
    pub sender: [u8; PEER_HASH_LEN],
    pub target: [u8; PEER_HASH_LEN],
    pub msg_id: u8,
    pub chunk_index: u8,
    pub chunk_total: u8,
}

assert_eq_size!(GenericHeader, [u8; GENERIC_HEADER_LEN]);

/// Complete match request/accept/reject frame.
///
/// Wire size: 14 bytes. The gender byte sits at offset 6, between the hashes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct MatchHeader {
    pub version: u8,
    pub kind: u8,
    pub sender: [u8; PEER_HASH_LEN],
    pub gender: u8,
    pub target: [u8; PEER_HASH_LEN],
    pub msg_id: u8,
    pub chunk_index: u8,
    pub chunk_total: u8,
}

assert_eq_size!(MatchHeader, [u8; MATCH_FRAME_LEN]);

// ── Packet ────────────────────────────────────────────────────────────────────

/// One decoded frame.
///
/// For match kinds `payload` holds exactly the sender's gender byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub kind: PacketKind,
    pub sender: PeerHash,
    pub target: PeerHash,
    pub msg_id: u8,
    pub chunk_index: u8,
    pub chunk_total: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Single-chunk packet at the current protocol version.
    pub fn new(
        kind: PacketKind,
        sender: PeerHash,
        target: PeerHash,
        msg_id: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            sender,
            target,
            msg_id,
            chunk_index: 0,
            chunk_total: 1,
            payload,
        }
    }

    /// Split a logical payload into the packets that carry it.
    ///
    /// Chat payloads are cut into `MAX_PAYLOAD`-byte chunks (an empty text
    /// still yields one packet). Every other kind must fit in one packet.
    pub fn fragments(
        kind: PacketKind,
        sender: PeerHash,
        target: PeerHash,
        msg_id: u8,
        payload: &[u8],
    ) -> Result<Vec<Packet>, EncodeError> {
        if kind != PacketKind::Chat {
            let packet = Packet::new(kind, sender, target, msg_id, payload.to_vec());
            packet.validate()?;
            return Ok(vec![packet]);
        }

        let total = payload.len().div_ceil(MAX_PAYLOAD).max(1);
        if total > MAX_CHUNKS {
            return Err(EncodeError::MessageTooLong {
                len: payload.len(),
                max: MAX_CHUNKS * MAX_PAYLOAD,
            });
        }

        let mut out = Vec::with_capacity(total);
        for index in 0..total {
            let start = index * MAX_PAYLOAD;
            let end = (start + MAX_PAYLOAD).min(payload.len());
            out.push(Packet {
                version: PROTOCOL_VERSION,
                kind,
                sender,
                target,
                msg_id,
                chunk_index: index as u8,
                chunk_total: total as u8,
                payload: payload[start..end].to_vec(),
            });
        }
        Ok(out)
    }

    /// Check the invariants `encode` relies on.
    pub fn validate(&self) -> Result<(), EncodeError> {
        if self.chunk_total == 0 || self.chunk_index >= self.chunk_total {
            return Err(EncodeError::InvalidChunk {
                index: self.chunk_index,
                total: self.chunk_total,
            });
        }
        if self.kind.is_match() {
            if self.payload.len() != 1 {
                return Err(EncodeError::MatchPayload(self.payload.len()));
            }
        } else if self.payload.len() > MAX_PAYLOAD {
            return Err(EncodeError::PayloadTooLarge(self.payload.len()));
        }
        Ok(())
    }

    /// Number of bytes `encode` will produce.
    pub fn encoded_len(&self) -> usize {
        if self.kind.is_match() {
            MATCH_FRAME_LEN
        } else {
            GENERIC_HEADER_LEN + self.payload.len()
        }
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Encode a packet into its frame. Byte-exact, no padding.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    packet.validate()?;

    if packet.kind.is_match() {
        let header = MatchHeader {
            version: packet.version,
            kind: packet.kind.into(),
            sender: packet.sender.0,
            gender: packet.payload[0],
            target: packet.target.0,
            msg_id: packet.msg_id,
            chunk_index: packet.chunk_index,
            chunk_total: packet.chunk_total,
        };
        return Ok(header.as_bytes().to_vec());
    }

    let header = GenericHeader {
        version: packet.version,
        kind: packet.kind.into(),
        sender: packet.sender.0,
        target: packet.target.0,
        msg_id: packet.msg_id,
        chunk_index: packet.chunk_index,
        chunk_total: packet.chunk_total,
    };
    let mut out = Vec::with_capacity(packet.encoded_len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&packet.payload);
    Ok(out)
}

/// Decode a frame observed on the medium.
///
/// Neighbours are untrusted: any malformed input yields an error, never a
/// panic.
pub fn decode(bytes: &[u8]) -> Result<Packet, DecodeError> {
    // version + kind decide which layout applies
    if bytes.len() < 2 {
        return Err(DecodeError::TooShort {
            len: bytes.len(),
            need: GENERIC_HEADER_LEN,
        });
    }
    let kind = PacketKind::from_u8(bytes[1]).ok_or(DecodeError::UnknownType(bytes[1]))?;

    let packet = if kind.is_match() {
        let header = MatchHeader::read_from_prefix(bytes).ok_or(DecodeError::TooShort {
            len: bytes.len(),
            need: MATCH_FRAME_LEN,
        })?;
        Packet {
            version: header.version,
            kind,
            sender: PeerHash(header.sender),
            target: PeerHash(header.target),
            msg_id: header.msg_id,
            chunk_index: header.chunk_index,
            chunk_total: header.chunk_total,
            payload: vec![header.gender],
        }
    } else {
        let header = GenericHeader::read_from_prefix(bytes).ok_or(DecodeError::TooShort {
            len: bytes.len(),
            need: GENERIC_HEADER_LEN,
        })?;
        let payload = &bytes[GENERIC_HEADER_LEN..];
        if payload.len() > MAX_PAYLOAD {
            return Err(DecodeError::PayloadTooLarge(payload.len()));
        }
        Packet {
            version: header.version,
            kind,
            sender: PeerHash(header.sender),
            target: PeerHash(header.target),
            msg_id: header.msg_id,
            chunk_index: header.chunk_index,
            chunk_total: header.chunk_total,
            payload: payload.to_vec(),
        }
    };

    if packet.version != PROTOCOL_VERSION {
        return Err(DecodeError::BadVersion(packet.version));
    }
    if packet.chunk_total == 0 || packet.chunk_index >= packet.chunk_total {
        return Err(DecodeError::InvalidChunk {
            index: packet.chunk_index,
            total: packet.chunk_total,
        });
    }
    Ok(packet)
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Reasons a received frame is rejected. Never surfaced to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame too short: {len} bytes, need {need}")]
    TooShort { len: usize, need: usize },

    #[error("unsupported protocol version: 0x{0:02x}")]
    BadVersion(u8),

    #[error("unknown packet type: 0x{0:02x}")]
    UnknownType(u8),

    #[error("invalid chunk position {index}/{total}")]
    InvalidChunk { index: u8, total: u8 },

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}

/// Reasons a packet cannot be put on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("invalid chunk position {index}/{total}")]
    InvalidChunk { index: u8, total: u8 },

    #[error("match frames carry exactly one gender byte, got {0}")]
    MatchPayload(usize),

    #[error("message of {len} bytes exceeds maximum {max}")]
    MessageTooLong { len: usize, max: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
