//! Payload schemas carried inside frames.
//!
//! The codec in `wire` moves opaque payload bytes; this module gives them
//! meaning per packet kind.

use crate::identity::Gender;
use crate::wire::MAX_PAYLOAD;

/// Display-name bytes that fit next to the gender byte in a presence frame.
pub const MAX_NAME_BYTES: usize = MAX_PAYLOAD - 1;

/// Presence payload: gender byte followed by the UTF-8 display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub gender: Gender,
    pub display_name: String,
}

impl Presence {
    pub fn new(gender: Gender, display_name: impl Into<String>) -> Self {
        Self {
            gender,
            display_name: display_name.into(),
        }
    }

    /// Encode, truncating the name at a character boundary so the payload
    /// fits one frame.
    pub fn encode(&self) -> Vec<u8> {
        let name = truncate_utf8(&self.display_name, MAX_NAME_BYTES);
        let mut out = Vec::with_capacity(1 + name.len());
        out.push(self.gender.into());
        out.extend_from_slice(name.as_bytes());
        out
    }

    /// Decode a presence payload. An empty payload is not a presence.
    /// Invalid UTF-8 in the name is replaced rather than rejected.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        let (&gender, name) = payload.split_first()?;
        Some(Self {
            gender: Gender::from_u8(gender),
            display_name: String::from_utf8_lossy(name).into_owned(),
        })
    }
}

/// Gender byte of a match request/accept/reject payload.
pub fn match_payload(gender: Gender) -> Vec<u8> {
    vec![gender.into()]
}

/// Sender gender from a match payload; `Unspecified` when absent.
pub fn match_gender(payload: &[u8]) -> Gender {
    payload
        .first()
        .copied()
        .map(Gender::from_u8)
        .unwrap_or_default()
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char
/// boundary.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
