//! Device identity — the 4-byte peer hash, gender, and display name a
//! device advertises about itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Length of a peer hash on the wire.
pub const PEER_HASH_LEN: usize = 4;

/// Short identifier a device uses as sender and target on the wire.
///
/// Not globally unique: four bytes is what fits beside the payload.
/// The all-zero value is reserved for broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHash(pub [u8; PEER_HASH_LEN]);

impl PeerHash {
    /// Broadcast target. Never a valid sender.
    pub const BROADCAST: PeerHash = PeerHash([0u8; PEER_HASH_LEN]);

    /// Derive a hash from arbitrary seed material (BLAKE3 prefix).
    ///
    /// A derivation that lands on the broadcast value is nudged to
    /// `00000001` so a device can never impersonate broadcast.
    pub fn derive(seed: &[u8]) -> Self {
        let digest = blake3::hash(seed);
        let mut out = [0u8; PEER_HASH_LEN];
        out.copy_from_slice(&digest.as_bytes()[..PEER_HASH_LEN]);
        if out == [0u8; PEER_HASH_LEN] {
            out[PEER_HASH_LEN - 1] = 1;
        }
        PeerHash(out)
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn as_bytes(&self) -> &[u8; PEER_HASH_LEN] {
        &self.0
    }
}

/// Fresh random seed material for [`PeerHash::derive`].
pub fn random_seed() -> [u8; 16] {
    rand::random()
}

impl fmt::Display for PeerHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for PeerHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; PEER_HASH_LEN];
        hex::decode_to_slice(s.trim(), &mut out)?;
        Ok(PeerHash(out))
    }
}

impl Serialize for PeerHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerHash {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ── Gender ────────────────────────────────────────────────────────────────────

/// Gender byte carried in presence and match frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Gender {
    #[default]
    Unspecified = 0x00,
    Male = 0x01,
    Female = 0x02,
}

impl Gender {
    /// Lenient decode: peers running newer builds may send values we
    /// don't know, which must not reject the whole frame.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Gender::Male,
            0x02 => Gender::Female,
            _ => Gender::Unspecified,
        }
    }
}

impl From<Gender> for u8 {
    fn from(g: Gender) -> u8 {
        g as u8
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "unspecified" => Ok(Gender::Unspecified),
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            other => Err(format!("unknown gender: {other}")),
        }
    }
}

// ── Identity ──────────────────────────────────────────────────────────────────

/// Source of the local identity the engine advertises and stamps on frames.
pub trait IdentityProvider {
    fn local_hash(&self) -> PeerHash;
    fn display_name(&self) -> String;
    fn gender(&self) -> Gender;
}

/// Owned snapshot of a device identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub hash: PeerHash,
    pub display_name: String,
    pub gender: Gender,
}

impl Identity {
    pub fn new(hash: PeerHash, display_name: impl Into<String>, gender: Gender) -> Self {
        Self {
            hash,
            display_name: display_name.into(),
            gender,
        }
    }

    /// Snapshot any provider into an owned identity.
    pub fn from_provider(provider: &dyn IdentityProvider) -> Self {
        Self {
            hash: provider.local_hash(),
            display_name: provider.display_name(),
            gender: provider.gender(),
        }
    }
}

impl IdentityProvider for Identity {
    fn local_hash(&self) -> PeerHash {
        self.hash
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn gender(&self) -> Gender {
        self.gender
    }
}
