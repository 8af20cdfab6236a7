//! blink-core — shared types, wire format, and configuration.
//! All other Blink crates depend on this one.

pub mod config;
pub mod identity;
pub mod message;
pub mod wire;

pub use identity::{Gender, Identity, IdentityProvider, PeerHash};
pub use message::Presence;
pub use wire::{decode, encode, DecodeError, EncodeError, Packet, PacketKind};
