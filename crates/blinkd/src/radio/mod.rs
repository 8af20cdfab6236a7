//! The broadcast slot.
//!
//! A device holds at most one advertisement on air at a time. Everything the
//! engine transmits, presence and bursts alike, goes through this slot.

use bytes::Bytes;

pub mod udp;

/// An advertisement seen on the medium.
#[derive(Debug, Clone)]
pub struct Observation {
    pub payload: Bytes,
    /// RSSI in dBm, when the radio reports one.
    pub signal_strength: Option<i16>,
}

impl Observation {
    pub fn new(payload: impl Into<Bytes>, signal_strength: Option<i16>) -> Self {
        Self {
            payload: payload.into(),
            signal_strength,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio unavailable: {0}")]
    Unavailable(String),

    #[error("radio i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform broadcast capability.
///
/// Implementations must be cheap to call from the engine task: they flip
/// state and return, the actual advertising happens elsewhere.
pub trait Radio: Send + Sync + 'static {
    /// Put `frame` on air. Callers stop the previous frame first.
    fn start_broadcast(&self, frame: &[u8]) -> Result<(), RadioError>;

    fn stop_broadcast(&self);

    fn is_broadcasting(&self) -> bool;
}
