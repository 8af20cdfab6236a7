//! Engine events and the typed subscription handed to observers.

use serde::Serialize;
use tokio::sync::broadcast;

use blink_core::{Gender, PacketKind, PeerHash};

/// Something a subscriber should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    PresenceUpdated {
        peer: PeerHash,
        display_name: String,
        gender: Gender,
        signal_strength: Option<i16>,
    },
    MatchRequested {
        from: PeerHash,
        gender: Gender,
    },
    MatchAccepted {
        from: PeerHash,
        gender: Gender,
    },
    MatchRejected {
        from: PeerHash,
    },
    ChatReceived {
        from: PeerHash,
        text: String,
    },
    Unmatched {
        from: PeerHash,
    },
    Blocked {
        from: PeerHash,
    },
    /// An outbound item was dropped after the radio refused it repeatedly.
    SendFailed {
        kind: PacketKind,
        target: PeerHash,
    },
}

/// Receiving end of the engine's event stream.
///
/// Slow subscribers lose the oldest events rather than stalling the engine.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the engine is gone.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`next`](Self::next).
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagging, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}
