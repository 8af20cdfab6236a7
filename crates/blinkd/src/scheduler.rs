//! Outbound transmission scheduler.
//!
//! Owns the broadcast slot. Presence is the resting state; every queued item
//! interrupts it for a burst and hands the slot back afterwards:
//!
//! ```text
//! Idle ──enqueue──▶ Bursting ──window over──▶ Resuming ──settle──▶ Gap ──▶ Bursting
//!  ▲                                              │                  │
//!  └──────────────── queue empty ─────────────────┴──────────────────┘
//! ```
//!
//! The scheduler never sleeps. The engine asks for [`Scheduler::next_wakeup`]
//! and calls [`Scheduler::poll`] once that instant has passed.

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::Instant;

use blink_core::config::ProtocolConfig;
use blink_core::wire::{self, EncodeError, Packet, PacketKind};
use blink_core::{Identity, PeerHash, Presence};
use blink_services::Event;

use crate::radio::Radio;

/// A logical message waiting for the broadcast slot.
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub kind: PacketKind,
    pub target: PeerHash,
    pub payload: Vec<u8>,
    pub enqueued_at: Instant,
}

/// Frames of the item currently on air.
struct Burst {
    kind: PacketKind,
    target: PeerHash,
    current: Vec<u8>,
    remaining: VecDeque<Vec<u8>>,
    window_end: Instant,
    /// Match kinds re-send the frame on an interval within the window.
    next_repeat: Option<Instant>,
    /// Pending retry after the radio refused `current`.
    retry_at: Option<Instant>,
    attempts: u32,
}

impl Burst {
    fn deadline(&self) -> Instant {
        let mut at = self.window_end;
        if let Some(repeat) = self.next_repeat {
            at = at.min(repeat);
        }
        if let Some(retry) = self.retry_at {
            at = at.min(retry);
        }
        at
    }
}

enum Phase {
    Idle,
    Bursting(Burst),
    /// Burst over, slot empty until `at`.
    Resuming { at: Instant },
    /// Presence back on air, next item starts at `until`.
    Gap { until: Instant },
}

pub struct Scheduler {
    radio: Arc<dyn Radio>,
    events: broadcast::Sender<Event>,
    config: ProtocolConfig,
    local: PeerHash,
    presence_frame: Vec<u8>,
    visible: bool,
    queue: VecDeque<OutboundItem>,
    phase: Phase,
    next_msg_id: u8,
}

impl Scheduler {
    pub fn new(
        radio: Arc<dyn Radio>,
        events: broadcast::Sender<Event>,
        config: ProtocolConfig,
        identity: &Identity,
    ) -> Result<Self, EncodeError> {
        let presence_frame = presence_frame(identity)?;
        let visible = config.visible;
        Ok(Self {
            radio,
            events,
            config,
            local: identity.hash,
            presence_frame,
            visible,
            queue: VecDeque::new(),
            phase: Phase::Idle,
            next_msg_id: 0,
        })
    }

    /// Put presence on air if visible. Called once when the engine starts.
    pub fn start(&mut self) {
        if self.visible && matches!(self.phase, Phase::Idle) {
            self.advertise_presence();
        }
    }

    /// Release the slot and forget queued items.
    pub fn shutdown(&mut self) {
        if !self.queue.is_empty() {
            tracing::debug!(dropped = self.queue.len(), "outbound queue discarded");
        }
        self.queue.clear();
        self.phase = Phase::Idle;
        self.radio.stop_broadcast();
    }

    pub fn enqueue(&mut self, kind: PacketKind, target: PeerHash, payload: Vec<u8>, now: Instant) {
        self.queue.push_back(OutboundItem {
            kind,
            target,
            payload,
            enqueued_at: now,
        });
        tracing::debug!(?kind, peer = %target, queued = self.queue.len(), "outbound item queued");

        if matches!(self.phase, Phase::Idle) {
            self.begin_next(now);
        }
    }

    /// Takes effect immediately while presence holds the slot, otherwise at
    /// the next resume step.
    pub fn set_visibility(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        tracing::info!(visible, "visibility changed");

        match self.phase {
            Phase::Idle | Phase::Gap { .. } => {
                if visible {
                    self.advertise_presence();
                } else {
                    self.radio.stop_broadcast();
                }
            }
            Phase::Bursting(_) | Phase::Resuming { .. } => {}
        }
    }

    /// Rebuild the presence frame; restart presence if it is on air.
    pub fn set_identity(&mut self, identity: &Identity) -> Result<(), EncodeError> {
        self.presence_frame = presence_frame(identity)?;
        self.local = identity.hash;

        if self.visible && matches!(self.phase, Phase::Idle | Phase::Gap { .. }) {
            self.advertise_presence();
        }
        Ok(())
    }

    /// Instant the scheduler next needs to run, if any.
    pub fn next_wakeup(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Bursting(burst) => Some(burst.deadline()),
            Phase::Resuming { at } => Some(*at),
            Phase::Gap { until } => Some(*until),
        }
    }

    /// Run every transition due at or before `now`.
    ///
    /// Each step is taken at its own deadline rather than at `now`, so a
    /// late wakeup does not stretch the schedule.
    pub fn poll(&mut self, now: Instant) {
        while let Some(at) = self.next_wakeup() {
            if at > now {
                break;
            }
            self.step(at);
        }
    }

    /// Reconcile desired and actual radio state.
    pub fn health_check(&mut self, now: Instant) {
        let on_air = self.radio.is_broadcasting();

        match self.phase {
            Phase::Idle | Phase::Gap { .. } => {
                if self.visible && !on_air {
                    tracing::warn!("presence advertisement lost, restarting");
                    self.advertise_presence();
                } else if !self.visible && on_air {
                    tracing::warn!("advertising while invisible, stopping");
                    self.radio.stop_broadcast();
                }
            }
            Phase::Bursting(_) => {
                if let Phase::Bursting(mut burst) = mem::replace(&mut self.phase, Phase::Idle) {
                    if on_air || burst.retry_at.is_some() {
                        self.phase = Phase::Bursting(burst);
                        return;
                    }
                    tracing::warn!(kind = ?burst.kind, "burst frame dropped by radio, re-arming");
                    if self.transmit(&mut burst, now) {
                        self.phase = Phase::Bursting(burst);
                    } else {
                        self.give_up(burst, now);
                    }
                }
            }
            Phase::Resuming { .. } => {}
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    // ── State machine ─────────────────────────────────────────────────────────

    fn step(&mut self, at: Instant) {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::Bursting(burst) => self.step_burst(burst, at),
            Phase::Resuming { .. } => {
                if self.visible {
                    self.advertise_presence();
                }
                if !self.queue.is_empty() {
                    self.phase = Phase::Gap {
                        until: at + self.config.inter_item_gap(),
                    };
                }
            }
            Phase::Gap { .. } => self.begin_next(at),
        }
    }

    fn step_burst(&mut self, mut burst: Burst, at: Instant) {
        if burst.window_end <= at {
            let Some(frame) = burst.remaining.pop_front() else {
                self.finish_burst(burst, at);
                return;
            };
            burst.current = frame;
            burst.window_end = at + self.config.burst_window();
            burst.retry_at = None;
            burst.attempts = 0;
            if !self.transmit(&mut burst, at) {
                self.give_up(burst, at);
                return;
            }
        } else if burst.retry_at.is_some_and(|retry| retry <= at) {
            if !self.transmit(&mut burst, at) {
                self.give_up(burst, at);
                return;
            }
        } else if let Some(repeat) = burst.next_repeat.filter(|repeat| *repeat <= at) {
            let next = repeat + self.config.match_repeat_interval();
            burst.next_repeat = Some(next).filter(|next| *next < burst.window_end);
            // a pending retry will put the frame back on air
            if burst.retry_at.is_none() {
                tracing::trace!(kind = ?burst.kind, "repeating burst frame");
                if !self.transmit(&mut burst, at) {
                    self.give_up(burst, at);
                    return;
                }
            }
        }
        self.phase = Phase::Bursting(burst);
    }

    fn begin_next(&mut self, at: Instant) {
        while let Some(item) = self.queue.pop_front() {
            let msg_id = self.next_msg_id;
            let mut frames = match encode_item(&item, self.local, msg_id) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::warn!(kind = ?item.kind, error = %e, "dropping unencodable outbound item");
                    continue;
                }
            };
            self.next_msg_id = self.next_msg_id.wrapping_add(1);

            let Some(current) = frames.pop_front() else {
                continue;
            };

            let window = if item.kind.is_match() {
                self.config.match_burst_window()
            } else {
                self.config.burst_window()
            };
            let window_end = at + window;
            let next_repeat = item
                .kind
                .is_match()
                .then(|| at + self.config.match_repeat_interval())
                .filter(|repeat| *repeat < window_end);

            tracing::debug!(
                kind = ?item.kind,
                peer = %item.target,
                msg_id,
                packets = frames.len() + 1,
                waited_ms = at.saturating_duration_since(item.enqueued_at).as_millis() as u64,
                "burst starting"
            );

            let mut burst = Burst {
                kind: item.kind,
                target: item.target,
                current,
                remaining: frames,
                window_end,
                next_repeat,
                retry_at: None,
                attempts: 0,
            };
            if self.transmit(&mut burst, at) {
                self.phase = Phase::Bursting(burst);
            } else {
                self.give_up(burst, at);
            }
            return;
        }

        self.phase = Phase::Idle;
        if self.visible && !self.radio.is_broadcasting() {
            self.advertise_presence();
        }
    }

    /// Stop, then start `burst.current`. False once attempts are exhausted.
    fn transmit(&self, burst: &mut Burst, at: Instant) -> bool {
        self.radio.stop_broadcast();
        burst.attempts += 1;

        match self.radio.start_broadcast(&burst.current) {
            Ok(()) => {
                burst.attempts = 0;
                burst.retry_at = None;
                true
            }
            Err(e) if burst.attempts < self.config.max_broadcast_attempts => {
                tracing::warn!(
                    kind = ?burst.kind,
                    attempt = burst.attempts,
                    error = %e,
                    "broadcast start failed, retrying"
                );
                burst.retry_at = Some(at + self.config.broadcast_retry());
                true
            }
            Err(e) => {
                tracing::warn!(
                    kind = ?burst.kind,
                    attempts = burst.attempts,
                    error = %e,
                    "broadcast start failed, giving up"
                );
                false
            }
        }
    }

    fn give_up(&mut self, burst: Burst, at: Instant) {
        let _ = self.events.send(Event::SendFailed {
            kind: burst.kind,
            target: burst.target,
        });
        self.radio.stop_broadcast();
        self.phase = Phase::Resuming {
            at: at + self.config.settle_delay(),
        };
    }

    fn finish_burst(&mut self, burst: Burst, at: Instant) {
        self.radio.stop_broadcast();
        tracing::debug!(kind = ?burst.kind, peer = %burst.target, "burst complete");
        self.phase = Phase::Resuming {
            at: at + self.config.settle_delay(),
        };
    }

    fn advertise_presence(&self) {
        self.radio.stop_broadcast();
        match self.radio.start_broadcast(&self.presence_frame) {
            Ok(()) => tracing::trace!("presence on air"),
            // the health check will try again
            Err(e) => tracing::warn!(error = %e, "presence start failed"),
        }
    }
}

fn presence_frame(identity: &Identity) -> Result<Vec<u8>, EncodeError> {
    let payload = Presence::new(identity.gender, identity.display_name.as_str()).encode();
    wire::encode(&Packet::new(
        PacketKind::Presence,
        identity.hash,
        PeerHash::BROADCAST,
        0,
        payload,
    ))
}

fn encode_item(
    item: &OutboundItem,
    sender: PeerHash,
    msg_id: u8,
) -> Result<VecDeque<Vec<u8>>, EncodeError> {
    Packet::fragments(item.kind, sender, item.target, msg_id, &item.payload)?
        .iter()
        .map(wire::encode)
        .collect()
}
