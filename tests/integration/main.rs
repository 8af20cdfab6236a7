//! Blink integration test harness.
//!
//! Several engines share one in-memory medium ("the air"). Every 100 ms the
//! air copies each station's current advertisement to every other station,
//! the way a BLE scanner keeps hearing a repeating advertisement. Tests run
//! on paused tokio time, so a 15 s match burst costs no wall-clock time.
//!
//! Each station's radio also counts starts that land on a busy slot; every
//! test asserts that count stays zero.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use blink_core::config::ProtocolConfig;
use blink_core::{Gender, Identity, PeerHash};
use blink_services::{Event, MemoryChatStore, MemoryMatchStore, Subscription};
use blinkd::{Engine, Observation, Radio, RadioError};

mod discovery;
mod faults;
mod matching;
mod messaging;

// ── Radio ─────────────────────────────────────────────────────────────────────

/// One station's broadcast slot.
#[derive(Default)]
pub struct AirRadio {
    on_air: Mutex<Option<Vec<u8>>>,
    fail_next: AtomicUsize,
    overlaps: AtomicUsize,
}

impl AirRadio {
    pub fn on_air(&self) -> Option<Vec<u8>> {
        self.on_air.lock().unwrap().clone()
    }

    /// Refuse the next `n` starts.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Starts issued while another frame held the slot.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }
}

impl Radio for AirRadio {
    fn start_broadcast(&self, frame: &[u8]) -> Result<(), RadioError> {
        let mut slot = self.on_air.lock().unwrap();
        if slot.is_some() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let refused = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RadioError::Unavailable("advertiser refused".into()));
        }
        *slot = Some(frame.to_vec());
        Ok(())
    }

    fn stop_broadcast(&self) {
        *self.on_air.lock().unwrap() = None;
    }

    fn is_broadcasting(&self) -> bool {
        self.on_air.lock().unwrap().is_some()
    }
}

// ── Air ───────────────────────────────────────────────────────────────────────

struct Station {
    radio: Arc<AirRadio>,
    inbox: mpsc::Sender<Observation>,
    signal_strength: i16,
}

/// Shared medium. Dropping it stops delivery.
pub struct Air {
    stations: Arc<Mutex<Vec<Station>>>,
    delivery: JoinHandle<()>,
}

impl Air {
    pub fn new() -> Self {
        let stations: Arc<Mutex<Vec<Station>>> = Arc::new(Mutex::new(Vec::new()));
        let delivery = {
            let stations = stations.clone();
            tokio::spawn(async move {
                let mut tick = time::interval(Duration::from_millis(100));
                loop {
                    tick.tick().await;
                    let stations = stations.lock().unwrap();
                    for (i, sender) in stations.iter().enumerate() {
                        let Some(frame) = sender.radio.on_air() else {
                            continue;
                        };
                        for (j, receiver) in stations.iter().enumerate() {
                            if i != j {
                                let _ = receiver.inbox.try_send(Observation::new(
                                    frame.clone(),
                                    Some(receiver.signal_strength),
                                ));
                            }
                        }
                    }
                }
            })
        };
        Self { stations, delivery }
    }

    /// Bring up a device with default protocol timing.
    pub async fn device(&self, name: &str, gender: Gender) -> Device {
        self.device_with(name, gender, ProtocolConfig::default()).await
    }

    pub async fn device_with(&self, name: &str, gender: Gender, config: ProtocolConfig) -> Device {
        let radio = Arc::new(AirRadio::default());
        let (inbox, observations) = mpsc::channel(1024);
        let matches = MemoryMatchStore::new();
        let chats = MemoryChatStore::new();
        let identity = Identity::new(PeerHash::derive(name.as_bytes()), name, gender);

        let (engine, _task) = Engine::spawn(
            &identity,
            config,
            radio.clone(),
            observations,
            Arc::new(matches.clone()),
            Arc::new(chats.clone()),
        )
        .expect("engine spawn");

        {
            let mut stations = self.stations.lock().unwrap();
            let signal_strength = -40 - 10 * stations.len() as i16;
            stations.push(Station {
                radio: radio.clone(),
                inbox,
                signal_strength,
            });
        }

        let events = engine.subscribe();
        // let the engine task put presence on air
        time::sleep(Duration::from_millis(1)).await;

        Device {
            hash: identity.hash,
            identity,
            engine,
            radio,
            matches,
            chats,
            events,
        }
    }
}

impl Drop for Air {
    fn drop(&mut self) {
        self.delivery.abort();
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

pub struct Device {
    pub hash: PeerHash,
    pub identity: Identity,
    pub engine: Engine,
    pub radio: Arc<AirRadio>,
    pub matches: MemoryMatchStore,
    pub chats: MemoryChatStore,
    pub events: Subscription,
}

impl Device {
    /// First event matching `pred` within `within`.
    pub async fn wait_for(
        &mut self,
        within: Duration,
        mut pred: impl FnMut(&Event) -> bool,
    ) -> Option<Event> {
        let deadline = Instant::now() + within;
        loop {
            match time::timeout_at(deadline, self.events.next()).await {
                Ok(Some(event)) if pred(&event) => return Some(event),
                Ok(Some(_)) => continue,
                _ => return None,
            }
        }
    }

    /// Every event published during the next `within`.
    pub async fn collect(&mut self, within: Duration) -> Vec<Event> {
        let deadline = Instant::now() + within;
        let mut out = Vec::new();
        while let Ok(Some(event)) = time::timeout_at(deadline, self.events.next()).await {
            out.push(event);
        }
        out
    }

    pub fn assert_no_overlap(&self) {
        assert_eq!(
            self.radio.overlaps(),
            0,
            "{} started a broadcast on a busy slot",
            self.identity.display_name
        );
    }
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn chats_in(events: &[Event]) -> Vec<(PeerHash, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::ChatReceived { from, text } => Some((*from, text.clone())),
            _ => None,
        })
        .collect()
}
