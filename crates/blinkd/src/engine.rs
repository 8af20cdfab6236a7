//! The engine actor.
//!
//! One task owns the scheduler, the router and every table behind them.
//! Callers talk to it through a cloneable [`Engine`] handle; the task
//! serializes commands, observations, scheduler wakeups and health checks
//! through a single `select!` loop, so receiving never waits on a burst.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use blink_core::config::ProtocolConfig;
use blink_core::message::match_payload;
use blink_core::wire::{EncodeError, PacketKind};
use blink_core::{Identity, IdentityProvider, PeerHash};
use blink_services::{ChatStore, Direction, Event, MatchStore, PeerRegistry, Subscription};

use crate::dispatch::Router;
use crate::radio::{Observation, Radio};
use crate::scheduler::Scheduler;

/// Events buffered per subscriber before the slowest starts losing them.
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("match request to {peer} already sent, retry in {remaining:?}")]
    CooldownActive { peer: PeerHash, remaining: Duration },

    #[error("message of {len} bytes exceeds {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("invalid target {0}")]
    InvalidTarget(PeerHash),

    #[error("engine stopped")]
    Stopped,

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

type Reply = oneshot::Sender<Result<(), EngineError>>;

enum Command {
    SetIdentity(Identity, Reply),
    SetVisibility(bool),
    SendMatchRequest(PeerHash, Reply),
    RespondToMatch {
        target: PeerHash,
        accept: bool,
        reply: Reply,
    },
    SendChat {
        target: PeerHash,
        text: String,
        reply: Reply,
    },
    SendUnmatch(PeerHash, Reply),
    SendBlock(PeerHash, Reply),
    Shutdown(oneshot::Sender<()>),
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct Engine {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<Event>,
    registry: PeerRegistry,
}

impl Engine {
    /// Start the engine task. Must be called from within a tokio runtime.
    ///
    /// The identity is read once here; later changes go through
    /// [`Engine::set_identity`].
    pub fn spawn(
        identity: &dyn IdentityProvider,
        config: ProtocolConfig,
        radio: Arc<dyn Radio>,
        observations: mpsc::Receiver<Observation>,
        matches: Arc<dyn MatchStore>,
        chats: Arc<dyn ChatStore>,
    ) -> Result<(Engine, JoinHandle<()>), EngineError> {
        let identity = Identity::from_provider(identity);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let registry = PeerRegistry::new();

        let scheduler = Scheduler::new(radio, events.clone(), config.clone(), &identity)?;
        let router = Router::new(
            identity.hash,
            &config,
            registry.clone(),
            matches.clone(),
            chats.clone(),
            events.clone(),
        );

        let task = EngineTask {
            identity,
            health_interval: config.health_check_interval(),
            max_chat_len: config.max_chat_len(),
            scheduler,
            router,
            registry: registry.clone(),
            matches,
            chats,
            commands: command_rx,
            observations,
            observations_open: true,
        };
        let handle = tokio::spawn(task.run());

        Ok((
            Engine {
                commands: command_tx,
                events,
                registry,
            },
            handle,
        ))
    }

    /// Snapshot a new identity and re-advertise under it.
    pub fn set_identity(
        &self,
        identity: &dyn IdentityProvider,
    ) -> impl Future<Output = Result<(), EngineError>> + '_ {
        let identity = Identity::from_provider(identity);
        self.request(move |reply| Command::SetIdentity(identity, reply))
    }

    pub fn set_visibility(&self, visible: bool) -> Result<(), EngineError> {
        self.commands
            .send(Command::SetVisibility(visible))
            .map_err(|_| EngineError::Stopped)
    }

    pub async fn send_match_request(&self, target: PeerHash) -> Result<(), EngineError> {
        self.request(|reply| Command::SendMatchRequest(target, reply)).await
    }

    pub async fn respond_to_match(&self, target: PeerHash, accept: bool) -> Result<(), EngineError> {
        self.request(|reply| Command::RespondToMatch {
            target,
            accept,
            reply,
        })
        .await
    }

    pub async fn send_chat(&self, target: PeerHash, text: impl Into<String>) -> Result<(), EngineError> {
        let text = text.into();
        self.request(|reply| Command::SendChat {
            target,
            text,
            reply,
        })
        .await
    }

    pub async fn send_unmatch(&self, target: PeerHash) -> Result<(), EngineError> {
        self.request(|reply| Command::SendUnmatch(target, reply)).await
    }

    pub async fn send_block(&self, target: PeerHash) -> Result<(), EngineError> {
        self.request(|reply| Command::SendBlock(target, reply)).await
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }

    /// Read-only view of discovered peers.
    pub fn peers(&self) -> PeerRegistry {
        self.registry.clone()
    }

    /// Stop the engine and release the radio. Idempotent.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }
}

// ── Task ──────────────────────────────────────────────────────────────────────

struct EngineTask {
    identity: Identity,
    health_interval: Duration,
    max_chat_len: usize,
    scheduler: Scheduler,
    router: Router,
    registry: PeerRegistry,
    matches: Arc<dyn MatchStore>,
    chats: Arc<dyn ChatStore>,
    commands: mpsc::UnboundedReceiver<Command>,
    observations: mpsc::Receiver<Observation>,
    observations_open: bool,
}

impl EngineTask {
    async fn run(mut self) {
        tracing::info!(
            peer = %self.identity.hash,
            name = %self.identity.display_name,
            visible = self.scheduler.is_visible(),
            "engine starting"
        );
        self.scheduler.start();

        let mut health = time::interval_at(Instant::now() + self.health_interval, self.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = self.scheduler.next_wakeup();

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.scheduler.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command, Instant::now()),
                    None => {
                        tracing::debug!("all engine handles dropped");
                        self.scheduler.shutdown();
                        break;
                    }
                },

                observation = self.observations.recv(), if self.observations_open => match observation {
                    Some(observation) => {
                        self.router.handle_frame(
                            &observation.payload,
                            observation.signal_strength,
                            Instant::now(),
                        );
                    }
                    None => {
                        tracing::warn!("observation channel closed, receive path stopped");
                        self.observations_open = false;
                    }
                },

                _ = time::sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                    self.scheduler.poll(Instant::now());
                }

                _ = health.tick() => {
                    let now = Instant::now();
                    self.scheduler.health_check(now);
                    let expired = self.router.sweep(now);
                    tracing::debug!(
                        peers = self.registry.len(),
                        queued = self.scheduler.queue_len(),
                        expired,
                        "health check"
                    );
                }
            }
        }

        tracing::info!("engine stopped");
    }

    fn handle_command(&mut self, command: Command, now: Instant) {
        match command {
            Command::SetIdentity(identity, reply) => {
                let _ = reply.send(self.set_identity(identity));
            }
            Command::SetVisibility(visible) => self.scheduler.set_visibility(visible),
            Command::SendMatchRequest(target, reply) => {
                let _ = reply.send(self.send_match_request(target, now));
            }
            Command::RespondToMatch {
                target,
                accept,
                reply,
            } => {
                let _ = reply.send(self.respond_to_match(target, accept, now));
            }
            Command::SendChat {
                target,
                text,
                reply,
            } => {
                let _ = reply.send(self.send_chat(target, text, now));
            }
            Command::SendUnmatch(target, reply) => {
                let result = self.check_target(target).map(|()| {
                    self.matches.remove_match(target);
                    self.scheduler
                        .enqueue(PacketKind::Unmatch, target, Vec::new(), now);
                });
                let _ = reply.send(result);
            }
            Command::SendBlock(target, reply) => {
                let result = self.check_target(target).map(|()| {
                    self.matches.block_peer(target);
                    self.scheduler
                        .enqueue(PacketKind::Block, target, Vec::new(), now);
                });
                let _ = reply.send(result);
            }
            // handled in the loop
            Command::Shutdown(_) => {}
        }
    }

    fn set_identity(&mut self, identity: Identity) -> Result<(), EngineError> {
        self.scheduler.set_identity(&identity)?;
        self.router.set_local(identity.hash);
        tracing::info!(peer = %identity.hash, name = %identity.display_name, "identity changed");
        self.identity = identity;
        Ok(())
    }

    fn send_match_request(&mut self, target: PeerHash, now: Instant) -> Result<(), EngineError> {
        self.check_target(target)?;

        let guard = self.router.guard_mut();
        if let Some(remaining) = guard.outbound_cooldown_remaining(&target, now) {
            return Err(EngineError::CooldownActive {
                peer: target,
                remaining,
            });
        }
        guard.try_send_match_request(target, now);

        self.scheduler.enqueue(
            PacketKind::MatchRequest,
            target,
            match_payload(self.identity.gender),
            now,
        );
        Ok(())
    }

    fn respond_to_match(&mut self, target: PeerHash, accept: bool, now: Instant) -> Result<(), EngineError> {
        self.check_target(target)?;

        let kind = if accept {
            let gender = self
                .matches
                .pending_gender(&target)
                .or_else(|| self.registry.get(&target).map(|peer| peer.gender))
                .unwrap_or_default();
            self.matches.finalize_match(target, gender);
            PacketKind::MatchAccept
        } else {
            self.matches.remove_match(target);
            PacketKind::MatchReject
        };

        self.scheduler
            .enqueue(kind, target, match_payload(self.identity.gender), now);
        Ok(())
    }

    fn send_chat(&mut self, target: PeerHash, text: String, now: Instant) -> Result<(), EngineError> {
        self.check_target(target)?;

        let max = self.max_chat_len;
        if text.len() > max {
            return Err(EngineError::MessageTooLong {
                len: text.len(),
                max,
            });
        }

        self.chats
            .append_message(target, &text, Direction::Outgoing);
        self.scheduler
            .enqueue(PacketKind::Chat, target, text.into_bytes(), now);
        Ok(())
    }

    fn check_target(&self, target: PeerHash) -> Result<(), EngineError> {
        if target.is_broadcast() || target == self.identity.hash {
            return Err(EngineError::InvalidTarget(target));
        }
        Ok(())
    }
}
