//! blinkd — Blink proximity daemon.
//!
//! Advertises presence over link-local UDP multicast, prints every engine
//! event as a JSON line on stdout and takes operator commands on stdin.

use std::sync::Arc;

use anyhow::{Context, Result};

use blink_core::config::BlinkConfig;
use blink_core::{Identity, PeerHash};
use blink_services::{MemoryChatStore, MemoryMatchStore};
use blinkd::console::{self, ConsoleExit};
use blinkd::radio::udp::UdpRadio;
use blinkd::{seed, Engine};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // Load config
    if let Err(e) = BlinkConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = BlinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BlinkConfig::default()
    });
    if let Some(interface) = std::env::args().nth(1) {
        config.radio.interface = interface;
    }

    // Identity
    let seed = seed::load_or_create(&config.identity.seed_path).context("identity seed")?;
    let identity = Identity::new(
        PeerHash::derive(&seed),
        config.identity.display_name.clone(),
        config.identity.gender,
    );
    tracing::info!(
        peer = %identity.hash,
        name = %identity.display_name,
        gender = ?identity.gender,
        "blinkd starting"
    );

    // Radio and engine
    let (radio, observations) = UdpRadio::spawn(&config.radio)?;
    let matches = MemoryMatchStore::new();
    let chats = MemoryChatStore::new();
    let (engine, mut engine_task) = Engine::spawn(
        &identity,
        config.protocol.clone(),
        radio,
        observations,
        Arc::new(matches),
        Arc::new(chats),
    )?;

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let event_printer = {
        let mut events = engine.subscribe();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
                }
            }
        })
    };

    let mut console_task = tokio::spawn(console::run(engine.clone(), identity));
    let mut console_open = true;

    // ── Wait for exit ────────────────────────────────────────────────────────

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            r = &mut console_task, if console_open => {
                console_open = false;
                match r {
                    Ok(Ok(ConsoleExit::Quit)) => {
                        tracing::info!("quit requested");
                        break;
                    }
                    Ok(Ok(ConsoleExit::Eof)) => {
                        tracing::info!("stdin closed, running until interrupted")
                    }
                    Ok(Err(e)) => tracing::error!(error = %e, "console failed"),
                    Err(e) => tracing::error!(error = %e, "console task panicked"),
                }
            }
            r = &mut engine_task => {
                tracing::error!("engine exited: {:?}", r);
                break;
            }
        }
    }

    engine.shutdown().await;
    event_printer.abort();
    Ok(())
}
