//! Configuration system for Blink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/blink/config.toml
//!   3. ~/.config/blink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::identity::Gender;
use crate::wire::{MAX_CHUNKS, MAX_PAYLOAD};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    pub identity: IdentityConfig,
    pub radio: RadioConfig,
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Name shown to nearby peers. Truncated to 10 bytes on the wire.
    pub display_name: String,
    pub gender: Gender,
    /// Random seed the peer hash is derived from. Auto-generated on first run.
    pub seed_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Network interface for the UDP development radio. Empty = default route.
    pub interface: String,
    /// UDP port advertisements are sent to and observed on.
    pub port: u16,
    /// How often the current advertisement is re-sent, in milliseconds.
    pub advertise_interval_ms: u64,
}

/// Protocol timing. Every window is configurable; the defaults are what
/// deployed peers expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Advertise presence on startup.
    pub visible: bool,
    /// Generic duplicate-suppression window.
    pub dedup_window_secs: u64,
    /// Per-sender match request throttle.
    pub match_cooldown_secs: u64,
    /// Incomplete chunked messages are discarded after this long.
    pub reassembly_timeout_secs: u64,
    /// Upper bound on concurrently open reassembly buffers.
    pub max_reassembly_buffers: usize,
    /// Match frames are re-sent at this interval...
    pub match_repeat_interval_ms: u64,
    /// ...for this long.
    pub match_burst_window_ms: u64,
    /// Window each non-match packet holds the broadcast slot.
    pub burst_window_ms: u64,
    /// Pause between the end of a burst and resumed presence.
    pub settle_delay_ms: u64,
    /// Pause between resumed presence and the next queued item.
    pub inter_item_gap_ms: u64,
    /// Visibility/broadcast divergence check.
    pub health_check_interval_secs: u64,
    /// Attempts to start a burst broadcast before the item is dropped.
    pub max_broadcast_attempts: u32,
    /// Delay between broadcast attempts.
    pub broadcast_retry_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            display_name: "blink".to_string(),
            gender: Gender::Unspecified,
            seed_path: config_dir().join("seed"),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            port: 9700,
            advertise_interval_ms: 100,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            visible: true,
            dedup_window_secs: 45,
            match_cooldown_secs: 60,
            reassembly_timeout_secs: 45,
            max_reassembly_buffers: 64,
            match_repeat_interval_ms: 2_000,
            match_burst_window_ms: 15_000,
            burst_window_ms: 2_000,
            settle_delay_ms: 300,
            inter_item_gap_ms: 500,
            health_check_interval_secs: 10,
            max_broadcast_attempts: 3,
            broadcast_retry_ms: 500,
        }
    }
}

impl ProtocolConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn match_cooldown(&self) -> Duration {
        Duration::from_secs(self.match_cooldown_secs)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_secs(self.reassembly_timeout_secs)
    }

    pub fn match_repeat_interval(&self) -> Duration {
        Duration::from_millis(self.match_repeat_interval_ms)
    }

    pub fn match_burst_window(&self) -> Duration {
        Duration::from_millis(self.match_burst_window_ms)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn inter_item_gap(&self) -> Duration {
        Duration::from_millis(self.inter_item_gap_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn broadcast_retry(&self) -> Duration {
        Duration::from_millis(self.broadcast_retry_ms)
    }

    /// Chunks one chat may span. Each chunk holds the slot for a burst
    /// window, and the whole burst must fit inside one reassembly timeout.
    pub fn max_chat_chunks(&self) -> usize {
        let fit = self.reassembly_timeout_secs.saturating_mul(1_000) / self.burst_window_ms.max(1);
        usize::try_from(fit).unwrap_or(MAX_CHUNKS).clamp(1, MAX_CHUNKS)
    }

    /// Longest chat text, in bytes, the engine will queue.
    pub fn max_chat_len(&self) -> usize {
        self.max_chat_chunks() * MAX_PAYLOAD
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("blink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            BlinkConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&BlinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply BLINK_* overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BLINK_IDENTITY__DISPLAY_NAME") {
            self.identity.display_name = v;
        }
        if let Some(v) = lookup("BLINK_IDENTITY__GENDER") {
            if let Ok(g) = v.parse() {
                self.identity.gender = g;
            }
        }
        if let Some(v) = lookup("BLINK_RADIO__INTERFACE") {
            self.radio.interface = v;
        }
        if let Some(v) = lookup("BLINK_RADIO__PORT") {
            if let Ok(p) = v.parse() {
                self.radio.port = p;
            }
        }
        if let Some(v) = lookup("BLINK_PROTOCOL__VISIBLE") {
            self.protocol.visible = v == "true" || v == "1";
        }
    }
}
