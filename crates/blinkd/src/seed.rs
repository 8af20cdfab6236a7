//! Persisted identity seed.
//!
//! The peer hash is derived from a random seed generated on first run and
//! kept as hex text next to the config, so a device keeps its hash across
//! restarts.

use std::path::Path;

use anyhow::{Context, Result};

use blink_core::identity::random_seed;

/// Read the seed at `path`, creating it if missing.
pub fn load_or_create(path: &Path) -> Result<Vec<u8>> {
    if path.exists() {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed {}", path.display()))?;
        let seed = hex::decode(text.trim())
            .with_context(|| format!("seed {} is not hex", path.display()))?;
        if seed.is_empty() {
            anyhow::bail!("seed {} is empty", path.display());
        }
        return Ok(seed);
    }

    let seed = random_seed().to_vec();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, hex::encode(&seed))
        .with_context(|| format!("failed to write seed {}", path.display()))?;
    tracing::info!(path = %path.display(), "new identity seed written");
    Ok(seed)
}
