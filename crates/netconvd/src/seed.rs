// Startup seeding
//
// A seed file is a JSON array of desired states recorded into the store
// before the HTTP surface opens. Seeded entries are never pushed to a device.

use anyhow::{Context, Result};
use netconv_core::{ConvergenceStore, DesiredState};
use std::path::Path;
use tracing::{debug, info};

/// Read and validate a seed file
pub fn load(path: &Path) -> Result<Vec<DesiredState>> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let states: Vec<DesiredState> = serde_json::from_slice(&data)
        .with_context(|| format!("Seed file {} is not a JSON array of items", path.display()))?;

    for (index, state) in states.iter().enumerate() {
        state
            .validate()
            .with_context(|| format!("Seed entry {} is invalid", index))?;
    }
    Ok(states)
}

/// Append every seed entry whose identity key has no current record
///
/// Returns the number of records written.
pub async fn apply(store: &dyn ConvergenceStore, states: Vec<DesiredState>) -> Result<usize> {
    let mut written = 0;
    for state in states {
        let key = state.identity_key();
        if store.find_current(&key).await?.is_some() {
            debug!("Seed entry for {} already recorded, skipping", key);
            continue;
        }
        store.append(state).await?;
        written += 1;
    }
    if written > 0 {
        info!("Seeded {} item(s)", written);
    }
    Ok(written)
}
