use std::path::Path;

use anyhow::Context;
use tether_core::PhaseOutput;
use tracing::debug;

pub const SECRET_FILE: &str = "secret.txt";

/// Write both artifacts, newline separated. Phases with nothing to hand
/// on leave any previous file alone.
pub async fn write_artifacts(path: &Path, artifacts: &PhaseOutput) -> anyhow::Result<()> {
    if artifacts.is_empty() {
        debug!("no artifacts to write");
        return Ok(());
    }
    tokio::fs::write(path, artifacts.to_secret_text())
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote to {}.", path.display());
    Ok(())
}
