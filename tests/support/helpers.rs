use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use proofaudit::{ComparisonRecord, ProgressState};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

/// Loads every `<leaf>.json` artifact in `dir`, keyed by leaf index.
pub fn read_artifacts(dir: &Path) -> Result<BTreeMap<u64, ComparisonRecord>> {
    let mut artifacts = BTreeMap::new();
    if !dir.exists() {
        return Ok(artifacts);
    }
    for entry in std::fs::read_dir(dir).context("failed to list output directory")? {
        let path = entry?.path();
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let leaf_index: u64 = stem
            .parse()
            .with_context(|| format!("unexpected file in output directory: {}", path.display()))?;
        let body = std::fs::read(&path)?;
        let record = serde_json::from_slice(&body)
            .with_context(|| format!("invalid artifact {}", path.display()))?;
        artifacts.insert(leaf_index, record);
    }
    Ok(artifacts)
}

pub async fn wait_for_completed(
    progress: &ProgressState,
    target: u64,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    loop {
        let current = progress.completed_leaves();
        if current >= target {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("audit did not complete {target} leaves within {timeout:?} (completed: {current})");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
