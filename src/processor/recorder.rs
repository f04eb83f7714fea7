//! Persists per-leaf comparison artifacts when endpoints fail to agree.

use crate::proof::{AssetId, EndpointResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// One endpoint's labelled result for a leaf.
pub type LabelledResult = (String, EndpointResult);

/// Artifact body: `{"assetId": ..., "<label>": {fetchOutcome, verificationOutcome}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRecord {
    pub asset_id: AssetId,
    #[serde(flatten)]
    pub endpoints: BTreeMap<String, EndpointResult>,
}

impl ComparisonRecord {
    pub fn new(asset_id: AssetId, results: &[LabelledResult]) -> Self {
        Self {
            asset_id,
            endpoints: results.iter().cloned().collect(),
        }
    }

    pub fn all_valid(&self) -> bool {
        self.endpoints
            .values()
            .all(|result| result.verification_outcome.is_valid())
    }
}

#[derive(Debug, Clone)]
pub struct MismatchRecorder {
    output_dir: PathBuf,
}

impl MismatchRecorder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Artifact location for `leaf_index`.
    pub fn path_for(&self, leaf_index: u64) -> PathBuf {
        self.output_dir.join(format!("{leaf_index}.json"))
    }

    /// Writes `<leaf_index>.json` unless every endpoint verified as valid.
    ///
    /// Returns the artifact path when one was written. An existing artifact for
    /// the same leaf is replaced.
    pub async fn record(
        &self,
        leaf_index: u64,
        asset_id: &AssetId,
        results: &[LabelledResult],
    ) -> Result<Option<PathBuf>> {
        let record = ComparisonRecord::new(*asset_id, results);
        if record.all_valid() {
            return Ok(None);
        }

        let body = serde_json::to_vec_pretty(&record)
            .with_context(|| format!("failed to encode comparison record for leaf {leaf_index}"))?;
        let dir = self.output_dir.clone();
        let target = self.path_for(leaf_index);

        let written = tokio::task::spawn_blocking(move || {
            write_atomically(&dir, &target, &body)?;
            Ok::<_, anyhow::Error>(target)
        })
        .await
        .context("artifact writer task failed")??;

        Ok(Some(written))
    }
}

fn write_atomically(dir: &Path, target: &Path, body: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to stage artifact in {}", dir.display()))?;
    staged
        .write_all(body)
        .context("failed to write staged artifact")?;
    staged
        .as_file()
        .sync_all()
        .context("failed to flush staged artifact")?;
    staged
        .persist(target)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to move artifact into {}", target.display()))?;
    Ok(())
}
