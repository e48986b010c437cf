//! Checkpoint management for training runs.

use crate::error::{FitError, Result};
use crate::nn::StateDict;
use crate::persistence::{atomic_write, atomic_write_json, load_json};
use crate::training::callbacks::MonitorMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const MANIFEST: &str = "checkpoints.json";

/// A saved model state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub epoch: usize,
    pub monitor: String,
    pub score: f64,
    pub path: PathBuf,
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Keeps the best `max_checkpoints` model states of a run directory,
/// ranked by monitored score.
pub struct CheckpointManager {
    dir: PathBuf,
    max_checkpoints: usize,
    mode: MonitorMode,
}

impl CheckpointManager {
    pub fn new(dir: PathBuf, max_checkpoints: usize, mode: MonitorMode) -> Self {
        Self {
            dir,
            max_checkpoints,
            mode,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoints currently kept, best first.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(load_json(&self.dir.join(MANIFEST))?.unwrap_or_default())
    }

    pub fn best(&self) -> Result<Option<Checkpoint>> {
        Ok(self.list()?.into_iter().next())
    }

    /// Whether a checkpoint with this score would be kept.
    pub fn qualifies(&self, score: f64) -> Result<bool> {
        let kept = self.list()?;
        if kept.len() < self.max_checkpoints {
            return Ok(true);
        }
        Ok(kept
            .last()
            .is_none_or(|worst| self.mode.better(score, worst.score)))
    }

    /// Write a model state under `file` and record it in the manifest,
    /// evicting the worst entries beyond `max_checkpoints`.
    pub fn save(
        &self,
        file: &Path,
        epoch: usize,
        monitor: &str,
        score: f64,
        state: &StateDict,
    ) -> Result<Checkpoint> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(file);
        let bytes = serde_json::to_vec_pretty(state)?;
        atomic_write(&path, &bytes)?;

        let hash = format!("{:x}", Sha256::digest(&bytes));
        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            epoch,
            monitor: monitor.to_string(),
            score,
            path,
            hash,
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        };

        let mut checkpoints = self.list()?;
        checkpoints.push(checkpoint.clone());
        let mode = self.mode;
        checkpoints.sort_by(|a, b| match mode {
            MonitorMode::Min => a.score.total_cmp(&b.score),
            MonitorMode::Max => b.score.total_cmp(&a.score),
        });

        while checkpoints.len() > self.max_checkpoints {
            if let Some(evicted) = checkpoints.pop() {
                if evicted.path != checkpoint.path {
                    if let Err(e) = std::fs::remove_file(&evicted.path) {
                        tracing::warn!(path = %evicted.path.display(), error = %e, "Failed to remove evicted checkpoint");
                    }
                }
            }
        }

        atomic_write_json(&self.dir.join(MANIFEST), &checkpoints)?;
        Ok(checkpoint)
    }

    /// Read back a checkpoint, verifying its content hash.
    pub fn load_state(&self, checkpoint: &Checkpoint) -> Result<StateDict> {
        let bytes = std::fs::read(&checkpoint.path)?;
        let hash = format!("{:x}", Sha256::digest(&bytes));
        if hash != checkpoint.hash {
            return Err(FitError::data(format!(
                "checkpoint {} failed hash verification",
                checkpoint.path.display()
            )));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
