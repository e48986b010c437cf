//! File-backed experiment logger rooted at the run directory.
//!
//! The run directory is handed over through `FITKIT_RUN_DIR`, which the
//! runner sets before the trainer is built.

use crate::error::{FitError, Result};
use crate::persistence::{append_json_line, atomic_write_json, read_json_lines};
use crate::training::metrics::EpochMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the active run directory.
pub const RUN_DIR_ENV: &str = "FITKIT_RUN_DIR";

const HPARAMS_FILE: &str = "hparams.json";
const METRICS_FILE: &str = "metrics.jsonl";

/// One line of `metrics.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub epoch: usize,
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub metrics: EpochMetrics,
}

#[derive(Debug, Clone)]
pub struct RunLogger {
    dir: PathBuf,
}

impl RunLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Logger for the run directory exported by the runner.
    pub fn from_env() -> Result<Self> {
        let dir = std::env::var_os(RUN_DIR_ENV)
            .ok_or_else(|| FitError::config(format!("{RUN_DIR_ENV} is not set")))?;
        Ok(Self::new(dir))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_hyperparams<T: Serialize>(&self, hparams: &T) -> Result<()> {
        atomic_write_json(&self.dir.join(HPARAMS_FILE), hparams)?;
        tracing::debug!(dir = %self.dir.display(), "Logged hyperparameters");
        Ok(())
    }

    pub fn log_metrics(&self, epoch: usize, step: usize, metrics: &EpochMetrics) -> Result<()> {
        let record = MetricRecord {
            epoch,
            step,
            timestamp: Utc::now(),
            metrics: metrics.clone(),
        };
        append_json_line(&self.dir.join(METRICS_FILE), &record)?;
        tracing::info!(epoch, step, metrics = ?metrics, "Epoch metrics");
        Ok(())
    }

    /// Every metric record logged so far.
    pub fn history(&self) -> Result<Vec<MetricRecord>> {
        read_json_lines(&self.dir.join(METRICS_FILE))
    }
}
