//! One-shot run orchestration: run directory, policies, experiment, fit.

use crate::config::ExperimentConfig;
use crate::error::{FitError, Result};
use crate::training::callbacks::{EarlyStopping, ModelCheckpoint};
use crate::training::checkpoint::{Checkpoint, CheckpointManager};
use crate::training::experiment::Experiment;
use crate::training::logger::{RUN_DIR_ENV, RunLogger};
use crate::training::metrics::TrainingMetrics;
use crate::training::record::RunRecord;
use crate::training::trainer::Trainer;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Base directory for run directories when none is given.
pub const DEFAULT_BASE_DIR: &str = "runs";

const RECORD_FILE: &str = "run.json";

/// Outcome of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub metrics: TrainingMetrics,
    pub best_checkpoint: Option<Checkpoint>,
    pub record: RunRecord,
}

/// Absolute `<base>/<YYYYMMDD-HHMMSS>` for a run started at `now`.
pub fn run_dir_for(base: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let base = std::path::absolute(base)?;
    Ok(base.join(now.format("%Y%m%d-%H%M%S").to_string()))
}

/// Create a fresh run directory for `now`, never reusing an existing one.
///
/// A second run in the same second gets `<stamp>-1`, then `<stamp>-2`, and so on.
pub fn create_run_dir(base: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let stamped = run_dir_for(base, now)?;
    if let Some(parent) = stamped.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let stamp = stamped
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut candidate = stamped.clone();
    for suffix in 1.. {
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(taken = %candidate.display(), "Run directory exists, trying next suffix");
                candidate = stamped.with_file_name(format!("{stamp}-{suffix}"));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(FitError::state(format!(
        "no free run directory under {}",
        stamped.display()
    )))
}

pub struct Runner;

impl Runner {
    pub fn run(config: ExperimentConfig) -> Result<RunSummary> {
        Self::run_in(config, Path::new(DEFAULT_BASE_DIR))
    }

    /// Train `config` in a fresh timestamped directory under `base`.
    ///
    /// The directory is exported as `FITKIT_RUN_DIR` before the trainer is
    /// built; `run.json` is written whether the fit succeeds or fails.
    pub fn run_in(config: ExperimentConfig, base: &Path) -> Result<RunSummary> {
        config.validate()?;
        let run_dir = create_run_dir(base, Local::now())?;
        // SAFETY: runs are single-threaded; nothing reads the environment concurrently.
        unsafe { std::env::set_var(RUN_DIR_ENV, &run_dir) };
        tracing::info!(run_dir = %run_dir.display(), "Created run directory");

        let name = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut record = RunRecord::new(&name, &config.model.kind, serde_json::to_value(&config)?);
        record.seed = config.trainer.seed;
        record.start();
        let record_path = run_dir.join(RECORD_FILE);
        record.save(&record_path)?;

        let es = &config.early_stopping;
        let mode = es.mode;
        let monitor = es.monitor.clone();

        let result = Self::fit(config, &run_dir);
        match result {
            Ok(metrics) => {
                let best = CheckpointManager::new(run_dir.clone(), 1, mode).best()?;
                record.complete(metrics.clone(), best.clone());
                record.save(&record_path)?;
                tracing::info!(
                    run_dir = %run_dir.display(),
                    monitor = %monitor,
                    best = ?best.as_ref().map(|c| c.score),
                    "Run completed"
                );
                Ok(RunSummary {
                    run_dir,
                    metrics,
                    best_checkpoint: best,
                    record,
                })
            }
            Err(e) => {
                tracing::error!(run_dir = %run_dir.display(), error = %e, "Run failed");
                record.fail(&e);
                record.save(&record_path)?;
                Err(e)
            }
        }
    }

    fn fit(config: ExperimentConfig, run_dir: &Path) -> Result<TrainingMetrics> {
        let es = &config.early_stopping;
        let checkpoint = ModelCheckpoint::new(run_dir, &es.monitor, es.mode, 1);
        let early_stopping = EarlyStopping::from_config(es);
        let mut trainer = Trainer::new(config.trainer.clone())
            .with_callback(Box::new(checkpoint))
            .with_callback(Box::new(early_stopping));

        let mut experiment = Experiment::new(config)?;
        let logger = RunLogger::from_env()?;
        if logger.dir() != run_dir {
            return Err(FitError::state(format!(
                "{RUN_DIR_ENV} points to {} instead of {}",
                logger.dir().display(),
                run_dir.display()
            )));
        }
        trainer = trainer.with_logger(logger);
        trainer.fit(&mut experiment)
    }
}
