//! Training callbacks for early stopping and metric-driven checkpointing.

use crate::config::EarlyStoppingConfig;
use crate::error::{FitError, Result};
use crate::nn::Model;
use crate::training::checkpoint::{Checkpoint, CheckpointManager};
use crate::training::metrics::EpochMetrics;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Action a callback can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Whether a monitored metric should go down or up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    #[default]
    Min,
    Max,
}

impl MonitorMode {
    /// Whether `current` beats `best` by more than `min_delta`.
    pub fn improved(self, current: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Self::Min => current < best - min_delta,
            Self::Max => current > best + min_delta,
        }
    }

    /// Whether `a` ranks ahead of `b`.
    pub fn better(self, a: f64, b: f64) -> bool {
        self.improved(a, b, 0.0)
    }
}

/// Trait for training callbacks.
pub trait TrainingCallback {
    fn name(&self) -> &str;

    /// Called at the end of each epoch with the epoch's logged metrics.
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        metrics: &EpochMetrics,
        model: &dyn Model,
    ) -> Result<CallbackAction>;
}

fn lookup(
    callback: &str,
    monitor: &str,
    metrics: &EpochMetrics,
    strict: bool,
) -> Result<Option<f64>> {
    match metrics.get(monitor) {
        Some(v) => Ok(Some(*v)),
        None if strict => Err(FitError::config(format!(
            "{callback} monitors '{monitor}', which is not logged (available: {})",
            metrics.keys().cloned().collect::<Vec<_>>().join(", ")
        ))),
        None => {
            tracing::warn!(callback, monitor, "Monitored metric missing, skipping");
            Ok(None)
        }
    }
}

/// Early stopping callback.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub monitor: String,
    pub patience: usize,
    pub min_delta: f64,
    pub mode: MonitorMode,
    pub verbose: bool,
    pub strict: bool,
    counter: usize,
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(monitor: &str, patience: usize, min_delta: f64, mode: MonitorMode) -> Self {
        Self {
            monitor: monitor.to_string(),
            patience,
            min_delta: min_delta.abs(),
            mode,
            verbose: false,
            strict: true,
            counter: 0,
            best: None,
        }
    }

    pub fn from_config(config: &EarlyStoppingConfig) -> Self {
        let mut es = Self::new(&config.monitor, config.patience, config.min_delta, config.mode);
        es.verbose = config.verbose;
        es.strict = config.strict;
        es
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best
    }

    pub fn wait_count(&self) -> usize {
        self.counter
    }

    /// Feed one observation of the monitored metric.
    pub fn observe(&mut self, epoch: usize, value: f64) -> CallbackAction {
        if !value.is_finite() {
            tracing::warn!(epoch, monitor = %self.monitor, value, "Monitored metric is not finite, stopping");
            return CallbackAction::Stop;
        }

        match self.best {
            Some(best) if !self.mode.improved(value, best, self.min_delta) => {
                self.counter += 1;
                if self.counter >= self.patience {
                    tracing::info!(
                        epoch,
                        monitor = %self.monitor,
                        best,
                        patience = self.patience,
                        "Early stopping triggered"
                    );
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }
            _ => {
                if self.verbose {
                    tracing::info!(epoch, monitor = %self.monitor, value, "Metric improved");
                }
                self.best = Some(value);
                self.counter = 0;
                CallbackAction::Continue
            }
        }
    }
}

impl TrainingCallback for EarlyStopping {
    fn name(&self) -> &str {
        "EarlyStopping"
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        metrics: &EpochMetrics,
        _model: &dyn Model,
    ) -> Result<CallbackAction> {
        Ok(match lookup("EarlyStopping", &self.monitor, metrics, self.strict)? {
            Some(value) => self.observe(epoch, value),
            None => CallbackAction::Continue,
        })
    }
}

/// Saves the model whenever the monitored metric ranks among the best `save_top_k`.
pub struct ModelCheckpoint {
    pub monitor: String,
    pub mode: MonitorMode,
    manager: CheckpointManager,
    last_saved: Option<Checkpoint>,
}

impl ModelCheckpoint {
    pub fn new(dirpath: &Path, monitor: &str, mode: MonitorMode, save_top_k: usize) -> Self {
        Self {
            monitor: monitor.to_string(),
            mode,
            manager: CheckpointManager::new(dirpath.to_path_buf(), save_top_k.max(1), mode),
            last_saved: None,
        }
    }

    pub fn dirpath(&self) -> &Path {
        self.manager.dir()
    }

    pub fn last_saved(&self) -> Option<&Checkpoint> {
        self.last_saved.as_ref()
    }

    fn file_name(&self, epoch: usize, score: f64) -> PathBuf {
        PathBuf::from(format!("epoch={epoch}-{}={score:.4}.ckpt.json", self.monitor))
    }
}

impl TrainingCallback for ModelCheckpoint {
    fn name(&self) -> &str {
        "ModelCheckpoint"
    }

    fn on_epoch_end(
        &mut self,
        epoch: usize,
        metrics: &EpochMetrics,
        model: &dyn Model,
    ) -> Result<CallbackAction> {
        let Some(score) = lookup("ModelCheckpoint", &self.monitor, metrics, false)? else {
            return Ok(CallbackAction::Continue);
        };
        if !score.is_finite() || !self.manager.qualifies(score)? {
            return Ok(CallbackAction::Continue);
        }

        let file = self.file_name(epoch, score);
        let checkpoint = self
            .manager
            .save(&file, epoch, &self.monitor, score, &model.state_dict())?;
        tracing::info!(
            epoch,
            monitor = %self.monitor,
            score,
            path = %checkpoint.path.display(),
            "Saved checkpoint"
        );
        self.last_saved = Some(checkpoint);
        Ok(CallbackAction::Continue)
    }
}
