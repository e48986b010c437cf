//! Training infrastructure: experiment, trainer, runner, callbacks, checkpoints.

pub mod callbacks;
pub mod checkpoint;
pub mod experiment;
pub mod logger;
pub mod metrics;
pub mod record;
pub mod reproducibility;
pub mod runner;
pub mod strategy;
pub mod trainer;

pub use callbacks::{CallbackAction, EarlyStopping, ModelCheckpoint, MonitorMode, TrainingCallback};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use experiment::{ConfiguredOptimizers, Experiment, StepOutput};
pub use logger::{RUN_DIR_ENV, RunLogger};
pub use metrics::{EpochMetrics, TrainingMetrics};
pub use record::{RunRecord, RunStatus};
pub use runner::{RunSummary, Runner};
pub use strategy::{Strategy, TrainerContext};
pub use trainer::Trainer;
