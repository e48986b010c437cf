//! # fitkit-core
//!
//! Configuration-driven supervised training experiments. A config names a
//! model, loss, optimizer and learning-rate schedule by registered type; an
//! [`Experiment`] resolves them and exposes the hooks a [`Trainer`] drives,
//! and the [`Runner`] wraps one fit in a timestamped run directory.

pub mod config;
pub mod data;
pub mod error;
pub mod nn;
pub mod optim;
pub mod persistence;
pub mod registry;
pub mod training;

pub use config::{ComponentSpec, ExperimentConfig, load_config};
pub use error::{FitError, Result};
pub use registry::{Registries, Registry};
pub use training::{Experiment, RunSummary, Runner, Strategy, Trainer, TrainerContext};
