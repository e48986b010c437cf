//! Persistent record of one run.

use crate::error::{FitError, Result};
use crate::persistence::{atomic_write_json, load_json};
use crate::training::checkpoint::Checkpoint;
use crate::training::metrics::TrainingMetrics;
use crate::training::reproducibility::EnvironmentSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Everything needed to understand a run after the fact, saved as `run.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub name: String,
    pub model_type: String,
    pub config: serde_json::Value,
    pub seed: Option<u64>,
    pub status: RunStatus,
    pub metrics: Option<TrainingMetrics>,
    pub best_checkpoint: Option<Checkpoint>,
    pub environment: Option<EnvironmentSnapshot>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(name: &str, model_type: &str, config: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            model_type: model_type.to_string(),
            config,
            seed: None,
            status: RunStatus::Pending,
            metrics: None,
            best_checkpoint: None,
            environment: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.environment = Some(EnvironmentSnapshot::capture());
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, metrics: TrainingMetrics, best: Option<Checkpoint>) {
        self.status = RunStatus::Completed;
        self.metrics = Some(metrics);
        self.best_checkpoint = best;
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, error: &FitError) {
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)?.ok_or_else(|| FitError::not_found(format!("run record {}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }
}
