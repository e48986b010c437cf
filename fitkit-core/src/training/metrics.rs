//! Training metrics tracking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metrics logged at the end of one epoch, keyed by name (`loss`, `val_loss`, `lr`).
pub type EpochMetrics = BTreeMap<String, f64>;

/// Training metrics for a fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    pub global_step: usize,
    pub loss_history: Vec<f64>,
    pub val_loss_history: Vec<f64>,
    pub lr_history: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub stopped_early: bool,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    /// Record one epoch. `best_*` track the lowest validation loss, falling
    /// back to the training loss when no validation ran.
    pub fn record_epoch(&mut self, loss: f64, val_loss: Option<f64>, lr: f64) {
        self.loss_history.push(loss);
        if let Some(vl) = val_loss {
            self.val_loss_history.push(vl);
        }
        self.lr_history.push(lr);
        self.epochs_completed += 1;

        let check_loss = val_loss.unwrap_or(loss);
        if self.best_val_loss.is_none_or(|best| check_loss < best) {
            self.best_val_loss = Some(check_loss);
            self.best_epoch = Some(self.epochs_completed - 1);
        }
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.loss_history.last().copied()
    }

    pub fn last_val_loss(&self) -> Option<f64> {
        self.val_loss_history.last().copied()
    }
}

/// Average of `(value, weight)` pairs; `None` when the total weight is zero.
pub(crate) fn weighted_mean(pairs: &[(f64, usize)]) -> Option<f64> {
    let total: usize = pairs.iter().map(|(_, w)| w).sum();
    if total == 0 {
        return None;
    }
    let sum: f64 = pairs.iter().map(|(v, w)| v * *w as f64).sum();
    Some(sum / total as f64)
}
