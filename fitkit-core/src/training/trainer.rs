//! Epoch loop driving an experiment through its hooks.

use crate::config::TrainerConfig;
use crate::data::Batch;
use crate::error::{FitError, Result};
use crate::nn::Model;
use crate::optim::{LrScheduler, Optimizer};
use crate::training::callbacks::{CallbackAction, TrainingCallback};
use crate::training::experiment::Experiment;
use crate::training::logger::RunLogger;
use crate::training::metrics::{EpochMetrics, TrainingMetrics, weighted_mean};
use crate::training::strategy::{Strategy, TrainerContext};
use std::time::Instant;

pub struct Trainer {
    config: TrainerConfig,
    callbacks: Vec<Box<dyn TrainingCallback>>,
    logger: Option<RunLogger>,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            callbacks: Vec::new(),
            logger: None,
        }
    }

    pub fn with_callback(mut self, callback: Box<dyn TrainingCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn context(&self) -> TrainerContext {
        TrainerContext::new(self.config.strategy, self.config.devices)
    }

    pub fn callbacks(&self) -> &[Box<dyn TrainingCallback>] {
        &self.callbacks
    }

    /// Train `experiment` until `max_epochs` or until a callback asks to stop.
    pub fn fit(&mut self, experiment: &mut Experiment) -> Result<TrainingMetrics> {
        let started = Instant::now();
        let context = self.context();
        experiment.attach(context);
        experiment.prepare_data()?;

        let (mut optimizers, mut schedulers) = experiment.configure_optimizers()?;
        let train_loader = experiment.train_dataloader()?;
        let val_loader = experiment.val_dataloader()?;

        if let Some(logger) = &self.logger {
            logger.log_hyperparams(experiment.config())?;
        }

        tracing::info!(
            strategy = %context.strategy,
            devices = context.devices,
            batch_size = experiment.batch_size(),
            train_batches = train_loader.len(),
            val_batches = val_loader.len(),
            max_epochs = self.config.max_epochs,
            "Starting fit"
        );

        let mut metrics = TrainingMetrics::default();
        for epoch in 0..self.config.max_epochs {
            let mut batches = train_loader.epoch(epoch)?;
            if let Some(limit) = self.config.limit_train_batches {
                batches.truncate(limit);
            }

            let group = match context.strategy {
                Strategy::DistributedDataParallel => context.devices,
                _ => 1,
            };
            let mut losses = Vec::with_capacity(batches.len());
            let mut batch_idx = 0;
            for step_batches in batches.chunks(group) {
                for optimizer in &optimizers {
                    optimizer.zero_grad();
                }

                let shards = device_shards(context, step_batches);
                let mut gathered = Vec::with_capacity(shards.len());
                for shard in &shards {
                    let out = experiment.training_step(shard, batch_idx)?;
                    let loss = out
                        .scalar("loss")
                        .ok_or_else(|| FitError::training("training_step returned no 'loss'"))?;
                    if !loss.is_finite() {
                        return Err(FitError::training(format!(
                            "non-finite loss {loss} at epoch {epoch}, step {}",
                            metrics.global_step
                        )));
                    }
                    gathered.push((f64::from(loss), shard.len()));
                }
                batch_idx += step_batches.len();

                if shards.len() > 1 {
                    let scale = 1.0 / shards.len() as f32;
                    for param in experiment.model().parameters() {
                        param.borrow_mut().grad.mapv_inplace(|g| g * scale);
                    }
                }
                for optimizer in &mut optimizers {
                    optimizer.step();
                }
                metrics.global_step += 1;
                losses.extend(gathered);
            }

            let loss = weighted_mean(&losses)
                .ok_or_else(|| FitError::training(format!("no training batches ran in epoch {epoch}")))?;
            let val_loss = self.validate(experiment, context, &val_loader.epoch(0)?)?;

            for scheduler in &mut schedulers {
                scheduler.step();
            }
            let lr = optimizers.first().map_or(0.0, |o| f64::from(o.lr()));

            let mut epoch_metrics = EpochMetrics::new();
            epoch_metrics.insert("loss".into(), loss);
            if let Some(vl) = val_loss {
                epoch_metrics.insert("val_loss".into(), vl);
            }
            epoch_metrics.insert("lr".into(), lr);
            metrics.record_epoch(loss, val_loss, lr);

            if let Some(logger) = &self.logger {
                logger.log_metrics(epoch, metrics.global_step, &epoch_metrics)?;
            } else {
                tracing::info!(epoch, step = metrics.global_step, metrics = ?epoch_metrics, "Epoch metrics");
            }

            let mut stop = false;
            for callback in &mut self.callbacks {
                if callback.on_epoch_end(epoch, &epoch_metrics, experiment.model())?
                    == CallbackAction::Stop
                {
                    tracing::debug!(epoch, callback = callback.name(), "Callback requested stop");
                    stop = true;
                }
            }
            if stop {
                if epoch + 1 >= self.config.min_epochs {
                    metrics.stopped_early = epoch + 1 < self.config.max_epochs;
                    break;
                }
                tracing::debug!(epoch, min_epochs = self.config.min_epochs, "Stop deferred until min_epochs");
            }
        }

        metrics.total_training_time_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            epochs = metrics.epochs_completed,
            steps = metrics.global_step,
            best_epoch = ?metrics.best_epoch,
            best_val_loss = ?metrics.best_val_loss,
            stopped_early = metrics.stopped_early,
            "Fit finished"
        );
        Ok(metrics)
    }

    fn validate(
        &self,
        experiment: &mut Experiment,
        context: TrainerContext,
        batches: &[Batch],
    ) -> Result<Option<f64>> {
        let limit = self.config.limit_val_batches.unwrap_or(batches.len());
        let mut losses = Vec::new();
        for (batch_idx, batch) in batches.iter().take(limit).enumerate() {
            for shard in device_shards(context, std::slice::from_ref(batch)) {
                let out = experiment.validation_step(&shard, batch_idx)?;
                let loss = out
                    .scalar("val_loss")
                    .ok_or_else(|| FitError::training("validation_step returned no 'val_loss'"))?;
                losses.push((f64::from(loss), shard.len()));
            }
        }
        Ok(weighted_mean(&losses))
    }
}

/// Per-device pieces of one optimizer step.
fn device_shards(context: TrainerContext, step_batches: &[Batch]) -> Vec<Batch> {
    if context.strategy.gathers_step_outputs() {
        step_batches
            .iter()
            .flat_map(|b| b.shard(context.devices))
            .collect()
    } else {
        step_batches.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExperimentConfig, TrainerConfig};
    use crate::training::callbacks::{EarlyStopping, MonitorMode};
    use serde_json::json;

    fn config(lr: f64, strategy: &str, devices: usize) -> ExperimentConfig {
        ExperimentConfig::from_value(json!({
            "model": {"type": "Linear", "kwargs": {"in_features": 3, "out_features": 1}},
            "loss": {"type": "MSELoss"},
            "optim": {"type": "SGD", "kwargs": {"lr": lr}},
            "optim_scheduler": {"type": "ConstantLR", "kwargs": {"factor": 1.0}},
            "data": {"batch_size": 8, "shuffle": true},
            "instance": {"source": {"kind": "synthetic", "n": 60, "in_features": 3, "out_features": 1, "seed": 7}},
            "trainer": {"max_epochs": 15, "strategy": strategy, "devices": devices},
            "early_stopping": {"monitor": "val_loss"}
        }))
        .unwrap()
    }

    struct AlwaysStop;

    impl TrainingCallback for AlwaysStop {
        fn name(&self) -> &str {
            "AlwaysStop"
        }

        fn on_epoch_end(&mut self, _: usize, _: &EpochMetrics, _: &dyn Model) -> Result<CallbackAction> {
            Ok(CallbackAction::Stop)
        }
    }

    fn fit(config: ExperimentConfig) -> Result<TrainingMetrics> {
        let mut trainer = Trainer::new(config.trainer.clone());
        let mut experiment = Experiment::new(config)?;
        trainer.fit(&mut experiment)
    }

    #[test]
    fn test_fit_reduces_validation_loss() {
        let metrics = fit(config(0.1, "single", 1)).unwrap();
        assert_eq!(metrics.epochs_completed, 15);
        assert_eq!(metrics.global_step, 15 * 6);
        let first = metrics.val_loss_history[0];
        let last = metrics.last_val_loss().unwrap();
        assert!(last < first, "val loss went from {first} to {last}");
        assert!(!metrics.stopped_early);
    }

    #[test]
    fn test_parallel_strategies_train() {
        for (strategy, devices, steps_per_epoch) in [("dp", 2, 3), ("ddp", 2, 3), ("ddp2", 2, 6)] {
            let metrics = fit(config(0.1, strategy, devices)).unwrap();
            assert_eq!(metrics.global_step, 15 * steps_per_epoch, "{strategy}");
            assert!(
                metrics.last_val_loss().unwrap() < metrics.val_loss_history[0],
                "{strategy}"
            );
        }
    }

    #[test]
    fn test_divergence_is_a_training_error() {
        let err = fit(config(1.0e6, "single", 1)).unwrap_err();
        assert!(matches!(err, FitError::Training(_)), "{err}");
    }

    #[test]
    fn test_stop_waits_for_min_epochs() {
        let mut cfg = config(0.1, "single", 1);
        cfg.trainer.min_epochs = 3;
        let mut trainer = Trainer::new(cfg.trainer.clone()).with_callback(Box::new(AlwaysStop));
        let mut experiment = Experiment::new(cfg).unwrap();
        let metrics = trainer.fit(&mut experiment).unwrap();
        assert_eq!(metrics.epochs_completed, 3);
        assert!(metrics.stopped_early);
    }

    #[test]
    fn test_early_stopping_halts_fit() {
        let mut cfg = config(0.1, "single", 1);
        cfg.trainer.max_epochs = 50;
        let mut trainer = Trainer::new(cfg.trainer.clone()).with_callback(Box::new(
            EarlyStopping::new("val_loss", 2, 10.0, MonitorMode::Min),
        ));
        let mut experiment = Experiment::new(cfg).unwrap();
        let metrics = trainer.fit(&mut experiment).unwrap();
        // no epoch can beat the first by 10.0, so the third epoch stops
        assert_eq!(metrics.epochs_completed, 3);
        assert!(metrics.stopped_early);
    }

    #[test]
    fn test_batch_limits_and_logger() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cfg = config(0.1, "single", 1);
        cfg.trainer = TrainerConfig {
            max_epochs: 2,
            limit_train_batches: Some(2),
            limit_val_batches: Some(1),
            ..TrainerConfig::default()
        };
        let mut trainer = Trainer::new(cfg.trainer.clone()).with_logger(RunLogger::new(dir.path()));
        let mut experiment = Experiment::new(cfg).unwrap();
        let metrics = trainer.fit(&mut experiment).unwrap();
        assert_eq!(metrics.global_step, 4);

        let history = RunLogger::new(dir.path()).history().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].step, 4);
        assert!(history[0].metrics.contains_key("val_loss"));
        assert!(dir.path().join("hparams.json").exists());
    }
}
