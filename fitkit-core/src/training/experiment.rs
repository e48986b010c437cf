//! The experiment: a config resolved into model, loss, optimizer, schedule
//! and data, exposed through the lifecycle hooks the trainer drives.

use crate::config::ExperimentConfig;
use crate::data::{Batch, DataLoader, Instance, InstanceDataset, get_train_val_instances};
use crate::error::{FitError, Result};
use crate::nn::{Loss, Model};
use crate::optim::{LrScheduler, Optimizer};
use crate::registry::Registries;
use crate::training::strategy::TrainerContext;
use ndarray::{Array1, Array2, ArrayD, arr0};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Optimizers and their schedulers, one group per entry.
pub type ConfiguredOptimizers = (Vec<Box<dyn Optimizer>>, Vec<Box<dyn LrScheduler>>);

/// Named values returned by a step.
///
/// Losses are 0-d tensors, or 1-d single-element tensors when the strategy
/// gathers outputs across device shards.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    values: BTreeMap<String, ArrayD<f32>>,
}

impl StepOutput {
    pub fn single(key: &str, value: ArrayD<f32>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(key.to_string(), value);
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Mean of the elements stored under `key`.
    pub fn scalar(&self, key: &str) -> Option<f32> {
        self.values.get(key).and_then(|v| v.mean())
    }
}

pub struct Experiment {
    config: ExperimentConfig,
    registries: Registries,
    model: Box<dyn Model>,
    loss: Box<dyn Loss>,
    context: TrainerContext,
    batch_size: OnceCell<usize>,
    train_instances: Option<Rc<[Instance]>>,
    val_instances: Option<Rc<[Instance]>>,
}

impl Experiment {
    /// Resolve model and loss against the built-in registries.
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        Self::with_registries(config, Registries::builtin())
    }

    pub fn with_registries(config: ExperimentConfig, registries: Registries) -> Result<Self> {
        let model = registries.build_model(&config.model)?;
        let loss = registries.build_loss(&config.loss)?;
        tracing::info!(
            model = model.name(),
            parameters = model.num_parameters(),
            loss = loss.name(),
            "Built experiment"
        );
        Ok(Self {
            config,
            registries,
            model,
            loss,
            context: TrainerContext::default(),
            batch_size: OnceCell::new(),
            train_instances: None,
            val_instances: None,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Model {
        self.model.as_mut()
    }

    pub fn loss(&self) -> &dyn Loss {
        self.loss.as_ref()
    }

    pub fn context(&self) -> TrainerContext {
        self.context
    }

    /// Give the experiment the execution context of the trainer driving it.
    pub fn attach(&mut self, context: TrainerContext) {
        if let Some(cached) = self.batch_size.get() {
            tracing::debug!(
                batch_size = cached,
                strategy = %context.strategy,
                "Attached after batch size was fixed; keeping cached value"
            );
        }
        self.context = context;
    }

    /// Effective batch size, fixed on first access.
    ///
    /// Under `dp` one process feeds every device from a single batch, so the
    /// configured per-device size is multiplied by the device count.
    pub fn batch_size(&self) -> usize {
        *self.batch_size.get_or_init(|| {
            let base = self.config.data.batch_size;
            if self.context.strategy.scales_batch() {
                base.saturating_mul(self.context.devices)
            } else {
                base
            }
        })
    }

    pub fn forward(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.model.forward(x)
    }

    /// Forward, loss and backward on one batch; gradients accumulate into
    /// the model parameters.
    pub fn training_step(&mut self, batch: &Batch, batch_idx: usize) -> Result<StepOutput> {
        let y_hat = self.forward(&batch.x)?;
        let loss = self.loss.forward(&y_hat, &batch.y)?;
        let grad = self.loss.backward(&y_hat, &batch.y)?;
        self.model.backward(&grad)?;
        tracing::trace!(batch_idx, loss, "training_step");
        Ok(StepOutput::single("loss", self.shape_loss(loss)))
    }

    pub fn validation_step(&mut self, batch: &Batch, batch_idx: usize) -> Result<StepOutput> {
        let y_hat = self.forward(&batch.x)?;
        let loss = self.loss.forward(&y_hat, &batch.y)?;
        tracing::trace!(batch_idx, loss, "validation_step");
        Ok(StepOutput::single("val_loss", self.shape_loss(loss)))
    }

    fn shape_loss(&self, loss: f32) -> ArrayD<f32> {
        if self.context.strategy.gathers_step_outputs() {
            Array1::from_elem(1, loss).into_dyn()
        } else {
            arr0(loss).into_dyn()
        }
    }

    /// One optimizer over the model's parameters and one scheduler over that
    /// optimizer.
    pub fn configure_optimizers(&self) -> Result<ConfiguredOptimizers> {
        let optimizer = self
            .registries
            .build_optimizer(&self.config.optim, self.model.parameters())?;
        let scheduler = self
            .registries
            .build_scheduler(&self.config.optim_scheduler, optimizer.as_ref())?;
        tracing::debug!(
            optimizer = optimizer.name(),
            scheduler = scheduler.name(),
            lr = optimizer.lr(),
            "Configured optimizers"
        );
        Ok((vec![optimizer], vec![scheduler]))
    }

    pub fn prepare_data(&mut self) -> Result<()> {
        let (train, val) = get_train_val_instances(&self.config.instance)?;
        self.train_instances = Some(train.into());
        self.val_instances = Some(val.into());
        Ok(())
    }

    pub fn train_instances(&self) -> Option<&[Instance]> {
        self.train_instances.as_deref()
    }

    pub fn val_instances(&self) -> Option<&[Instance]> {
        self.val_instances.as_deref()
    }

    pub fn train_dataloader(&self) -> Result<DataLoader> {
        let instances = self
            .train_instances
            .clone()
            .ok_or_else(|| FitError::state("prepare_data must run before train_dataloader"))?;
        let seed = self.config.trainer.seed.unwrap_or(self.config.instance.seed);
        Ok(DataLoader::new(InstanceDataset::new(instances)?, self.batch_size())?
            .shuffle(self.config.data.shuffle, seed)
            .drop_last(self.config.data.drop_last))
    }

    pub fn val_dataloader(&self) -> Result<DataLoader> {
        let instances = self
            .val_instances
            .clone()
            .ok_or_else(|| FitError::state("prepare_data must run before val_dataloader"))?;
        DataLoader::new(InstanceDataset::new(instances)?, self.batch_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::strategy::Strategy;
    use ndarray::array;
    use serde_json::json;

    fn config() -> ExperimentConfig {
        ExperimentConfig::from_value(json!({
            "model": {"type": "Linear", "kwargs": {"in_features": 2, "out_features": 1}},
            "loss": {"type": "MSELoss"},
            "optim": {"type": "SGD", "kwargs": {"lr": 0.1}},
            "optim_scheduler": {"type": "StepLR", "kwargs": {"step_size": 1, "gamma": 0.5}},
            "data": {"batch_size": 4},
            "instance": {"source": {"kind": "synthetic", "n": 20, "in_features": 2, "out_features": 1}},
            "early_stopping": {"monitor": "val_loss"}
        }))
        .unwrap()
    }

    fn batch() -> Batch {
        Batch {
            x: array![[1.0, 0.0], [0.0, 1.0]],
            y: array![[1.0], [2.0]],
        }
    }

    #[test]
    fn test_step_output_accessors() {
        let out = StepOutput::single("loss", Array1::from_elem(1, 2.0).into_dyn());
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["loss"]);
        assert_eq!(out.scalar("loss"), Some(2.0));
        assert!(out.get("val_loss").is_none());
    }

    #[test]
    fn test_training_step_is_scalar_without_parallelism() {
        let mut exp = Experiment::new(config()).unwrap();
        let out = exp.training_step(&batch(), 0).unwrap();
        assert_eq!(out.get("loss").unwrap().ndim(), 0);
        assert!(
            exp.model()
                .parameters()
                .iter()
                .any(|p| p.borrow().grad.iter().any(|g| *g != 0.0))
        );
    }

    #[test]
    fn test_validation_step_does_not_touch_gradients() {
        let mut exp = Experiment::new(config()).unwrap();
        let out = exp.validation_step(&batch(), 0).unwrap();
        assert!(out.get("val_loss").is_some());
        assert!(
            exp.model()
                .parameters()
                .iter()
                .all(|p| p.borrow().grad.iter().all(|g| *g == 0.0))
        );
    }

    #[test]
    fn test_ddp2_reshapes_loss() {
        let mut exp = Experiment::new(config()).unwrap();
        exp.attach(TrainerContext::new(Strategy::Ddp2, 2));
        let out = exp.validation_step(&batch(), 0).unwrap();
        assert_eq!(out.get("val_loss").unwrap().shape(), &[1]);
        assert_eq!(exp.batch_size(), 4);
    }

    #[test]
    fn test_loaders_require_prepare_data() {
        let exp = Experiment::new(config()).unwrap();
        assert!(matches!(exp.train_dataloader(), Err(FitError::State(_))));
        assert!(matches!(exp.val_dataloader(), Err(FitError::State(_))));
    }

    #[test]
    fn test_shape_mismatch_propagates() {
        let mut exp = Experiment::new(config()).unwrap();
        let bad = Batch {
            x: array![[1.0, 2.0, 3.0]],
            y: array![[1.0]],
        };
        assert!(matches!(exp.training_step(&bad, 0), Err(FitError::Shape(_))));
    }

    #[test]
    fn test_dp_batch_size_saturates() {
        // Fields are public, so validate() is not the only way in.
        let mut cfg = config();
        cfg.data.batch_size = usize::MAX;
        let mut exp = Experiment::new(cfg).unwrap();
        exp.attach(TrainerContext::new(Strategy::DataParallel, 4));
        assert_eq!(exp.batch_size(), usize::MAX);
    }
}
