//! Optimizers bound to shared model parameters.

pub mod adam;
pub mod lr_scheduler;
pub mod sgd;

pub use adam::Adam;
pub use lr_scheduler::LrScheduler;
pub use sgd::Sgd;

use crate::config::{Kwargs, decode_kwargs};
use crate::error::{FitError, Result};
use crate::nn::ParamRef;
use crate::registry::{OptimizerCtor, Registry};
use serde::Deserialize;
use std::cell::Cell;
use std::rc::Rc;

/// Current learning rate of an optimizer, shared with its scheduler.
pub type LrHandle = Rc<Cell<f32>>;

pub trait Optimizer {
    fn name(&self) -> &str;

    /// Apply one update from the accumulated gradients.
    fn step(&mut self);

    /// The parameters this optimizer updates.
    fn params(&self) -> &[ParamRef];

    fn lr_handle(&self) -> LrHandle;

    fn lr(&self) -> f32 {
        self.lr_handle().get()
    }

    fn zero_grad(&self) {
        for p in self.params() {
            p.borrow_mut().grad.fill(0.0);
        }
    }

    fn param_count(&self) -> usize {
        self.params().len()
    }
}

pub(crate) fn check_params(name: &str, params: &[ParamRef], lr: f32) -> Result<()> {
    if params.is_empty() {
        return Err(FitError::config(format!(
            "{name} got an empty parameter list"
        )));
    }
    if !(lr.is_finite() && lr >= 0.0) {
        return Err(FitError::config(format!("{name}: invalid learning rate {lr}")));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SgdArgs {
    lr: f32,
    #[serde(default)]
    momentum: f32,
    #[serde(default)]
    weight_decay: f32,
    #[serde(default)]
    nesterov: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdamArgs {
    #[serde(default = "default_adam_lr")]
    lr: f32,
    #[serde(default = "default_betas")]
    betas: (f32, f32),
    #[serde(default = "default_eps")]
    eps: f32,
    #[serde(default)]
    weight_decay: f32,
}

fn default_adam_lr() -> f32 {
    1e-3
}

fn default_betas() -> (f32, f32) {
    (0.9, 0.999)
}

fn default_eps() -> f32 {
    1e-8
}

fn build_sgd(params: Vec<ParamRef>, kwargs: &Kwargs) -> Result<Box<dyn Optimizer>> {
    let args: SgdArgs = decode_kwargs("optimizer", "SGD", kwargs)?;
    if args.nesterov && args.momentum <= 0.0 {
        return Err(FitError::config("SGD: nesterov requires a positive momentum"));
    }
    let opt = Sgd::new(params, args.lr, args.momentum, args.weight_decay, args.nesterov)?;
    Ok(Box::new(opt))
}

fn build_adam(params: Vec<ParamRef>, kwargs: &Kwargs) -> Result<Box<dyn Optimizer>> {
    let args: AdamArgs = decode_kwargs("optimizer", "Adam", kwargs)?;
    let opt = Adam::new(params, args.lr, args.betas, args.eps, args.weight_decay)?;
    Ok(Box::new(opt))
}

/// Register the built-in optimizers.
pub fn register_optimizers(registry: &mut Registry<OptimizerCtor>) {
    registry.register("SGD", build_sgd).register("Adam", build_adam);
}
