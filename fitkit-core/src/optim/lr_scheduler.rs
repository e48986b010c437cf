//! Epoch-based learning-rate schedules.
//!
//! A scheduler captures its optimizer's learning-rate handle at construction
//! and rewrites it on every `step()`. Rates are closed-form in the epoch
//! counter.

use super::{LrHandle, Optimizer};
use crate::config::{Kwargs, decode_kwargs};
use crate::error::{FitError, Result};
use crate::registry::{Registry, SchedulerCtor};
use serde::Deserialize;
use std::f32::consts::PI;

pub trait LrScheduler {
    fn name(&self) -> &str;

    /// Advance one epoch and write the new rate into the bound optimizer.
    fn step(&mut self);

    fn last_lr(&self) -> f32;

    fn last_epoch(&self) -> usize;

    /// Whether this scheduler drives the given learning-rate handle.
    fn is_bound_to(&self, lr: &LrHandle) -> bool;
}

#[derive(Debug, Clone, Copy)]
enum Schedule {
    Step { step_size: usize, gamma: f32 },
    Exponential { gamma: f32 },
    Cosine { t_max: usize, eta_min: f32 },
    Constant { factor: f32, total_iters: usize },
}

impl Schedule {
    fn name(self) -> &'static str {
        match self {
            Self::Step { .. } => "StepLR",
            Self::Exponential { .. } => "ExponentialLR",
            Self::Cosine { .. } => "CosineAnnealingLR",
            Self::Constant { .. } => "ConstantLR",
        }
    }

    fn lr_at(self, base: f32, epoch: usize) -> f32 {
        match self {
            Self::Step { step_size, gamma } => base * gamma.powi((epoch / step_size) as i32),
            Self::Exponential { gamma } => base * gamma.powi(epoch as i32),
            Self::Cosine { t_max, eta_min } => {
                let phase = PI * epoch as f32 / t_max as f32;
                eta_min + (base - eta_min) * (1.0 + phase.cos()) / 2.0
            }
            Self::Constant {
                factor,
                total_iters,
            } => {
                if epoch < total_iters {
                    base * factor
                } else {
                    base
                }
            }
        }
    }
}

/// A closed-form schedule bound to one optimizer's learning rate.
pub struct ScheduledLr {
    schedule: Schedule,
    lr: LrHandle,
    base_lr: f32,
    epoch: usize,
}

impl ScheduledLr {
    fn bind(schedule: Schedule, optimizer: &dyn Optimizer) -> Self {
        let lr = optimizer.lr_handle();
        let base_lr = lr.get();
        lr.set(schedule.lr_at(base_lr, 0));
        Self {
            schedule,
            lr,
            base_lr,
            epoch: 0,
        }
    }

    pub fn base_lr(&self) -> f32 {
        self.base_lr
    }
}

impl LrScheduler for ScheduledLr {
    fn name(&self) -> &str {
        self.schedule.name()
    }

    fn step(&mut self) {
        self.epoch += 1;
        self.lr.set(self.schedule.lr_at(self.base_lr, self.epoch));
    }

    fn last_lr(&self) -> f32 {
        self.lr.get()
    }

    fn last_epoch(&self) -> usize {
        self.epoch
    }

    fn is_bound_to(&self, lr: &LrHandle) -> bool {
        std::rc::Rc::ptr_eq(&self.lr, lr)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepArgs {
    step_size: usize,
    #[serde(default = "default_gamma")]
    gamma: f32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExponentialArgs {
    gamma: f32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CosineArgs {
    t_max: usize,
    #[serde(default)]
    eta_min: f32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConstantArgs {
    #[serde(default = "default_factor")]
    factor: f32,
    #[serde(default = "default_total_iters")]
    total_iters: usize,
}

fn default_gamma() -> f32 {
    0.1
}

fn default_factor() -> f32 {
    1.0 / 3.0
}

fn default_total_iters() -> usize {
    5
}

fn build_step(optimizer: &dyn Optimizer, kwargs: &Kwargs) -> Result<Box<dyn LrScheduler>> {
    let args: StepArgs = decode_kwargs("scheduler", "StepLR", kwargs)?;
    if args.step_size == 0 {
        return Err(FitError::config("StepLR step_size must be at least 1"));
    }
    let schedule = Schedule::Step {
        step_size: args.step_size,
        gamma: args.gamma,
    };
    Ok(Box::new(ScheduledLr::bind(schedule, optimizer)))
}

fn build_exponential(optimizer: &dyn Optimizer, kwargs: &Kwargs) -> Result<Box<dyn LrScheduler>> {
    let args: ExponentialArgs = decode_kwargs("scheduler", "ExponentialLR", kwargs)?;
    let schedule = Schedule::Exponential { gamma: args.gamma };
    Ok(Box::new(ScheduledLr::bind(schedule, optimizer)))
}

fn build_cosine(optimizer: &dyn Optimizer, kwargs: &Kwargs) -> Result<Box<dyn LrScheduler>> {
    let args: CosineArgs = decode_kwargs("scheduler", "CosineAnnealingLR", kwargs)?;
    if args.t_max == 0 {
        return Err(FitError::config("CosineAnnealingLR t_max must be at least 1"));
    }
    let schedule = Schedule::Cosine {
        t_max: args.t_max,
        eta_min: args.eta_min,
    };
    Ok(Box::new(ScheduledLr::bind(schedule, optimizer)))
}

fn build_constant(optimizer: &dyn Optimizer, kwargs: &Kwargs) -> Result<Box<dyn LrScheduler>> {
    let args: ConstantArgs = decode_kwargs("scheduler", "ConstantLR", kwargs)?;
    if !(args.factor > 0.0 && args.factor <= 1.0) {
        return Err(FitError::config("ConstantLR factor must lie in (0, 1]"));
    }
    let schedule = Schedule::Constant {
        factor: args.factor,
        total_iters: args.total_iters,
    };
    Ok(Box::new(ScheduledLr::bind(schedule, optimizer)))
}

/// Register the built-in schedulers.
pub fn register_schedulers(registry: &mut Registry<SchedulerCtor>) {
    registry
        .register("StepLR", build_step)
        .register("ExponentialLR", build_exponential)
        .register("CosineAnnealingLR", build_cosine)
        .register("ConstantLR", build_constant);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Parameter;
    use crate::optim::Sgd;
    use ndarray::array;
    use serde_json::json;

    fn sgd(lr: f32) -> Sgd {
        let p = Parameter::new("w", array![[0.0]]).into_ref();
        Sgd::new(vec![p], lr, 0.0, 0.0, false).unwrap()
    }

    fn lrs(mut sched: Box<dyn LrScheduler>, epochs: usize) -> Vec<f32> {
        let mut out = vec![sched.last_lr()];
        for _ in 0..epochs {
            sched.step();
            out.push(sched.last_lr());
        }
        out
    }

    #[test]
    fn test_step_lr_decays_every_step_size() {
        let opt = sgd(1.0);
        let kw = json!({"step_size": 2, "gamma": 0.5});
        let sched = build_step(&opt, kw.as_object().unwrap()).unwrap();
        assert_eq!(lrs(sched, 4), vec![1.0, 1.0, 0.5, 0.5, 0.25]);
        assert!((opt.lr() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_scheduler_writes_bound_optimizer() {
        let opt = sgd(0.2);
        let kw = json!({"gamma": 0.5});
        let mut sched = build_exponential(&opt, kw.as_object().unwrap()).unwrap();
        assert!(sched.is_bound_to(&opt.lr_handle()));
        assert!(!sched.is_bound_to(&sgd(0.2).lr_handle()));
        sched.step();
        assert!((opt.lr() - 0.1).abs() < 1e-6);
        assert_eq!(sched.last_epoch(), 1);
    }

    #[test]
    fn test_cosine_reaches_eta_min_at_t_max() {
        let opt = sgd(1.0);
        let kw = json!({"t_max": 4, "eta_min": 0.1});
        let values = lrs(build_cosine(&opt, kw.as_object().unwrap()).unwrap(), 4);
        assert!((values[2] - 0.55).abs() < 1e-5);
        assert!((values[4] - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_constant_lr_applies_factor_immediately() {
        let opt = sgd(0.9);
        let kw = json!({"factor": 0.5, "total_iters": 2});
        let sched = build_constant(&opt, kw.as_object().unwrap()).unwrap();
        let values = lrs(sched, 3);
        assert!((values[0] - 0.45).abs() < 1e-6);
        assert!((values[2] - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_kwargs() {
        let opt = sgd(1.0);
        assert!(build_step(&opt, json!({"step_size": 0}).as_object().unwrap()).is_err());
        assert!(build_exponential(&opt, &Kwargs::new()).is_err());
        assert!(build_cosine(&opt, json!({"T_max": 3}).as_object().unwrap()).is_err());
    }
}
