//! Regression losses with analytic gradients.

use crate::config::{Kwargs, decode_kwargs};
use crate::error::{FitError, Result};
use crate::registry::{LossCtor, Registry};
use ndarray::Array2;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
}

impl Reduction {
    fn scale(self, n: usize) -> f32 {
        match self {
            Self::Mean => 1.0 / n.max(1) as f32,
            Self::Sum => 1.0,
        }
    }
}

/// A scalar objective over predictions and targets of the same shape.
pub trait Loss {
    fn name(&self) -> &str;

    fn forward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<f32>;

    /// Gradient of the loss with respect to `y_hat`.
    fn backward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<Array2<f32>>;
}

fn check_shapes(name: &str, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<()> {
    if y_hat.dim() != y.dim() {
        return Err(FitError::shape(format!(
            "{name}: prediction {:?} vs target {:?}",
            y_hat.dim(),
            y.dim()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct MseLoss {
    pub reduction: Reduction,
}

impl Loss for MseLoss {
    fn name(&self) -> &str {
        "MSELoss"
    }

    fn forward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<f32> {
        check_shapes(self.name(), y_hat, y)?;
        let sq = (y_hat - y).mapv(|d| d * d).sum();
        Ok(sq * self.reduction.scale(y.len()))
    }

    fn backward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<Array2<f32>> {
        check_shapes(self.name(), y_hat, y)?;
        let k = 2.0 * self.reduction.scale(y.len());
        Ok((y_hat - y) * k)
    }
}

#[derive(Debug, Clone, Default)]
pub struct L1Loss {
    pub reduction: Reduction,
}

impl Loss for L1Loss {
    fn name(&self) -> &str {
        "L1Loss"
    }

    fn forward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<f32> {
        check_shapes(self.name(), y_hat, y)?;
        Ok((y_hat - y).mapv(f32::abs).sum() * self.reduction.scale(y.len()))
    }

    fn backward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<Array2<f32>> {
        check_shapes(self.name(), y_hat, y)?;
        let k = self.reduction.scale(y.len());
        Ok((y_hat - y).mapv(|d| if d == 0.0 { 0.0 } else { d.signum() * k }))
    }
}

/// Quadratic within `delta`, linear outside.
#[derive(Debug, Clone)]
pub struct HuberLoss {
    pub delta: f32,
    pub reduction: Reduction,
}

impl Loss for HuberLoss {
    fn name(&self) -> &str {
        "HuberLoss"
    }

    fn forward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<f32> {
        check_shapes(self.name(), y_hat, y)?;
        let delta = self.delta;
        let total = (y_hat - y)
            .mapv(|d| {
                let a = d.abs();
                if a <= delta {
                    0.5 * d * d
                } else {
                    delta * (a - 0.5 * delta)
                }
            })
            .sum();
        Ok(total * self.reduction.scale(y.len()))
    }

    fn backward(&self, y_hat: &Array2<f32>, y: &Array2<f32>) -> Result<Array2<f32>> {
        check_shapes(self.name(), y_hat, y)?;
        let delta = self.delta;
        let k = self.reduction.scale(y.len());
        Ok((y_hat - y).mapv(|d| d.clamp(-delta, delta) * k))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReductionArgs {
    #[serde(default)]
    reduction: Reduction,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HuberArgs {
    #[serde(default = "default_delta")]
    delta: f32,
    #[serde(default)]
    reduction: Reduction,
}

fn default_delta() -> f32 {
    1.0
}

fn build_mse(kwargs: &Kwargs) -> Result<Box<dyn Loss>> {
    let args: ReductionArgs = decode_kwargs("loss", "MSELoss", kwargs)?;
    Ok(Box::new(MseLoss {
        reduction: args.reduction,
    }))
}

fn build_l1(kwargs: &Kwargs) -> Result<Box<dyn Loss>> {
    let args: ReductionArgs = decode_kwargs("loss", "L1Loss", kwargs)?;
    Ok(Box::new(L1Loss {
        reduction: args.reduction,
    }))
}

fn build_huber(kwargs: &Kwargs) -> Result<Box<dyn Loss>> {
    let args: HuberArgs = decode_kwargs("loss", "HuberLoss", kwargs)?;
    if args.delta <= 0.0 {
        return Err(FitError::config("HuberLoss delta must be positive"));
    }
    Ok(Box::new(HuberLoss {
        delta: args.delta,
        reduction: args.reduction,
    }))
}

/// Register the built-in losses.
pub fn register_losses(registry: &mut Registry<LossCtor>) {
    registry
        .register("MSELoss", build_mse)
        .register("L1Loss", build_l1)
        .register("HuberLoss", build_huber);
}
