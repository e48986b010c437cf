//! Fully connected layer `y = x W + b`.

use super::{Model, ParamRef, Parameter, expect_features};
use crate::error::{FitError, Result};
use ndarray::{Array2, Axis};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand::SeedableRng;
use rand::rngs::StdRng;

pub struct Linear {
    in_features: usize,
    out_features: usize,
    weight: ParamRef,
    bias: Option<ParamRef>,
    input: Option<Array2<f32>>,
}

impl Linear {
    /// Weights and bias are drawn from `U(-1/sqrt(in), 1/sqrt(in))`.
    pub fn new(in_features: usize, out_features: usize, bias: bool, seed: u64) -> Result<Self> {
        Self::with_prefix("", in_features, out_features, bias, seed)
    }

    /// Same as [`Linear::new`], with parameter names prefixed (`layers.0.weight`).
    pub fn with_prefix(
        prefix: &str,
        in_features: usize,
        out_features: usize,
        bias: bool,
        seed: u64,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(FitError::config(format!(
                "Linear needs non-zero dimensions, got {in_features}x{out_features}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (in_features as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);

        let weight = Array2::random_using((in_features, out_features), dist, &mut rng);
        let bias = bias.then(|| {
            let b = Array2::random_using((1, out_features), dist, &mut rng);
            Parameter::new(format!("{prefix}bias"), b).into_ref()
        });

        Ok(Self {
            in_features,
            out_features,
            weight: Parameter::new(format!("{prefix}weight"), weight).into_ref(),
            bias,
            input: None,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }
}

impl Model for Linear {
    fn name(&self) -> &str {
        "Linear"
    }

    fn forward(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        expect_features("Linear", x, self.in_features)?;
        let mut y = x.dot(&self.weight.borrow().value);
        if let Some(b) = &self.bias {
            y += &b.borrow().value;
        }
        self.input = Some(x.clone());
        Ok(y)
    }

    fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        let x = self
            .input
            .as_ref()
            .ok_or_else(|| FitError::state("Linear::backward called before forward"))?;
        if grad_out.dim() != (x.nrows(), self.out_features) {
            return Err(FitError::shape(format!(
                "Linear gradient expected {:?}, got {:?}",
                (x.nrows(), self.out_features),
                grad_out.dim()
            )));
        }

        let mut w = self.weight.borrow_mut();
        w.grad += &x.t().dot(grad_out);
        if let Some(b) = &self.bias {
            b.borrow_mut().grad += &grad_out.sum_axis(Axis(0)).insert_axis(Axis(0));
        }
        Ok(grad_out.dot(&w.value.t()))
    }

    fn parameters(&self) -> Vec<ParamRef> {
        let mut params = vec![self.weight.clone()];
        if let Some(b) = &self.bias {
            params.push(b.clone());
        }
        params
    }
}
