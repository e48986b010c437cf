use super::{LrHandle, Optimizer, check_params};
use crate::error::Result;
use crate::nn::ParamRef;
use ndarray::Array2;
use std::cell::Cell;
use std::rc::Rc;

/// Stochastic Gradient Descent with optional momentum
///
/// Update rule:
/// - Without momentum: θ ← θ - lr·∇θ
/// - With momentum: v ← μ·v + ∇θ, θ ← θ - lr·v
/// - Nesterov: θ ← θ - lr·(∇θ + μ·v)
pub struct Sgd {
    params: Vec<ParamRef>,
    lr: LrHandle,
    momentum: f32,
    weight_decay: f32,
    nesterov: bool,
    velocity: Vec<Option<Array2<f32>>>,
}

impl Sgd {
    pub fn new(
        params: Vec<ParamRef>,
        lr: f32,
        momentum: f32,
        weight_decay: f32,
        nesterov: bool,
    ) -> Result<Self> {
        check_params("SGD", &params, lr)?;
        let velocity = vec![None; params.len()];
        Ok(Self {
            params,
            lr: Rc::new(Cell::new(lr)),
            momentum,
            weight_decay,
            nesterov,
            velocity,
        })
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &str {
        "SGD"
    }

    fn step(&mut self) {
        let lr = self.lr.get();
        for (param, velocity) in self.params.iter().zip(self.velocity.iter_mut()) {
            let mut p = param.borrow_mut();
            let mut grad = p.grad.clone();
            if self.weight_decay != 0.0 {
                grad.scaled_add(self.weight_decay, &p.value);
            }

            if self.momentum > 0.0 {
                let v = velocity.get_or_insert_with(|| Array2::zeros(grad.raw_dim()));
                *v *= self.momentum;
                *v += &grad;
                if self.nesterov {
                    grad.scaled_add(self.momentum, &*v);
                } else {
                    grad.assign(&*v);
                }
            }

            p.value.scaled_add(-lr, &grad);
        }
    }

    fn params(&self) -> &[ParamRef] {
        &self.params
    }

    fn lr_handle(&self) -> LrHandle {
        self.lr.clone()
    }
}
