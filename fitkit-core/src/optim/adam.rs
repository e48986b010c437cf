use super::{LrHandle, Optimizer, check_params};
use crate::error::{FitError, Result};
use crate::nn::ParamRef;
use ndarray::Array2;
use std::cell::Cell;
use std::rc::Rc;

/// Adam with bias-corrected first and second moment estimates.
pub struct Adam {
    params: Vec<ParamRef>,
    lr: LrHandle,
    betas: (f32, f32),
    eps: f32,
    weight_decay: f32,
    m: Vec<Array2<f32>>,
    v: Vec<Array2<f32>>,
    t: i32,
}

impl Adam {
    pub fn new(
        params: Vec<ParamRef>,
        lr: f32,
        betas: (f32, f32),
        eps: f32,
        weight_decay: f32,
    ) -> Result<Self> {
        check_params("Adam", &params, lr)?;
        let valid = |b: f32| (0.0..1.0).contains(&b);
        if !valid(betas.0) || !valid(betas.1) {
            return Err(FitError::config(format!(
                "Adam betas must lie in [0, 1), got {betas:?}"
            )));
        }

        let m: Vec<Array2<f32>> = params
            .iter()
            .map(|p| Array2::zeros(p.borrow().value.raw_dim()))
            .collect();
        let v = m.clone();

        Ok(Self {
            params,
            lr: Rc::new(Cell::new(lr)),
            betas,
            eps,
            weight_decay,
            m,
            v,
            t: 0,
        })
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &str {
        "Adam"
    }

    fn step(&mut self) {
        self.t += 1;
        let (b1, b2) = self.betas;
        let lr = self.lr.get();
        let bias1 = 1.0 - b1.powi(self.t);
        let bias2 = 1.0 - b2.powi(self.t);

        for ((param, m), v) in self.params.iter().zip(&mut self.m).zip(&mut self.v) {
            let mut p = param.borrow_mut();
            let mut grad = p.grad.clone();
            if self.weight_decay != 0.0 {
                grad.scaled_add(self.weight_decay, &p.value);
            }

            *m *= b1;
            m.scaled_add(1.0 - b1, &grad);
            *v *= b2;
            v.scaled_add(1.0 - b2, &grad.mapv(|g| g * g));

            let eps = self.eps;
            let update = ndarray::Zip::from(&*m)
                .and(&*v)
                .map_collect(|&mi, &vi| (mi / bias1) / ((vi / bias2).sqrt() + eps));
            p.value.scaled_add(-lr, &update);
        }
    }

    fn params(&self) -> &[ParamRef] {
        &self.params
    }

    fn lr_handle(&self) -> LrHandle {
        self.lr.clone()
    }
}
