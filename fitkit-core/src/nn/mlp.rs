//! Multi-layer perceptron: linear layers with an activation between them.

use super::{Activation, Linear, Model, ParamRef};
use crate::error::{FitError, Result};
use ndarray::Array2;

pub struct Mlp {
    layers: Vec<Linear>,
    activation: Activation,
    pre_activations: Vec<Array2<f32>>,
}

impl Mlp {
    pub fn new(
        in_features: usize,
        hidden: &[usize],
        out_features: usize,
        activation: Activation,
        seed: u64,
    ) -> Result<Self> {
        if hidden.is_empty() {
            return Err(FitError::config(
                "Mlp needs at least one hidden layer; use Linear otherwise",
            ));
        }

        let mut dims = Vec::with_capacity(hidden.len() + 2);
        dims.push(in_features);
        dims.extend_from_slice(hidden);
        dims.push(out_features);

        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                Linear::with_prefix(
                    &format!("layers.{i}."),
                    w[0],
                    w[1],
                    true,
                    seed.wrapping_add(i as u64),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            layers,
            activation,
            pre_activations: Vec::new(),
        })
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

impl Model for Mlp {
    fn name(&self) -> &str {
        "Mlp"
    }

    fn forward(&mut self, x: &Array2<f32>) -> Result<Array2<f32>> {
        self.pre_activations.clear();
        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let z = layer.forward(&h)?;
            if i == last {
                return Ok(z);
            }
            h = self.activation.apply(&z);
            self.pre_activations.push(z);
        }
        Ok(h)
    }

    fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>> {
        if self.pre_activations.len() + 1 != self.layers.len() {
            return Err(FitError::state("Mlp::backward called before forward"));
        }
        let mut grad = grad_out.clone();
        for (i, layer) in self.layers.iter_mut().enumerate().rev() {
            grad = layer.backward(&grad)?;
            if i > 0 {
                grad = grad * self.activation.derivative(&self.pre_activations[i - 1]);
            }
        }
        Ok(grad)
    }

    fn parameters(&self) -> Vec<ParamRef> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_parameter_layout() {
        let mlp = Mlp::new(3, &[8, 4], 2, Activation::Tanh, 1).unwrap();
        assert_eq!(mlp.depth(), 3);
        assert_eq!(mlp.num_parameters(), (3 * 8 + 8) + (8 * 4 + 4) + (4 * 2 + 2));
        let first = mlp.parameters()[0].borrow().name.clone();
        assert_eq!(first, "layers.0.weight");
    }

    #[test]
    fn test_forward_backward_shapes() {
        let mut mlp = Mlp::new(2, &[5], 3, Activation::Relu, 0).unwrap();
        let x = array![[0.5, -1.0], [1.0, 2.0], [0.0, 0.1]];
        let y = mlp.forward(&x).unwrap();
        assert_eq!(y.dim(), (3, 3));
        let dx = mlp.backward(&Array2::ones((3, 3))).unwrap();
        assert_eq!(dx.dim(), (3, 2));
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let mut mlp = Mlp::new(2, &[3], 1, Activation::Tanh, 4).unwrap();
        let x = array![[0.3, -0.7]];

        mlp.forward(&x).unwrap();
        mlp.backward(&array![[1.0]]).unwrap();
        let param = mlp.parameters()[0].clone();
        let analytic = param.borrow().grad[[0, 0]];

        let eps = 1e-3;
        param.borrow_mut().value[[0, 0]] += eps;
        let up = mlp.forward(&x).unwrap()[[0, 0]];
        param.borrow_mut().value[[0, 0]] -= 2.0 * eps;
        let down = mlp.forward(&x).unwrap()[[0, 0]];
        let numeric = (up - down) / (2.0 * eps);

        assert!((analytic - numeric).abs() < 1e-2, "{analytic} vs {numeric}");
    }

    #[test]
    fn test_requires_hidden_layer() {
        assert!(Mlp::new(2, &[], 1, Activation::Relu, 0).is_err());
    }
}
