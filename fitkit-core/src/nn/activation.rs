//! Element-wise activations used between hidden layers.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Self::Relu => z.mapv(|v| v.max(0.0)),
            Self::Tanh => z.mapv(f32::tanh),
            Self::Sigmoid => z.mapv(sigmoid),
        }
    }

    /// Derivative evaluated at the pre-activation `z`.
    pub fn derivative(self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Self::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Self::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
            Self::Sigmoid => z.mapv(|v| {
                let s = sigmoid(v);
                s * (1.0 - s)
            }),
        }
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}
