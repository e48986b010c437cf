//! Minimal dense model substrate: shared parameters, the `Model` trait and
//! the built-in model registry entries.

pub mod activation;
pub mod linear;
pub mod loss;
pub mod mlp;

pub use activation::Activation;
pub use linear::Linear;
pub use loss::Loss;
pub use mlp::Mlp;

use crate::config::{Kwargs, decode_kwargs};
use crate::error::{FitError, Result};
use crate::registry::Registry;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// A named trainable matrix and its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub value: Array2<f32>,
    pub grad: Array2<f32>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Array2<f32>) -> Self {
        let grad = Array2::zeros(value.raw_dim());
        Self {
            name: name.into(),
            value,
            grad,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.value.dim()
    }

    pub fn numel(&self) -> usize {
        self.value.len()
    }

    pub fn into_ref(self) -> ParamRef {
        Rc::new(RefCell::new(self))
    }
}

/// Handle shared between a model and the optimizer bound to it.
pub type ParamRef = Rc<RefCell<Parameter>>;

/// Serializable snapshot of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorState {
    pub shape: (usize, usize),
    pub data: Vec<f32>,
}

/// Parameter snapshots keyed by parameter name.
pub type StateDict = BTreeMap<String, TensorState>;

/// A differentiable model over `(batch, features)` matrices.
///
/// `forward` caches whatever `backward` needs; `backward` accumulates into the
/// parameters' gradients and returns the gradient with respect to the input.
pub trait Model {
    fn name(&self) -> &str;

    fn forward(&mut self, x: &Array2<f32>) -> Result<Array2<f32>>;

    fn backward(&mut self, grad_out: &Array2<f32>) -> Result<Array2<f32>>;

    fn parameters(&self) -> Vec<ParamRef>;

    fn zero_grad(&self) {
        for p in self.parameters() {
            p.borrow_mut().grad.fill(0.0);
        }
    }

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.borrow().numel()).sum()
    }

    fn state_dict(&self) -> StateDict {
        self.parameters()
            .iter()
            .map(|p| {
                let p = p.borrow();
                (
                    p.name.clone(),
                    TensorState {
                        shape: p.shape(),
                        data: p.value.iter().copied().collect(),
                    },
                )
            })
            .collect()
    }

    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        for param in self.parameters() {
            let mut p = param.borrow_mut();
            let entry = state
                .get(&p.name)
                .ok_or_else(|| FitError::not_found(format!("state for parameter {}", p.name)))?;
            if entry.shape != p.shape() {
                return Err(FitError::shape(format!(
                    "parameter {} expects {:?}, state has {:?}",
                    p.name,
                    p.shape(),
                    entry.shape
                )));
            }
            p.value = Array2::from_shape_vec(entry.shape, entry.data.clone())
                .map_err(|e| FitError::shape(format!("parameter {}: {e}", p.name)))?;
        }
        Ok(())
    }
}

/// Check that a batch has the expected number of columns.
pub(crate) fn expect_features(what: &str, x: &Array2<f32>, features: usize) -> Result<()> {
    if x.ncols() != features {
        return Err(FitError::shape(format!(
            "{what} expects {features} features, got input of shape {:?}",
            x.dim()
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinearArgs {
    in_features: usize,
    out_features: usize,
    #[serde(default = "default_bias")]
    bias: bool,
    #[serde(default)]
    seed: u64,
}

fn default_bias() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MlpArgs {
    in_features: usize,
    hidden: Vec<usize>,
    out_features: usize,
    #[serde(default)]
    activation: Activation,
    #[serde(default)]
    seed: u64,
}

fn build_linear(kwargs: &Kwargs) -> Result<Box<dyn Model>> {
    let args: LinearArgs = decode_kwargs("model", "Linear", kwargs)?;
    let model = Linear::new(args.in_features, args.out_features, args.bias, args.seed)?;
    Ok(Box::new(model))
}

fn build_mlp(kwargs: &Kwargs) -> Result<Box<dyn Model>> {
    let args: MlpArgs = decode_kwargs("model", "Mlp", kwargs)?;
    let model = Mlp::new(
        args.in_features,
        &args.hidden,
        args.out_features,
        args.activation,
        args.seed,
    )?;
    Ok(Box::new(model))
}

/// Register the built-in models.
pub fn register_models(registry: &mut Registry<crate::registry::ModelCtor>) {
    registry
        .register("Linear", build_linear)
        .register("Mlp", build_mlp);
}
