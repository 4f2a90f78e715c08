mod lstm;
mod softmax;

pub use lstm::*;
pub use softmax::*;

use crate::graph::{Graph, GraphError, TensorId};
use crate::tensor::Tensor;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("serialized state is missing parameter {0:?}")]
    MissingParameter(String),
    #[error("parameter {name:?} has shape {got:?}, expected {expected:?}")]
    ParameterShape {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("inconsistent serialized state: {0}")]
    ConfigMismatch(String),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
}

/// What every parameterized layer provides: a name and its parameter
/// handles, in registration order. The order must be stable across calls —
/// it is what pairs gradients with parameters during optimization.
pub trait Layer {
    fn name(&self) -> &str;
    fn parameters(&self) -> Vec<TensorId>;
}

/// Registers a weight matrix drawn from `Normal(0, 1/sqrt(fan_in))`:
/// small, dimension-scaled values that break symmetry.
pub(crate) fn init_weight<R: Rng>(
    graph: &mut Graph,
    rng: &mut R,
    name: String,
    shape: &[usize],
) -> TensorId {
    let std = 1. / (shape[0] as f32).sqrt();
    graph.alloc(Tensor::rand_normal(rng, std, shape), name)
}

/// Registers a zero-initialized bias vector.
pub(crate) fn init_bias(graph: &mut Graph, name: String, n: usize) -> TensorId {
    graph.alloc(Tensor::zeros(&[n]), name)
}

/// Re-registers a parameter from serialized state, validating presence and
/// shape. Loads are atomic: any failure aborts the whole reconstruction.
pub(crate) fn load_parameter(
    graph: &mut Graph,
    parameters: &std::collections::BTreeMap<String, Tensor<f32>>,
    scope: &str,
    name: &str,
    expected: &[usize],
) -> Result<TensorId, StateError> {
    use crate::tensor::TensorOps;
    let value = parameters
        .get(name)
        .ok_or_else(|| StateError::MissingParameter(name.into()))?;
    if value.shape() != expected {
        return Err(StateError::ParameterShape {
            name: name.into(),
            expected: expected.to_vec(),
            got: value.shape().to_vec(),
        });
    }
    Ok(graph.alloc(value.clone(), format!("{}_{}", scope, name)))
}
