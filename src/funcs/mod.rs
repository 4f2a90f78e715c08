mod add;
mod coeff;
mod crossentropy;
mod hadamard;
mod matmul;
mod sigmoid;
mod softmax;
mod stack;
mod tanh;

pub use add::*;
pub use coeff::*;
pub use crossentropy::*;
pub use hadamard::*;
pub use matmul::*;
pub use sigmoid::*;
pub use softmax::*;
pub use stack::*;
pub use tanh::*;

use crate::tensor::{Tensor, TensorError};

/// A differentiable operation in the computation graph.
///
/// `run` evaluates the operation on concrete inputs; `grad` receives the
/// same inputs plus the gradient flowing into the output and returns one
/// gradient per input.
pub trait Function: std::fmt::Debug {
    fn clone_box(&self) -> Box<dyn Function>;
    fn run(&mut self, inps: &[&Tensor<f32>], training: bool) -> Result<Tensor<f32>, TensorError>;
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError>;
}

/// A terminal loss: maps the graph's output tensor to per-row loss values
/// and the gradient of the summed loss with respect to that output.
pub trait Loss: std::fmt::Debug {
    fn run(&self, inp: &Tensor<f32>) -> Result<(Tensor<f32>, Tensor<f32>), TensorError>;
}
