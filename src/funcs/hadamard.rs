use super::Function;
use crate::tensor::{Tensor, TensorError};

/// Element-wise product of two equally-shaped tensors.
#[derive(Debug, Clone)]
pub struct Hadamard;
impl Hadamard {
    pub fn new() -> Box<dyn Function> {
        Box::new(Self {})
    }
}
impl Function for Hadamard {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        inps[0] * inps[1]
    }
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        Ok(vec![(inps[1] * out_grad)?, (inps[0] * out_grad)?])
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
