use super::Function;
use crate::tensor::{Tensor, TensorError, TensorOps};

/// Stacks its inputs along a new leading axis. Used to hand the whole
/// unrolled sequence of per-timestep outputs to a single loss node.
#[derive(Debug, Clone)]
pub struct Stack;
impl Stack {
    pub fn new() -> Box<dyn Function> {
        Box::new(Self {})
    }
}
impl Function for Stack {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        Tensor::stack(inps)
    }
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        if out_grad.dim() == 0 || out_grad.len() != inps.len() {
            return Err(TensorError::UnexpectedShape {
                expected: vec![inps.len()],
                got: out_grad.shape().to_vec(),
            });
        }
        Ok((0..inps.len()).map(|i| out_grad.get(i).into()).collect())
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
