use super::Function;
use crate::tensor::{Tensor, TensorError, TensorOps};

#[derive(Debug, Clone)]
pub struct Tanh;
impl Tanh {
    pub fn new() -> Box<dyn Function> {
        Box::new(Self {})
    }
}
impl Function for Tanh {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        Ok(inps[0].map_values(f32::tanh))
    }
    fn grad(
        &self,
        inps: &[&Tensor<f32>],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        let der = inps[0].map_values(|f| {
            let t = f.tanh();
            1. - t * t
        });
        Ok(vec![(&der * out_grad)?])
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}
