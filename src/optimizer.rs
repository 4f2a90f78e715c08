use crate::tensor::{Tensor, TensorError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// An update rule binding gradients to parameter changes. One `step` call
/// receives every `(parameter, gradient)` pair of the model, in the
/// model's stable parameter order, and rewrites the parameters in place.
pub trait Optimizer: Clone + Serialize + serde::de::DeserializeOwned {
    fn step(&self, params: Vec<(&mut Tensor<f32>, &Tensor<f32>)>) -> Result<(), TensorError>;
}

/// Plain stochastic gradient descent: `p <- p - learning_rate * g`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    /// The learning rate is fixed for the optimizer's lifetime and must be
    /// positive.
    pub fn new(learning_rate: f32) -> Self {
        assert!(
            learning_rate > 0.,
            "learning rate must be a positive scalar"
        );
        Self { learning_rate }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl Optimizer for Sgd {
    fn step(&self, params: Vec<(&mut Tensor<f32>, &Tensor<f32>)>) -> Result<(), TensorError> {
        params.into_par_iter().try_for_each(|(param, grad)| {
            *param = (&*param - &(grad * &Tensor::scalar(self.learning_rate))?)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn sgd_applies_the_exact_rule() {
        let mut p = Tensor::vector(&[1.0, -2.0]);
        let g = Tensor::vector(&[0.5, 0.25]);
        Sgd::new(0.1).step(vec![(&mut p, &g)]).unwrap();
        assert_eq!(p.blob(), &[1.0 - 0.1 * 0.5, -2.0 - 0.1 * 0.25]);
    }

    #[test]
    fn zero_gradient_leaves_parameter_untouched() {
        let mut p = Tensor::vector(&[1.0, 2.0]);
        let before = p.clone();
        let g = Tensor::zeros(&[2]);
        Sgd::new(0.5).step(vec![(&mut p, &g)]).unwrap();
        assert_eq!(p, before);
    }

    #[test]
    #[should_panic]
    fn non_positive_learning_rate_is_rejected() {
        Sgd::new(0.);
    }
}
