use super::Loss;
use crate::tensor::{Tensor, TensorError, TensorOps};
use rayon::prelude::*;

/// Probabilities below this are clamped before taking the log, so a target
/// the model assigns (near-)zero mass still yields a finite loss. An
/// all-zero target row (out-of-vocabulary one-hot) contributes exactly 0.
pub const EPSILON: f32 = 1e-7;

/// Categorical cross-entropy between predicted distributions (the last
/// axis) and one-hot targets of the same shape.
#[derive(Debug, Clone)]
pub struct CrossEntropy {
    target: Tensor<f32>,
}
impl CrossEntropy {
    pub fn new(target: Tensor<f32>) -> Box<dyn Loss> {
        Box::new(Self { target })
    }
}

impl Loss for CrossEntropy {
    fn run(&self, inp: &Tensor<f32>) -> Result<(Tensor<f32>, Tensor<f32>), TensorError> {
        if inp.shape() != self.target.shape() {
            return Err(TensorError::UnexpectedShape {
                expected: self.target.shape().to_vec(),
                got: inp.shape().to_vec(),
            });
        }
        let rows = inp.keep_right(1);
        let target_rows = self.target.keep_right(1);
        let (loss, grad): (Vec<f32>, Vec<Vec<f32>>) = rows
            .inners()
            .par_iter()
            .zip(target_rows.inners().par_iter())
            .map(|(p, y)| {
                let mut row_loss = 0.;
                let row_grad = p
                    .blob()
                    .iter()
                    .zip(y.blob().iter())
                    .map(|(p, y)| {
                        let clamped = p.max(EPSILON);
                        row_loss -= y * clamped.ln();
                        -y / clamped
                    })
                    .collect::<Vec<_>>();
                (row_loss, row_grad)
            })
            .unzip();
        let loss_shape = &inp.shape()[..inp.dim() - 1];
        Ok((
            Tensor::raw(loss_shape, loss)?,
            Tensor::raw(inp.shape(), grad.into_iter().flatten().collect())?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_prediction_has_near_zero_loss() {
        let pred = Tensor::raw(&[1, 3], vec![0., 1., 0.]).unwrap();
        let target = pred.clone();
        let (loss, _) = CrossEntropy::new(target).run(&pred).unwrap();
        assert!(loss.blob()[0].abs() < 1e-6);
    }

    #[test]
    fn all_zero_target_row_is_finite() {
        let pred = Tensor::raw(&[1, 3], vec![0.2, 0.5, 0.3]).unwrap();
        let target = Tensor::zeros(&[1, 3]);
        let (loss, grad) = CrossEntropy::new(target).run(&pred).unwrap();
        assert_eq!(loss.blob()[0], 0.);
        assert!(grad.blob().iter().all(|g| g.is_finite()));
    }

    #[test]
    fn zero_predicted_mass_is_clamped() {
        let pred = Tensor::raw(&[1, 2], vec![0., 1.]).unwrap();
        let target = Tensor::raw(&[1, 2], vec![1., 0.]).unwrap();
        let (loss, grad) = CrossEntropy::new(target).run(&pred).unwrap();
        assert!(loss.blob()[0].is_finite());
        assert!(grad.blob()[0].is_finite());
    }

    #[test]
    fn rejects_shape_mismatch() {
        let pred = Tensor::<f32>::zeros(&[1, 3]);
        let target = Tensor::<f32>::zeros(&[1, 4]);
        assert!(CrossEntropy::new(target).run(&pred).is_err());
    }
}
