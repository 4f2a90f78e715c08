use super::Function;
use crate::tensor::{Tensor, TensorError, TensorOps};

/// Softmax over the last axis. Keeps the probabilities from the latest
/// `run` around, since the backward pass needs them for the Jacobian.
#[derive(Debug, Clone)]
pub struct Softmax {
    out: Tensor<f32>,
}
impl Softmax {
    pub fn new() -> Box<dyn Function> {
        Box::new(Self {
            out: Tensor::scalar(0.),
        })
    }
}
impl Function for Softmax {
    fn run(&mut self, inps: &[&Tensor<f32>], _training: bool) -> Result<Tensor<f32>, TensorError> {
        self.out = inps[0].map(1, |l| {
            let max = l
                .blob()
                .iter()
                .fold(f32::NEG_INFINITY, |a, b| f32::max(a, *b));
            let sum = l.blob().iter().map(|f| (f - max).exp()).sum::<f32>();
            l.map_values(|f| (f - max).exp() / sum)
        });
        Ok(self.out.clone())
    }
    fn grad(
        &self,
        _inps: &[&Tensor<f32>],
        out_grad: &Tensor<f32>,
    ) -> Result<Vec<Tensor<f32>>, TensorError> {
        let grad = self
            .out
            .keep_right(1)
            .inners()
            .iter()
            .zip(out_grad.keep_right(1).inners().iter())
            .flat_map(|(l, o)| {
                let l_blob = l.blob();
                let o_blob = o.blob();
                let n = l_blob.len();
                let mut data = vec![0.; n];
                for i in 0..n {
                    let si = l_blob[i];
                    let mut sum = 0.;
                    for j in 0..n {
                        let sj = l_blob[j];
                        sum += (if i == j { si * (1. - si) } else { -si * sj }) * o_blob[j];
                    }
                    data[i] = sum;
                }
                data
            })
            .collect::<Vec<_>>();
        Ok(vec![Tensor::raw(out_grad.shape(), grad)?])
    }
    fn clone_box(&self) -> Box<dyn Function> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_sum_to_one() {
        let mut f = Softmax::new();
        let inp = Tensor::raw(&[2, 3], vec![1., 2., 3., -1., 0., 1.]).unwrap();
        let out = f.run(&[&inp], false).unwrap();
        for row in out.keep_right(1).inners() {
            let sum: f32 = row.blob().iter().sum();
            assert!((sum - 1.).abs() < 1e-6);
        }
    }

    #[test]
    fn invariant_to_constant_shift() {
        let mut f = Softmax::new();
        let a = Tensor::raw(&[1, 3], vec![1., 2., 3.]).unwrap();
        let b = Tensor::raw(&[1, 3], vec![101., 102., 103.]).unwrap();
        let oa = f.run(&[&a], false).unwrap();
        let ob = f.run(&[&b], false).unwrap();
        for (x, y) in oa.blob().iter().zip(ob.blob()) {
            assert!((x - y).abs() < 1e-6);
        }
    }
}
