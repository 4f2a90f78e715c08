use super::*;
use std::ops::{Add, BitXor, Mul, Sub};

fn combine_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>, TensorError> {
    let out_len = a.len().max(b.len());
    let mut shape = vec![0; out_len];
    for i in 0..out_len {
        let av = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let bv = if i < b.len() { b[b.len() - 1 - i] } else { 1 };
        shape[out_len - 1 - i] = if av == bv {
            av
        } else if av == 1 {
            bv
        } else if bv == 1 {
            av
        } else {
            return Err(TensorError::ShapeMismatch(a.to_vec(), b.to_vec()));
        };
    }
    Ok(shape)
}

/// Runs `f` on every pair of `dims`-dimensional inner slices, broadcasting
/// the leading axes of both operands against each other (right-aligned,
/// size-1 axes repeat). The only broadcasting this crate performs.
pub(crate) fn combine_map<V, W, X, T1, T2, F>(
    t1: &T1,
    t2: &T2,
    dims: usize,
    f: F,
) -> Result<Tensor<X>, TensorError>
where
    V: TensorElement,
    W: TensorElement,
    X: TensorElement,
    T1: TensorOps<V>,
    T2: TensorOps<W>,
    F: Fn(&TensorView<'_, V>, &TensorView<'_, W>) -> Tensor<X> + Sync + Send,
{
    if t1.dim() < dims || t2.dim() < dims {
        return Err(TensorError::ShapeMismatch(
            t1.shape().to_vec(),
            t2.shape().to_vec(),
        ));
    }
    let lead1 = t1.dim() - dims;
    let lead2 = t2.dim() - dims;
    let mut shape = combine_shapes(&t1.shape()[..lead1], &t2.shape()[..lead2])?;
    let works: usize = shape.iter().product();
    let results = (0..works)
        .into_par_iter()
        .map(|mut work| {
            let mut pos = vec![0; shape.len()];
            for (j, s) in shape.iter().enumerate().rev() {
                pos[j] = work % s;
                work /= s;
            }
            let mut v1 = t1.view();
            for (k, s) in t1.shape()[..lead1].iter().enumerate() {
                v1.zoom(if *s == 1 { 0 } else { pos[shape.len() - lead1 + k] });
            }
            let mut v2 = t2.view();
            for (k, s) in t2.shape()[..lead2].iter().enumerate() {
                v2.zoom(if *s == 1 { 0 } else { pos[shape.len() - lead2 + k] });
            }
            f(&v1, &v2)
        })
        .collect::<Vec<_>>();
    let inner_shape = results
        .first()
        .map(|t| t.shape().to_vec())
        .unwrap_or_default();
    let data = results.into_iter().flat_map(|t| t.into_blob()).collect();
    shape.extend(&inner_shape);
    Ok(Tensor::raw_vec(shape, data))
}

fn zip_map<V, T1, T2, F>(t1: &T1, t2: &T2, f: F) -> Result<Tensor<V>, TensorError>
where
    V: TensorElement,
    T1: TensorOps<V>,
    T2: TensorOps<V>,
    F: Fn(V, V) -> V + Sync + Send,
{
    combine_map(t1, t2, 0, |a, b| Tensor::scalar(f(a.scalar(), b.scalar())))
}

/// Matrix product over the trailing two axes; leading axes broadcast.
pub fn matmul<V, T1, T2>(t1: &T1, t2: &T2) -> Result<Tensor<V>, TensorError>
where
    V: TensorElement + Mul<Output = V> + Add<Output = V>,
    T1: TensorOps<V>,
    T2: TensorOps<V>,
{
    if t1.dim() < 2 || t2.dim() < 2 {
        return Err(TensorError::ShapeMismatch(
            t1.shape().to_vec(),
            t2.shape().to_vec(),
        ));
    }
    if t1.shape()[t1.dim() - 1] != t2.shape()[t2.dim() - 2] {
        return Err(TensorError::ShapeMismatch(
            t1.shape().to_vec(),
            t2.shape().to_vec(),
        ));
    }
    combine_map(t1, t2, 2, |a, b| {
        let (m, k) = (a.shape()[0], a.shape()[1]);
        let n = b.shape()[1];
        let data = (0..m * n)
            .into_par_iter()
            .map(|work| {
                let (i, j) = (work / n, work % n);
                let mut sum = V::zero();
                for kk in 0..k {
                    sum = sum + a.blob()[i * k + kk] * b.blob()[kk * n + j];
                }
                sum
            })
            .collect();
        Tensor::raw_vec(vec![m, n], data)
    })
}

impl<V: TensorElement + Add<Output = V>> Add for &Tensor<V> {
    type Output = Result<Tensor<V>, TensorError>;
    fn add(self, other: &Tensor<V>) -> Self::Output {
        zip_map(self, other, |a, b| a + b)
    }
}

impl<'a, V: TensorElement + Add<Output = V>> Add<&TensorView<'a, V>> for &Tensor<V> {
    type Output = Result<Tensor<V>, TensorError>;
    fn add(self, other: &TensorView<'a, V>) -> Self::Output {
        zip_map(self, other, |a, b| a + b)
    }
}

impl<V: TensorElement + Sub<Output = V>> Sub for &Tensor<V> {
    type Output = Result<Tensor<V>, TensorError>;
    fn sub(self, other: &Tensor<V>) -> Self::Output {
        zip_map(self, other, |a, b| a - b)
    }
}

impl<V: TensorElement + Mul<Output = V>> Mul for &Tensor<V> {
    type Output = Result<Tensor<V>, TensorError>;
    fn mul(self, other: &Tensor<V>) -> Self::Output {
        zip_map(self, other, |a, b| a * b)
    }
}

impl<V: TensorElement + Mul<Output = V> + Add<Output = V>> BitXor for &Tensor<V> {
    type Output = Result<Tensor<V>, TensorError>;
    fn bitxor(self, other: &Tensor<V>) -> Self::Output {
        matmul(self, other)
    }
}
