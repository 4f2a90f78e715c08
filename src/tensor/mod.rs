mod elements;
mod error;
mod ops;

pub use elements::*;
pub use error::*;
pub use ops::*;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A dense tensor owning a flat buffer in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor<V: TensorElement> {
    data: Vec<V>,
    shape: Vec<usize>,
}

/// A borrowed window into a `Tensor`, addressed by an offset and a shape.
///
/// Views get cheaper as they `zoom`: zooming into index `i` of the leading
/// axis narrows the window without copying.
#[derive(Debug, Clone)]
pub struct TensorView<'a, V: TensorElement> {
    mirror: &'a Tensor<V>,
    offset: usize,
    shape: Vec<usize>,
}

impl<'a, V: TensorElement> TensorView<'a, V> {
    pub fn zoom(&mut self, ind: usize) {
        assert!(!self.shape.is_empty() && ind < self.shape[0]);
        let sub_size: usize = self.shape[1..].iter().product();
        self.shape.remove(0);
        self.offset += sub_size * ind;
    }
}

impl<V: TensorElement> From<TensorView<'_, V>> for Tensor<V> {
    fn from(view: TensorView<'_, V>) -> Tensor<V> {
        Tensor {
            data: view.blob().to_vec(),
            shape: view.shape().to_vec(),
        }
    }
}

pub trait TensorOps<V: TensorElement>: Sized + Into<Tensor<V>> + Send + Sync {
    fn shape(&self) -> &[usize];
    fn blob(&self) -> &[V];
    fn tensor(&self) -> &Tensor<V>;
    fn offset(&self) -> usize;

    fn dim(&self) -> usize {
        self.shape().len()
    }
    fn len(&self) -> usize {
        *self
            .shape()
            .first()
            .expect("scalar tensors don't have a length")
    }
    fn is_empty(&self) -> bool {
        self.size() == 0
    }
    fn size(&self) -> usize {
        self.shape().iter().product()
    }
    fn scalar(&self) -> V {
        assert!(self.dim() == 0, "tensor is not a scalar");
        self.blob()[0]
    }
    fn mean(&self) -> f32 {
        self.blob().iter().map(|v| v.as_f32()).sum::<f32>() / self.size() as f32
    }

    fn view(&self) -> TensorView<'_, V> {
        TensorView {
            mirror: self.tensor(),
            offset: self.offset(),
            shape: self.shape().to_vec(),
        }
    }

    fn get(&self, ind: usize) -> TensorView<'_, V> {
        let mut v = self.view();
        v.zoom(ind);
        v
    }

    fn inners(&self) -> Vec<TensorView<'_, V>> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }

    fn reshape(&self, shape: &[usize]) -> TensorView<'_, V> {
        let new_size: usize = shape.iter().product();
        assert_eq!(new_size, self.size(), "reshape cannot change tensor size");
        TensorView {
            mirror: self.tensor(),
            offset: self.offset(),
            shape: shape.to_vec(),
        }
    }

    /// Merges all leading axes so that exactly `dims` trailing axes remain.
    fn keep_right(&self, dims: usize) -> TensorView<'_, V> {
        assert!(dims <= self.dim());
        let mut new_shape = self.shape().to_vec();
        if self.dim() == dims {
            new_shape.insert(0, 1);
        }
        while new_shape.len() > dims + 1 {
            let first = new_shape.remove(0);
            new_shape[0] *= first;
        }
        self.reshape(&new_shape)
    }

    fn map_values<W: TensorElement, F: Fn(V) -> W + Sync + Send>(&self, f: F) -> Tensor<W> {
        Tensor::raw_vec(
            self.shape().to_vec(),
            self.blob().par_iter().map(|v| f(*v)).collect(),
        )
    }

    /// Applies `f` to every `dims`-dimensional inner slice in parallel and
    /// glues the results back together under the remaining leading axes.
    fn map<W: TensorElement, F: Fn(TensorView<'_, V>) -> Tensor<W> + Sync + Send>(
        &self,
        dims: usize,
        f: F,
    ) -> Tensor<W> {
        let results = self
            .keep_right(dims)
            .inners()
            .into_par_iter()
            .map(f)
            .collect::<Vec<_>>();
        let inner_shape = results
            .first()
            .expect("cannot map over an empty tensor")
            .shape()
            .to_vec();
        assert!(results.iter().all(|t| t.shape() == inner_shape));
        let mut shape = self.shape()[..self.dim() - dims].to_vec();
        shape.extend(&inner_shape);
        Tensor::raw_vec(
            shape,
            results.into_iter().flat_map(|t| t.into_blob()).collect(),
        )
    }

    /// Swaps the trailing two axes, batched over any leading axes.
    fn transpose(&self) -> Tensor<V> {
        self.map(2, |m| {
            let (d0, d1) = (m.shape()[0], m.shape()[1]);
            let mut data = Vec::with_capacity(d0 * d1);
            for j in 0..d1 {
                for i in 0..d0 {
                    data.push(m.blob()[i * d1 + j]);
                }
            }
            Tensor::raw_vec(vec![d1, d0], data)
        })
    }
}

impl<V: TensorElement> TensorOps<V> for Tensor<V> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }
    fn blob(&self) -> &[V] {
        &self.data
    }
    fn tensor(&self) -> &Tensor<V> {
        self
    }
    fn offset(&self) -> usize {
        0
    }
}

impl<V: TensorElement> TensorOps<V> for TensorView<'_, V> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }
    fn blob(&self) -> &[V] {
        &self.mirror.data[self.offset..self.offset + self.size()]
    }
    fn tensor(&self) -> &Tensor<V> {
        self.mirror
    }
    fn offset(&self) -> usize {
        self.offset
    }
}

impl<V: TensorElement> Tensor<V> {
    pub fn raw(shape: &[usize], data: Vec<V>) -> Result<Self, TensorError> {
        let size: usize = shape.iter().product();
        if size != data.len() {
            return Err(TensorError::UnexpectedShape {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }

    pub(crate) fn raw_vec(shape: Vec<usize>, data: Vec<V>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { data, shape }
    }

    pub(crate) fn into_blob(self) -> Vec<V> {
        self.data
    }

    pub fn scalar(v: V) -> Self {
        Self {
            data: vec![v],
            shape: vec![],
        }
    }

    pub fn vector(v: &[V]) -> Self {
        Self {
            data: v.to_vec(),
            shape: vec![v.len()],
        }
    }

    pub fn constant(shape: &[usize], value: V) -> Self {
        Self {
            data: vec![value; shape.iter().product()],
            shape: shape.to_vec(),
        }
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self::constant(shape, V::zero())
    }

    pub fn ones(shape: &[usize]) -> Self {
        Self::constant(shape, V::one())
    }

    /// Stacks equally-shaped tensors along a new leading axis.
    pub fn stack<T: TensorOps<V>>(inps: &[&T]) -> Result<Self, TensorError> {
        let first_shape = inps.first().ok_or(TensorError::EmptyStack)?.shape().to_vec();
        let mut data = Vec::with_capacity(first_shape.iter().product::<usize>() * inps.len());
        for inp in inps {
            if inp.shape() != first_shape {
                return Err(TensorError::ShapeMismatch(
                    first_shape,
                    inp.shape().to_vec(),
                ));
            }
            data.extend_from_slice(inp.blob());
        }
        let mut shape = vec![inps.len()];
        shape.extend(&first_shape);
        Ok(Self { data, shape })
    }
}

impl Tensor<f32> {
    /// Samples every element from `Normal(0, std)`, drawing from the given
    /// stream so seeded runs reproduce exactly.
    pub fn rand_normal<R: Rng>(rng: &mut R, std: f32, shape: &[usize]) -> Self {
        let normal = Normal::new(0.0, std).unwrap();
        Self {
            data: (0..shape.iter().product::<usize>())
                .map(|_| normal.sample(rng))
                .collect(),
            shape: shape.to_vec(),
        }
    }
}
