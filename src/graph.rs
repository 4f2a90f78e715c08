use crate::funcs::{Function, Loss};
use crate::optimizer::Optimizer;
use crate::tensor::{Tensor, TensorError, TensorOps};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

pub type TensorId = usize;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("tensor error: {0}")]
    TensorError(#[from] TensorError),
    #[error("tensor with id {0} not found")]
    TensorNotFound(usize),
}

struct Computation {
    inps: Vec<TensorId>,
    func: Box<dyn Function>,
}

impl Clone for Computation {
    fn clone(&self) -> Self {
        Self {
            inps: self.inps.clone(),
            func: self.func.clone_box(),
        }
    }
}

/// A computation graph built once and executed many times.
///
/// Leaves are registered with `alloc` and re-fed with `load`; `call`
/// appends an operation whose id is greater than all of its inputs', so
/// iterating the computations in id order is a topological forward pass
/// and the reverse order is the backward pass.
pub struct Graph {
    tensors: Vec<Tensor<f32>>,
    grads: Vec<Tensor<f32>>,
    names: Vec<String>,
    computations: BTreeMap<TensorId, Computation>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            tensors: Vec::new(),
            grads: Vec::new(),
            names: Vec::new(),
            computations: BTreeMap::new(),
        }
    }

    pub fn alloc(&mut self, t: Tensor<f32>, name: impl Into<String>) -> TensorId {
        self.grads.push(Tensor::zeros(t.shape()));
        self.tensors.push(t);
        self.names.push(name.into());
        self.tensors.len() - 1
    }

    /// Replaces a leaf's value. The new tensor may carry a different batch
    /// size than the one the graph was built with.
    pub fn load<T: TensorOps<f32>>(&mut self, id: TensorId, t: &T) -> Result<(), GraphError> {
        let slot = self
            .tensors
            .get_mut(id)
            .ok_or(GraphError::TensorNotFound(id))?;
        *slot = t.view().into();
        Ok(())
    }

    pub fn get(&self, id: TensorId) -> Result<&Tensor<f32>, GraphError> {
        self.tensors.get(id).ok_or(GraphError::TensorNotFound(id))
    }

    pub fn get_grad(&self, id: TensorId) -> Result<&Tensor<f32>, GraphError> {
        self.grads.get(id).ok_or(GraphError::TensorNotFound(id))
    }

    pub fn name_of(&self, id: TensorId) -> Result<&str, GraphError> {
        self.names
            .get(id)
            .map(|s| s.as_str())
            .ok_or(GraphError::TensorNotFound(id))
    }

    /// Zeroes all gradients at the tensors' current shapes, which may have
    /// changed since the last pass if inputs were re-loaded.
    pub fn zero_grad(&mut self) {
        for (grad, tensor) in self.grads.iter_mut().zip(self.tensors.iter()) {
            *grad = Tensor::zeros(tensor.shape());
        }
    }

    fn add_grad<T: TensorOps<f32>>(&mut self, id: TensorId, add: T) -> Result<(), GraphError> {
        let shape = self.get(id)?.shape().to_vec();
        let grad = self
            .grads
            .get_mut(id)
            .ok_or(GraphError::TensorNotFound(id))?;
        if add.dim() > shape.len() {
            // Contribution carries extra leading (batch) axes: sum them away.
            for t in add.keep_right(shape.len()).inners().iter() {
                *grad = (&*grad + t)?;
            }
        } else {
            *grad = (&*grad + &add.view())?;
        }
        Ok(())
    }

    /// Appends an operation over existing tensors, evaluating it once so
    /// the output slot is allocated at a consistent shape.
    pub fn call(&mut self, mut f: Box<dyn Function>, inps: &[TensorId]) -> Result<TensorId, GraphError> {
        let tensors = inps
            .iter()
            .map(|id| self.get(*id))
            .collect::<Result<Vec<_>, GraphError>>()?;
        let out = f.run(&tensors, false)?;
        let id = self.alloc(out, "");
        self.computations.insert(
            id,
            Computation {
                inps: inps.to_vec(),
                func: f,
            },
        );
        Ok(id)
    }

    pub fn forward(&mut self, training: bool) -> Result<(), GraphError> {
        for (out, c) in self.computations.iter_mut() {
            let tensors = c
                .inps
                .iter()
                .map(|id| self.tensors.get(*id).ok_or(GraphError::TensorNotFound(*id)))
                .collect::<Result<Vec<_>, GraphError>>()?;
            let result = c.func.run(&tensors, training)?;
            self.tensors[*out] = result;
        }
        Ok(())
    }

    /// Seeds the gradient of `id` with the loss gradient scaled by `1/N`
    /// (N = number of loss rows, so the result is a mean), then walks every
    /// computation in reverse. Returns the mean loss.
    pub fn backward_all(&mut self, id: TensorId, loss_fn: Box<dyn Loss>) -> Result<f32, GraphError> {
        let (loss, grad) = loss_fn.run(self.get(id)?)?;
        let mean_coeff = 1. / loss.size() as f32;
        self.add_grad(id, (&grad * &Tensor::scalar(mean_coeff))?)?;

        let computations = self.computations.clone();
        for (out, comp) in computations.iter().rev() {
            let inps = comp
                .inps
                .iter()
                .map(|id| self.tensors.get(*id).ok_or(GraphError::TensorNotFound(*id)))
                .collect::<Result<Vec<_>, GraphError>>()?;
            let out_grad = self
                .grads
                .get(*out)
                .ok_or(GraphError::TensorNotFound(*out))?;
            let grads = comp.func.grad(&inps, out_grad)?;
            for (inp, grad) in comp.inps.clone().into_iter().zip(grads.into_iter()) {
                self.add_grad(inp, grad)?;
            }
        }

        Ok(loss.mean())
    }

    /// Hands every `(parameter, gradient)` pair to the optimizer, in
    /// ascending id order (registration order) for deterministic pairing.
    pub fn optimize<O: Optimizer>(&mut self, opt: &O, params: &[TensorId]) -> Result<(), GraphError> {
        let set = params.iter().copied().collect::<HashSet<_>>();
        let grads = &self.grads;
        let pairs = self
            .tensors
            .iter_mut()
            .enumerate()
            .filter(|(id, _)| set.contains(id))
            .map(|(id, tensor)| {
                let grad = grads.get(id).ok_or(GraphError::TensorNotFound(id))?;
                Ok((tensor, grad))
            })
            .collect::<Result<Vec<_>, GraphError>>()?;
        opt.step(pairs)?;
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcs::{Add, Coeff, Hadamard};

    /// Loss that passes the output through unchanged, with unit gradient.
    #[derive(Debug)]
    struct SumLoss;
    impl Loss for SumLoss {
        fn run(&self, inp: &Tensor<f32>) -> Result<(Tensor<f32>, Tensor<f32>), TensorError> {
            Ok((inp.clone(), Tensor::ones(inp.shape())))
        }
    }

    #[test]
    fn gradient_of_squared_distance() {
        // cost(p) = (p - target)^2, d cost / d p = 2 * (p - target)
        let mut g = Graph::new();
        let p = g.alloc(Tensor::vector(&[3.]), "p");
        let target = g.alloc(Tensor::vector(&[1.]), "target");
        let neg_target = g.call(Coeff::new(-1.), &[target]).unwrap();
        let diff = g.call(Add::new(), &[p, neg_target]).unwrap();
        let cost = g.call(Hadamard::new(), &[diff, diff]).unwrap();

        g.forward(true).unwrap();
        g.zero_grad();
        let loss = g.backward_all(cost, Box::new(SumLoss)).unwrap();

        assert!((loss - 4.).abs() < 1e-6);
        assert!((g.get_grad(p).unwrap().blob()[0] - 4.).abs() < 1e-6);
    }

    #[test]
    fn sgd_step_on_squared_distance_matches_the_rule_exactly() {
        // One optimize call on cost(p) = (p - target)^2 must move p to
        // exactly p - lr * 2 * (p - target).
        use crate::optimizer::Sgd;

        let mut g = Graph::new();
        let p = g.alloc(Tensor::vector(&[3.]), "p");
        let target = g.alloc(Tensor::vector(&[1.]), "target");
        let neg_target = g.call(Coeff::new(-1.), &[target]).unwrap();
        let diff = g.call(Add::new(), &[p, neg_target]).unwrap();
        let cost = g.call(Hadamard::new(), &[diff, diff]).unwrap();

        g.forward(true).unwrap();
        g.zero_grad();
        g.backward_all(cost, Box::new(SumLoss)).unwrap();
        g.optimize(&Sgd::new(0.25), &[p]).unwrap();

        assert_eq!(g.get(p).unwrap().blob(), &[3. - 0.25 * 2. * (3. - 1.)]);
    }

    #[test]
    fn forward_recomputes_after_load() {
        let mut g = Graph::new();
        let a = g.alloc(Tensor::vector(&[1.]), "a");
        let b = g.alloc(Tensor::vector(&[2.]), "b");
        let sum = g.call(Add::new(), &[a, b]).unwrap();
        assert_eq!(g.get(sum).unwrap().blob(), &[3.]);

        g.load(a, &Tensor::vector(&[10.])).unwrap();
        g.forward(false).unwrap();
        assert_eq!(g.get(sum).unwrap().blob(), &[12.]);
    }

    #[test]
    fn unknown_id_is_an_error() {
        let g = Graph::new();
        assert!(matches!(g.get(3), Err(GraphError::TensorNotFound(3))));
    }
}
