use super::{init_bias, init_weight, load_parameter, Layer, StateError};
use crate::funcs::{Add, MatMul, Softmax as SoftmaxFn};
use crate::graph::{Graph, GraphError, TensorId};
use crate::tensor::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Affine projection followed by a softmax, turning hidden activations
/// into a probability distribution over the vocabulary.
pub struct Softmax {
    name: String,
    n_input: usize,
    n_output: usize,
    w: TensorId,
    b: TensorId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxState {
    pub name: String,
    pub n_input: usize,
    pub n_output: usize,
    pub parameters: BTreeMap<String, Tensor<f32>>,
}

impl Softmax {
    pub fn new<R: Rng>(
        graph: &mut Graph,
        rng: &mut R,
        name: impl Into<String>,
        n_input: usize,
        n_output: usize,
    ) -> Self {
        let name = name.into();
        let w = init_weight(graph, rng, format!("{}_W", name), &[n_input, n_output]);
        let b = init_bias(graph, format!("{}_b", name), n_output);
        Self {
            name,
            n_input,
            n_output,
            w,
            b,
        }
    }

    pub fn n_input(&self) -> usize {
        self.n_input
    }
    pub fn n_output(&self) -> usize {
        self.n_output
    }

    /// `softmax(x*W + b)`, rows sum to one.
    pub fn forward(&self, g: &mut Graph, x: TensorId) -> Result<TensorId, GraphError> {
        let xw = g.call(MatMul::new(), &[x, self.w])?;
        let logits = g.call(Add::new(), &[xw, self.b])?;
        g.call(SoftmaxFn::new(), &[logits])
    }

    pub fn state(&self, graph: &Graph) -> Result<SoftmaxState, GraphError> {
        let mut parameters = BTreeMap::new();
        parameters.insert("W".to_string(), graph.get(self.w)?.clone());
        parameters.insert("b".to_string(), graph.get(self.b)?.clone());
        Ok(SoftmaxState {
            name: self.name.clone(),
            n_input: self.n_input,
            n_output: self.n_output,
            parameters,
        })
    }

    pub fn load(graph: &mut Graph, state: &SoftmaxState) -> Result<Self, StateError> {
        let w = load_parameter(
            graph,
            &state.parameters,
            &state.name,
            "W",
            &[state.n_input, state.n_output],
        )?;
        let b = load_parameter(graph, &state.parameters, &state.name, "b", &[state.n_output])?;
        Ok(Self {
            name: state.name.clone(),
            n_input: state.n_input,
            n_output: state.n_output,
            w,
            b,
        })
    }
}

impl Layer for Softmax {
    fn name(&self) -> &str {
        &self.name
    }
    fn parameters(&self) -> Vec<TensorId> {
        vec![self.w, self.b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn forward_rows_are_distributions() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut g = Graph::new();
        let layer = Softmax::new(&mut g, &mut rng, "out", 3, 6);
        let x = g.alloc(Tensor::rand_normal(&mut rng, 1., &[4, 3]), "x");
        let dist = layer.forward(&mut g, x).unwrap();
        g.forward(false).unwrap();

        let out = g.get(dist).unwrap();
        assert_eq!(out.shape(), &[4, 6]);
        for row in 0..4 {
            let sum: f32 = out.get(row).blob().iter().sum();
            assert!((sum - 1.).abs() < 1e-5);
        }
    }

    #[test]
    fn state_load_round_trip() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut g = Graph::new();
        let layer = Softmax::new(&mut g, &mut rng, "out", 3, 6);
        let saved = layer.state(&g).unwrap();

        let mut g2 = Graph::new();
        let restored = Softmax::load(&mut g2, &saved).unwrap();
        assert_eq!(restored.n_input(), 3);
        assert_eq!(restored.n_output(), 6);
        assert_eq!(
            g.get(layer.parameters()[0]).unwrap(),
            g2.get(restored.parameters()[0]).unwrap()
        );
    }
}
