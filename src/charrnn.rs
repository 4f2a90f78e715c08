use crate::funcs::{CrossEntropy, Loss, Stack};
use crate::graph::{Graph, GraphError, TensorId};
use crate::layers::{Layer, Lstm, LstmConfig, LstmState, Softmax, SoftmaxState, StateError};
use crate::optimizer::Optimizer;
use crate::tensor::{Tensor, TensorError, TensorOps};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything needed to reconstruct a model: stack dimensions plus the
/// serialized state of every layer, bottom LSTM first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharRnnState {
    pub n_hidden: usize,
    pub n_layers: usize,
    pub lstm: Vec<LstmState>,
    pub output: SoftmaxState,
}

/// Handles into the unrolled graph. `step_states[t][l]` is the
/// `(hidden, cell-state)` pair produced by layer `l` at timestep `t`.
struct Wiring {
    inputs: Vec<TensorId>,
    init_hiddens: Vec<TensorId>,
    init_states: Vec<TensorId>,
    step_states: Vec<Vec<(TensorId, TensorId)>>,
    dists: Vec<TensorId>,
    stacked: TensorId,
}

/// A character-level language model: a stack of LSTM cells unrolled over a
/// fixed number of timesteps, topped with a softmax over the vocabulary.
///
/// The computation graph is wired once at construction; training, cost
/// evaluation and sampling all reuse it by re-loading its leaf tensors.
/// The model owns its random source, so a fixed seed makes every
/// construction and every `generate` stream reproducible.
pub struct CharacterRnn<O: Optimizer, R: Rng> {
    rng: R,
    graph: Graph,
    optimizer: O,
    vocab_size: usize,
    n_hidden: usize,
    n_layers: usize,
    seq_len: usize,
    lstm: Vec<Lstm>,
    output: Softmax,
    wiring: Wiring,
    params: Vec<TensorId>,
}

fn build_wiring(
    graph: &mut Graph,
    lstm: &[Lstm],
    output: &Softmax,
    vocab_size: usize,
    n_hidden: usize,
    seq_len: usize,
) -> Result<Wiring, GraphError> {
    let inputs = (0..seq_len)
        .map(|t| graph.alloc(Tensor::zeros(&[1, vocab_size]), format!("x{}", t)))
        .collect::<Vec<_>>();
    let init_hiddens = (0..lstm.len())
        .map(|l| graph.alloc(Tensor::zeros(&[1, n_hidden]), format!("h0_{}", l)))
        .collect::<Vec<_>>();
    let init_states = (0..lstm.len())
        .map(|l| graph.alloc(Tensor::zeros(&[1, n_hidden]), format!("c0_{}", l)))
        .collect::<Vec<_>>();

    let mut step_states = Vec::<Vec<(TensorId, TensorId)>>::with_capacity(seq_len);
    let mut dists = Vec::with_capacity(seq_len);
    for t in 0..seq_len {
        let mut per_layer = Vec::with_capacity(lstm.len());
        let mut x = inputs[t];
        for (l, cell) in lstm.iter().enumerate() {
            let prev_hidden = if t == 0 {
                init_hiddens[l]
            } else {
                step_states[t - 1][l].0
            };
            let prev_state = if t == 0 {
                init_states[l]
            } else {
                step_states[t - 1][l].1
            };
            let (hidden, state) = cell.step(graph, x, prev_hidden, prev_state)?;
            per_layer.push((hidden, state));
            x = hidden;
        }
        dists.push(output.forward(graph, x)?);
        step_states.push(per_layer);
    }
    let stacked = graph.call(Stack::new(), &dists)?;

    Ok(Wiring {
        inputs,
        init_hiddens,
        init_states,
        step_states,
        dists,
        stacked,
    })
}

impl<O: Optimizer, R: Rng> CharacterRnn<O, R> {
    pub fn new(
        mut rng: R,
        optimizer: O,
        vocab_size: usize,
        n_hidden: usize,
        n_layers: usize,
        seq_len: usize,
        config: LstmConfig,
    ) -> Result<Self, GraphError> {
        assert!(n_layers >= 1, "at least one recurrent layer is required");
        assert!(seq_len >= 1, "the graph must be unrolled at least one step");

        let mut graph = Graph::new();
        let mut lstm = Vec::with_capacity(n_layers);
        for l in 0..n_layers {
            let n_input = if l == 0 { vocab_size } else { n_hidden };
            lstm.push(Lstm::new(
                &mut graph,
                &mut rng,
                format!("charrnn-lstm{}", l),
                n_input,
                n_hidden,
                config,
            ));
        }
        let output = Softmax::new(&mut graph, &mut rng, "charrnn-softmax", n_hidden, vocab_size);
        let wiring = build_wiring(&mut graph, &lstm, &output, vocab_size, n_hidden, seq_len)?;
        let params = lstm
            .iter()
            .flat_map(|cell| cell.parameters())
            .chain(output.parameters())
            .collect();

        Ok(Self {
            rng,
            graph,
            optimizer,
            vocab_size,
            n_hidden,
            n_layers,
            seq_len,
            lstm,
            output,
            wiring,
            params,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
    pub fn n_hidden(&self) -> usize {
        self.n_hidden
    }
    pub fn n_layers(&self) -> usize {
        self.n_layers
    }
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Loads a `(seq_len, batch, vocab)` input and a `(layers, batch,
    /// hidden)` carried cell state into the graph and runs a forward pass.
    /// Hidden outputs always restart from zero; only the cell state is
    /// carried across calls.
    fn run_forward(
        &mut self,
        x: &Tensor<f32>,
        state: &Tensor<f32>,
        training: bool,
    ) -> Result<(), GraphError> {
        if x.dim() != 3 || x.shape()[0] != self.seq_len || x.shape()[2] != self.vocab_size {
            return Err(TensorError::UnexpectedShape {
                expected: vec![
                    self.seq_len,
                    x.shape().get(1).copied().unwrap_or(1),
                    self.vocab_size,
                ],
                got: x.shape().to_vec(),
            }
            .into());
        }
        let batch = x.shape()[1];
        if state.shape() != [self.n_layers, batch, self.n_hidden] {
            return Err(TensorError::UnexpectedShape {
                expected: vec![self.n_layers, batch, self.n_hidden],
                got: state.shape().to_vec(),
            }
            .into());
        }

        for (t, id) in self.wiring.inputs.iter().enumerate() {
            self.graph.load(*id, &x.get(t))?;
        }
        for l in 0..self.n_layers {
            self.graph.load(
                self.wiring.init_hiddens[l],
                &Tensor::<f32>::zeros(&[batch, self.n_hidden]),
            )?;
            self.graph.load(self.wiring.init_states[l], &state.get(l))?;
        }
        self.graph.forward(training)
    }

    /// `(layers, batch, hidden)` cell state after the last timestep.
    fn final_state(&self) -> Result<Tensor<f32>, GraphError> {
        let last = &self.wiring.step_states[self.seq_len - 1];
        let per_layer = last
            .iter()
            .map(|(_, c)| self.graph.get(*c))
            .collect::<Result<Vec<_>, GraphError>>()?;
        Ok(Tensor::stack(&per_layer)?)
    }

    /// Runs the sequence through the model. Returns the final layer's
    /// hidden outputs `(seq_len, batch, hidden)`, the carried cell state
    /// `(layers, batch, hidden)` and the predicted distributions
    /// `(seq_len, batch, vocab)`.
    pub fn forward(
        &mut self,
        x: &Tensor<f32>,
        state: &Tensor<f32>,
    ) -> Result<(Tensor<f32>, Tensor<f32>, Tensor<f32>), GraphError> {
        self.run_forward(x, state, false)?;
        let hiddens = self
            .wiring
            .step_states
            .iter()
            .map(|per_layer| self.graph.get(per_layer[self.n_layers - 1].0))
            .collect::<Result<Vec<_>, GraphError>>()?;
        Ok((
            Tensor::stack(&hiddens)?,
            self.final_state()?,
            self.graph.get(self.wiring.stacked)?.clone(),
        ))
    }

    /// Mean cross-entropy of the predictions against one-hot targets `y`,
    /// without touching gradients or parameters. Also returns the carried
    /// cell state so evaluation can stream through a long text.
    pub fn cost(
        &mut self,
        x: &Tensor<f32>,
        state: &Tensor<f32>,
        y: &Tensor<f32>,
    ) -> Result<(f32, Tensor<f32>), GraphError> {
        self.run_forward(x, state, false)?;
        let loss_fn = CrossEntropy::new(y.clone());
        let (loss, _) = loss_fn.run(self.graph.get(self.wiring.stacked)?)?;
        Ok((loss.mean(), self.final_state()?))
    }

    /// One training step: forward, backprop the mean cross-entropy, then a
    /// single optimizer update over every parameter. Returns the loss
    /// before the update and the carried cell state.
    pub fn train(
        &mut self,
        x: &Tensor<f32>,
        state: &Tensor<f32>,
        y: &Tensor<f32>,
    ) -> Result<(f32, Tensor<f32>), GraphError> {
        self.run_forward(x, state, true)?;
        self.graph.zero_grad();
        let loss = self
            .graph
            .backward_all(self.wiring.stacked, CrossEntropy::new(y.clone()))?;
        self.graph.optimize(&self.optimizer, &self.params)?;
        Ok((loss, self.final_state()?))
    }

    /// Samples `length` characters starting from `start_token`, threading
    /// the recurrent state from one character to the next. `temperature`
    /// is added to every probability before renormalizing, flattening the
    /// distribution towards uniform as it grows; at zero the model's own
    /// distribution is sampled unchanged.
    ///
    /// Consecutive calls continue the same random stream, so repeated
    /// generations differ even with identical arguments.
    pub fn generate(
        &mut self,
        start_token: usize,
        length: usize,
        temperature: f32,
    ) -> Result<Vec<usize>, GraphError> {
        assert!(start_token < self.vocab_size, "start token out of vocabulary");
        assert!(temperature >= 0., "temperature must be non-negative");

        // Only timestep 0 of the unrolled graph is observed here; the
        // remaining steps run on zero inputs.
        for id in &self.wiring.inputs[1..] {
            self.graph
                .load(*id, &Tensor::<f32>::zeros(&[1, self.vocab_size]))?;
        }

        let mut hiddens = vec![Tensor::<f32>::zeros(&[1, self.n_hidden]); self.n_layers];
        let mut states = vec![Tensor::<f32>::zeros(&[1, self.n_hidden]); self.n_layers];
        let mut current = start_token;
        let mut sampled = Vec::with_capacity(length);
        for _ in 0..length {
            let mut one_hot = vec![0.; self.vocab_size];
            one_hot[current] = 1.;
            self.graph.load(
                self.wiring.inputs[0],
                &Tensor::raw(&[1, self.vocab_size], one_hot)?,
            )?;
            for l in 0..self.n_layers {
                self.graph.load(self.wiring.init_hiddens[l], &hiddens[l])?;
                self.graph.load(self.wiring.init_states[l], &states[l])?;
            }
            self.graph.forward(false)?;
            for l in 0..self.n_layers {
                let (h, c) = self.wiring.step_states[0][l];
                hiddens[l] = self.graph.get(h)?.clone();
                states[l] = self.graph.get(c)?.clone();
            }
            let dist = self.graph.get(self.wiring.dists[0])?;
            current = sample(&mut self.rng, dist.blob(), temperature);
            sampled.push(current);
        }
        Ok(sampled)
    }

    pub fn state(&self) -> Result<CharRnnState, GraphError> {
        Ok(CharRnnState {
            n_hidden: self.n_hidden,
            n_layers: self.n_layers,
            lstm: self
                .lstm
                .iter()
                .map(|cell| cell.state(&self.graph))
                .collect::<Result<Vec<_>, GraphError>>()?,
            output: self.output.state(&self.graph)?,
        })
    }

    pub fn save_parameters<P: AsRef<Path>>(&self, path: P) -> Result<(), StateError> {
        let bytes = bincode::serialize(&self.state()?)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_parameters<P: AsRef<Path>>(&mut self, path: P) -> Result<(), StateError> {
        let state: CharRnnState = bincode::deserialize(&fs::read(path)?)?;
        self.restore(&state)
    }

    /// Rebuilds the graph and every layer from a serialized state,
    /// replacing this model's dimensions and parameters. The unroll length
    /// is kept.
    pub fn restore(&mut self, state: &CharRnnState) -> Result<(), StateError> {
        if state.lstm.len() != state.n_layers {
            return Err(StateError::ConfigMismatch(format!(
                "{} serialized cells for {} layers",
                state.lstm.len(),
                state.n_layers
            )));
        }

        let mut graph = Graph::new();
        let lstm = state
            .lstm
            .iter()
            .map(|s| Lstm::load(&mut graph, s))
            .collect::<Result<Vec<_>, StateError>>()?;
        let output = Softmax::load(&mut graph, &state.output)?;

        let vocab_size = output.n_output();
        if output.n_input() != state.n_hidden {
            return Err(StateError::ConfigMismatch(format!(
                "output layer expects {} inputs, hidden size is {}",
                output.n_input(),
                state.n_hidden
            )));
        }
        for (l, cell) in lstm.iter().enumerate() {
            let expected_input = if l == 0 { vocab_size } else { state.n_hidden };
            if cell.n_input() != expected_input || cell.n_output() != state.n_hidden {
                return Err(StateError::ConfigMismatch(format!(
                    "layer {} is {}x{}, expected {}x{}",
                    l,
                    cell.n_input(),
                    cell.n_output(),
                    expected_input,
                    state.n_hidden
                )));
            }
        }

        let wiring = build_wiring(
            &mut graph,
            &lstm,
            &output,
            vocab_size,
            state.n_hidden,
            self.seq_len,
        )?;
        self.params = lstm
            .iter()
            .flat_map(|cell| cell.parameters())
            .chain(output.parameters())
            .collect();
        self.graph = graph;
        self.lstm = lstm;
        self.output = output;
        self.wiring = wiring;
        self.vocab_size = vocab_size;
        self.n_hidden = state.n_hidden;
        self.n_layers = state.n_layers;
        Ok(())
    }
}

/// Multinomial draw from `probs` after the additive temperature
/// perturbation. Falls back to the last index if rounding leaves the dice
/// past the accumulated mass.
fn sample<R: Rng>(rng: &mut R, probs: &[f32], temperature: f32) -> usize {
    let sum = probs.iter().sum::<f32>() + temperature * probs.len() as f32;
    let dice = rng.gen_range(0f32..1f32) * sum;
    let mut accumulated = 0.;
    for (i, p) in probs.iter().enumerate() {
        accumulated += p + temperature;
        if dice < accumulated {
            return i;
        }
    }
    probs.len() - 1
}
