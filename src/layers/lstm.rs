use super::{init_bias, init_weight, load_parameter, Layer, StateError};
use crate::funcs::{Add, Hadamard, MatMul, Sigmoid, Tanh};
use crate::graph::{Graph, GraphError, TensorId};
use crate::tensor::Tensor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Feature flags of one LSTM cell, fixed at construction. They decide
/// which parameters exist and which gating terms are wired into `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LstmConfig {
    pub use_forget_gate: bool,
    pub use_input_peep: bool,
    pub use_output_peep: bool,
    pub use_forget_peep: bool,
    pub use_tanh_output: bool,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            use_forget_gate: true,
            use_input_peep: false,
            use_output_peep: false,
            use_forget_peep: false,
            use_tanh_output: true,
        }
    }
}

/// One LSTM cell. Parameters live in the graph; the struct holds their
/// handles under named fields, so the step wiring never goes through a
/// string lookup. The forget-gate tensors are registered even when the
/// forget gate is disabled (they just stay unused); peephole matrices only
/// exist for the enabled peepholes.
pub struct Lstm {
    name: String,
    n_input: usize,
    n_output: usize,
    config: LstmConfig,
    w_ix: TensorId,
    u_ih: TensorId,
    b_i: TensorId,
    w_ox: TensorId,
    u_oh: TensorId,
    b_o: TensorId,
    w_fx: TensorId,
    u_fh: TensorId,
    b_f: TensorId,
    w_gx: TensorId,
    u_gh: TensorId,
    b_g: TensorId,
    p_i: Option<TensorId>,
    p_o: Option<TensorId>,
    p_f: Option<TensorId>,
}

/// Serialized form of a cell: full configuration plus the current numeric
/// value of every parameter, keyed by parameter name. `Lstm::load` is the
/// exact inverse of `Lstm::state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmState {
    pub name: String,
    pub n_input: usize,
    pub n_output: usize,
    pub use_forget_gate: bool,
    pub use_input_peep: bool,
    pub use_output_peep: bool,
    pub use_forget_peep: bool,
    pub use_tanh_output: bool,
    pub parameters: BTreeMap<String, Tensor<f32>>,
}

impl Lstm {
    pub fn new<R: Rng>(
        graph: &mut Graph,
        rng: &mut R,
        name: impl Into<String>,
        n_input: usize,
        n_output: usize,
        config: LstmConfig,
    ) -> Self {
        let name = name.into();
        let gate = [n_input, n_output];
        let recur = [n_output, n_output];
        let scoped = |p: &str| format!("{}_{}", name, p);

        let w_ix = init_weight(graph, rng, scoped("W_ix"), &gate);
        let u_ih = init_weight(graph, rng, scoped("U_ih"), &recur);
        let b_i = init_bias(graph, scoped("b_i"), n_output);

        let w_ox = init_weight(graph, rng, scoped("W_ox"), &gate);
        let u_oh = init_weight(graph, rng, scoped("U_oh"), &recur);
        let b_o = init_bias(graph, scoped("b_o"), n_output);

        let w_fx = init_weight(graph, rng, scoped("W_fx"), &gate);
        let u_fh = init_weight(graph, rng, scoped("U_fh"), &recur);
        let b_f = init_bias(graph, scoped("b_f"), n_output);

        let w_gx = init_weight(graph, rng, scoped("W_gx"), &gate);
        let u_gh = init_weight(graph, rng, scoped("U_gh"), &recur);
        let b_g = init_bias(graph, scoped("b_g"), n_output);

        let p_i = config
            .use_input_peep
            .then(|| init_weight(graph, rng, scoped("P_i"), &recur));
        let p_o = config
            .use_output_peep
            .then(|| init_weight(graph, rng, scoped("P_o"), &recur));
        let p_f = config
            .use_forget_peep
            .then(|| init_weight(graph, rng, scoped("P_f"), &recur));

        Self {
            name,
            n_input,
            n_output,
            config,
            w_ix,
            u_ih,
            b_i,
            w_ox,
            u_oh,
            b_o,
            w_fx,
            u_fh,
            b_f,
            w_gx,
            u_gh,
            b_g,
            p_i,
            p_o,
            p_f,
        }
    }

    pub fn n_input(&self) -> usize {
        self.n_input
    }
    pub fn n_output(&self) -> usize {
        self.n_output
    }
    pub fn config(&self) -> LstmConfig {
        self.config
    }

    /// One gate: `sigmoid(x*W + h*U [+ c*P] + b)`.
    fn gate(
        &self,
        g: &mut Graph,
        x: TensorId,
        prev_hidden: TensorId,
        prev_state: TensorId,
        w: TensorId,
        u: TensorId,
        peep: Option<TensorId>,
        b: TensorId,
    ) -> Result<TensorId, GraphError> {
        let xw = g.call(MatMul::new(), &[x, w])?;
        let hu = g.call(MatMul::new(), &[prev_hidden, u])?;
        let mut sum = g.call(Add::new(), &[xw, hu])?;
        if let Some(p) = peep {
            let cp = g.call(MatMul::new(), &[prev_state, p])?;
            sum = g.call(Add::new(), &[sum, cp])?;
        }
        let sum = g.call(Add::new(), &[sum, b])?;
        g.call(Sigmoid::new(), &[sum])
    }

    /// Builds one recurrent transition into the graph.
    ///
    /// `x`               - (batch, n_input)
    /// `previous_hidden` - (batch, n_output)
    /// `previous_state`  - (batch, n_output)
    ///
    /// Returns `(output, state)`, both (batch, n_output).
    ///
    /// Without a forget gate the previous state contributes nothing to the
    /// new state (no memory carry-over), which is the intended behavior of
    /// the no-forget configuration, not an oversight.
    pub fn step(
        &self,
        g: &mut Graph,
        x: TensorId,
        previous_hidden: TensorId,
        previous_state: TensorId,
    ) -> Result<(TensorId, TensorId), GraphError> {
        let input_gate = self.gate(
            g,
            x,
            previous_hidden,
            previous_state,
            self.w_ix,
            self.u_ih,
            self.p_i,
            self.b_i,
        )?;

        let xg = g.call(MatMul::new(), &[x, self.w_gx])?;
        let hg = g.call(MatMul::new(), &[previous_hidden, self.u_gh])?;
        let g_sum = g.call(Add::new(), &[xg, hg])?;
        let g_sum = g.call(Add::new(), &[g_sum, self.b_g])?;
        let candidate_state = g.call(Tanh::new(), &[g_sum])?;

        let gated_candidate = g.call(Hadamard::new(), &[candidate_state, input_gate])?;
        let state = if self.config.use_forget_gate {
            let forget_gate = self.gate(
                g,
                x,
                previous_hidden,
                previous_state,
                self.w_fx,
                self.u_fh,
                self.p_f,
                self.b_f,
            )?;
            let carried = g.call(Hadamard::new(), &[previous_state, forget_gate])?;
            g.call(Add::new(), &[gated_candidate, carried])?
        } else {
            gated_candidate
        };

        let output_gate = self.gate(
            g,
            x,
            previous_hidden,
            previous_state,
            self.w_ox,
            self.u_oh,
            self.p_o,
            self.b_o,
        )?;
        let output = if self.config.use_tanh_output {
            let squashed = g.call(Tanh::new(), &[state])?;
            g.call(Hadamard::new(), &[output_gate, squashed])?
        } else {
            g.call(Hadamard::new(), &[output_gate, state])?
        };

        Ok((output, state))
    }

    fn named_parameters(&self) -> Vec<(&'static str, TensorId)> {
        let mut params = vec![
            ("W_ix", self.w_ix),
            ("U_ih", self.u_ih),
            ("b_i", self.b_i),
            ("W_ox", self.w_ox),
            ("U_oh", self.u_oh),
            ("b_o", self.b_o),
            ("W_fx", self.w_fx),
            ("U_fh", self.u_fh),
            ("b_f", self.b_f),
            ("W_gx", self.w_gx),
            ("U_gh", self.u_gh),
            ("b_g", self.b_g),
        ];
        if let Some(p_i) = self.p_i {
            params.push(("P_i", p_i));
        }
        if let Some(p_o) = self.p_o {
            params.push(("P_o", p_o));
        }
        if let Some(p_f) = self.p_f {
            params.push(("P_f", p_f));
        }
        params
    }

    pub fn state(&self, graph: &Graph) -> Result<LstmState, GraphError> {
        let mut parameters = BTreeMap::new();
        for (name, id) in self.named_parameters() {
            parameters.insert(name.to_string(), graph.get(id)?.clone());
        }
        Ok(LstmState {
            name: self.name.clone(),
            n_input: self.n_input,
            n_output: self.n_output,
            use_forget_gate: self.config.use_forget_gate,
            use_input_peep: self.config.use_input_peep,
            use_output_peep: self.config.use_output_peep,
            use_forget_peep: self.config.use_forget_peep,
            use_tanh_output: self.config.use_tanh_output,
            parameters,
        })
    }

    /// Reconstructs a cell with identical configuration and parameter
    /// values. Fails if any required parameter is absent or mis-shaped.
    pub fn load(graph: &mut Graph, state: &LstmState) -> Result<Self, StateError> {
        let (n_input, n_output) = (state.n_input, state.n_output);
        let gate = [n_input, n_output];
        let recur = [n_output, n_output];
        let bias = [n_output];
        let mut take = |name: &str, expected: &[usize]| {
            load_parameter(graph, &state.parameters, &state.name, name, expected)
        };

        let w_ix = take("W_ix", &gate)?;
        let u_ih = take("U_ih", &recur)?;
        let b_i = take("b_i", &bias)?;
        let w_ox = take("W_ox", &gate)?;
        let u_oh = take("U_oh", &recur)?;
        let b_o = take("b_o", &bias)?;
        let w_fx = take("W_fx", &gate)?;
        let u_fh = take("U_fh", &recur)?;
        let b_f = take("b_f", &bias)?;
        let w_gx = take("W_gx", &gate)?;
        let u_gh = take("U_gh", &recur)?;
        let b_g = take("b_g", &bias)?;
        let p_i = if state.use_input_peep {
            Some(take("P_i", &recur)?)
        } else {
            None
        };
        let p_o = if state.use_output_peep {
            Some(take("P_o", &recur)?)
        } else {
            None
        };
        let p_f = if state.use_forget_peep {
            Some(take("P_f", &recur)?)
        } else {
            None
        };

        Ok(Self {
            name: state.name.clone(),
            n_input,
            n_output,
            config: LstmConfig {
                use_forget_gate: state.use_forget_gate,
                use_input_peep: state.use_input_peep,
                use_output_peep: state.use_output_peep,
                use_forget_peep: state.use_forget_peep,
                use_tanh_output: state.use_tanh_output,
            },
            w_ix,
            u_ih,
            b_i,
            w_ox,
            u_oh,
            b_o,
            w_fx,
            u_fh,
            b_f,
            w_gx,
            u_gh,
            b_g,
            p_i,
            p_o,
            p_f,
        })
    }
}

impl Layer for Lstm {
    fn name(&self) -> &str {
        &self.name
    }
    fn parameters(&self) -> Vec<TensorId> {
        self.named_parameters().into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run_step(
        lstm_builder: impl FnOnce(&mut Graph, &mut StdRng) -> Lstm,
        x: &Tensor<f32>,
        h: &Tensor<f32>,
        c: &Tensor<f32>,
        seed: u64,
    ) -> (Tensor<f32>, Tensor<f32>, Graph, Lstm, (TensorId, TensorId, TensorId)) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut g = Graph::new();
        let lstm = lstm_builder(&mut g, &mut rng);
        let x_id = g.alloc(x.clone(), "x");
        let h_id = g.alloc(h.clone(), "h");
        let c_id = g.alloc(c.clone(), "c");
        let (out, state) = lstm.step(&mut g, x_id, h_id, c_id).unwrap();
        g.forward(false).unwrap();
        (
            g.get(out).unwrap().clone(),
            g.get(state).unwrap().clone(),
            g,
            lstm,
            (x_id, h_id, c_id),
        )
    }

    fn sample_inputs(n_input: usize, n_output: usize) -> (Tensor<f32>, Tensor<f32>, Tensor<f32>) {
        let mut rng = StdRng::seed_from_u64(99);
        (
            Tensor::rand_normal(&mut rng, 1., &[2, n_input]),
            Tensor::rand_normal(&mut rng, 1., &[2, n_output]),
            Tensor::rand_normal(&mut rng, 1., &[2, n_output]),
        )
    }

    #[test]
    fn state_load_round_trip_reproduces_step() {
        let (x, h, c) = sample_inputs(4, 3);
        let config = LstmConfig {
            use_input_peep: true,
            use_output_peep: true,
            ..LstmConfig::default()
        };
        let (out1, state1, g1, lstm1, _) = run_step(
            |g, rng| Lstm::new(g, rng, "cell", 4, 3, config),
            &x,
            &h,
            &c,
            7,
        );

        let saved = lstm1.state(&g1).unwrap();
        let mut g2 = Graph::new();
        let lstm2 = Lstm::load(&mut g2, &saved).unwrap();
        let x_id = g2.alloc(x.clone(), "x");
        let h_id = g2.alloc(h.clone(), "h");
        let c_id = g2.alloc(c.clone(), "c");
        let (out, state) = lstm2.step(&mut g2, x_id, h_id, c_id).unwrap();
        g2.forward(false).unwrap();

        for (a, b) in out1.blob().iter().zip(g2.get(out).unwrap().blob()) {
            assert!((a - b).abs() < 1e-6);
        }
        for (a, b) in state1.blob().iter().zip(g2.get(state).unwrap().blob()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn load_rejects_missing_parameter() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut g = Graph::new();
        let lstm = Lstm::new(&mut g, &mut rng, "cell", 4, 3, LstmConfig::default());
        let mut saved = lstm.state(&g).unwrap();
        saved.parameters.remove("U_gh");
        let mut g2 = Graph::new();
        assert!(matches!(
            Lstm::load(&mut g2, &saved),
            Err(StateError::MissingParameter(_))
        ));
    }

    #[test]
    fn load_rejects_mis_shaped_parameter() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut g = Graph::new();
        let lstm = Lstm::new(&mut g, &mut rng, "cell", 4, 3, LstmConfig::default());
        let mut saved = lstm.state(&g).unwrap();
        saved
            .parameters
            .insert("b_i".into(), Tensor::zeros(&[5]));
        let mut g2 = Graph::new();
        assert!(matches!(
            Lstm::load(&mut g2, &saved),
            Err(StateError::ParameterShape { .. })
        ));
    }

    #[test]
    fn no_forget_gate_ignores_previous_state() {
        let (x, h, c) = sample_inputs(4, 3);
        let config = LstmConfig {
            use_forget_gate: false,
            ..LstmConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut g = Graph::new();
        let lstm = Lstm::new(&mut g, &mut rng, "cell", 4, 3, config);
        let x_id = g.alloc(x, "x");
        let h_id = g.alloc(h, "h");
        let c_id = g.alloc(c.clone(), "c");
        let (_, state) = lstm.step(&mut g, x_id, h_id, c_id).unwrap();
        g.forward(false).unwrap();
        let state1 = g.get(state).unwrap().clone();

        // Same inputs except a wildly different previous state.
        let other_c = c.map_values(|v| v * -10. + 3.);
        g.load(c_id, &other_c).unwrap();
        g.forward(false).unwrap();

        assert_eq!(&state1, g.get(state).unwrap());
    }

    #[test]
    fn disabled_forget_gate_parameters_are_inert() {
        let (x, h, c) = sample_inputs(4, 3);
        let config = LstmConfig {
            use_forget_gate: false,
            ..LstmConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(13);
        let mut g = Graph::new();
        let lstm = Lstm::new(&mut g, &mut rng, "cell", 4, 3, config);
        let x_id = g.alloc(x, "x");
        let h_id = g.alloc(h, "h");
        let c_id = g.alloc(c, "c");
        let (out, state) = lstm.step(&mut g, x_id, h_id, c_id).unwrap();
        g.forward(false).unwrap();
        let out1 = g.get(out).unwrap().clone();
        let state1 = g.get(state).unwrap().clone();

        // Overwrite the (registered but unused) forget-gate tensors; the
        // step must not change.
        let w_fx_id = lstm.parameters()[6];
        g.load(w_fx_id, &Tensor::constant(&[4, 3], 1234.5)).unwrap();
        g.forward(false).unwrap();

        assert_eq!(&out1, g.get(out).unwrap());
        assert_eq!(&state1, g.get(state).unwrap());
    }

    #[test]
    fn parameter_order_is_stable_and_flag_dependent() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut g = Graph::new();
        let plain = Lstm::new(&mut g, &mut rng, "a", 2, 2, LstmConfig::default());
        assert_eq!(plain.parameters().len(), 12);
        assert_eq!(plain.parameters(), plain.parameters());

        let all_peeps = LstmConfig {
            use_input_peep: true,
            use_output_peep: true,
            use_forget_peep: true,
            ..LstmConfig::default()
        };
        let peeped = Lstm::new(&mut g, &mut rng, "b", 2, 2, all_peeps);
        assert_eq!(peeped.parameters().len(), 15);
    }
}
