//! char-rnn is a character-level recurrent language model, built from
//! scratch with minimal dependencies: `rand`/`rand-distr` for random
//! generation, `serde`/`bincode` for saving and loading models, and
//! `rayon` for parallel tensor math.
//!
//! A `CharacterRnn` stacks LSTM cells, unrolled into a computation graph
//! over a fixed window, with a softmax head over the vocabulary. The same
//! graph trains with truncated backpropagation through time, scores text
//! with cross-entropy and samples new text one character at a time.

pub mod charrnn;
pub mod encoding;
pub mod funcs;
pub mod graph;
pub mod layers;
pub mod optimizer;
pub mod tensor;
