use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("incompatible tensor shapes: {0:?} and {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),
    #[error("expected a tensor of shape {expected:?}, got {got:?}")]
    UnexpectedShape {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("nothing to stack")]
    EmptyStack,
}
