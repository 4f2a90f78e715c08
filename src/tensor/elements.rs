pub trait TensorElement:
    Clone + Copy + Sized + Send + Sync + PartialEq + std::fmt::Debug + 'static
{
    fn zero() -> Self;
    fn one() -> Self;
    fn as_f32(self) -> f32;
}

impl TensorElement for f32 {
    fn zero() -> Self {
        0.
    }
    fn one() -> Self {
        1.
    }
    fn as_f32(self) -> f32 {
        self
    }
}

impl TensorElement for usize {
    fn zero() -> Self {
        0
    }
    fn one() -> Self {
        1
    }
    fn as_f32(self) -> f32 {
        self as f32
    }
}
