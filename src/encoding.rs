use crate::tensor::Tensor;
use std::collections::HashMap;

/// Character-level vocabulary over a corpus. Indices are assigned by
/// sorting the distinct characters, so the same text always yields the
/// same encoding.
pub struct CharEncoding {
    chars: Vec<char>,
    indices: HashMap<char, usize>,
}

impl CharEncoding {
    pub fn new(corpus: &str) -> Self {
        let mut chars = corpus.chars().collect::<Vec<_>>();
        chars.sort();
        chars.dedup();
        let indices = chars
            .iter()
            .enumerate()
            .map(|(i, ch)| (*ch, i))
            .collect::<HashMap<_, _>>();
        Self { chars, indices }
    }

    pub fn vocab_size(&self) -> usize {
        self.chars.len()
    }

    pub fn index_of(&self, ch: char) -> Option<usize> {
        self.indices.get(&ch).copied()
    }

    /// `None` if any character is outside the vocabulary.
    pub fn encode(&self, text: &str) -> Option<Vec<usize>> {
        text.chars().map(|ch| self.index_of(ch)).collect()
    }

    /// `None` if any index is out of range.
    pub fn decode(&self, indices: &[usize]) -> Option<String> {
        indices
            .iter()
            .map(|&i| self.chars.get(i).copied())
            .collect()
    }

    /// One-hot row for a single character index, shape `(vocab_size)`.
    pub fn one_hot(&self, index: usize) -> Tensor<f32> {
        let mut blob = vec![0.; self.chars.len()];
        if let Some(v) = blob.get_mut(index) {
            *v = 1.;
        }
        Tensor::raw_vec(vec![self.chars.len()], blob)
    }

    /// One-hot sequence with a batch axis of one, shape
    /// `(len, 1, vocab_size)`. Inputs for a single unbatched sequence.
    pub fn one_hot_seq(&self, indices: &[usize]) -> Tensor<f32> {
        let vocab = self.chars.len();
        let mut blob = vec![0.; indices.len() * vocab];
        for (t, &i) in indices.iter().enumerate() {
            if i < vocab {
                blob[t * vocab + i] = 1.;
            }
        }
        Tensor::raw_vec(vec![indices.len(), 1, vocab], blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorOps;

    #[test]
    fn sorted_vocabulary_and_round_trip() {
        let enc = CharEncoding::new("banana!");
        assert_eq!(enc.vocab_size(), 4); // ! a b n
        assert_eq!(enc.index_of('!'), Some(0));
        assert_eq!(enc.index_of('a'), Some(1));
        let ids = enc.encode("nab!").unwrap();
        assert_eq!(enc.decode(&ids).unwrap(), "nab!");
        assert_eq!(enc.encode("xyz"), None);
        assert_eq!(enc.decode(&[99]), None);
    }

    #[test]
    fn one_hot_shapes() {
        let enc = CharEncoding::new("abc");
        let row = enc.one_hot(1);
        assert_eq!(row.shape(), &[3]);
        assert_eq!(row.blob(), &[0., 1., 0.]);

        let seq = enc.one_hot_seq(&[2, 0]);
        assert_eq!(seq.shape(), &[2, 1, 3]);
        assert_eq!(seq.blob(), &[0., 0., 1., 1., 0., 0.]);
    }
}
