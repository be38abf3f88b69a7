use rand::prelude::SliceRandom;

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition `samples`.
///
pub struct Minibatches {
    pub samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(size: usize) -> Self {
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
        }
    }

    /// Cut the samples into consecutive chunks of `batch_size`; the
    /// last chunk keeps the remainder. With `shuffle = false` the
    /// original order `0..size` is kept so that every pass yields the
    /// same minibatches.
    pub fn shuffle_minibatch(&mut self, batch_size: usize, shuffle: bool) {
        debug_assert!(batch_size > 0);

        self.samples = (0..self.size()).collect();
        if shuffle {
            let mut rng = rand::rng();
            self.samples.shuffle(&mut rng);
        }

        self.chunks = self
            .samples
            .chunks(batch_size.max(1))
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}
