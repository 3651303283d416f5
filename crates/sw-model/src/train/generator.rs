//! Mini-batch index generator

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// How batches are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrder {
    /// Seeded shuffle, reshuffled after every pass, never ends
    Shuffled { seed: u64 },
    /// In order, one pass, optionally capped at `max_batches`
    Sequential { max_batches: Option<usize> },
}

/// Yields row indices in batches of `batch_size` (the last batch of a pass may be short)
#[derive(Debug, Clone)]
pub struct DataGenerator {
    batch_size: usize,
    order: BatchOrder,
}

impl DataGenerator {
    pub fn train(batch_size: usize, seed: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            order: BatchOrder::Shuffled { seed },
        }
    }

    pub fn eval(batch_size: usize, max_batches: Option<usize>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            order: BatchOrder::Sequential { max_batches },
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches over `n_samples` rows
    pub fn batches(&self, n_samples: usize) -> Batches {
        let mut index: Vec<usize> = (0..n_samples).collect();
        let rng = match self.order {
            BatchOrder::Shuffled { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                index.shuffle(&mut rng);
                Some(rng)
            }
            BatchOrder::Sequential { .. } => None,
        };
        let max_batches = match self.order {
            BatchOrder::Sequential { max_batches } => max_batches,
            BatchOrder::Shuffled { .. } => None,
        };

        Batches {
            index,
            pointer: 0,
            batch_size: self.batch_size,
            rng,
            emitted: 0,
            max_batches,
        }
    }
}

/// Iterator returned by [`DataGenerator::batches`]
#[derive(Debug, Clone)]
pub struct Batches {
    index: Vec<usize>,
    pointer: usize,
    batch_size: usize,
    /// Present in shuffled mode, which cycles forever
    rng: Option<ChaCha8Rng>,
    emitted: usize,
    max_batches: Option<usize>,
}

impl Iterator for Batches {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index.is_empty() || self.max_batches.is_some_and(|max| self.emitted >= max) {
            return None;
        }
        if self.pointer >= self.index.len() {
            let rng = self.rng.as_mut()?;
            self.index.shuffle(rng);
            self.pointer = 0;
        }

        let end = (self.pointer + self.batch_size).min(self.index.len());
        let batch = self.index[self.pointer..end].to_vec();
        self.pointer = end;
        self.emitted += 1;
        Some(batch)
    }
}
