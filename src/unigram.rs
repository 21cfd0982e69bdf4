//! The table used to draw negative samples.

use tracing::debug;

use crate::rng::Rng;

pub const DEFAULT_TABLE_SIZE: usize = 100_000_000;

const POWER: f64 = 0.75;

/// A flat array of vocabulary indices in which each word occupies a number
/// of cells proportional to `count^0.75`, so a uniform random cell is a
/// draw from the smoothed unigram distribution.
pub struct UnigramTable {
    table: Vec<u32>,
}

impl UnigramTable {
    /// Build a table of `size` cells from the final vocabulary counts.
    pub fn new(counts: &[u64], size: usize) -> Self {
        assert!(!counts.is_empty(), "unigram table needs a vocabulary");
        let train_words_pow = counts
            .iter()
            .map(|&cn| (cn as f64).powf(POWER))
            .sum::<f64>();

        let mut table = Vec::with_capacity(size);
        if train_words_pow == 0.0 {
            table.resize(size, 0);
            return UnigramTable { table };
        }

        let last = counts.len() - 1;
        let mut i = 0;
        let mut d1 = (counts[i] as f64).powf(POWER) / train_words_pow;
        for a in 0..size {
            table.push(i as u32);
            if (a as f64 / size as f64) > d1 && i < last {
                i += 1;
                d1 += (counts[i] as f64).powf(POWER) / train_words_pow;
            }
        }
        debug!(cells = size, words = counts.len(), "built unigram table");
        UnigramTable { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The word stored at `cell`.
    pub fn get(&self, cell: usize) -> usize {
        self.table[cell] as usize
    }

    /// Draw a word for negative sampling.
    ///
    /// A draw that lands on the sentence marker (index 0) is replaced by a
    /// uniformly random word from `1..vocab_size`. `vocab_size` must be at
    /// least 2.
    pub fn sample(&self, rng: &mut Rng, vocab_size: usize) -> usize {
        let r = rng.rand_u64();
        let target = self.get((r >> 16) as usize % self.table.len());
        if target == 0 {
            (r as usize) % (vocab_size - 1) + 1
        } else {
            target
        }
    }

    /// How many cells hold `word`.
    pub fn cells_for(&self, word: usize) -> usize {
        self.table.iter().filter(|&&w| w as usize == word).count()
    }
}
