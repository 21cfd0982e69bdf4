use anyhow::{ensure, Result};

use crate::matrix::Updates;
use crate::real;
use crate::unigram::DEFAULT_TABLE_SIZE;
use crate::vocab::DEFAULT_HASH_SIZE;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Architecture {
    /// Continuous bag of words: predict each word from the average of its context.
    #[default]
    Cbow,
    /// Predict each word from each context word separately.
    SkipGram,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Header line, then one line per word of space-separated decimals.
    #[default]
    Text,
    /// Header line, then per word the word, a space, and raw native-endian `f32`s.
    Binary,
    /// The whole model (vocabulary, codes, both matrices) via `bincode`.
    Bincode,
}

/// Everything the trainer needs to know. `Default` gives the word2vec defaults.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    /// Size of word vectors.
    pub size: usize,
    /// Max skip length between words.
    pub window: usize,
    /// Threshold for occurrence of words; 0 disables subsampling.
    pub sample: real,
    /// Use hierarchical softmax.
    pub hs: bool,
    /// Number of negative examples; 0 disables negative sampling.
    pub negative: usize,
    pub num_threads: usize,
    /// Number of passes over the corpus.
    pub iter: usize,
    /// Discard words that appear less than this many times.
    pub min_count: u64,
    /// Starting learning rate; `None` means the architecture default.
    pub alpha: Option<real>,
    pub architecture: Architecture,
    /// Slots in the vocabulary hash index.
    pub hash_size: usize,
    /// Cells in the negative sampling table.
    pub table_size: usize,
    pub updates: Updates,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            size: 100,
            window: 5,
            sample: 1e-3,
            hs: false,
            negative: 5,
            num_threads: 12,
            iter: 5,
            min_count: 5,
            alpha: None,
            architecture: Architecture::Cbow,
            hash_size: DEFAULT_HASH_SIZE,
            table_size: DEFAULT_TABLE_SIZE,
            updates: Updates::Racy,
        }
    }
}

impl TrainConfig {
    /// The explicit learning rate, or 0.05 for CBOW and 0.025 for skip-gram.
    pub fn starting_alpha(&self) -> real {
        self.alpha.unwrap_or(match self.architecture {
            Architecture::Cbow => 0.05,
            Architecture::SkipGram => 0.025,
        })
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.size > 0, "vector size must be positive");
        ensure!(self.window > 0, "window must be positive");
        ensure!(self.num_threads > 0, "need at least one thread");
        ensure!(self.iter > 0, "need at least one iteration");
        ensure!(self.hash_size > 0, "hash table size must be positive");
        ensure!(self.sample >= 0.0, "sample threshold must not be negative");
        ensure!(
            self.negative == 0 || self.table_size > 0,
            "negative sampling needs a non-empty unigram table"
        );
        if let Some(alpha) = self.alpha {
            ensure!(alpha > 0.0, "learning rate must be positive");
        }
        Ok(())
    }
}
