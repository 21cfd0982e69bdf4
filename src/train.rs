//! The multi-threaded SGD training loop.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::config::{Architecture, TrainConfig};
use crate::corpus::{self, WordReader};
use crate::matrix::{dot_values, Matrix, Real, Updates};
use crate::rng::Rng;
use crate::unigram::UnigramTable;
use crate::vocab::Vocabulary;
use crate::{real, MAX_SENTENCE_LENGTH};

const EXP_TABLE_SIZE: usize = 1000;
const MAX_EXP: real = 6.0;

/// Workers fold their word counts into the shared total this often.
const PROGRESS_INTERVAL: u64 = 10_000;

/// The probability of keeping one occurrence of a word seen `count` times
/// out of `train_words`, when subsampling with threshold `sample`.
///
/// Values above 1 mean the word is always kept.
pub fn keep_probability(count: u64, sample: real, train_words: u64) -> real {
    let f = count as real;
    let k = sample * train_words as real;
    ((f / k).sqrt() + 1.0) * k / f
}

/// State every worker reads and writes, with no locking.
struct Shared {
    /// The current learning rate.
    alpha: Real,
    /// Words processed so far, summed over all workers.
    word_count_actual: AtomicU64,
    updates: Updates,
}

impl Shared {
    /// Add `n` to the processed-word total and return the new total.
    fn add_words(&self, n: u64) -> u64 {
        match self.updates {
            Updates::Racy => {
                let total = self.word_count_actual.load(Ordering::Relaxed) + n;
                self.word_count_actual.store(total, Ordering::Relaxed);
                total
            }
            Updates::Exact => self.word_count_actual.fetch_add(n, Ordering::Relaxed) + n,
        }
    }
}

/// Owns the finished vocabulary and the parameter matrices, and trains them.
///
/// The vocabulary, Huffman codes and unigram table are built once in
/// [`Trainer::new`] and only read afterwards. The matrices are updated in
/// place by all workers at once.
pub struct Trainer {
    config: TrainConfig,
    vocab: Vocabulary,
    train_file: PathBuf,
    file_size: u64,
    starting_alpha: real,
    /// The learned word vectors.
    syn0: Matrix,
    /// Hierarchical softmax weights, one row per internal tree node.
    syn1: Option<Matrix>,
    /// Negative sampling output vectors, one row per word.
    syn1neg: Option<Matrix>,
    table: Option<UnigramTable>,
    exp_table: Vec<real>,
    shared: Shared,
    progress: ProgressBar,
    start: Instant,
}

impl Trainer {
    /// Set up the network for `vocab`, which must already be sorted and
    /// pruned. Word vectors start random; output weights start at zero.
    pub fn new(config: TrainConfig, mut vocab: Vocabulary, train_file: &Path) -> Result<Self> {
        config.validate()?;
        let file_size = corpus::file_size(train_file)?;
        let vocab_size = vocab.len();
        let dim = config.size;

        let syn0 = Matrix::random(vocab_size, dim, &mut Rng::new(1))
            .context("error allocating word vectors")?;
        let syn1 = if config.hs {
            Some(Matrix::zeros(vocab_size, dim).context("error allocating softmax weights")?)
        } else {
            None
        };
        let (syn1neg, table) = if config.negative > 0 {
            let syn1neg = Matrix::zeros(vocab_size, dim)
                .context("error allocating negative sampling weights")?;
            let counts = vocab.words().iter().map(|vw| vw.count).collect::<Vec<u64>>();
            (Some(syn1neg), Some(UnigramTable::new(&counts, config.table_size)))
        } else {
            (None, None)
        };
        vocab.create_binary_tree();

        let exp_table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let e = ((i as real / EXP_TABLE_SIZE as real * 2.0 - 1.0) * MAX_EXP).exp(); // Precompute the exp() table
                e / (e + 1.0) // Precompute f(x) = x / (x + 1)
            })
            .collect();

        let starting_alpha = config.starting_alpha();
        let shared = Shared {
            alpha: Real::new(starting_alpha),
            word_count_actual: AtomicU64::new(0),
            updates: config.updates,
        };
        let progress = ProgressBar::hidden();
        progress.set_length(config.iter as u64 * vocab.train_words() + 1);

        Ok(Trainer {
            config,
            vocab,
            train_file: train_file.to_path_buf(),
            file_size,
            starting_alpha,
            syn0,
            syn1,
            syn1neg,
            table,
            exp_table,
            shared,
            progress,
            start: Instant::now(),
        })
    }

    /// Report progress on `bar` while training.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        bar.set_length(self.config.iter as u64 * self.vocab.train_words() + 1);
        self.progress = bar;
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// The word vectors (input matrix).
    pub fn embeddings(&self) -> &Matrix {
        &self.syn0
    }

    /// Hierarchical softmax weights, if enabled.
    pub fn hs_weights(&self) -> Option<&Matrix> {
        self.syn1.as_ref()
    }

    /// Negative sampling output vectors, if enabled.
    pub fn negative_weights(&self) -> Option<&Matrix> {
        self.syn1neg.as_ref()
    }

    /// The current (shared) learning rate.
    pub fn alpha(&self) -> real {
        self.shared.alpha.get()
    }

    /// Words processed by all workers so far.
    pub fn words_processed(&self) -> u64 {
        self.shared.word_count_actual.load(Ordering::Relaxed)
    }

    /// Run every worker to completion.
    pub fn train(&mut self) -> Result<()> {
        info!("Starting training using file {}", self.train_file.display());
        self.start = Instant::now();
        let starts = corpus::shard_starts(self.file_size, self.config.num_threads);

        let this: &Trainer = self;
        let result = thread::scope(|s| {
            let threads = starts
                .iter()
                .enumerate()
                .map(|(id, &start)| s.spawn(move || this.train_model_thread(id, start)))
                .collect::<Vec<_>>();
            let mut result = Ok(());
            for (id, thread) in threads.into_iter().enumerate() {
                let outcome = thread
                    .join()
                    .map_err(|_| anyhow!("worker thread {id} panicked"))
                    .and_then(|r| r.with_context(|| format!("error in worker thread {id}")));
                if result.is_ok() {
                    result = outcome;
                }
            }
            result
        });
        self.progress.finish_and_clear();
        result?;
        debug!(
            words = self.words_processed(),
            secs = self.start.elapsed().as_secs_f64(),
            "training finished"
        );
        Ok(())
    }

    fn train_model_thread(&self, id: usize, start_offset: u64) -> Result<()> {
        let dim = self.config.size;
        let mut neu1: Vec<real> = vec![0.0; dim];
        let mut neu1e: Vec<real> = vec![0.0; dim];

        let mut fi = WordReader::open_at(&self.train_file, start_offset)?;
        let quota = self.vocab.train_words() / self.config.num_threads as u64;

        let mut rng = Rng::new(id as u64);
        let mut local_iter = self.config.iter;
        let mut word_count: u64 = 0;
        let mut last_word_count: u64 = 0;
        let mut sen: Vec<usize> = Vec::with_capacity(MAX_SENTENCE_LENGTH);
        loop {
            sen.clear();
            let at_end_of_file = self.read_sentence(&mut fi, &mut rng, &mut word_count, &mut sen)?;
            if word_count - last_word_count > PROGRESS_INTERVAL {
                self.report_progress(word_count, &mut last_word_count);
            }

            for sentence_position in 0..sen.len() {
                let alpha = self.shared.alpha.get();
                match self.config.architecture {
                    Architecture::Cbow => {
                        self.train_cbow(&sen, sentence_position, alpha, &mut rng, &mut neu1, &mut neu1e)
                    }
                    Architecture::SkipGram => self.train_skip_gram(
                        &sen,
                        sentence_position,
                        alpha,
                        &mut rng,
                        &mut neu1,
                        &mut neu1e,
                    ),
                }
            }

            if at_end_of_file || word_count > quota {
                self.shared.add_words(word_count - last_word_count);
                local_iter -= 1;
                if local_iter == 0 {
                    break;
                }
                word_count = 0;
                last_word_count = 0;
                fi.seek_to(start_offset)
                    .context("error rewinding file for next iteration")?;
            }
        }
        Ok(())
    }

    /// Fill `sen` with the next sentence, skipping unknown words and
    /// subsampling frequent ones. Returns true at end of file.
    fn read_sentence<R: BufRead>(
        &self,
        fi: &mut WordReader<R>,
        rng: &mut Rng,
        word_count: &mut u64,
        sen: &mut Vec<usize>,
    ) -> Result<bool> {
        loop {
            let word = match fi
                .read_word()
                .context("error reading a word from training data")?
            {
                None => return Ok(true),
                Some(word) => word,
            };
            let Some(word) = self.vocab.lookup(&word) else {
                continue;
            };
            *word_count += 1;
            if word == 0 {
                return Ok(false);
            }

            // The subsampling randomly discards frequent words while keeping the ranking same
            let sample = self.config.sample;
            if sample > 0.0 {
                let ran = keep_probability(self.vocab[word].count, sample, self.vocab.train_words());
                if ran < rng.rand_real() {
                    continue;
                }
            }
            if sen.len() < MAX_SENTENCE_LENGTH {
                sen.push(word);
            }
        }
    }

    fn report_progress(&self, word_count: u64, last_word_count: &mut u64) {
        let n = word_count - *last_word_count;
        let word_count_actual = self.shared.add_words(n);
        *last_word_count = word_count;

        let total = (self.config.iter as u64 * self.vocab.train_words() + 1) as real;
        let alpha = (self.starting_alpha * (1.0 - word_count_actual as real / total))
            .max(self.starting_alpha * 0.0001);
        self.shared.alpha.set(alpha);

        let per_thread_k = word_count_actual as f64
            / self.config.num_threads as f64
            / ((self.start.elapsed().as_secs_f64() + 1.0) * 1000.0);
        self.progress.set_position(word_count_actual);
        self.progress
            .set_message(format!("alpha {alpha:.6}  words/thread/sec: {per_thread_k:.2}k"));
    }

    /// The context positions around `pos`, with the window shrunk by `b`
    /// on both sides.
    fn context(&self, pos: usize, b: usize, len: usize) -> impl Iterator<Item = usize> {
        let radius = self.config.window - b;
        let start = pos.saturating_sub(radius);
        let stop = (pos + radius + 1).min(len);
        (start..stop).filter(move |&c| c != pos)
    }

    fn train_cbow(
        &self,
        sen: &[usize],
        pos: usize,
        alpha: real,
        rng: &mut Rng,
        neu1: &mut [real],
        neu1e: &mut [real],
    ) {
        let word = sen[pos];
        neu1.fill(0.0);
        neu1e.fill(0.0);
        let b = rng.rand_u64() as usize % self.config.window;

        // in -> hidden
        let mut cw = 0;
        for c in self.context(pos, b, sen.len()) {
            for (h, x) in neu1.iter_mut().zip(self.syn0.row(sen[c])) {
                *h += x.get();
            }
            cw += 1;
        }
        if cw == 0 {
            return;
        }
        for h in neu1.iter_mut() {
            *h /= cw as real;
        }

        self.output_layers(word, neu1, neu1e, alpha, rng);

        // hidden -> in
        let updates = self.config.updates;
        for c in self.context(pos, b, sen.len()) {
            for (x, &e) in self.syn0.row(sen[c]).iter().zip(neu1e.iter()) {
                updates.add(x, e);
            }
        }
    }

    fn train_skip_gram(
        &self,
        sen: &[usize],
        pos: usize,
        alpha: real,
        rng: &mut Rng,
        neu1: &mut [real],
        neu1e: &mut [real],
    ) {
        let word = sen[pos];
        let b = rng.rand_u64() as usize % self.config.window;
        let updates = self.config.updates;

        for c in self.context(pos, b, sen.len()) {
            let l1 = self.syn0.row(sen[c]);
            for (h, x) in neu1.iter_mut().zip(l1) {
                *h = x.get();
            }
            neu1e.fill(0.0);

            self.output_layers(word, neu1, neu1e, alpha, rng);

            // Learn weights input -> hidden
            for (x, &e) in l1.iter().zip(neu1e.iter()) {
                updates.add(x, e);
            }
        }
    }

    /// Run the enabled output layers for predicting `word` from `input`,
    /// accumulating the error for the input into `neu1e`.
    fn output_layers(
        &self,
        word: usize,
        input: &[real],
        neu1e: &mut [real],
        alpha: real,
        rng: &mut Rng,
    ) {
        if let Some(syn1) = &self.syn1 {
            self.hierarchical_softmax(syn1, word, input, neu1e, alpha);
        }
        if let (Some(syn1neg), Some(table)) = (&self.syn1neg, &self.table) {
            self.negative_sampling(syn1neg, table, word, input, neu1e, alpha, rng);
        }
    }

    fn hierarchical_softmax(
        &self,
        syn1: &Matrix,
        word: usize,
        input: &[real],
        neu1e: &mut [real],
        alpha: real,
    ) {
        let updates = self.config.updates;
        let vw = &self.vocab[word];
        for (&bit, &node) in vw.code.iter().zip(&vw.point) {
            let l2 = syn1.row(node as usize);
            // Propagate hidden -> output
            let f = dot_values(input, l2);
            if f <= -MAX_EXP || f >= MAX_EXP {
                continue;
            }
            let f = self.sigmoid(f);
            // 'g' is the gradient multiplied by the learning rate
            let g = (1.0 - bit as real - f) * alpha;
            // Propagate errors output -> hidden
            for (e, w) in neu1e.iter_mut().zip(l2) {
                *e += g * w.get();
            }
            // Learn weights hidden -> output
            for (w, &x) in l2.iter().zip(input) {
                updates.add(w, g * x);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn negative_sampling(
        &self,
        syn1neg: &Matrix,
        table: &UnigramTable,
        word: usize,
        input: &[real],
        neu1e: &mut [real],
        alpha: real,
        rng: &mut Rng,
    ) {
        let updates = self.config.updates;
        let vocab_size = self.vocab.len();
        for d in 0..=self.config.negative {
            let (target, label) = if d == 0 {
                (word, 1.0)
            } else {
                let target = table.sample(rng, vocab_size);
                if target == word {
                    continue;
                }
                (target, 0.0)
            };

            let l2 = syn1neg.row(target);
            let f = dot_values(input, l2);
            let g = (label - self.sigmoid(f)) * alpha;
            for (e, w) in neu1e.iter_mut().zip(l2) {
                *e += g * w.get();
            }
            for (w, &x) in l2.iter().zip(input) {
                updates.add(w, g * x);
            }
        }
    }

    /// Approximate the logistic function, 1 / (1 + e^-x), saturating
    /// outside `±MAX_EXP`.
    fn sigmoid(&self, x: real) -> real {
        if x >= MAX_EXP {
            1.0
        } else if x <= -MAX_EXP {
            0.0
        } else {
            let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as real / MAX_EXP / 2.0)) as usize;
            self.exp_table[i.min(EXP_TABLE_SIZE - 1)]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn subsampling_is_monotone() {
        let train_words = 1_000_000;
        let sample = 1e-4;
        let mut last = real::INFINITY;
        for count in [1, 10, 100, 1000, 10_000, 100_000, 500_000] {
            let p = keep_probability(count, sample, train_words);
            assert!(p <= last, "count {count}: {p} > {last}");
            last = p;
        }
    }

    #[test]
    fn rare_words_are_always_kept() {
        // At or below the threshold frequency the probability is at least 1.
        assert!(keep_probability(100, 1e-4, 1_000_000) >= 1.0);
        assert!(keep_probability(50, 1e-4, 1_000_000) >= 1.0);
        assert!(keep_probability(100_000, 1e-4, 1_000_000) < 1.0);
    }

    fn trainer_for(text: &str, config: TrainConfig) -> (tempfile::TempDir, Trainer) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(text.as_bytes())
            .unwrap();
        let vocab = Vocabulary::learn_from_file(&path, config.hash_size, config.min_count).unwrap();
        let trainer = Trainer::new(config, vocab, &path).unwrap();
        (dir, trainer)
    }

    fn small_config() -> TrainConfig {
        TrainConfig {
            size: 4,
            window: 2,
            sample: 0.0,
            num_threads: 1,
            iter: 1,
            min_count: 1,
            hash_size: 1000,
            table_size: 1000,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn sigmoid_table() {
        let (_dir, t) = trainer_for("a\n", small_config());
        assert_eq!(t.sigmoid(10.0), 1.0);
        assert_eq!(t.sigmoid(-10.0), 0.0);
        assert!((t.sigmoid(0.0) - 0.5).abs() < 0.01);
        assert!((t.sigmoid(2.0) - 1.0 / (1.0 + (-2.0f32).exp())).abs() < 0.01);
        assert!(t.sigmoid(5.9999) <= 1.0);
    }

    #[test]
    fn context_window_shrinks() {
        let (_dir, t) = trainer_for("a\n", small_config());
        assert_eq!(t.context(3, 0, 10).collect::<Vec<_>>(), [1, 2, 4, 5]);
        assert_eq!(t.context(3, 1, 10).collect::<Vec<_>>(), [2, 4]);
        assert_eq!(t.context(0, 0, 2).collect::<Vec<_>>(), [1]);
        assert!(t.context(0, 0, 1).next().is_none());
    }

    #[test]
    fn output_weights_start_at_zero() {
        let config = TrainConfig {
            hs: true,
            ..small_config()
        };
        let (_dir, t) = trainer_for("x y z x\n", config);
        assert!(t.hs_weights().unwrap().to_vec().iter().all(|&w| w == 0.0));
        assert!(t.negative_weights().unwrap().to_vec().iter().all(|&w| w == 0.0));
        assert!(t.embeddings().to_vec().iter().any(|&w| w != 0.0));
    }

    #[test]
    fn training_moves_the_weights() {
        for architecture in [Architecture::Cbow, Architecture::SkipGram] {
            let config = TrainConfig {
                hs: true,
                architecture,
                iter: 3,
                ..small_config()
            };
            let (_dir, mut t) = trainer_for("the cat sat on the mat\nthe dog sat\n", config);
            let before = t.embeddings().to_vec();
            t.train().unwrap();
            assert_ne!(t.embeddings().to_vec(), before, "{architecture:?}");
            assert!(t.hs_weights().unwrap().to_vec().iter().any(|&w| w != 0.0));
            assert!(t.negative_weights().unwrap().to_vec().iter().any(|&w| w != 0.0));
            assert!(t.embeddings().to_vec().iter().all(|w| w.is_finite()));
        }
    }

    #[test]
    fn negatives_equal_to_the_target_are_skipped() {
        // With one real word, every negative draw (markers are remapped)
        // lands on the target itself, so only the positive step updates.
        for architecture in [Architecture::Cbow, Architecture::SkipGram] {
            let config = TrainConfig {
                negative: 3,
                architecture,
                iter: 2,
                ..small_config()
            };
            let (_dir, mut t) = trainer_for("a a a a\na a\n", config);
            assert_eq!(t.vocab().len(), 2);
            t.train().unwrap();
            let syn1neg = t.negative_weights().unwrap();
            assert!(syn1neg.row_values(0).iter().all(|&w| w == 0.0));
            assert!(syn1neg.row_values(1).iter().any(|&w| w != 0.0));
            assert!(syn1neg.to_vec().iter().all(|w| w.is_finite()));
        }
    }

    #[test]
    fn every_epoch_reads_the_whole_corpus() {
        let config = TrainConfig {
            iter: 3,
            ..small_config()
        };
        // 6 + 1 marker + 3 + 1 marker
        let (_dir, mut t) = trainer_for("the cat sat on the mat\nthe dog sat\n", config);
        t.train().unwrap();
        assert_eq!(t.words_processed(), 3 * 11);
    }

    #[test]
    fn learning_rate_decays_with_a_floor() {
        let text = "a b c d e f g h\n".repeat(3000);
        let config = TrainConfig {
            negative: 0,
            iter: 2,
            alpha: Some(0.1),
            ..small_config()
        };
        let (_dir, mut t) = trainer_for(&text, config);
        assert_eq!(t.alpha(), 0.1);
        t.train().unwrap();
        let alpha = t.alpha();
        assert!(alpha < 0.1 && alpha >= 0.1 * 0.0001, "alpha = {alpha}");
    }
}
