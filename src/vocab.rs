//! The vocabulary: every known token, its count, and a hash index over the
//! token strings.

use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Index;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::corpus::{token_from_bytes, WordReader};
use crate::huffman::HuffmanTree;
use crate::{MAX_CODE_LENGTH, SENTENCE_MARKER};

/// Default number of hash slots. Maximum 30 * 0.7 = 21M words in the vocabulary.
pub const DEFAULT_HASH_SIZE: usize = 30_000_000;

/// Storage for records grows by this many entries at a time.
const VOCAB_CHUNK: usize = 1000;

const EMPTY: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabWord {
    pub word: String,
    pub count: u64,
    /// Huffman code, root first. Empty until [`Vocabulary::create_binary_tree`] runs.
    pub code: Vec<u8>,
    /// Internal node ids from the root down to the leaf's parent; `point[d]`
    /// is the node that decides `code[d]`.
    pub point: Vec<u32>,
}

impl VocabWord {
    fn new(word: String) -> Self {
        VocabWord {
            word,
            count: 0,
            code: Vec::new(),
            point: Vec::new(),
        }
    }
}

/// Tokens in index order plus an open-addressing hash index.
///
/// The index uses linear probing and is never patched: any operation that
/// reorders or removes records rebuilds it from scratch before returning.
/// Index 0 is the sentence marker and is never pruned.
pub struct Vocabulary {
    words: Vec<VocabWord>,
    hash: Vec<u32>,
    /// Threshold for the next [`reduce`](Vocabulary::reduce).
    min_reduce: u64,
    /// Sum of counts of the retained tokens.
    train_words: u64,
}

impl Index<usize> for Vocabulary {
    type Output = VocabWord;

    fn index(&self, i: usize) -> &VocabWord {
        &self.words[i]
    }
}

fn word_hash(word: &str, hash_size: usize) -> usize {
    let hash = word
        .bytes()
        .fold(0u64, |h, b| h.wrapping_mul(257).wrapping_add(b as u64));
    (hash % hash_size as u64) as usize
}

impl Vocabulary {
    /// An empty vocabulary with `hash_size` slots in its index.
    pub fn new(hash_size: usize) -> Self {
        assert!(hash_size > 0, "hash table needs at least one slot");
        Vocabulary {
            words: Vec::with_capacity(VOCAB_CHUNK),
            hash: vec![EMPTY; hash_size],
            min_reduce: 1,
            train_words: 0,
        }
    }

    /// A vocabulary containing only the sentence marker, with count 0.
    pub fn with_marker(hash_size: usize) -> Self {
        let mut vocab = Vocabulary::new(hash_size);
        vocab.insert(SENTENCE_MARKER.to_string());
        vocab
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[VocabWord] {
        &self.words
    }

    /// Total occurrences of retained tokens, as of the last sort.
    pub fn train_words(&self) -> u64 {
        self.train_words
    }

    pub fn hash_size(&self) -> usize {
        self.hash.len()
    }

    /// True once the vocabulary fills more than 70% of the hash slots.
    pub fn over_capacity(&self) -> bool {
        self.words.len() as f64 > self.hash.len() as f64 * 0.7
    }

    /// Returns position of a word in the vocabulary; if the word is not found, returns None.
    pub fn lookup(&self, word: &str) -> Option<usize> {
        let size = self.hash.len();
        let mut slot = word_hash(word, size);
        for _ in 0..size {
            let entry = self.hash[slot];
            if entry == EMPTY {
                return None;
            }
            if self.words[entry as usize].word == word {
                return Some(entry as usize);
            }
            slot = (slot + 1) % size;
        }
        None
    }

    /// Adds a word to the vocabulary with a count of zero and returns its
    /// index, which is always the previous length.
    ///
    /// The caller is responsible for checking that `word` is not already
    /// present.
    pub fn insert(&mut self, word: String) -> usize {
        if self.words.len() == self.words.capacity() {
            self.words.reserve_exact(VOCAB_CHUNK);
        }
        if self.words.len() >= self.hash.len() {
            // Every slot is taken; a larger table is the only way forward.
            let bigger = self.hash.len() * 2;
            self.hash = vec![EMPTY; bigger];
            self.rebuild_hash();
        }
        let n = self.words.len();
        self.words.push(VocabWord::new(word));
        self.register(n);
        n
    }

    pub fn add_count(&mut self, index: usize, n: u64) {
        self.words[index].count += n;
    }

    fn register(&mut self, index: usize) {
        let size = self.hash.len();
        let mut slot = word_hash(&self.words[index].word, size);
        while self.hash[slot] != EMPTY {
            slot = (slot + 1) % size;
        }
        self.hash[slot] = index as u32;
    }

    fn rebuild_hash(&mut self) {
        self.hash.fill(EMPTY);
        for i in 0..self.words.len() {
            self.register(i);
        }
    }

    /// Sorts the vocabulary by frequency using word counts, keeping the
    /// sentence marker at index 0, and discards words occurring less than
    /// `min_count` times.
    ///
    /// Indices returned before this call are invalid afterwards.
    pub fn sort_and_prune(&mut self, min_count: u64) {
        if self.words.len() > 1 {
            self.words[1..].sort_by_key(|vw| Reverse(vw.count));
        }

        let mut first = true;
        self.words.retain(|vw| {
            let keep = first || vw.count >= min_count;
            first = false;
            keep
        });
        self.train_words = self.words.iter().map(|vw| vw.count).sum();
        self.rebuild_hash();
    }

    /// Reduces the vocabulary by removing infrequent tokens.
    ///
    /// Used while counting a corpus to keep the table under its soft
    /// capacity. Every call raises the threshold for the next one, so rare
    /// words seen early may be dropped for good.
    pub fn reduce(&mut self) {
        let min_reduce = self.min_reduce;
        let before = self.words.len();
        let mut first = true;
        self.words.retain(|vw| {
            let keep = first || vw.count > min_reduce;
            first = false;
            keep
        });
        self.rebuild_hash();
        self.min_reduce += 1;
        debug!(
            removed = before - self.words.len(),
            threshold = min_reduce,
            "reduced vocabulary"
        );
    }

    /// Count every token read from `words`, then sort and prune.
    pub fn learn<R: BufRead>(
        words: WordReader<R>,
        hash_size: usize,
        min_count: u64,
    ) -> Result<Self> {
        let mut vocab = Vocabulary::with_marker(hash_size);
        let mut seen: u64 = 0;
        for word in words {
            let word = word.context("error reading training data file")?;
            seen += 1;
            if seen % 100_000 == 0 {
                trace!("{}K words read", seen / 1000);
            }

            match vocab.lookup(&word) {
                Some(a) => vocab.add_count(a, 1),
                None => {
                    let a = vocab.insert(word);
                    vocab.add_count(a, 1);
                }
            }

            if vocab.over_capacity() {
                vocab.reduce();
            }
        }
        vocab.sort_and_prune(min_count);
        info!("Vocab size: {}", vocab.len());
        info!("Words in train file: {}", vocab.train_words());
        Ok(vocab)
    }

    /// Build the vocabulary from the training corpus at `path`.
    pub fn learn_from_file(path: &Path, hash_size: usize, min_count: u64) -> Result<Self> {
        let reader = WordReader::open_at(path, 0)?;
        Vocabulary::learn(reader, hash_size, min_count)
    }

    /// Write one `token count` line per word.
    pub fn save(&self, vocab_file: &Path) -> Result<()> {
        let mut fo = BufWriter::new(
            File::create(vocab_file).context("error creating vocab file for write")?,
        );
        for vw in &self.words {
            writeln!(fo, "{} {}", vw.word, vw.count).context("error writing vocab file")?;
        }
        fo.flush().context("error writing vocab file")?;
        Ok(())
    }

    /// Read a file written by [`save`](Vocabulary::save), then sort and prune.
    pub fn read(vocab_file: &Path, hash_size: usize, min_count: u64) -> Result<Self> {
        let fin = BufReader::new(File::open(vocab_file).context("error opening vocabulary file")?);
        let mut vocab = Vocabulary::new(hash_size);

        for (line_num, line) in fin.lines().enumerate() {
            let line = line.context("error reading vocabulary file")?;
            let fields = line.split_whitespace().collect::<Vec<&str>>();
            if fields.is_empty() {
                continue;
            }
            anyhow::ensure!(
                fields.len() == 2,
                "vocabulary file syntax error on line {}",
                line_num + 1
            );
            let count = fields[1].parse::<u64>().with_context(|| {
                format!(
                    "error reading vocabulary file: unrecognized frequency number format on line {}",
                    line_num + 1
                )
            })?;

            let word = token_from_bytes(fields[0].as_bytes());
            let a = match vocab.lookup(&word) {
                Some(a) => a,
                None => vocab.insert(word),
            };
            vocab.add_count(a, count);
        }

        vocab.marker_first();
        vocab.sort_and_prune(min_count);
        info!("Vocab size: {}", vocab.len());
        info!("Words in train file: {}", vocab.train_words());
        Ok(vocab)
    }

    /// Make sure the sentence marker sits at index 0.
    fn marker_first(&mut self) {
        match self.lookup(SENTENCE_MARKER) {
            Some(0) => {}
            Some(p) => {
                let marker = self.words.remove(p);
                self.words.insert(0, marker);
                self.rebuild_hash();
            }
            None => {
                warn!("vocabulary file has no {SENTENCE_MARKER} entry; adding one");
                self.words.insert(0, VocabWord::new(SENTENCE_MARKER.to_string()));
                self.rebuild_hash();
            }
        }
    }

    /// Create binary Huffman tree using the word counts and store each
    /// word's code and path. Frequent words get short codes.
    ///
    /// Must be called after [`sort_and_prune`](Vocabulary::sort_and_prune).
    pub fn create_binary_tree(&mut self) -> HuffmanTree {
        let counts = self.words.iter().map(|vw| vw.count).collect::<Vec<u64>>();
        let tree = HuffmanTree::build(&counts);
        for (leaf, vw) in self.words.iter_mut().enumerate() {
            let (code, point) = tree.code(leaf);
            vw.code = code;
            vw.point = point;
        }
        let max_depth = self.max_code_length();
        if max_depth > MAX_CODE_LENGTH {
            warn!(
                max_depth,
                limit = MAX_CODE_LENGTH,
                "word counts are very skewed; some Huffman codes are unusually long"
            );
        }
        debug!(internal_nodes = tree.num_internal(), max_depth, "built Huffman tree");
        tree
    }

    /// Length of the longest Huffman code, or 0 before the tree is built.
    pub fn max_code_length(&self) -> usize {
        self.words.iter().map(|vw| vw.code.len()).max().unwrap_or(0)
    }
}
