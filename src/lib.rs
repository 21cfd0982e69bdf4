use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::ops::Index;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ordered_float::OrderedFloat;

pub mod config;
pub mod corpus;
pub mod huffman;
pub mod kmeans;
pub mod matrix;
pub mod output;
pub mod rng;
pub mod train;
pub mod unigram;
pub mod vocab;

pub use config::{Architecture, OutputFormat, TrainConfig};
pub use output::Model;
pub use rng::Rng;
pub use train::Trainer;
pub use vocab::{VocabWord, Vocabulary};

/// Maximum token length in bytes, including room for a terminator in the
/// on-disk formats. Longer tokens are truncated to `MAX_STRING - 1` bytes.
pub const MAX_STRING: usize = 100;

/// Sentences longer than this are cut off; the rest of the line is read but not trained on.
pub const MAX_SENTENCE_LENGTH: usize = 1000;

pub const MAX_CODE_LENGTH: usize = 40;

/// The token produced for a newline. Always vocabulary index 0.
pub const SENTENCE_MARKER: &str = "</s>";

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

/// Word vectors read back from a file written by `wordvec`.
pub struct Vectors {
    /// Embedding vector length (number of dimensions).
    size: usize,

    /// The vocabulary.
    vocab: Vec<String>,

    /// `embeddings[k * size..(k+1) * size]` is the vector embedding for word `k`.
    embeddings: Vec<f32>,
}

pub fn norm(v: &[f32]) -> f32 {
    v.iter().copied().map(|e| e * e).sum::<f32>().sqrt()
}

pub fn normalize(v: &mut [f32]) {
    let len = norm(v);
    if len == 0.0 {
        return;
    }
    for e in v {
        *e /= len;
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}

impl Index<usize> for Vectors {
    type Output = [f32];

    fn index(&self, i: usize) -> &[f32] {
        &self.embeddings[i * self.size..][..self.size]
    }
}

fn read_header(f: &mut impl BufRead) -> Result<(usize, usize)> {
    let mut line = String::new();
    f.read_line(&mut line).context("error reading input file")?;
    let mut fields = line.split_whitespace();
    let num_words: usize = fields
        .next()
        .ok_or_else(|| anyhow!("invalid input file"))?
        .parse()
        .context("invalid input file")?;
    let size: usize = fields
        .next()
        .ok_or_else(|| anyhow!("invalid input file"))?
        .parse()
        .context("invalid input file")?;
    Ok((num_words, size))
}

impl Vectors {
    /// Load vectors saved in the binary format (`--binary`).
    pub fn load(file_name: &Path) -> Result<Self> {
        let mut f = BufReader::new(File::open(file_name).context("error opening input file")?);
        let (num_words, size) = read_header(&mut f)?;

        let mut vocab: Vec<String> = vec![];
        let mut m = vec![0.0; num_words * size];
        for b in 0..num_words {
            let mut vocab_word = Vec::<u8>::new();
            let count = f
                .read_until(b' ', &mut vocab_word)
                .context("error reading input file")?;
            if count == 0 {
                break;
            }
            if vocab_word.last() == Some(&b' ') {
                vocab_word.pop();
            }
            vocab_word.retain(|c| *c != b'\n');
            vocab.push(String::from_utf8(vocab_word).context("invalid word in input file")?);

            let row = &mut m[b * size..][..size];
            f.read_exact(bytemuck::cast_slice_mut::<f32, u8>(row))
                .context("error reading input file")?;
        }
        anyhow::ensure!(
            vocab.len() == num_words,
            "input file ends after {} of {num_words} words",
            vocab.len()
        );

        Ok(Vectors {
            size,
            vocab,
            embeddings: m,
        })
    }

    /// Load vectors saved in the text format.
    pub fn load_text(file_name: &Path) -> Result<Self> {
        let mut f = BufReader::new(File::open(file_name).context("error opening input file")?);
        let (num_words, size) = read_header(&mut f)?;

        let mut vocab = Vec::with_capacity(num_words);
        let mut embeddings = Vec::with_capacity(num_words * size);
        for (line_num, line) in f.lines().enumerate() {
            let line = line.context("error reading input file")?;
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            vocab.push(word.to_string());
            let before = embeddings.len();
            for field in fields {
                embeddings.push(field.parse::<f32>().with_context(|| {
                    format!("invalid number on line {} of input file", line_num + 2)
                })?);
            }
            anyhow::ensure!(
                embeddings.len() - before == size,
                "expected {size} values on line {} of input file",
                line_num + 2
            );
        }
        anyhow::ensure!(
            vocab.len() == num_words,
            "header says {num_words} words, file has {}",
            vocab.len()
        );

        Ok(Vectors {
            size,
            vocab,
            embeddings,
        })
    }

    pub fn num_words(&self) -> usize {
        self.vocab.len()
    }

    /// Returns the vector size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the index for a word as string. Exact match only, case-sensitive.
    pub fn lookup_word(&self, word: &str) -> Option<usize> {
        self.vocab.iter().position(|v| v == word)
    }

    /// Get the word for a word-index. Panics if `word` is out of range.
    pub fn word(&self, word: usize) -> &str {
        &self.vocab[word]
    }

    /// Scale every vector to unit length.
    pub fn normalize_rows(&mut self) {
        if self.size == 0 {
            return;
        }
        for row in self.embeddings.chunks_exact_mut(self.size) {
            normalize(row);
        }
    }

    /// The `n` words most similar to `query` by cosine similarity, best first.
    pub fn nearest(&self, query: &[f32], exclude: &[usize], n: usize) -> Vec<(&str, f32)> {
        let qn = norm(query);
        let mut best: Vec<(&str, f32)> = (0..self.num_words())
            .filter(|c| !exclude.contains(c))
            .map(|c| {
                let row = &self[c];
                let d = qn * norm(row);
                let sim = if d == 0.0 { 0.0 } else { dot(query, row) / d };
                (self.word(c), sim)
            })
            .collect();
        best.sort_by_key(|&(_word, sim)| Reverse(OrderedFloat(sim)));
        best.truncate(n);
        best
    }
}
