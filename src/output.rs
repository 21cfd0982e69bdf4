//! Writing the trained model.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::OutputFormat;
use crate::kmeans::kmeans;
use crate::matrix::Matrix;
use crate::train::Trainer;
use crate::vocab::VocabWord;
use crate::real;

/// K-means always runs this many rounds.
pub const KMEANS_ITERATIONS: usize = 10;

/// Everything learned in one run, in the form written by `--bincode`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Model {
    pub size: usize,
    pub sample: real,
    pub window: usize,
    pub vocab: Vec<VocabWord>,
    /// `vocab.len() * size` word vectors.
    pub embeddings: Vec<real>,
    /// Hierarchical softmax weights, or empty if that layer was off.
    pub weights: Vec<real>,
    /// Negative sampling output vectors, or empty if that layer was off.
    pub negative_weights: Vec<real>,
}

impl Model {
    pub fn from_trainer(trainer: &Trainer) -> Self {
        let config = trainer.config();
        Model {
            size: config.size,
            sample: config.sample,
            window: config.window,
            vocab: trainer.vocab().words().to_vec(),
            embeddings: trainer.embeddings().to_vec(),
            weights: trainer.hs_weights().map(Matrix::to_vec).unwrap_or_default(),
            negative_weights: trainer
                .negative_weights()
                .map(Matrix::to_vec)
                .unwrap_or_default(),
        }
    }

    pub fn save(&self, filename: &Path) -> Result<()> {
        let mut fo = BufWriter::new(File::create(filename).context("error creating output file")?);
        bincode::serialize_into(&mut fo, self).context("error writing model")?;
        fo.flush().context("error writing model")?;
        Ok(())
    }

    pub fn load(filename: &Path) -> Result<Self> {
        let f = BufReader::new(
            File::open(filename)
                .with_context(|| format!("failed to open model file {filename:?}"))?,
        );
        bincode::deserialize_from(f)
            .with_context(|| format!("failed to load model from file {filename:?}"))
    }
}

/// Save the word vectors in text or binary format.
pub fn save_vectors(
    fo: &mut impl Write,
    vocab: &[VocabWord],
    vectors: &Matrix,
    binary: bool,
) -> Result<()> {
    let layer1_size = vectors.cols();
    writeln!(fo, "{} {}", vocab.len(), layer1_size).context("error writing output file")?;
    for (a, vw) in vocab.iter().enumerate() {
        write!(fo, "{} ", vw.word).context("error writing output file")?;
        let word_vec = vectors.row_values(a);
        if binary {
            fo.write_all(bytemuck::cast_slice::<real, u8>(&word_vec))
                .context("error writing output file")?;
        } else {
            for f in word_vec {
                write!(fo, "{} ", f).context("error writing output file")?;
            }
        }
        writeln!(fo).context("error writing output file")?;
    }
    Ok(())
}

/// Write one `word class` line per word.
pub fn save_classes(fo: &mut impl Write, vocab: &[VocabWord], classes: &[usize]) -> Result<()> {
    for (vw, cl) in vocab.iter().zip(classes) {
        writeln!(fo, "{} {}", vw.word, cl)
            .context("error writing k-means classes to output file")?;
    }
    Ok(())
}

/// Write the result of training to `output_file`: word classes if
/// `classes` is given, otherwise the vectors in `format`.
pub fn save_output(
    trainer: &Trainer,
    output_file: &Path,
    format: OutputFormat,
    classes: Option<usize>,
) -> Result<()> {
    ensure!(classes != Some(0), "number of classes must be positive");
    let vocab = trainer.vocab().words();
    match (classes, format) {
        (Some(k), _) => {
            let embeddings = trainer.embeddings();
            let cl = kmeans(&embeddings.to_vec(), embeddings.cols(), k, KMEANS_ITERATIONS);
            let mut fo =
                BufWriter::new(File::create(output_file).context("error creating output file")?);
            save_classes(&mut fo, vocab, &cl)?;
            fo.flush().context("error writing output file")?;
        }
        (None, OutputFormat::Bincode) => Model::from_trainer(trainer).save(output_file)?,
        (None, format) => {
            let mut fo =
                BufWriter::new(File::create(output_file).context("error creating output file")?);
            save_vectors(
                &mut fo,
                vocab,
                trainer.embeddings(),
                format == OutputFormat::Binary,
            )?;
            fo.flush().context("error writing output file")?;
        }
    }
    info!("Wrote {}", output_file.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(names: &[&str]) -> Vec<VocabWord> {
        names
            .iter()
            .map(|w| VocabWord {
                word: w.to_string(),
                count: 1,
                code: vec![],
                point: vec![],
            })
            .collect()
    }

    fn matrix(rows: usize, values: &[real]) -> Matrix {
        let m = Matrix::zeros(rows, values.len() / rows).unwrap();
        for (i, &v) in values.iter().enumerate() {
            m.row(i / m.cols())[i % m.cols()].set(v);
        }
        m
    }

    #[test]
    fn text_format() {
        let vocab = words(&["</s>", "hi"]);
        let m = matrix(2, &[0.5, -1.0, 0.25, 2.0]);
        let mut out = Vec::new();
        save_vectors(&mut out, &vocab, &m, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "2 2\n</s> 0.5 -1 \nhi 0.25 2 \n"
        );
    }

    #[test]
    fn binary_format() {
        let vocab = words(&["x"]);
        let m = matrix(1, &[1.5, -3.0]);
        let mut out = Vec::new();
        save_vectors(&mut out, &vocab, &m, true).unwrap();
        let mut expected = b"1 2\nx ".to_vec();
        expected.extend_from_slice(&1.5f32.to_ne_bytes());
        expected.extend_from_slice(&(-3.0f32).to_ne_bytes());
        expected.push(b'\n');
        assert_eq!(out, expected);
    }

    #[test]
    fn class_format() {
        let vocab = words(&["a", "b", "c"]);
        let mut out = Vec::new();
        save_classes(&mut out, &vocab, &[1, 0, 1]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a 1\nb 0\nc 1\n");
    }

    #[test]
    fn binary_file_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.bin");
        let vocab = words(&["</s>", "up", "down"]);
        let m = matrix(3, &[0.0, 1.0, 3.0, 4.0, -1.0, 0.0]);
        let mut f = File::create(&path).unwrap();
        save_vectors(&mut f, &vocab, &m, true).unwrap();
        drop(f);

        let v = crate::Vectors::load(&path).unwrap();
        assert_eq!(v.num_words(), 3);
        assert_eq!(v.size(), 2);
        assert_eq!(v.word(2), "down");
        assert_eq!(&v[1], &[3.0, 4.0]);
        assert_eq!(v.lookup_word("up"), Some(1));
    }
}
