use std::path::PathBuf;
use std::process;

use anyhow::{ensure, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use wordvec::matrix::Updates;
use wordvec::unigram::DEFAULT_TABLE_SIZE;
use wordvec::vocab::DEFAULT_HASH_SIZE;
use wordvec::{output, real, Architecture, OutputFormat, TrainConfig, Trainer, Vocabulary};

#[derive(Parser)]
#[command(about = "WORD VECTOR estimation toolkit", long_about = None, version)]
struct Options {
    /// Use text data from FILE to train the model
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Use FILE to save the resulting word vectors / word clusters
    #[arg(long = "output", value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Set size of word vectors
    #[arg(long = "size", default_value_t = 100)]
    layer1_size: usize,

    /// Set max skip length between words
    #[arg(long, default_value_t = 5)]
    window: usize,

    /// Set threshold for occurrence of words. Those that appear with higher
    /// frequency in the training data will be randomly down-sampled; default
    /// is 1e-3, useful range is (0, 1e-5)
    #[arg(long, default_value_t = 1e-3)]
    sample: real,

    /// Use Hierarchical Softmax
    #[arg(long)]
    hs: bool,

    /// Number of negative examples; common values are 3 - 10 (0 = not used)
    #[arg(long, default_value_t = 5)]
    negative: usize,

    /// Use N threads
    #[arg(long = "threads", value_name = "N", default_value_t = 12)]
    num_threads: usize,

    /// Run more training iterations
    #[arg(long, default_value_t = 5)]
    iter: usize,

    /// Discard words that appear less than N times
    #[arg(long = "min-count", value_name = "N", default_value_t = 5)]
    min_count: u64,

    /// Set the starting learning rate; default is 0.025 for skip-gram and 0.05 for CBOW
    #[arg(long)]
    alpha: Option<real>,

    /// Output word classes rather than word vectors; if unspecified, vectors are written instead
    #[arg(long)]
    classes: Option<usize>,

    /// Set the debug mode (0 = quiet, 1 = summary, 2 = progress and details)
    #[arg(long = "debug", default_value_t = 2)]
    debug_mode: usize,

    /// Save the resulting vectors in binary mode
    #[arg(long, group = "format")]
    binary: bool,

    /// Save the whole model (vocabulary, codes and weights) in bincode format
    #[arg(long, group = "format")]
    bincode: bool,

    /// The vocabulary will be saved to FILE
    #[arg(long = "save-vocab", value_name = "FILE")]
    save_vocab_file: Option<PathBuf>,

    /// The vocabulary will be read from FILE, not constructed from the training data
    #[arg(long = "read-vocab", value_name = "FILE")]
    read_vocab_file: Option<PathBuf>,

    /// Use the continuous bag of words model (otherwise, use skip-gram model)
    #[arg(long)]
    cbow: bool,

    /// Update shared weights atomically, so no concurrent update is lost
    #[arg(long)]
    exact_updates: bool,

    /// Number of slots in the vocabulary hash table
    #[arg(long, value_name = "N", default_value_t = DEFAULT_HASH_SIZE)]
    hash_size: usize,

    /// Number of cells in the negative sampling table
    #[arg(long, value_name = "N", default_value_t = DEFAULT_TABLE_SIZE)]
    table_size: usize,
}

impl Options {
    fn train_config(&self) -> TrainConfig {
        TrainConfig {
            size: self.layer1_size,
            window: self.window,
            sample: self.sample,
            hs: self.hs,
            negative: self.negative,
            num_threads: self.num_threads,
            iter: self.iter,
            min_count: self.min_count,
            alpha: self.alpha,
            architecture: if self.cbow {
                Architecture::Cbow
            } else {
                Architecture::SkipGram
            },
            hash_size: self.hash_size,
            table_size: self.table_size,
            updates: if self.exact_updates {
                Updates::Exact
            } else {
                Updates::Racy
            },
        }
    }

    fn output_format(&self) -> OutputFormat {
        if self.bincode {
            OutputFormat::Bincode
        } else if self.binary {
            OutputFormat::Binary
        } else {
            OutputFormat::Text
        }
    }
}

fn init_logging(debug_mode: usize) {
    let level = match debug_mode {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wordvec={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(debug_mode: usize) -> ProgressBar {
    if debug_mode < 2 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{elapsed_precise} [{bar:40}] {percent:>3}%  {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

fn train_model(options: &Options) -> Result<()> {
    let config = options.train_config();
    config.validate()?;
    ensure!(options.classes != Some(0), "number of classes must be positive");

    let vocab = match &options.read_vocab_file {
        Some(f) => Vocabulary::read(f, config.hash_size, config.min_count)?,
        None => Vocabulary::learn_from_file(&options.train_file, config.hash_size, config.min_count)?,
    };
    if let Some(f) = &options.save_vocab_file {
        vocab.save(f)?;
    }
    let output_file = match &options.output_file {
        Some(f) => f,
        None => return Ok(()),
    };

    let mut trainer = Trainer::new(config, vocab, &options.train_file)?
        .with_progress(progress_bar(options.debug_mode));
    trainer.train()?;
    output::save_output(&trainer, output_file, options.output_format(), options.classes)
}

fn main() {
    let options = Options::parse();
    init_logging(options.debug_mode);

    if let Err(err) = train_model(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
