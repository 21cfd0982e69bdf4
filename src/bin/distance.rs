use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use wordvec::{normalize, Vectors};

/// number of closest words that will be shown
const N: usize = 40;

/// Interactively list the words closest to a word or sentence.
#[derive(Parser)]
struct Options {
    /// Contains word projections in the BINARY FORMAT.
    #[arg(value_name = "FILE")]
    file_name: PathBuf,

    /// The file is in the text format instead
    #[arg(long)]
    text: bool,
}

fn run(options: &Options) -> Result<()> {
    let mut vectors = if options.text {
        Vectors::load_text(&options.file_name)?
    } else {
        Vectors::load(&options.file_name)?
    };
    vectors.normalize_rows();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    'outer: loop {
        print!("Enter word or sentence (EXIT to break): ");
        let _ = io::stdout().flush();

        let line = match lines.next() {
            None => break,
            Some(line) => line.context("error reading stdin")?,
        };
        let line = line.trim();
        if line == "EXIT" {
            break;
        }

        let mut bi: Vec<usize> = vec![];
        for sta in line.split_whitespace() {
            println!();
            match vectors.lookup_word(sta) {
                None => {
                    println!("Word: {sta}  Position in vocabulary: None");
                    println!("Out of dictionary word!");
                    continue 'outer;
                }
                Some(i) => {
                    println!("Word: {sta}  Position in vocabulary: {i}");
                    bi.push(i);
                }
            }
        }
        if bi.is_empty() {
            continue;
        }

        println!();
        println!("                                              Word       Cosine distance");
        println!("------------------------------------------------------------------------");

        let mut vec = vec![0.0f32; vectors.size()];
        for &i in &bi {
            for (v, &r) in vec.iter_mut().zip(&vectors[i]) {
                *v += r;
            }
        }
        normalize(&mut vec);

        for (word, dist) in vectors.nearest(&vec, &bi, N) {
            println!("{:50}\t\t{}", word, dist);
        }
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
