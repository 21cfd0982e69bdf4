//! Reading whitespace-delimited tokens from the training corpus.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};

use crate::{MAX_STRING, SENTENCE_MARKER};

/// Splits a byte stream into tokens, assuming space + tab + EOL to be word
/// boundaries.
///
/// A newline that ends a token is left in the stream, so the next call sees
/// it and returns [`SENTENCE_MARKER`]. Carriage returns are ignored. Tokens
/// longer than `MAX_STRING - 1` bytes are truncated.
pub struct WordReader<R> {
    inner: R,
}

impl<R: BufRead> WordReader<R> {
    pub fn new(inner: R) -> Self {
        WordReader { inner }
    }

    /// Reads a single token. Returns `Ok(None)` at end of input.
    pub fn read_word(&mut self) -> Result<Option<String>> {
        let mut word = Vec::<u8>::new();
        loop {
            let buf = match self.inner.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("error reading a word"),
            };
            if buf.is_empty() {
                break;
            }

            let mut used = 0;
            // Some(true): got a newline with no pending token. Some(false): token complete.
            let mut finished = None;
            for &ch in buf {
                match ch {
                    b'\r' => used += 1,
                    b' ' | b'\t' | b'\n' => {
                        if !word.is_empty() {
                            if ch != b'\n' {
                                used += 1;
                            }
                            finished = Some(false);
                            break;
                        }
                        used += 1;
                        if ch == b'\n' {
                            finished = Some(true);
                            break;
                        }
                    }
                    _ => {
                        used += 1;
                        if word.len() < MAX_STRING {
                            word.push(ch);
                        }
                    }
                }
            }
            self.inner.consume(used);

            match finished {
                Some(true) => return Ok(Some(SENTENCE_MARKER.to_string())),
                Some(false) => break,
                None => {}
            }
        }

        Ok(if word.is_empty() {
            None
        } else {
            Some(token_from_bytes(&word))
        })
    }
}

/// Build a token from raw bytes, keeping at most `MAX_STRING - 1` bytes.
///
/// A cut never splits a multi-byte character: the token ends at the last
/// whole character before the limit. Invalid UTF-8 is replaced with U+FFFD,
/// and the result is capped again afterwards since each replacement takes
/// three bytes.
pub fn token_from_bytes(bytes: &[u8]) -> String {
    let limit = MAX_STRING - 1;
    let mut word = bytes;
    if word.len() > limit {
        word = &word[..limit];
        while let Err(e) = std::str::from_utf8(word) {
            if e.error_len().is_some() {
                break;
            }
            word = &word[..e.valid_up_to()];
        }
    }
    let mut token = String::from_utf8_lossy(word).into_owned();
    if token.len() > limit {
        let mut end = limit;
        while !token.is_char_boundary(end) {
            end -= 1;
        }
        token.truncate(end);
    }
    token
}

impl<R: BufRead + Seek> WordReader<R> {
    /// Reposition the reader at byte `offset`. Reading resumes wherever that
    /// lands, possibly in the middle of a token.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.inner
            .seek(SeekFrom::Start(offset))
            .context("error seeking within training file")?;
        Ok(())
    }
}

impl<R: BufRead> Iterator for WordReader<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_word().transpose()
    }
}

impl WordReader<BufReader<File>> {
    /// Open `path` for reading, positioned at byte `offset`.
    pub fn open_at(path: &Path, offset: u64) -> Result<Self> {
        let f = File::open(path)
            .with_context(|| format!("error opening training data file {}", path.display()))?;
        let mut reader = WordReader::new(BufReader::new(f));
        if offset > 0 {
            reader.seek_to(offset)?;
        }
        Ok(reader)
    }
}

pub fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)
        .with_context(|| format!("error checking size of training file {}", path.display()))?
        .len())
}

/// The byte offset where each of `num_threads` workers starts reading.
///
/// The file is divided evenly by size, ignoring token and sentence
/// boundaries.
pub fn shard_starts(file_size: u64, num_threads: usize) -> Vec<u64> {
    let n = num_threads as u64;
    (0..n).map(|id| file_size / n * id).collect()
}
