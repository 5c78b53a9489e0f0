//! Vocabulary construction.
//!
//! Building a vocabulary happens in two phases. A `VocabBuilder` counts
//! tokens; nothing about ids is known yet. `VocabBuilder::build` then
//! discards rare tokens, sorts the rest by descending count and freezes the
//! result into a `Vocabulary` whose ids never change again.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::IoContext;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabWord {
    pub word: String,
    /// Number of occurrences in the corpus.
    pub count: u64,
}

/// Phase one: token counting.
#[derive(Debug, Default)]
pub struct VocabBuilder {
    /// Distinct tokens in first-seen order.
    words: Vec<VocabWord>,
    index: HashMap<String, usize>,
    /// Every token added, including ones later pruned or discarded.
    total_tokens: u64,
    max_size: Option<usize>,
    min_reduce: u64,
}

impl VocabBuilder {
    pub fn new() -> Self {
        VocabBuilder {
            min_reduce: 1,
            ..VocabBuilder::default()
        }
    }

    /// Bound the number of distinct tokens kept while counting. When the
    /// bound is exceeded, tokens seen `n` times or fewer are dropped, with
    /// `n` growing by one each time this happens.
    pub fn with_max_size(mut self, max_size: Option<usize>) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn add(&mut self, token: &str) {
        self.add_count(token, 1);
    }

    pub fn add_count(&mut self, token: &str, count: u64) {
        self.total_tokens += count;
        if let Some(&i) = self.index.get(token) {
            self.words[i].count += count;
        } else {
            self.index.insert(token.to_string(), self.words.len());
            self.words.push(VocabWord {
                word: token.to_string(),
                count,
            });
        }

        if let Some(max_size) = self.max_size {
            if self.words.len() > max_size {
                self.reduce();
            }
        }
    }

    /// Reduces the vocabulary by removing infrequent tokens
    fn reduce(&mut self) {
        let min_reduce = self.min_reduce;
        self.words.retain(|vw| vw.count > min_reduce);

        // Hash will be re-computed, as it is not actual
        self.index.clear();
        for (i, vw) in self.words.iter().enumerate() {
            self.index.insert(vw.word.clone(), i);
        }
        debug!(
            min_reduce,
            remaining = self.words.len(),
            "pruned rare tokens while counting"
        );
        self.min_reduce += 1;
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn distinct(&self) -> usize {
        self.words.len()
    }

    /// Phase two: drop tokens seen fewer than `min_count` times and assign ids
    /// in order of descending count. Equal counts keep first-seen order.
    pub fn build(self, min_count: u64) -> Result<Vocabulary> {
        let distinct = self.words.len();
        let mut words: Vec<VocabWord> = self
            .words
            .into_iter()
            .filter(|vw| vw.count >= min_count)
            .collect();
        if words.is_empty() {
            return Err(Error::EmptyCorpus {
                min_count,
                distinct,
            });
        }
        // `sort_by_key` is stable.
        words.sort_by_key(|vw| Reverse(vw.count));
        let vocab = Vocabulary::from_words(words, self.total_tokens);
        info!(
            vocab_size = vocab.len(),
            words_in_corpus = vocab.total_tokens(),
            "vocabulary built"
        );
        Ok(vocab)
    }
}

impl<S: AsRef<str>> Extend<S> for VocabBuilder {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for token in iter {
            self.add(token.as_ref());
        }
    }
}

/// A frozen, frequency-ordered vocabulary. Id 0 is the most frequent token.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    words: Vec<VocabWord>,
    index: HashMap<String, usize>,
    total_tokens: u64,
}

impl Vocabulary {
    /// Build a vocabulary from words already in id order.
    ///
    /// `total_tokens` counts all corpus tokens, including discarded ones.
    pub(crate) fn from_words(words: Vec<VocabWord>, total_tokens: u64) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(i, vw)| (vw.word.clone(), i))
            .collect();
        Vocabulary {
            words,
            index,
            total_tokens,
        }
    }

    pub fn from_tokens<I, S>(tokens: I, min_count: u64) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = VocabBuilder::new();
        builder.extend(tokens);
        builder.build(min_count)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Returns position of a word in the vocabulary; if the word is not found, returns None.
    pub fn id(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    /// Panics if `id` is out of range.
    pub fn word(&self, id: usize) -> &str {
        &self.words[id].word
    }

    pub fn count(&self, id: usize) -> u64 {
        self.words[id].count
    }

    pub fn words(&self) -> &[VocabWord] {
        &self.words
    }

    /// Number of tokens in the corpus, including those below the threshold.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Number of corpus tokens that have an id.
    pub fn retained_tokens(&self) -> u64 {
        self.words.iter().map(|vw| vw.count).sum()
    }

    /// Save as `token count` lines, in id order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut fo = BufWriter::new(
            File::create(path).io_context("error creating vocab file for write")?,
        );
        for vw in &self.words {
            writeln!(fo, "{} {}", vw.word, vw.count).io_context("error writing vocab file")?;
        }
        fo.flush().io_context("error writing vocab file")?;
        Ok(())
    }

    /// Read a file written by `save`, then threshold and sort it like a
    /// freshly counted corpus.
    pub fn read(path: &Path, min_count: u64) -> Result<Self> {
        let fin = BufReader::new(File::open(path).io_context("error opening vocabulary file")?);
        let mut builder = VocabBuilder::new();
        for (line_num, line) in fin.lines().enumerate() {
            let line = line.io_context("error reading vocabulary file")?;
            if line.trim().is_empty() {
                continue;
            }
            let fields = line.split_whitespace().collect::<Vec<&str>>();
            if fields.len() != 2 {
                return Err(Error::Format {
                    line: line_num + 1,
                    message: "expected `token count`".to_string(),
                });
            }
            let count = fields[1].parse::<u64>().map_err(|_| Error::Format {
                line: line_num + 1,
                message: format!("unrecognized frequency number format {:?}", fields[1]),
            })?;
            builder.add_count(fields[0], count);
        }
        // A vocabulary file does not record discarded tokens.
        let vocab = builder.build(min_count)?;
        Ok(Vocabulary {
            total_tokens: vocab.retained_tokens(),
            ..vocab
        })
    }
}
