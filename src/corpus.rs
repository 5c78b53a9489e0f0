//! Training data: sentences of token ids.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::IoContext;
use crate::vocab::Vocabulary;
use crate::{Error, Result};

/// Read whitespace-separated tokens, one sentence per line. Blank lines are
/// skipped. Tokenization beyond splitting on whitespace is up to whoever
/// wrote the file.
pub fn read_sentences<R: BufRead>(reader: R) -> impl Iterator<Item = Result<Vec<String>>> {
    reader.lines().filter_map(|line| match line {
        Err(source) => Some(Err(Error::Io {
            context: "error reading training data",
            source,
        })),
        Ok(line) => {
            let words: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            if words.is_empty() {
                None
            } else {
                Some(Ok(words))
            }
        }
    })
}

pub fn open_sentences(path: &Path) -> Result<impl Iterator<Item = Result<Vec<String>>>> {
    let file = File::open(path).io_context("error opening training data file")?;
    Ok(read_sentences(BufReader::new(file)))
}

/// A tokenized corpus, held in memory as vocabulary ids.
///
/// Tokens not in the vocabulary are dropped. Sentences longer than the
/// configured maximum are split.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    sentences: Vec<Vec<u32>>,
    num_tokens: u64,
}

impl Corpus {
    pub fn from_sentences<I, S, T>(vocab: &Vocabulary, sentences: I, max_len: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut corpus = Corpus::default();
        for sentence in sentences {
            corpus.push_sentence(vocab, sentence, max_len);
        }
        corpus
    }

    /// Treat one flat token stream as consecutive sentences of `max_len` tokens.
    pub fn from_tokens<I, T>(vocab: &Vocabulary, tokens: I, max_len: usize) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut corpus = Corpus::default();
        corpus.push_sentence(vocab, tokens, max_len);
        corpus
    }

    pub fn read(path: &Path, vocab: &Vocabulary, max_len: usize) -> Result<Self> {
        let mut corpus = Corpus::default();
        for sentence in open_sentences(path)? {
            corpus.push_sentence(vocab, sentence?, max_len);
        }
        Ok(corpus)
    }

    fn push_sentence<S, T>(&mut self, vocab: &Vocabulary, sentence: S, max_len: usize)
    where
        S: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        // A limit of 0 would never close a sentence; treat it as 1.
        let max_len = max_len.max(1);
        let mut sen: Vec<u32> = Vec::new();
        for token in sentence {
            let Some(id) = vocab.id(token.as_ref()) else {
                continue;
            };
            sen.push(id as u32);
            if sen.len() >= max_len {
                self.num_tokens += sen.len() as u64;
                self.sentences.push(std::mem::take(&mut sen));
            }
        }
        if !sen.is_empty() {
            self.num_tokens += sen.len() as u64;
            self.sentences.push(sen);
        }
    }

    pub fn sentences(&self) -> &[Vec<u32>] {
        &self.sentences
    }

    /// Number of in-vocabulary tokens.
    pub fn num_tokens(&self) -> u64 {
        self.num_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    /// Split the sentences into `n` contiguous slices of nearly equal length.
    pub fn slices(&self, n: usize) -> Vec<&[Vec<u32>]> {
        assert!(n > 0);
        let len = self.sentences.len();
        (0..n)
            .map(|i| &self.sentences[len * i / n..len * (i + 1) / n])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::from_tokens("a b c a b a".split(' '), 1).unwrap()
    }

    #[test]
    fn unknown_tokens_dropped() {
        let v = vocab();
        let corpus = Corpus::from_sentences(&v, [vec!["a", "zzz", "c"], vec!["qq"]], 100);
        assert_eq!(corpus.sentences(), &[vec![0, 2]]);
        assert_eq!(corpus.num_tokens(), 2);
    }

    #[test]
    fn long_sentences_split() {
        let v = vocab();
        let corpus = Corpus::from_tokens(&v, "a b c a b".split(' '), 2);
        assert_eq!(corpus.sentences(), &[vec![0, 1], vec![2, 0], vec![1]]);
        assert_eq!(corpus.num_tokens(), 5);
    }

    #[test]
    fn zero_length_limit_means_one_token_per_sentence() {
        let v = vocab();
        let corpus = Corpus::from_sentences(&v, [vec!["a", "b"], vec!["c"]], 0);
        assert_eq!(corpus.sentences(), &[vec![0], vec![1], vec![2]]);
        let corpus = Corpus::from_tokens(&v, ["b", "a"], 0);
        assert_eq!(corpus.sentences(), &[vec![1], vec![0]]);
        assert_eq!(corpus.num_tokens(), 2);
    }

    #[test]
    fn slices_cover_everything_once() {
        let v = vocab();
        let corpus = Corpus::from_tokens(&v, std::iter::repeat("a").take(10), 1);
        let slices = corpus.slices(3);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices.iter().map(|s| s.len()).sum::<usize>(), 10);
        let slices = corpus.slices(20);
        assert_eq!(slices.iter().map(|s| s.len()).sum::<usize>(), 10);
    }

    #[test]
    fn read_sentences_skips_blank_lines() {
        let text = "a b  c\n\n  \nb a\n";
        let sentences: Vec<Vec<String>> = read_sentences(text.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(sentences, vec![vec!["a", "b", "c"], vec!["b", "a"]]);
    }
}
