//! Negative sampling and subsampling of frequent tokens.

use crate::real;
use crate::vocab::Vocabulary;

/// Exponent applied to counts before sampling negatives.
pub const UNIGRAM_POWER: f64 = 0.75;

/// Upper bound on the table length, as in the original word2vec.
const MAX_TABLE_SIZE: usize = 100_000_000;

/// Lower bound, so that small vocabularies still get a fine-grained table.
const MIN_TABLE_SIZE: usize = 1 << 20;

/// Table slots per unit of weighted frequency.
const SLOTS_PER_WEIGHT: f64 = 100.0;

/// Lookup table for drawing tokens with probability proportional to
/// `count^0.75`. Each token fills a run of slots proportional to its share;
/// sampling is one uniform index into the table.
#[derive(Debug, Clone)]
pub struct UnigramTable {
    table: Vec<u32>,
}

impl UnigramTable {
    pub fn new(vocab: &Vocabulary) -> Self {
        let train_words_pow = vocab
            .words()
            .iter()
            .map(|vw| (vw.count as f64).powf(UNIGRAM_POWER))
            .sum::<f64>();
        let size = ((train_words_pow * SLOTS_PER_WEIGHT).ceil() as usize)
            .clamp(MIN_TABLE_SIZE, MAX_TABLE_SIZE);
        Self::with_size(vocab, size)
    }

    pub fn with_size(vocab: &Vocabulary, size: usize) -> Self {
        assert!(!vocab.is_empty());
        assert!(size > 0);
        let weight = |i: usize| (vocab.count(i) as f64).powf(UNIGRAM_POWER);
        let train_words_pow = (0..vocab.len()).map(weight).sum::<f64>();

        let mut table = Vec::with_capacity(size);
        let mut i = 0;
        let mut d1 = weight(i) / train_words_pow;
        for a in 0..size {
            table.push(i as u32);
            if (a as f64 / size as f64) > d1 && i + 1 < vocab.len() {
                i += 1;
                d1 += weight(i) / train_words_pow;
            }
        }
        UnigramTable { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Map a uniformly random number to a token id.
    pub fn sample(&self, r: u64) -> usize {
        self.table[((r >> 16) % self.table.len() as u64) as usize] as usize
    }
}

/// Probability of keeping one occurrence of a token seen `count` times out of
/// `total` when subsampling with `threshold`: `sqrt(threshold / (count / total))`,
/// clamped to 1. The probability of skipping it is the complement.
pub fn keep_probability(count: u64, total: u64, threshold: real) -> real {
    if threshold <= 0.0 || count == 0 || total == 0 {
        return 1.0;
    }
    let ratio = count as f64 / total as f64;
    ((threshold as f64 / ratio).sqrt().min(1.0)) as real
}
