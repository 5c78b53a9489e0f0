//! The SGD training loop.
//!
//! Training runs `epochs` rounds. In each round the corpus is cut into one
//! contiguous slice per thread and every thread walks its slice sentence by
//! sentence, updating the shared parameter matrices in place (see
//! [`crate::matrix`] for what "shared" means here). With one thread and a
//! fixed seed, training is deterministic. With more threads, the order in
//! which updates land varies from run to run, and so do the results.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::config::{Architecture, TrainingConfig};
use crate::corpus::Corpus;
use crate::huffman::HuffmanTree;
use crate::matrix::SharedMatrix;
use crate::model::Model;
use crate::rng::Rng;
use crate::sampling::{keep_probability, UnigramTable};
use crate::store::VectorStore;
use crate::vocab::{VocabWord, Vocabulary};
use crate::{real, Error, Result};

const EXP_TABLE_SIZE: usize = 1000;
const MAX_EXP: real = 6.0;

/// How many words a worker processes between updates of the shared counter.
const PROGRESS_INTERVAL: u64 = 10_000;

/// The learning rate never drops below this fraction of its starting value.
const MIN_ALPHA_FRACTION: real = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixKind {
    Embeddings,
    HierarchicalSoftmax,
    NegativeSampling,
}

/// Something numerically wrong that training worked around.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceWarning {
    /// Updates whose dot product was not finite were dropped.
    SkippedUpdates { epoch: usize, count: u64 },
    /// A parameter row held NaN or infinite values; those were reset to zero.
    NonFiniteRow {
        epoch: usize,
        matrix: MatrixKind,
        row: usize,
        clamped: usize,
    },
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergenceWarning::SkippedUpdates { epoch, count } => {
                write!(f, "epoch {epoch}: skipped {count} updates with non-finite activations")
            }
            ConvergenceWarning::NonFiniteRow {
                epoch,
                matrix,
                row,
                clamped,
            } => write!(
                f,
                "epoch {epoch}: {matrix:?} row {row} had {clamped} non-finite values, reset to 0"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub epochs: usize,
    /// Tokens read by all workers over all epochs, including subsampled ones.
    pub words_processed: u64,
    /// Tokens that survived subsampling and took part in updates.
    pub words_trained: u64,
    pub elapsed: Duration,
    pub warnings: Vec<ConvergenceWarning>,
}

/// Owns the vocabulary-derived tables and the parameter matrices.
pub struct Trainer {
    config: TrainingConfig,
    vocab: Vocabulary,
    seed: u64,
    starting_alpha: real,
    /// Probability of keeping each token when subsampling.
    keep_prob: Vec<real>,
    exp_table: Vec<real>,
    tree: Option<HuffmanTree>,
    table: Option<UnigramTable>,
    /// The learned word-vectors.
    embeddings: SharedMatrix,
    /// Weights for hierarchical softmax predictors, one row per inner tree node.
    weights: Option<SharedMatrix>,
    /// Output vectors for negative sampling, one row per token.
    syn1neg: Option<SharedMatrix>,
    /// Words processed so far by all workers in this training run.
    word_count_actual: AtomicU64,
    words_trained: AtomicU64,
    skipped_updates: AtomicU64,
    /// `epochs * corpus tokens` for the current run.
    total_words: u64,
    progress: Option<ProgressBar>,
}

impl Trainer {
    pub fn new(config: TrainingConfig, vocab: Vocabulary) -> Result<Self> {
        config.validate()?;
        if vocab.is_empty() {
            return Err(Error::EmptyCorpus {
                min_count: config.min_count,
                distinct: 0,
            });
        }

        let exp_table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let e = ((i as real / EXP_TABLE_SIZE as real * 2.0 - 1.0) * MAX_EXP).exp(); // Precompute the exp() table
                e / (e + 1.0) // Precompute f(x) = x / (x + 1)
            })
            .collect();

        let vocab_size = vocab.len();
        let dim = config.embedding_dimension;
        let seed = config.seed.unwrap_or_else(rand::random);

        let tree = config.use_hierarchical_softmax.then(|| HuffmanTree::new(&vocab));
        let weights = match &tree {
            Some(tree) => Some(SharedMatrix::zeros(tree.num_inner_nodes(), dim)?),
            None => None,
        };
        let (table, syn1neg) = if config.negative_samples > 0 {
            (
                Some(UnigramTable::new(&vocab)),
                Some(SharedMatrix::zeros(vocab_size, dim)?),
            )
        } else {
            (None, None)
        };

        let embeddings = SharedMatrix::zeros(vocab_size, dim)?;
        let mut rng = Rng(seed);
        for a in 0..vocab_size {
            for cell in embeddings.row(a) {
                cell.set((rng.rand_real() - 0.5) / dim as real);
            }
        }

        let keep_prob = (0..vocab_size)
            .map(|i| keep_probability(vocab.count(i), vocab.total_tokens(), config.subsample_threshold))
            .collect();

        Ok(Trainer {
            starting_alpha: config.starting_alpha(),
            config,
            vocab,
            seed,
            keep_prob,
            exp_table,
            tree,
            table,
            embeddings,
            weights,
            syn1neg,
            word_count_actual: AtomicU64::new(0),
            words_trained: AtomicU64::new(0),
            skipped_updates: AtomicU64::new(0),
            total_words: 0,
            progress: None,
        })
    }

    /// Report progress to `bar` while training. Its length is set to the
    /// total number of words to process.
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Start from existing vectors instead of random ones. The store must
    /// have exactly this trainer's vocabulary, in the same order.
    pub fn with_initial_vectors(mut self, store: &VectorStore) -> Result<Self> {
        check_vocabulary(&self.vocab, store.words().iter().map(String::as_str), store.num_words())?;
        check_dimension(self.config.embedding_dimension, store.size())?;
        self.embeddings = SharedMatrix::from_values(self.vocab.len(), store.size(), store.embeddings())?;
        Ok(self)
    }

    /// Continue from a saved checkpoint: input vectors and whichever output
    /// matrices both the checkpoint and this configuration use.
    pub fn with_model(mut self, model: &Model) -> Result<Self> {
        check_vocabulary(
            &self.vocab,
            model.vocab.iter().map(|vw| vw.word.as_str()),
            model.vocab.len(),
        )?;
        let dim = self.config.embedding_dimension;
        check_dimension(dim, model.config.embedding_dimension)?;
        let vocab_size = self.vocab.len();
        self.embeddings = SharedMatrix::from_values(vocab_size, dim, &model.embeddings)?;
        if let Some(weights) = &self.weights {
            if !model.weights.is_empty() {
                // The tree is built from the current counts; the saved weights
                // only line up with it if the counts are the same.
                check_counts(&self.vocab, &model.vocab)?;
                self.weights = Some(SharedMatrix::from_values(weights.rows(), dim, &model.weights)?);
            }
        }
        if self.syn1neg.is_some() && !model.syn1neg.is_empty() {
            self.syn1neg = Some(SharedMatrix::from_values(vocab_size, dim, &model.syn1neg)?);
        }
        info!(vocab_size, "resuming from checkpoint");
        Ok(self)
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn train(&mut self, corpus: &Corpus) -> Result<TrainingReport> {
        self.train_with(corpus, |_epoch, _trainer| Ok(()))
    }

    /// Train, calling `after_epoch` with the 1-based epoch number after each
    /// epoch completes.
    pub fn train_with<F>(&mut self, corpus: &Corpus, mut after_epoch: F) -> Result<TrainingReport>
    where
        F: FnMut(usize, &Trainer) -> Result<()>,
    {
        let num_threads = self.config.threads;
        let num_epochs = self.config.epochs;
        self.total_words = num_epochs as u64 * corpus.num_tokens();
        self.word_count_actual.store(0, Ordering::Relaxed);
        self.words_trained.store(0, Ordering::Relaxed);
        if let Some(bar) = &self.progress {
            bar.set_length(self.total_words);
            bar.set_position(0);
        }
        info!(
            threads = num_threads,
            epochs = num_epochs,
            words = corpus.num_tokens(),
            architecture = ?self.config.architecture,
            "starting training"
        );

        let start = Instant::now();
        let mut warnings = vec![];
        for epoch in 0..num_epochs {
            self.skipped_updates.store(0, Ordering::Relaxed);
            let slices = corpus.slices(num_threads);
            thread::scope(|s| {
                let this: &Trainer = self;
                let threads = (0..num_threads)
                    .map(|id| {
                        // Rotate which slice each worker gets from one epoch to the next.
                        let slice = slices[(id + epoch) % num_threads];
                        s.spawn(move || this.train_model_thread(id, epoch, slice))
                    })
                    .collect::<Vec<_>>();
                for thread in threads {
                    if let Err(panic) = thread.join() {
                        std::panic::resume_unwind(panic);
                    }
                }
            });

            warnings.extend(self.check_finite(epoch));
            info!(
                epoch = epoch + 1,
                words = self.word_count_actual.load(Ordering::Relaxed),
                elapsed = ?start.elapsed(),
                "epoch complete"
            );
            after_epoch(epoch + 1, self)?;
        }
        if let Some(bar) = &self.progress {
            bar.finish();
        }

        Ok(TrainingReport {
            epochs: num_epochs,
            words_processed: self.word_count_actual.load(Ordering::Relaxed),
            words_trained: self.words_trained.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
            warnings,
        })
    }

    /// Reset non-finite parameters left by the epoch that just ended, so one
    /// bad row can't spread through the rest of training.
    fn check_finite(&self, epoch: usize) -> Vec<ConvergenceWarning> {
        let mut warnings = vec![];
        let skipped = self.skipped_updates.load(Ordering::Relaxed);
        if skipped > 0 {
            warnings.push(ConvergenceWarning::SkippedUpdates { epoch, count: skipped });
        }

        let matrices = [
            (MatrixKind::Embeddings, Some(&self.embeddings)),
            (MatrixKind::HierarchicalSoftmax, self.weights.as_ref()),
            (MatrixKind::NegativeSampling, self.syn1neg.as_ref()),
        ];
        for (matrix, m) in matrices {
            let Some(m) = m else { continue };
            for row in 0..m.rows() {
                if !m.row_is_finite(row) {
                    let clamped = m.clamp_row(row);
                    warnings.push(ConvergenceWarning::NonFiniteRow {
                        epoch,
                        matrix,
                        row,
                        clamped,
                    });
                }
            }
        }

        for w in &warnings {
            warn!("{w}");
        }
        warnings
    }

    /// Approximate the logistic function, 1 / (1 + e^-x).
    fn sigmoid(&self, x: real) -> real {
        if x >= MAX_EXP {
            1.0
        } else if x <= -MAX_EXP {
            0.0
        } else {
            self.exp_table
                [((x + MAX_EXP) * (EXP_TABLE_SIZE as real / MAX_EXP / 2.0)) as usize]
        }
    }

    /// Current learning rate, given the shared word counter.
    fn alpha(&self, word_count_actual: u64) -> real {
        let progress = word_count_actual as real / (self.total_words + 1) as real;
        self.starting_alpha * (1.0 - progress).max(MIN_ALPHA_FRACTION)
    }

    fn report_progress(&self, word_count: u64, last_word_count: &mut u64) -> real {
        let n = word_count - *last_word_count;
        let word_count_actual = self.word_count_actual.fetch_add(n, Ordering::Relaxed) + n;
        *last_word_count = word_count;

        let alpha = self.alpha(word_count_actual);
        if let Some(bar) = &self.progress {
            bar.set_position(word_count_actual);
            bar.set_message(format!("alpha {alpha:.6}"));
        }
        debug!(
            alpha,
            progress = word_count_actual as f64 / (self.total_words + 1) as f64,
            "training progress"
        );
        alpha
    }

    fn train_model_thread(&self, id: usize, epoch: usize, sentences: &[Vec<u32>]) {
        let dim = self.config.embedding_dimension;
        let window = self.config.window;

        let mut rng = Rng(self
            .seed
            .wrapping_add((id + epoch * self.config.threads) as u64 + 1));
        let mut alpha = self.alpha(self.word_count_actual.load(Ordering::Relaxed));
        let mut word_count: u64 = 0;
        let mut last_word_count: u64 = 0;
        let mut trained: u64 = 0;

        // `neu1` is the hidden layer: the input row, or the context average for CBOW.
        let mut neu1: Vec<real> = vec![0.0; dim];
        // `neu1e` accumulates the error to apply to the input row(s).
        let mut neu1e: Vec<real> = vec![0.0; dim];
        let mut sen: Vec<usize> = Vec::with_capacity(self.config.max_sentence_length);

        for sentence in sentences {
            word_count += sentence.len() as u64;

            // The subsampling randomly discards frequent words while keeping the ranking same
            sen.clear();
            for &word in sentence {
                let p = self.keep_prob[word as usize];
                if p < 1.0 && p < rng.rand_real() {
                    continue;
                }
                sen.push(word as usize);
            }
            trained += sen.len() as u64;

            for sentence_position in 0..sen.len() {
                // Effective window radius, uniform in 1..=window.
                let radius = window - rng.below(window);
                let start = sentence_position.saturating_sub(radius);
                let stop = (sentence_position + radius + 1).min(sen.len());

                match self.config.architecture {
                    Architecture::SkipGram => {
                        let word = sen[sentence_position];
                        for c in start..stop {
                            if c == sentence_position {
                                continue;
                            }
                            self.embeddings.copy_row(word, &mut neu1);
                            neu1e.fill(0.0);
                            self.learn(&neu1, &mut neu1e, sen[c], alpha, &mut rng);
                            // Learn weights input -> hidden
                            self.embeddings.add_scaled(word, 1.0, &neu1e);
                        }
                    }
                    Architecture::Cbow => {
                        // in -> hidden
                        neu1.fill(0.0);
                        let mut cw = 0;
                        for c in start..stop {
                            if c != sentence_position {
                                for (h, x) in neu1.iter_mut().zip(self.embeddings.row(sen[c])) {
                                    *h += x.get();
                                }
                                cw += 1;
                            }
                        }
                        if cw == 0 {
                            continue;
                        }
                        for h in &mut neu1 {
                            *h /= cw as real;
                        }
                        neu1e.fill(0.0);
                        self.learn(&neu1, &mut neu1e, sen[sentence_position], alpha, &mut rng);
                        // hidden -> in
                        for c in start..stop {
                            if c != sentence_position {
                                self.embeddings.add_scaled(sen[c], 1.0, &neu1e);
                            }
                        }
                    }
                }
            }

            if word_count - last_word_count > PROGRESS_INTERVAL {
                alpha = self.report_progress(word_count, &mut last_word_count);
            }
        }

        self.report_progress(word_count, &mut last_word_count);
        self.words_trained.fetch_add(trained, Ordering::Relaxed);
    }

    /// One prediction of `target` from the hidden layer `neu1`: update the
    /// output rows involved and add the hidden-layer error into `neu1e`.
    fn learn(&self, neu1: &[real], neu1e: &mut [real], target: usize, alpha: real, rng: &mut Rng) {
        let mut skipped = 0;

        // HIERARCHICAL SOFTMAX
        if let (Some(tree), Some(weights)) = (&self.tree, &self.weights) {
            for (&point, &code) in tree.points(target).iter().zip(tree.code(target)) {
                let l2 = point as usize;
                // Propagate hidden -> output
                let f = weights.dot_row(l2, neu1);
                if !f.is_finite() {
                    skipped += 1;
                    continue;
                }
                if f <= -MAX_EXP || f >= MAX_EXP {
                    continue;
                }
                let f = self.sigmoid(f);
                // 'g' is the gradient (d/df loss) multiplied by the learning rate
                let g = (1.0 - code as real - f) * alpha;
                // Propagate errors output -> hidden
                for (e, w) in neu1e.iter_mut().zip(weights.row(l2)) {
                    *e += g * w.get();
                }
                // Learn weights hidden -> output
                weights.add_scaled(l2, g, neu1);
            }
        }

        // NEGATIVE SAMPLING
        if let (Some(table), Some(syn1neg)) = (&self.table, &self.syn1neg) {
            for d in 0..=self.config.negative_samples {
                let sample;
                let label;
                if d == 0 {
                    sample = target;
                    label = 1.0;
                } else {
                    sample = table.sample(rng.rand_u64());
                    // A negative that happens to be the target is dropped, not redrawn.
                    if sample == target {
                        continue;
                    }
                    label = 0.0;
                }
                let f = syn1neg.dot_row(sample, neu1);
                if !f.is_finite() {
                    skipped += 1;
                    continue;
                }
                let g = (label - self.sigmoid(f)) * alpha;
                for (e, w) in neu1e.iter_mut().zip(syn1neg.row(sample)) {
                    *e += g * w.get();
                }
                syn1neg.add_scaled(sample, g, neu1);
            }
        }

        if skipped > 0 {
            self.skipped_updates.fetch_add(skipped, Ordering::Relaxed);
        }
    }

    /// The current input vectors, which are the trained embeddings.
    pub fn vectors(&self) -> Result<VectorStore> {
        VectorStore::from_vocabulary(
            &self.vocab,
            self.config.embedding_dimension,
            self.embeddings.to_vec(),
        )
    }

    /// Everything needed to resume training later.
    pub fn to_model(&self) -> Model {
        Model {
            config: self.config.clone(),
            vocab: self.vocab.words().to_vec(),
            total_tokens: self.vocab.total_tokens(),
            embeddings: self.embeddings.to_vec(),
            weights: self.weights.as_ref().map(SharedMatrix::to_vec).unwrap_or_default(),
            syn1neg: self.syn1neg.as_ref().map(SharedMatrix::to_vec).unwrap_or_default(),
        }
    }
}

fn check_vocabulary<'a>(
    expected: &Vocabulary,
    found: impl Iterator<Item = &'a str>,
    found_len: usize,
) -> Result<()> {
    if found_len != expected.len() {
        return Err(Error::VocabularyMismatch {
            expected: expected.len(),
            found: found_len,
            detail: String::new(),
        });
    }
    for (i, word) in found.enumerate() {
        if word != expected.word(i) {
            return Err(Error::VocabularyMismatch {
                expected: expected.len(),
                found: found_len,
                detail: format!(
                    " (token {i} is {word:?}, expected {:?})",
                    expected.word(i)
                ),
            });
        }
    }
    Ok(())
}

fn check_counts(expected: &Vocabulary, found: &[VocabWord]) -> Result<()> {
    for (i, vw) in found.iter().enumerate() {
        if vw.count != expected.count(i) {
            return Err(Error::VocabularyMismatch {
                expected: expected.len(),
                found: found.len(),
                detail: format!(
                    " (token {:?} has count {}, expected {})",
                    vw.word,
                    vw.count,
                    expected.count(i)
                ),
            });
        }
    }
    Ok(())
}

fn check_dimension(expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(Error::DimensionMismatch { expected, found });
    }
    Ok(())
}
