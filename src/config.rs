use std::thread;

use serde::{Deserialize, Serialize};

use crate::{real, Error, Result};

/// Longest run of tokens handed to a worker as one unit. Context windows
/// never cross a sentence boundary.
pub const MAX_SENTENCE_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// Predict each context token from the center token.
    SkipGram,
    /// Predict the center token from the average of its context.
    Cbow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Embedding vector length.
    pub embedding_dimension: usize,

    /// Max skip length between words.
    pub window: usize,

    /// Discard tokens that appear less than this many times.
    pub min_count: u64,

    /// Number of negative examples per update (0 = not used).
    pub negative_samples: usize,

    pub use_hierarchical_softmax: bool,

    pub architecture: Architecture,

    pub epochs: usize,

    /// Starting learning rate; if unset, 0.025 for skip-gram and 0.05 for CBOW.
    pub initial_learning_rate: Option<real>,

    pub threads: usize,

    /// Tokens with higher relative frequency than this are randomly
    /// down-sampled; 0 disables subsampling. Useful range is (0, 1e-5).
    pub subsample_threshold: real,

    /// Seed for every random draw. `None` means a different run each time.
    pub seed: Option<u64>,

    /// If set, prune rare tokens during counting whenever the number of
    /// distinct tokens exceeds this.
    pub max_vocab_size: Option<usize>,

    pub max_sentence_length: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            embedding_dimension: 100,
            window: 5,
            min_count: 5,
            negative_samples: 5,
            use_hierarchical_softmax: false,
            architecture: Architecture::SkipGram,
            epochs: 5,
            initial_learning_rate: None,
            threads: thread::available_parallelism().map_or(1, |n| n.get()),
            subsample_threshold: 1e-3,
            seed: None,
            max_vocab_size: None,
            max_sentence_length: MAX_SENTENCE_LENGTH,
        }
    }
}

impl TrainingConfig {
    pub fn starting_alpha(&self) -> real {
        self.initial_learning_rate
            .unwrap_or(match self.architecture {
                Architecture::SkipGram => 0.025,
                Architecture::Cbow => 0.05,
            })
    }

    pub fn validate(&self) -> Result<()> {
        fn bad(msg: &str) -> Result<()> {
            Err(Error::InvalidConfig(msg.to_string()))
        }

        if self.embedding_dimension == 0 {
            return bad("embedding_dimension must be at least 1");
        }
        if self.window == 0 {
            return bad("window must be at least 1");
        }
        if self.epochs == 0 {
            return bad("epochs must be at least 1");
        }
        if self.threads == 0 {
            return bad("threads must be at least 1");
        }
        if self.max_sentence_length == 0 {
            return bad("max_sentence_length must be at least 1");
        }
        let alpha = self.starting_alpha();
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "initial_learning_rate must be positive, got {alpha}"
            )));
        }
        if !self.subsample_threshold.is_finite() || self.subsample_threshold < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "subsample_threshold must be non-negative, got {}",
                self.subsample_threshold
            )));
        }
        if self.negative_samples == 0 && !self.use_hierarchical_softmax {
            return bad("either negative_samples > 0 or use_hierarchical_softmax is required");
        }
        Ok(())
    }
}
