//! Error types.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No token occurred at least `min_count` times.
    #[error("empty corpus: none of {distinct} distinct tokens occurs at least {min_count} times")]
    EmptyCorpus { min_count: u64, distinct: usize },

    #[error("unknown token: {0:?}")]
    UnknownToken(String),

    /// Cosine similarity is undefined for a zero-length vector.
    #[error("zero vector: similarity is undefined")]
    ZeroVector,

    #[error("vocabulary mismatch: expected {expected} tokens, found {found}{detail}")]
    VocabularyMismatch {
        expected: usize,
        found: usize,
        detail: String,
    },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{context}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("bad input at line {line}: {message}")]
    Format { line: usize, message: String },

    #[error("error reading or writing model checkpoint")]
    Checkpoint(#[from] bincode::Error),

    #[error("failed to allocate a matrix of {0} elements")]
    Allocation(usize),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach a short description to an I/O error, like `anyhow::Context` does.
pub(crate) trait IoContext<T> {
    fn io_context(self, context: &'static str) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Io { context, source })
    }
}
