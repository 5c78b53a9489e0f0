//! Training checkpoints, saved with bincode.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrainingConfig;
use crate::error::IoContext;
use crate::store::VectorStore;
use crate::vocab::{VocabWord, Vocabulary};
use crate::{real, Result};

/// A full snapshot of a trainer: unlike a [`VectorStore`], this keeps the
/// output matrices and the counts, which are needed to keep training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub config: TrainingConfig,
    pub vocab: Vec<VocabWord>,
    pub total_tokens: u64,
    pub embeddings: Vec<real>,
    /// Hierarchical softmax weights; empty if unused.
    pub weights: Vec<real>,
    /// Negative sampling output vectors; empty if unused.
    pub syn1neg: Vec<real>,
}

impl Model {
    pub fn load(filename: &Path) -> Result<Self> {
        let f = BufReader::new(File::open(filename).io_context("failed to open model file")?);
        let model: Model = bincode::deserialize_from(f)?;
        info!(path = %filename.display(), words = model.vocab.len(), "loaded checkpoint");
        Ok(model)
    }

    pub fn save(&self, filename: &Path) -> Result<()> {
        let mut fo = BufWriter::new(File::create(filename).io_context("error creating model file")?);
        bincode::serialize_into(&mut fo, self)?;
        fo.flush().io_context("error writing model file")?;
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.config.embedding_dimension
    }

    pub fn vocabulary(&self) -> Vocabulary {
        Vocabulary::from_words(self.vocab.clone(), self.total_tokens)
    }

    pub fn vectors(&self) -> Result<VectorStore> {
        VectorStore::new(
            self.vocab.iter().map(|vw| vw.word.clone()).collect(),
            self.size(),
            self.embeddings.clone(),
        )
    }
}
