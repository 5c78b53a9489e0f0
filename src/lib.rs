//! Train word embeddings with skip-gram or CBOW, then query the vector space:
//! nearest neighbours, vector arithmetic, k-means clustering and 2-D t-SNE
//! projection.
//!
//! The pipeline runs tokens → [`VocabBuilder`] → [`Vocabulary`] →
//! [`Trainer`] → [`VectorStore`] → {[`QueryEngine`], [`KMeans`], [`Tsne`]}.

pub mod cluster;
pub mod config;
pub mod corpus;
mod error;
pub mod huffman;
pub mod matrix;
pub mod model;
pub mod projection;
pub mod query;
pub mod rng;
pub mod sampling;
pub mod store;
pub mod train;
pub mod vocab;

pub use cluster::{ClusterAssignment, KMeans};
pub use config::{Architecture, TrainingConfig};
pub use corpus::Corpus;
pub use error::{Error, Result};
pub use model::Model;
pub use projection::{Projection, Tsne};
pub use query::{QueryEngine, Similarity};
pub use store::{StoreFormat, VectorStore};
pub use train::{ConvergenceWarning, Trainer, TrainingReport};
pub use vocab::{VocabBuilder, Vocabulary};

#[allow(non_camel_case_types)]
pub type real = f32; // Precision of float numbers

pub fn norm(v: &[real]) -> real {
    v.iter().copied().map(|e| e * e).sum::<real>().sqrt()
}

/// Scale `v` to unit length. A zero vector is left alone.
pub fn normalize(v: &mut [real]) {
    let len = norm(v);
    if len > 0.0 {
        for e in v {
            *e /= len;
        }
    }
}

pub fn dot(a: &[real], b: &[real]) -> real {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(&a, &b)| a * b).sum()
}
