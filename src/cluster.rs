//! K-means clustering of word vectors.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::prelude::*;
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::IoContext;
use crate::store::VectorStore;
use crate::{real, Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    centers: usize,
    max_iterations: usize,
    seed: Option<u64>,
}

/// The result of a k-means run: a cluster id for each token.
#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub tokens: Vec<String>,
    /// `labels[i]` is the cluster of `tokens[i]`.
    pub labels: Vec<usize>,
    /// One row per cluster.
    pub centroids: Array2<real>,
    pub iterations: usize,
    /// False if `max_iterations` ran out while assignments were still moving.
    pub converged: bool,
}

impl KMeans {
    pub fn new(centers: usize) -> Self {
        KMeans {
            centers,
            max_iterations: 100,
            seed: None,
        }
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    /// Seed for choosing the initial centers. Without one, every run differs.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn fit(&self, store: &VectorStore) -> Result<ClusterAssignment> {
        let data = ArrayView2::from_shape((store.num_words(), store.size()), store.embeddings())
            .map_err(|_| Error::DimensionMismatch {
                expected: store.num_words() * store.size(),
                found: store.embeddings().len(),
            })?;
        self.fit_array(data, store.words().to_vec())
    }

    /// Clusters only the given rows of `store`.
    pub fn fit_rows(&self, store: &VectorStore, rows: &[usize]) -> Result<ClusterAssignment> {
        let mut data = Array2::<real>::zeros((rows.len(), store.size()));
        let mut tokens = Vec::with_capacity(rows.len());
        for (mut out, &r) in data.axis_iter_mut(Axis(0)).zip(rows) {
            if r >= store.num_words() {
                return Err(Error::DimensionMismatch {
                    expected: store.num_words(),
                    found: r + 1,
                });
            }
            out.assign(&ArrayView1::from(&store[r]));
            tokens.push(store.word(r).to_string());
        }
        self.fit_array(data.view(), tokens)
    }

    fn fit_array(&self, data: ArrayView2<real>, tokens: Vec<String>) -> Result<ClusterAssignment> {
        let n = data.nrows();
        if self.centers == 0 {
            return Err(Error::InvalidConfig("k-means needs at least one center".to_string()));
        }
        if self.centers > n {
            return Err(Error::InvalidConfig(format!(
                "cannot make {} clusters from {n} vectors",
                self.centers
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig("k-means max_iterations must be at least 1".to_string()));
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let initial = rand::seq::index::sample(&mut rng, n, self.centers).into_vec();
        let mut centroids = data.select(Axis(0), &initial);

        let mut labels = assign(data, centroids.view());
        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.max_iterations {
            iterations += 1;
            update_centroids(data, &labels, &mut centroids);
            let next = assign(data, centroids.view());
            let moved = labels.iter().zip(&next).filter(|(a, b)| a != b).count();
            labels = next;
            debug!(iteration = iterations, moved, "k-means");
            if moved == 0 {
                converged = true;
                break;
            }
        }

        if converged {
            info!(clusters = self.centers, vectors = n, iterations, "k-means converged");
        } else {
            warn!(clusters = self.centers, iterations, "k-means stopped before converging");
        }
        Ok(ClusterAssignment {
            tokens,
            labels,
            centroids,
            iterations,
            converged,
        })
    }
}

/// Index of the nearest centroid (squared Euclidean distance) for each row.
/// Ties go to the lower cluster id.
fn assign(data: ArrayView2<real>, centroids: ArrayView2<real>) -> Vec<usize> {
    data.axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            centroids
                .axis_iter(Axis(0))
                .enumerate()
                .min_by_key(|(k, c)| {
                    let d: real = row.iter().zip(c.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                    (OrderedFloat(d), *k)
                })
                .map_or(0, |(k, _)| k)
        })
        .collect()
}

/// Moves each centroid to the mean of its members. A cluster that lost all
/// its members keeps its previous centroid.
fn update_centroids(data: ArrayView2<real>, labels: &[usize], centroids: &mut Array2<real>) {
    let mut sums = Array2::<real>::zeros(centroids.raw_dim());
    let mut counts = vec![0usize; centroids.nrows()];
    for (row, &k) in data.axis_iter(Axis(0)).zip(labels) {
        let mut sum = sums.row_mut(k);
        sum += &row;
        counts[k] += 1;
    }
    for (k, &count) in counts.iter().enumerate() {
        if count > 0 {
            let mean = &sums.row(k) / count as real;
            centroids.row_mut(k).assign(&mean);
        }
    }
}

impl ClusterAssignment {
    pub fn num_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn cluster_of(&self, token: &str) -> Option<usize> {
        self.tokens.iter().position(|t| t == token).map(|i| self.labels[i])
    }

    /// The tokens in cluster `k`, in input order.
    pub fn members(&self, k: usize) -> impl Iterator<Item = &str> + '_ {
        self.tokens
            .iter()
            .zip(&self.labels)
            .filter(move |(_, label)| **label == k)
            .map(|(t, _)| t.as_str())
    }

    /// Writes `token cluster` lines.
    pub fn write_to<W: Write>(&self, fo: &mut W) -> Result<()> {
        for (token, label) in self.tokens.iter().zip(&self.labels) {
            writeln!(fo, "{token} {label}").io_context("error writing k-means classes to output file")?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut fo = BufWriter::new(File::create(path).io_context("error creating output file")?);
        self.write_to(&mut fo)?;
        fo.flush().io_context("error writing k-means classes to output file")
    }
}
