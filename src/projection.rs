//! 2-D t-SNE projection of word vectors, for plotting.
//!
//! This is exact t-SNE: every pair of points is considered on every
//! iteration, so time and memory grow with the square of the number of
//! vectors. Project a few thousand rows at most (see `fit_rows`).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::error::IoContext;
use crate::store::VectorStore;
use crate::{real, Error, Result};

const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_TRIES: usize = 50;
const EARLY_EXAGGERATION: f64 = 12.0;
const EXAGGERATION_ITERATIONS: usize = 250;
const INITIAL_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_GAIN: f64 = 0.01;
const MIN_PROBABILITY: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Tsne {
    perplexity: f64,
    iterations: usize,
    learning_rate: f64,
    seed: Option<u64>,
}

/// 2-D coordinates for a list of tokens.
#[derive(Debug, Clone)]
pub struct Projection {
    pub tokens: Vec<String>,
    /// `coords.row(i)` is the point for `tokens[i]`; shape `(tokens.len(), 2)`.
    pub coords: Array2<real>,
    /// KL divergence between the input and output neighbour distributions
    /// after the last iteration.
    pub kl_divergence: real,
}

impl Default for Tsne {
    fn default() -> Self {
        Tsne {
            perplexity: 50.0,
            iterations: 1000,
            learning_rate: 200.0,
            seed: None,
        }
    }
}

impl Tsne {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective number of neighbours each point keeps close. Lowered to
    /// `(n - 1) / 3` when there are too few points.
    pub fn perplexity(mut self, perplexity: f64) -> Self {
        self.perplexity = perplexity;
        self
    }

    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.perplexity.is_finite() && self.perplexity > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "perplexity must be positive, got {}",
                self.perplexity
            )));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("t-SNE needs at least one iteration".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "t-SNE learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }

    pub fn fit(&self, store: &VectorStore) -> Result<Projection> {
        let rows: Vec<usize> = (0..store.num_words()).collect();
        self.fit_rows(store, &rows)
    }

    pub fn fit_rows(&self, store: &VectorStore, rows: &[usize]) -> Result<Projection> {
        self.validate()?;
        let mut x = Array2::<f64>::zeros((rows.len(), store.size()));
        let mut tokens = Vec::with_capacity(rows.len());
        for (mut out, &r) in x.axis_iter_mut(Axis(0)).zip(rows) {
            if r >= store.num_words() {
                return Err(Error::DimensionMismatch {
                    expected: store.num_words(),
                    found: r + 1,
                });
            }
            for (o, &v) in out.iter_mut().zip(&store[r]) {
                *o = f64::from(v);
            }
            tokens.push(store.word(r).to_string());
        }

        let n = x.nrows();
        if n < 2 {
            return Ok(Projection {
                tokens,
                coords: Array2::zeros((n, 2)),
                kl_divergence: 0.0,
            });
        }

        let max_perplexity = ((n - 1) as f64 / 3.0).max(1.0);
        let perplexity = if self.perplexity > max_perplexity {
            warn!(
                requested = self.perplexity,
                used = max_perplexity,
                points = n,
                "perplexity too large for the number of points"
            );
            max_perplexity
        } else {
            self.perplexity
        };

        let p = joint_probabilities(x.view(), perplexity);

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut y = Array2::<f64>::random_using((n, 2), StandardNormal, &mut rng) * 1e-4;
        let mut velocity = Array2::<f64>::zeros((n, 2));
        let mut gains = Array2::<f64>::ones((n, 2));

        for iter in 0..self.iterations {
            let (exaggeration, momentum) = if iter < EXAGGERATION_ITERATIONS {
                (EARLY_EXAGGERATION, INITIAL_MOMENTUM)
            } else {
                (1.0, FINAL_MOMENTUM)
            };
            let grad = gradient(p.view(), y.view(), exaggeration);

            // Grow the step size while the gradient keeps pointing the same way.
            Zip::from(&mut gains).and(&grad).and(&velocity).for_each(|g, &d, &v| {
                let grown = if (d > 0.0) != (v > 0.0) { *g + 0.2 } else { *g * 0.8 };
                *g = grown.max(MIN_GAIN);
            });
            let rate = self.learning_rate;
            Zip::from(&mut velocity).and(&gains).and(&grad).for_each(|v, &g, &d| {
                *v = momentum * *v - rate * g * d;
            });
            y += &velocity;
            if let Some(mean) = y.mean_axis(Axis(0)) {
                y -= &mean;
            }

            if (iter + 1) % 100 == 0 {
                debug!(iteration = iter + 1, kl = kl_divergence(p.view(), y.view()), "t-SNE");
            }
        }

        let kl = kl_divergence(p.view(), y.view());
        info!(points = n, perplexity, kl, "t-SNE finished");
        Ok(Projection {
            tokens,
            coords: y.mapv(|v| v as real),
            kl_divergence: kl as real,
        })
    }
}

/// Symmetric input affinities `p_ij`, summing to 1 over all pairs.
fn joint_probabilities(x: ArrayView2<f64>, perplexity: f64) -> Array2<f64> {
    let n = x.nrows();
    let dist = Array2::from_shape_fn((n, n), |(i, j)| {
        x.row(i).iter().zip(x.row(j)).map(|(a, b)| (a - b) * (a - b)).sum::<f64>()
    });

    let target = perplexity.ln();
    let mut p = Array2::<f64>::zeros((n, n));
    p.axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(dist.axis_iter(Axis(0)))
        .enumerate()
        .for_each(|(i, (out, d))| conditional_row(i, d, target, out));

    let joint = (&p + &p.t()) / (2.0 * n as f64);
    joint.mapv(|v| v.max(MIN_PROBABILITY))
}

/// Fills `out` with `p_{j|i}`: a Gaussian around point `i` whose width is
/// found by bisection so the distribution's entropy matches `target_entropy`.
fn conditional_row(i: usize, dist: ArrayView1<f64>, target_entropy: f64, mut out: ArrayViewMut1<f64>) {
    // Shifting by the nearest distance keeps exp() from underflowing and
    // leaves the normalized row unchanged.
    let nearest = dist
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(_, &d)| d)
        .fold(f64::INFINITY, f64::min);

    let mut beta = 1.0;
    let mut lo = f64::NEG_INFINITY;
    let mut hi = f64::INFINITY;
    for _ in 0..PERPLEXITY_TRIES {
        let mut sum = 0.0;
        let mut weighted = 0.0;
        for (j, (o, &d)) in out.iter_mut().zip(dist.iter()).enumerate() {
            if j == i {
                *o = 0.0;
                continue;
            }
            let d = d - nearest;
            let e = (-d * beta).exp();
            *o = e;
            sum += e;
            weighted += d * e;
        }
        out.mapv_inplace(|v| v / sum);

        let entropy = sum.ln() + beta * weighted / sum;
        let diff = entropy - target_entropy;
        if diff.abs() < PERPLEXITY_TOLERANCE {
            break;
        }
        if diff > 0.0 {
            lo = beta;
            beta = if hi.is_infinite() { beta * 2.0 } else { (beta + hi) / 2.0 };
        } else {
            hi = beta;
            beta = if lo.is_infinite() { beta / 2.0 } else { (beta + lo) / 2.0 };
        }
    }
}

/// Student-t kernel `1 / (1 + |y_i - y_j|²)`, zero on the diagonal.
fn kernel(y: ArrayView2<f64>) -> Array2<f64> {
    let n = y.nrows();
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            0.0
        } else {
            let dx = y[[i, 0]] - y[[j, 0]];
            let dy = y[[i, 1]] - y[[j, 1]];
            1.0 / (1.0 + dx * dx + dy * dy)
        }
    })
}

fn gradient(p: ArrayView2<f64>, y: ArrayView2<f64>, exaggeration: f64) -> Array2<f64> {
    let n = y.nrows();
    let num = kernel(y);
    let total = num.sum();
    let mut grad = Array2::<f64>::zeros((n, 2));
    grad.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut g)| {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let q = num[[i, j]] / total;
                let mult = 4.0 * (exaggeration * p[[i, j]] - q) * num[[i, j]];
                g[0] += mult * (y[[i, 0]] - y[[j, 0]]);
                g[1] += mult * (y[[i, 1]] - y[[j, 1]]);
            }
        });
    grad
}

fn kl_divergence(p: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
    let num = kernel(y);
    let total = num.sum();
    let mut kl = 0.0;
    for ((i, j), &pij) in p.indexed_iter() {
        if i != j {
            let q = (num[[i, j]] / total).max(MIN_PROBABILITY);
            kl += pij * (pij / q).ln();
        }
    }
    kl
}

impl Projection {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn point(&self, i: usize) -> (real, real) {
        (self.coords[[i, 0]], self.coords[[i, 1]])
    }

    /// Writes `token x y` lines.
    pub fn write_to<W: Write>(&self, fo: &mut W) -> Result<()> {
        for (i, token) in self.tokens.iter().enumerate() {
            let (x, y) = self.point(i);
            writeln!(fo, "{token} {x} {y}").io_context("error writing projection")?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut fo = BufWriter::new(File::create(path).io_context("error creating output file")?);
        self.write_to(&mut fo)?;
        fo.flush().io_context("error writing projection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> VectorStore {
        let mut words = Vec::new();
        let mut vecs = Vec::new();
        for (prefix, center) in [("a", 0.0), ("b", 20.0)] {
            for k in 0..6 {
                words.push(format!("{prefix}{k}"));
                for d in 0..4 {
                    vecs.push(center + ((k * 7 + d * 3) % 5) as real * 0.1);
                }
            }
        }
        VectorStore::new(words, 4, vecs).unwrap()
    }

    fn dist(p: (real, real), q: (real, real)) -> real {
        ((p.0 - q.0).powi(2) + (p.1 - q.1).powi(2)).sqrt()
    }

    #[test]
    fn conditional_row_hits_perplexity() {
        let dist = array![0.0, 1.0, 4.0, 16.0, 49.0];
        let mut out = Array1::<f64>::zeros(5);
        conditional_row(0, dist.view(), 2.0f64.ln(), out.view_mut());
        assert_eq!(out[0], 0.0);
        assert!((out.sum() - 1.0).abs() < 1e-9);
        let entropy: f64 = out.iter().filter(|&&p| p > 0.0).map(|&p| -p * p.ln()).sum();
        assert!((entropy - 2.0f64.ln()).abs() < 1e-4);
    }

    #[test]
    fn joint_probabilities_are_symmetric() {
        let x = array![[0.0], [1.0], [2.0], [4.0], [7.0]];
        let p = joint_probabilities(x.view(), 2.0);
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert_eq!(p, p.t());
    }

    #[test]
    fn tiny_inputs() {
        let store = blobs();
        let t = Tsne::new().seed(Some(1));
        let none = t.fit_rows(&store, &[]).unwrap();
        assert!(none.is_empty());
        assert_eq!(none.coords.dim(), (0, 2));
        let one = t.fit_rows(&store, &[3]).unwrap();
        assert_eq!(one.tokens, ["a3"]);
        assert_eq!(one.point(0), (0.0, 0.0));
    }

    #[test]
    fn seeded_runs_agree() {
        let store = blobs();
        let t = Tsne::new().iterations(300).seed(Some(9));
        let a = t.fit(&store).unwrap();
        let b = t.fit(&store).unwrap();
        assert_eq!(a.coords, b.coords);
        assert!(a.coords.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn keeps_blobs_apart() {
        let store = blobs();
        let proj = Tsne::new().iterations(500).seed(Some(5)).fit(&store).unwrap();
        assert_eq!(proj.coords.dim(), (12, 2));

        let mut within: real = 0.0;
        let mut between = real::INFINITY;
        for i in 0..12 {
            for j in 0..12 {
                let d = dist(proj.point(i), proj.point(j));
                if (i < 6) == (j < 6) {
                    within = within.max(d);
                } else {
                    between = between.min(d);
                }
            }
        }
        assert!(within < between, "within {within}, between {between}");
    }

    #[test]
    fn rejects_bad_settings() {
        let store = blobs();
        assert!(Tsne::new().perplexity(0.0).fit(&store).is_err());
        assert!(Tsne::new().iterations(0).fit(&store).is_err());
        assert!(Tsne::new().learning_rate(f64::NAN).fit(&store).is_err());
    }

    #[test]
    fn output_lines() {
        let proj = Projection {
            tokens: vec!["x".to_string()],
            coords: array![[1.5, -2.0]],
            kl_divergence: 0.0,
        };
        let mut out = Vec::new();
        proj.write_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "x 1.5 -2\n");
    }
}
