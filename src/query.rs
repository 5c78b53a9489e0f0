//! Similarity queries over a [`VectorStore`].
//!
//! Every search is exact: the query is compared with every candidate row.
//! Rows are scored in parallel with rayon.

use std::cmp::{Ordering, Reverse};

use ndarray::prelude::*;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::store::VectorStore;
use crate::{dot, norm, normalize, real, Error, Result};

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity<'a> {
    pub id: usize,
    pub token: &'a str,
    /// Cosine similarity, in `-1.0..=1.0`.
    pub score: real,
}

/// Higher score first; on a tie, the lower (more frequent) id first.
fn rank(a: &(usize, real), b: &(usize, real)) -> Ordering {
    (Reverse(OrderedFloat(a.1)), a.0).cmp(&(Reverse(OrderedFloat(b.1)), b.0))
}

pub fn cosine_similarity(a: &[real], b: &[real]) -> Result<real> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    let (na, nb) = (norm(a), norm(b));
    if na == 0.0 || nb == 0.0 {
        return Err(Error::ZeroVector);
    }
    Ok((dot(a, b) / (na * nb)).clamp(-1.0, 1.0))
}

#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    store: &'a VectorStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a VectorStore) -> Self {
        QueryEngine { store }
    }

    pub fn store(&self) -> &'a VectorStore {
        self.store
    }

    fn id(&self, token: &str) -> Result<usize> {
        self.store
            .lookup_word(token)
            .ok_or_else(|| Error::UnknownToken(token.to_string()))
    }

    pub fn vector_of(&self, token: &str) -> Result<&'a [real]> {
        let i = self.id(token)?;
        Ok(&self.store[i])
    }

    /// Weighted sum of the tokens' vectors. Each weight defaults to 1.
    /// With `unit_length`, the sum is scaled to length 1 (unless it is zero).
    pub fn compose<S: AsRef<str>>(
        &self,
        tokens: &[S],
        weights: Option<&[real]>,
        unit_length: bool,
    ) -> Result<Vec<real>> {
        if let Some(weights) = weights {
            if weights.len() != tokens.len() {
                return Err(Error::DimensionMismatch {
                    expected: tokens.len(),
                    found: weights.len(),
                });
            }
        }
        let mut vec = vec![0.0; self.store.size()];
        for (k, token) in tokens.iter().enumerate() {
            let w = weights.map_or(1.0, |w| w[k]);
            let row = self.vector_of(token.as_ref())?;
            for (v, r) in vec.iter_mut().zip(row) {
                *v += w * r;
            }
        }
        if unit_length {
            normalize(&mut vec);
        }
        Ok(vec)
    }

    pub fn cosine_similarity(&self, a: &[real], b: &[real]) -> Result<real> {
        cosine_similarity(a, b)
    }

    /// Cosine similarity of two tokens.
    pub fn similarity(&self, a: &str, b: &str) -> Result<real> {
        cosine_similarity(self.vector_of(a)?, self.vector_of(b)?)
    }

    /// The `n` rows most similar to `query`. With `exclude_self`, rows equal to
    /// `query` are left out. Rows of zero length are never returned.
    pub fn nearest_to(&self, query: &[real], n: usize, exclude_self: bool) -> Result<Vec<Similarity<'a>>> {
        self.search(query, n, None, |i| exclude_self && &self.store[i] == query)
    }

    /// Like `nearest_to`, but only rows in `rows` are candidates.
    pub fn nearest_among(&self, query: &[real], n: usize, rows: &[usize]) -> Result<Vec<Similarity<'a>>> {
        self.search(query, n, Some(rows), |_| false)
    }

    /// Neighbours of the sum of `tokens`, not counting the tokens themselves.
    pub fn nearest_to_tokens<S: AsRef<str>>(&self, tokens: &[S], n: usize) -> Result<Vec<Similarity<'a>>> {
        let ids = tokens
            .iter()
            .map(|t| self.id(t.as_ref()))
            .collect::<Result<Vec<usize>>>()?;
        let query = self.compose(tokens, None, true)?;
        self.search(&query, n, None, |i| ids.contains(&i))
    }

    /// Answers "a is to b as c is to ?" by searching near `b - a + c`.
    pub fn analogy(&self, a: &str, b: &str, c: &str, n: usize) -> Result<Vec<Similarity<'a>>> {
        let ids = [self.id(a)?, self.id(b)?, self.id(c)?];
        let query = self.compose(&[a, b, c], Some(&[-1.0, 1.0, 1.0]), true)?;
        self.search(&query, n, None, |i| ids.contains(&i))
    }

    fn search<F>(
        &self,
        query: &[real],
        n: usize,
        rows: Option<&[usize]>,
        exclude: F,
    ) -> Result<Vec<Similarity<'a>>>
    where
        F: Fn(usize) -> bool + Sync,
    {
        let store = self.store;
        if query.len() != store.size() {
            return Err(Error::DimensionMismatch {
                expected: store.size(),
                found: query.len(),
            });
        }
        let qnorm = norm(query);
        if qnorm == 0.0 {
            return Err(Error::ZeroVector);
        }

        let score = |i: usize| -> Option<(usize, real)> {
            let rnorm = store.norm(i);
            if rnorm == 0.0 || exclude(i) {
                return None;
            }
            Some((i, (dot(query, &store[i]) / (qnorm * rnorm)).clamp(-1.0, 1.0)))
        };
        let mut best: Vec<(usize, real)> = match rows {
            None => (0..store.num_words()).into_par_iter().filter_map(score).collect(),
            Some(rows) => {
                if let Some(&bad) = rows.iter().find(|&&i| i >= store.num_words()) {
                    return Err(Error::DimensionMismatch {
                        expected: store.num_words(),
                        found: bad + 1,
                    });
                }
                rows.par_iter().copied().filter_map(score).collect()
            }
        };

        if n < best.len() {
            if n == 0 {
                return Ok(vec![]);
            }
            best.select_nth_unstable_by(n - 1, rank);
            best.truncate(n);
        }
        best.sort_unstable_by(rank);
        Ok(best
            .into_iter()
            .map(|(id, score)| Similarity {
                id,
                token: store.word(id),
                score,
            })
            .collect())
    }

    /// Pairwise cosine similarities, `rows.len() × cols.len()`.
    pub fn similarity_matrix<S: AsRef<str>>(&self, rows: &[S], cols: &[S]) -> Result<Array2<real>> {
        let row_ids = self.unit_rows(rows)?;
        let col_ids = self.unit_rows(cols)?;
        let mut out = Array2::<real>::zeros((row_ids.len(), col_ids.len()));
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(row_ids.par_iter())
            .for_each(|(mut out_row, &r)| {
                for (o, &c) in out_row.iter_mut().zip(&col_ids) {
                    let s = dot(&self.store[r], &self.store[c]) / (self.store.norm(r) * self.store.norm(c));
                    *o = s.clamp(-1.0, 1.0);
                }
            });
        Ok(out)
    }

    /// Ids for `tokens`, all of which must exist and have nonzero length.
    fn unit_rows<S: AsRef<str>>(&self, tokens: &[S]) -> Result<Vec<usize>> {
        tokens
            .iter()
            .map(|t| {
                let i = self.id(t.as_ref())?;
                if self.store.norm(i) == 0.0 {
                    Err(Error::ZeroVector)
                } else {
                    Ok(i)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VectorStore {
        VectorStore::new(
            ["king", "queen", "man", "woman", "zero", "apple"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            3,
            vec![
                1.0, 1.0, 0.0, // king
                1.0, 0.0, 1.0, // queen
                0.0, 1.0, 0.0, // man
                0.0, 0.0, 1.0, // woman
                0.0, 0.0, 0.0, // zero
                -1.0, 0.2, 0.1, // apple
            ],
        )
        .unwrap()
    }

    #[test]
    fn self_similarity_is_one() {
        let v = [0.3, -2.0, 7.5];
        assert!((cosine_similarity(&v, &v).unwrap() - 1.0).abs() < 1e-6);
        assert!(matches!(cosine_similarity(&v, &[0.0; 3]), Err(Error::ZeroVector)));
        assert!(matches!(
            cosine_similarity(&v, &[1.0]),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn unknown_token() {
        let s = store();
        let q = QueryEngine::new(&s);
        match q.vector_of("prince") {
            Err(Error::UnknownToken(t)) => assert_eq!(t, "prince"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn compose_weights() {
        let s = store();
        let q = QueryEngine::new(&s);
        let v = q.compose(&["king", "man"], Some(&[1.0, -1.0]), false).unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.0]);
        let v = q.compose(&["man", "woman"], None, true).unwrap();
        let h = 0.5f32.sqrt();
        assert!((v[1] - h).abs() < 1e-6 && (v[2] - h).abs() < 1e-6);
        assert!(q.compose(&["man"], Some(&[1.0, 2.0]), false).is_err());
    }

    #[test]
    fn nearest_sorted_and_bounded() {
        let s = store();
        let q = QueryEngine::new(&s);
        let hits = q.nearest_to(&[1.0, 0.5, 0.5], 3, true).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(hits.iter().all(|h| h.token != "zero"));

        let all = q.nearest_to(&[1.0, 0.5, 0.5], 100, true).unwrap();
        assert_eq!(all.len(), 5);
        assert!(q.nearest_to(&[1.0, 0.5, 0.5], 0, true).unwrap().is_empty());
    }

    #[test]
    fn exclude_self() {
        let s = store();
        let q = QueryEngine::new(&s);
        let king = q.vector_of("king").unwrap();
        assert_eq!(q.nearest_to(king, 1, false).unwrap()[0].token, "king");
        assert_ne!(q.nearest_to(king, 1, true).unwrap()[0].token, "king");
    }

    #[test]
    fn ties_prefer_lower_id() {
        // "man" and "woman" are equally similar to [0, 1, 1].
        let s = store();
        let q = QueryEngine::new(&s);
        let hits = q.nearest_among(&[0.0, 1.0, 1.0], 2, &[3, 2]).unwrap();
        assert_eq!(hits[0].score, hits[1].score);
        assert_eq!(hits[0].token, "man");
        assert_eq!(hits[1].token, "woman");
    }

    #[test]
    fn analogy_excludes_inputs() {
        let s = store();
        let q = QueryEngine::new(&s);
        let hits = q.analogy("man", "king", "woman", 1).unwrap();
        assert_eq!(hits[0].token, "queen");
        let hits = q.nearest_to_tokens(&["king"], 10).unwrap();
        assert!(hits.iter().all(|h| h.token != "king"));
    }

    #[test]
    fn zero_query() {
        let s = store();
        let q = QueryEngine::new(&s);
        assert!(matches!(q.nearest_to(&[0.0; 3], 3, true), Err(Error::ZeroVector)));
    }

    #[test]
    fn matrix() {
        let s = store();
        let q = QueryEngine::new(&s);
        let m = q.similarity_matrix(&["king", "man"], &["king", "queen", "woman"]).unwrap();
        assert_eq!(m.dim(), (2, 3));
        assert!((m[[0, 0]] - 1.0).abs() < 1e-6);
        assert!((m[[0, 1]] - 0.5).abs() < 1e-6);
        assert_eq!(m[[1, 2]], 0.0);
        assert!(matches!(q.similarity_matrix(&["zero"], &["king"]), Err(Error::ZeroVector)));
    }
}
