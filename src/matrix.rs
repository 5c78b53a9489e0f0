//! Parameter matrices shared between training threads.
//!
//! Every element is an `AtomicU32` holding the bits of an `f32`, accessed with
//! `Ordering::Relaxed`. Workers read and update rows concurrently with no
//! locks at all. An `add` is a separate load and store, so two threads adding
//! to the same element at the same moment can lose one of the updates. SGD
//! tolerates that; what the atomics buy is that there is never a data race in
//! the Rust sense and never a torn value.

use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;

use crate::{real, Error, Result};

/// Alignment of matrix storage, in bytes.
const ALIGNMENT: usize = 128;

#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Not atomic as a whole: a concurrent `add` may be lost.
    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }
}

/// A dense `rows × cols` matrix of `Real`, row-major.
pub struct SharedMatrix {
    rows: usize,
    cols: usize,
    data: AlignedBox<[Real]>,
}

impl SharedMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows * cols;
        // Zero-length allocations are not allowed.
        let data = AlignedBox::slice_from_default(ALIGNMENT, len.max(1))
            .map_err(|_| Error::Allocation(len))?;
        Ok(SharedMatrix { rows, cols, data })
    }

    pub fn from_values(rows: usize, cols: usize, values: &[real]) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(Error::DimensionMismatch {
                expected: rows * cols,
                found: values.len(),
            });
        }
        let m = Self::zeros(rows, cols)?;
        for (cell, &v) in m.data.iter().zip(values) {
            cell.set(v);
        }
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[Real] {
        &self.data[i * self.cols..][..self.cols]
    }

    pub fn dot_row(&self, i: usize, v: &[real]) -> real {
        self.row(i)
            .iter()
            .zip(v)
            .map(|(a, &b)| a.get() * b)
            .sum()
    }

    /// `row(i) += scale * v`
    pub fn add_scaled(&self, i: usize, scale: real, v: &[real]) {
        for (a, &b) in self.row(i).iter().zip(v) {
            a.add(scale * b);
        }
    }

    pub fn copy_row(&self, i: usize, out: &mut [real]) {
        for (o, a) in out.iter_mut().zip(self.row(i)) {
            *o = a.get();
        }
    }

    pub fn row_is_finite(&self, i: usize) -> bool {
        self.row(i).iter().all(|a| a.get().is_finite())
    }

    /// Replace non-finite elements of row `i` with zero. Returns how many
    /// were replaced.
    pub fn clamp_row(&self, i: usize) -> usize {
        let mut n = 0;
        for a in self.row(i) {
            if !a.get().is_finite() {
                a.set(0.0);
                n += 1;
            }
        }
        n
    }

    /// A snapshot of the whole matrix.
    pub fn to_vec(&self) -> Vec<real> {
        self.data[..self.rows * self.cols]
            .iter()
            .map(Real::get)
            .collect()
    }
}
