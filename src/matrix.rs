//! Parameter matrices shared by all training threads.
//!
//! Training threads read and write the same rows with no locking. Every
//! element is a [`Real`], an `f32` stored in an `AtomicU32` and accessed
//! with `Relaxed` loads and stores: on mainstream hardware these are plain
//! memory operations, so concurrent `add`s can lose updates exactly as
//! unsynchronized floats would, but without undefined behavior. [`Updates::Exact`]
//! switches additions to a compare-and-swap loop for callers who want no
//! lost updates.

use std::sync::atomic::{AtomicU32, Ordering};

use aligned_box::AlignedBox;
use anyhow::{anyhow, Result};

use crate::real;
use crate::rng::Rng;

const ALIGNMENT: usize = 128;

#[derive(Default)]
#[repr(transparent)]
pub struct Real {
    bits: AtomicU32,
}

impl Real {
    pub fn new(value: real) -> Self {
        Real {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn get(&self) -> real {
        real::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: real) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Read-modify-write with no synchronization. A concurrent writer's
    /// update may be lost.
    pub fn add(&self, x: real) {
        let a = self.get();
        self.set(a + x);
    }

    /// Atomic addition; never loses an update.
    pub fn add_exact(&self, x: real) {
        let _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((real::from_bits(bits) + x).to_bits())
            });
    }
}

/// How shared parameters and counters are updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Updates {
    /// Plain load then store; concurrent updates can be lost.
    #[default]
    Racy,
    /// Compare-and-swap; slower under contention.
    Exact,
}

impl Updates {
    #[inline]
    pub fn add(self, cell: &Real, x: real) {
        match self {
            Updates::Racy => cell.add(x),
            Updates::Exact => cell.add_exact(x),
        }
    }
}

/// A dense `rows × cols` matrix stored row-major in one aligned allocation.
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: AlignedBox<[Real]>,
}

impl Matrix {
    /// A zero-filled matrix. Fails if the allocation fails.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| anyhow!("matrix size {rows} x {cols} overflows"))?;
        anyhow::ensure!(len > 0, "matrix size {rows} x {cols} is empty");
        let data = AlignedBox::<[Real]>::slice_from_default(ALIGNMENT, len)
            .map_err(|_| anyhow!("memory allocation failed for {rows} x {cols} matrix"))?;
        Ok(Matrix { rows, cols, data })
    }

    /// A matrix with entries uniform in `[-0.5, 0.5) / cols`, drawn from `rng`
    /// in row-major order.
    pub fn random(rows: usize, cols: usize, rng: &mut Rng) -> Result<Self> {
        let m = Matrix::zeros(rows, cols)?;
        for cell in m.data.iter() {
            cell.set((rng.rand_real() - 0.5) / cols as real);
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

    /// A snapshot of row `i`.
    pub fn row_values(&self, i: usize) -> Vec<real> {
        self.row(i).iter().map(Real::get).collect()
    }

    /// A snapshot of the whole matrix, row-major.
    pub fn to_vec(&self) -> Vec<real> {
        self.data.iter().map(Real::get).collect()
    }
}

pub fn dot(a: &[Real], b: &[Real]) -> real {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(a, b)| a.get() * b.get()).sum()
}

pub fn dot_values(a: &[real], b: &[Real]) -> real {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&a, b)| a * b.get()).sum()
}
