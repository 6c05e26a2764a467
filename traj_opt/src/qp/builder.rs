//! Sparse matrix builders
//!
//! The QP matrices are block structured: block diagonal Hessians, Kronecker
//! products with identities and banded dynamics rows. These builders place
//! dense blocks straight into triplet form so nothing of size
//! `horizon x horizon` is ever allocated densely.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Incremental builder for a sparse matrix made of dense blocks.
///
/// Entries pushed to the same position are summed. Exact zeros are skipped.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    coo: CooMatrix<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BlockBuilder {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self {
            coo: CooMatrix::new(nrows, ncols),
        }
    }

    pub fn nrows(&self) -> usize {
        self.coo.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.coo.ncols()
    }

    /// Add a single entry.
    ///
    /// # Panics
    /// - If the entry lies outside the matrix.
    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        if value != 0.0 {
            self.coo.push(row, col, value);
        }
    }

    /// Add `scale * block` with its top left corner at `(row, col)`.
    pub fn push_block(&mut self, row: usize, col: usize, block: &DMatrix<f64>, scale: f64) {
        for j in 0..block.ncols() {
            for i in 0..block.nrows() {
                self.push(row + i, col + j, scale * block[(i, j)]);
            }
        }
    }

    /// Add `scale * I_dim` with its top left corner at `(row, col)`.
    pub fn push_identity(&mut self, row: usize, col: usize, dim: usize, scale: f64) {
        for k in 0..dim {
            self.push(row + k, col + k, scale);
        }
    }

    /// Add a sparse block with its top left corner at `(row, col)`.
    pub fn push_sparse(&mut self, row: usize, col: usize, block: &CscMatrix<f64>) {
        for (i, j, v) in block.triplet_iter() {
            self.push(row + i, col + j, *v);
        }
    }

    pub fn build(&self) -> CscMatrix<f64> {
        CscMatrix::from(&self.coo)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a dense matrix to sparse, dropping zeros.
pub fn from_dense(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let mut builder = BlockBuilder::new(m.nrows(), m.ncols());
    builder.push_block(0, 0, m, 1.0);
    builder.build()
}

/// Block diagonal concatenation of sparse blocks.
pub fn block_diag(blocks: &[CscMatrix<f64>]) -> CscMatrix<f64> {
    let nrows = blocks.iter().map(|b| b.nrows()).sum();
    let ncols = blocks.iter().map(|b| b.ncols()).sum();

    let mut builder = BlockBuilder::new(nrows, ncols);
    let (mut row, mut col) = (0, 0);
    for block in blocks {
        builder.push_sparse(row, col, block);
        row += block.nrows();
        col += block.ncols();
    }

    builder.build()
}

/// Kronecker product `I_count (x) block`, i.e. `count` copies of `block` on
/// the diagonal.
pub fn kron_identity(count: usize, block: &DMatrix<f64>) -> CscMatrix<f64> {
    let (r, c) = block.shape();
    let mut builder = BlockBuilder::new(count * r, count * c);
    for k in 0..count {
        builder.push_block(k * r, k * c, block, 1.0);
    }
    builder.build()
}
