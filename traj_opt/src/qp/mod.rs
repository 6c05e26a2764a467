//! # Quadratic programs
//!
//! The optimiser talks to its convex solver through a fixed numeric
//! contract:
//!
//! ```text
//! minimise    1/2 z' P z + q' z
//! subject to  l <= A z <= u
//! ```
//!
//! with `P` and `A` sparse. Rows with `l == u` are equalities, infinite bounds
//! leave that side of a row open.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod builder;
pub mod clarabel_backend;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;

// Internal
pub use builder::{block_diag, from_dense, kron_identity, BlockBuilder};
pub use clarabel_backend::{ClarabelBackend, ClarabelParams};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A sparse quadratic program.
#[derive(Debug, Clone)]
pub struct QpProblem {
    /// Symmetric positive semi-definite cost Hessian, `n x n`
    pub p: CscMatrix<f64>,

    /// Linear cost term, length `n`
    pub q: DVector<f64>,

    /// Constraint matrix, `k x n`
    pub a: CscMatrix<f64>,

    /// Lower constraint bounds, length `k`
    pub l: DVector<f64>,

    /// Upper constraint bounds, length `k`
    pub u: DVector<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Reasons a QP backend could not produce a solution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QpError {
    #[error("The problem is malformed: {0}")]
    InvalidProblem(String),

    #[error("The problem is primal infeasible")]
    Infeasible,

    #[error("The problem is unbounded (dual infeasible)")]
    Unbounded,

    #[error("The solver reached its iteration limit")]
    IterationLimit,

    #[error("The solver reached its time limit")]
    Timeout,

    #[error("Numerical failure in the solver: {0}")]
    Numerical(String),

    #[error("Could not set up the solver: {0}")]
    Setup(String),

    #[error("The solver returned a solution of length {found}, expected {expected}")]
    SolutionSize { expected: usize, found: usize },
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A convex QP solver.
pub trait QpBackend {
    /// Solve the problem, returning the primal solution.
    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpError>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<B: QpBackend + ?Sized> QpBackend for Box<B> {
    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpError> {
        (**self).solve(problem)
    }
}

impl QpProblem {
    /// Number of decision variables.
    pub fn num_vars(&self) -> usize {
        self.q.len()
    }

    /// Number of constraint rows.
    pub fn num_constraints(&self) -> usize {
        self.l.len()
    }

    /// Check the shapes of every member and that `l <= u`.
    pub fn validate(&self) -> Result<(), QpError> {
        let n = self.num_vars();
        let k = self.num_constraints();

        if self.p.nrows() != n || self.p.ncols() != n {
            return Err(QpError::InvalidProblem(format!(
                "P is {}x{} but there are {} variables",
                self.p.nrows(),
                self.p.ncols(),
                n
            )));
        }
        if self.a.nrows() != k || self.a.ncols() != n {
            return Err(QpError::InvalidProblem(format!(
                "A is {}x{}, expected {}x{}",
                self.a.nrows(),
                self.a.ncols(),
                k,
                n
            )));
        }
        if self.u.len() != k {
            return Err(QpError::InvalidProblem(format!(
                "l has {} rows but u has {}",
                k,
                self.u.len()
            )));
        }

        if let Some(row) = self
            .l
            .iter()
            .zip(self.u.iter())
            .position(|(l, u)| l.is_nan() || u.is_nan() || l > u)
        {
            return Err(QpError::InvalidProblem(format!(
                "row {} has bounds [{}, {}]",
                row, self.l[row], self.u[row]
            )));
        }

        if self.q.iter().any(|v| !v.is_finite()) {
            return Err(QpError::InvalidProblem("q is not finite".into()));
        }

        Ok(())
    }

    /// Objective value `1/2 z' P z + q' z`.
    pub fn objective(&self, z: &DVector<f64>) -> f64 {
        let mut pz = DVector::zeros(z.len());
        for (i, j, v) in self.p.triplet_iter() {
            pz[i] += v * z[j];
        }
        0.5 * z.dot(&pz) + self.q.dot(z)
    }
}
