//! Clarabel QP backend
//!
//! Clarabel solves `min 1/2 z'Pz + q'z  s.t.  Az + s = b, s in K` with `P`
//! given as its upper triangle. Two-sided rows are split into cone rows:
//!
//! - `l == u` (finite): one zero-cone row `a'z = l`
//! - finite `u`: one non-negative-cone row `a'z <= u`
//! - finite `l`: one non-negative-cone row `-a'z <= -l`
//!
//! Infinite bounds produce no row at all.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::time::Instant;

use clarabel::algebra::CscMatrix as ClarabelCsc;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus,
    SupportedConeT::{self, NonnegativeConeT, ZeroConeT},
};
use log::{debug, trace};
use nalgebra::DVector;
use nalgebra_sparse::{CscMatrix, CsrMatrix};
use serde::{Deserialize, Serialize};

// Internal
use super::{BlockBuilder, QpBackend, QpError, QpProblem};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Settings passed through to Clarabel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarabelParams {
    /// Maximum number of interior point iterations per solve
    pub max_iter: u32,

    /// Wall clock limit for a single solve, unlimited if not set
    pub time_limit_s: Option<f64>,

    /// Feasibility tolerance
    pub tol_feas: f64,

    /// Absolute duality gap tolerance
    pub tol_gap_abs: f64,

    /// Relative duality gap tolerance
    pub tol_gap_rel: f64,

    /// Print Clarabel's own progress table to stdout
    pub verbose: bool,
}

/// QP backend using the Clarabel interior point solver.
#[derive(Debug, Clone, Default)]
pub struct ClarabelBackend {
    params: ClarabelParams,
}

/// The constraint rows of a problem in Clarabel's cone form.
struct ConeRows {
    a: ClarabelCsc<f64>,
    b: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for ClarabelParams {
    fn default() -> Self {
        Self {
            max_iter: 200,
            time_limit_s: None,
            tol_feas: 1e-8,
            tol_gap_abs: 1e-8,
            tol_gap_rel: 1e-8,
            verbose: false,
        }
    }
}

impl ClarabelBackend {
    pub fn new(params: ClarabelParams) -> Self {
        Self { params }
    }
}

impl QpBackend for ClarabelBackend {
    fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpError> {
        problem.validate()?;

        let start = Instant::now();

        let p = upper_triangle(&problem.p);
        let rows = cone_rows(problem);

        trace!(
            "Clarabel problem: {} vars, {} cone rows, {} nnz in P, {} nnz in A",
            problem.num_vars(),
            rows.b.len(),
            p.nzval.len(),
            rows.a.nzval.len()
        );

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.params.max_iter)
            .time_limit(self.params.time_limit_s.unwrap_or(f64::INFINITY))
            .tol_feas(self.params.tol_feas)
            .tol_gap_abs(self.params.tol_gap_abs)
            .tol_gap_rel(self.params.tol_gap_rel)
            .verbose(self.params.verbose)
            .build()
            .map_err(|e| QpError::Setup(e.to_string()))?;

        let mut solver = DefaultSolver::new(
            &p,
            problem.q.as_slice(),
            &rows.a,
            &rows.b,
            &rows.cones,
            settings,
        )
        .map_err(|e| QpError::Setup(format!("{:?}", e)))?;

        solver.solve();
        let solution = &solver.solution;

        debug!(
            "Clarabel finished with {:?} after {} iterations in {:.6} s",
            solution.status,
            solution.iterations,
            start.elapsed().as_secs_f64()
        );

        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {
                if solution.x.len() != problem.num_vars() {
                    return Err(QpError::SolutionSize {
                        expected: problem.num_vars(),
                        found: solution.x.len(),
                    });
                }
                Ok(DVector::from_column_slice(&solution.x))
            }
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                Err(QpError::Infeasible)
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                Err(QpError::Unbounded)
            }
            SolverStatus::MaxIterations => Err(QpError::IterationLimit),
            SolverStatus::MaxTime => Err(QpError::Timeout),
            ref status => Err(QpError::Numerical(format!("{:?}", status))),
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Upper triangle of a symmetric matrix in Clarabel's CSC format.
fn upper_triangle(m: &CscMatrix<f64>) -> ClarabelCsc<f64> {
    let mut colptr = Vec::with_capacity(m.ncols() + 1);
    let mut rowval = Vec::with_capacity(m.nnz());
    let mut nzval = Vec::with_capacity(m.nnz());

    colptr.push(0);
    for j in 0..m.ncols() {
        let col = m.col(j);
        for (&i, &v) in col.row_indices().iter().zip(col.values()) {
            if i <= j {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr.push(rowval.len());
    }

    ClarabelCsc::new(m.nrows(), m.ncols(), colptr, rowval, nzval)
}

/// Split `l <= Az <= u` into zero-cone rows followed by non-negative-cone
/// rows.
fn cone_rows(problem: &QpProblem) -> ConeRows {
    let csr = CsrMatrix::from(&problem.a);

    // (source row, sign, rhs)
    let mut eq = Vec::new();
    let mut ineq = Vec::new();

    for (i, (&l, &u)) in problem.l.iter().zip(problem.u.iter()).enumerate() {
        if l == u && l.is_finite() {
            eq.push((i, 1.0, l));
            continue;
        }
        if u.is_finite() {
            ineq.push((i, 1.0, u));
        }
        if l.is_finite() {
            ineq.push((i, -1.0, -l));
        }
    }

    let mut builder = BlockBuilder::new(eq.len() + ineq.len(), problem.num_vars());
    let mut b = Vec::with_capacity(eq.len() + ineq.len());
    for (k, &(i, sign, rhs)) in eq.iter().chain(ineq.iter()).enumerate() {
        let row = csr.row(i);
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            builder.push(k, j, sign * v);
        }
        b.push(rhs);
    }

    let mut cones = Vec::with_capacity(2);
    if !eq.is_empty() {
        cones.push(ZeroConeT(eq.len()));
    }
    if !ineq.is_empty() {
        cones.push(NonnegativeConeT(ineq.len()));
    }

    let a = builder.build();
    ConeRows {
        a: ClarabelCsc::new(
            a.nrows(),
            a.ncols(),
            a.col_offsets().to_vec(),
            a.row_indices().to_vec(),
            a.values().to_vec(),
        ),
        b,
        cones,
    }
}
