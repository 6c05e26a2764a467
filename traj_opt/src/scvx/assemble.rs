//! Assembly of the convex subproblem
//!
//! The decision vector stacks every state followed by every control:
//!
//! ```text
//! z = [x_0, ..., x_{H-1}, u_0, ..., u_{H-2}]
//! ```
//!
//! and the constraint rows are, in order:
//!
//! | Rows                 | Meaning                                      |
//! |----------------------|----------------------------------------------|
//! | `n`                  | `x_0 = r_0`                                  |
//! | `n (H - 1)`          | `x_{i+1} - A_i x_i - B_i u_i = c_i`          |
//! | `len(z)`             | state and control boxes                      |
//! | `k (H - 1)`          | linearised state constraints on `x_1..`      |
//!
//! `c_i` is the affine term of each linearisation, zero if it was dropped.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use nalgebra::{DMatrix, DVector};

// Internal
use super::linearise::Linearisation;
use crate::constraint::StateConstraint;
use crate::dynamics::{BoxBounds, ModelConfig};
use crate::qp::{block_diag, from_dense, kron_identity, BlockBuilder, QpProblem};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Position of each state and control within the decision vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub state_dim: usize,
    pub control_dim: usize,
    pub horizon: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Layout {
    pub fn new(state_dim: usize, control_dim: usize, horizon: usize) -> Self {
        Self {
            state_dim,
            control_dim,
            horizon,
        }
    }

    pub fn num_states(&self) -> usize {
        self.state_dim * self.horizon
    }

    pub fn num_controls(&self) -> usize {
        self.control_dim * (self.horizon - 1)
    }

    pub fn num_vars(&self) -> usize {
        self.num_states() + self.num_controls()
    }

    pub fn state_offset(&self, i: usize) -> usize {
        i * self.state_dim
    }

    pub fn control_offset(&self, i: usize) -> usize {
        self.num_states() + i * self.control_dim
    }

    pub fn states(&self, z: &DVector<f64>) -> Vec<DVector<f64>> {
        (0..self.horizon)
            .map(|i| z.rows(self.state_offset(i), self.state_dim).into_owned())
            .collect()
    }

    pub fn controls(&self, z: &DVector<f64>) -> Vec<DVector<f64>> {
        (0..(self.horizon - 1))
            .map(|i| z.rows(self.control_offset(i), self.control_dim).into_owned())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build the cost Hessian `blkdiag(I_{H-1} (x) Q, Qf, I_{H-1} (x) R)`.
pub fn cost_hessian(config: &ModelConfig, layout: &Layout) -> nalgebra_sparse::CscMatrix<f64> {
    block_diag(&[
        kron_identity(layout.horizon - 1, config.q()),
        from_dense(config.qf()),
        kron_identity(layout.horizon - 1, config.r()),
    ])
}

/// Build the linear cost term, `-Q r_i` on the stage states, `-Qf r_{H-1}` on
/// the final state and zero on the controls.
pub fn cost_linear(
    config: &ModelConfig,
    layout: &Layout,
    reference: &[DVector<f64>],
) -> DVector<f64> {
    let n = layout.state_dim;
    let mut q = DVector::zeros(layout.num_vars());

    for (i, r) in reference.iter().enumerate() {
        let weight = if i + 1 == layout.horizon {
            config.qf()
        } else {
            config.q()
        };
        q.rows_mut(layout.state_offset(i), n).copy_from(&(-(weight * r)));
    }

    q
}

/// Assemble the QP for one iteration.
///
/// `nominal` is the trajectory the dynamics and constraints were linearised
/// about. `lins` must hold one entry per control interval.
pub fn assemble(
    config: &ModelConfig,
    layout: &Layout,
    reference: &[DVector<f64>],
    nominal: &[DVector<f64>],
    lins: &[Linearisation],
    constraints: &[Box<dyn StateConstraint>],
) -> QpProblem {
    let n = layout.state_dim;
    let m = layout.control_dim;
    let num_vars = layout.num_vars();

    let num_eq = n * layout.horizon;
    let num_box = num_vars;
    let num_con = constraints.len() * (layout.horizon - 1);
    let num_rows = num_eq + num_box + num_con;

    let mut a = BlockBuilder::new(num_rows, num_vars);
    let mut l = DVector::zeros(num_rows);
    let mut u = DVector::zeros(num_rows);

    // Initial condition
    a.push_identity(0, 0, n, 1.0);
    l.rows_mut(0, n).copy_from(&reference[0]);
    u.rows_mut(0, n).copy_from(&reference[0]);

    // Linearised dynamics
    for (i, lin) in lins.iter().enumerate() {
        let row = n * (i + 1);
        a.push_identity(row, layout.state_offset(i + 1), n, 1.0);
        a.push_block(row, layout.state_offset(i), &lin.a, -1.0);
        a.push_block(row, layout.control_offset(i), &lin.b, -1.0);
        l.rows_mut(row, n).copy_from(&lin.c);
        u.rows_mut(row, n).copy_from(&lin.c);
    }

    // Boxes over the whole decision vector. The initial state is pinned by
    // its equality rows so it is left unbounded here.
    let row0 = num_eq;
    a.push_identity(row0, 0, num_vars, 1.0);
    l.rows_mut(row0, num_vars).fill(f64::NEG_INFINITY);
    u.rows_mut(row0, num_vars).fill(f64::INFINITY);

    if let Some(bounds) = config.state_bounds() {
        for i in 1..layout.horizon {
            set_box(&mut l, &mut u, row0 + layout.state_offset(i), bounds);
        }
    }
    if let Some(bounds) = config.control_bounds() {
        for i in 0..(layout.horizon - 1) {
            set_box(&mut l, &mut u, row0 + layout.control_offset(i), bounds);
        }
    }

    // Linearised state constraints
    let mut row = num_eq + num_box;
    for con in constraints {
        for i in 1..layout.horizon {
            let x_bar = &nominal[i];
            let grad = con.gradient(x_bar);
            let grad_row = DMatrix::from_row_slice(1, n, grad.as_slice());
            a.push_block(row, layout.state_offset(i), &grad_row, 1.0);
            l[row] = grad.dot(x_bar) - con.evaluate(x_bar);
            u[row] = f64::INFINITY;
            row += 1;
        }
    }

    trace!(
        "Assembled QP: {} vars ({} states, {} controls of dim {}), {} rows",
        num_vars,
        layout.horizon,
        layout.horizon - 1,
        m,
        num_rows
    );

    QpProblem {
        p: cost_hessian(config, layout),
        q: cost_linear(config, layout, reference),
        a: a.build(),
        l,
        u,
    }
}

fn set_box(l: &mut DVector<f64>, u: &mut DVector<f64>, offset: usize, bounds: &BoxBounds) {
    let dim = bounds.lower.len();
    l.rows_mut(offset, dim).copy_from(&bounds.lower);
    u.rows_mut(offset, dim).copy_from(&bounds.upper);
}
