//! Sequential convex optimiser parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use crate::dynamics::ConfigError;
use crate::qp::ClarabelParams;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the sequential convex optimiser
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    /// Maximum number of linearise/solve/rollout iterations
    pub max_iters: usize,

    /// Relative improvement in the true cost below which the optimiser is
    /// considered to have stagnated
    pub rel_tol: f64,

    /// True cost at or below which the trajectory is accepted and the
    /// optimiser stops immediately
    pub abs_cost_tol: f64,

    /// If set the linearised dynamics keep the affine term
    /// `f(x_bar, u_bar) - A x_bar - B u_bar`, otherwise the subproblem uses
    /// `x_{i+1} = A_i x_i + B_i u_i` exactly.
    pub affine_remainder: bool,

    /// Violation of the state bounds allowed in the nonlinear rollout before
    /// an iterate is rejected
    pub bound_tol: f64,

    /// Settings for the QP solver
    pub solver: ClarabelParams,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            max_iters: 20,
            rel_tol: 1e-3,
            abs_cost_tol: 1e-9,
            affine_remainder: true,
            bound_tol: 1e-6,
            solver: ClarabelParams::default(),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iters == 0 {
            return Err(ConfigError::InvalidParameter("max_iters must be at least 1"));
        }
        if !(self.rel_tol.is_finite() && self.rel_tol >= 0.0) {
            return Err(ConfigError::InvalidParameter(
                "rel_tol must be finite and non-negative",
            ));
        }
        if !(self.abs_cost_tol.is_finite() && self.abs_cost_tol >= 0.0) {
            return Err(ConfigError::InvalidParameter(
                "abs_cost_tol must be finite and non-negative",
            ));
        }
        if !(self.bound_tol.is_finite() && self.bound_tol >= 0.0) {
            return Err(ConfigError::InvalidParameter(
                "bound_tol must be finite and non-negative",
            ));
        }
        Ok(())
    }
}
