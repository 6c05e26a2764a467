//! # Sequential convex optimiser
//!
//! Tracks a reference trajectory with a nonlinear model by repeatedly:
//!
//! 1. Linearising the model about the nominal trajectory
//! 2. Assembling a sparse QP of the tracking cost, linearised dynamics,
//!    state/control boxes and any linearised state constraints
//! 3. Solving the QP
//! 4. Rolling the QP's controls out through the nonlinear model
//! 5. Accepting the rollout if it improves on the best cost so far
//!
//! The loop stops once the relative improvement falls below `rel_tol`, the
//! cost increases or becomes non-finite, the cost reaches `abs_cost_tol`,
//! `max_iters` iterations have run, or the cancellation token is raised. A
//! QP failure ends the run with an error, no relaxation is attempted.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod assemble;
pub mod linearise;
mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nalgebra::DVector;

// Internal
use crate::constraint::StateConstraint;
use crate::dynamics::DynamicsModel;
use crate::qp::QpBackend;
pub use params::Params;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Everything needed for a single optimisation run.
pub struct OptConfig {
    pub model: Arc<dyn DynamicsModel + Send + Sync>,

    /// Reference states, the first of which is the fixed initial state
    pub reference: Vec<DVector<f64>>,

    /// Time step, must match the model's
    pub dt: f64,

    /// Initial control guess, zeros if not given
    pub initial_controls: Option<Vec<DVector<f64>>>,

    pub constraints: Vec<Box<dyn StateConstraint>>,

    pub params: Params,

    pub cancel: Option<Arc<AtomicBool>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl OptConfig {
    /// A configuration with no initial guess, constraints or cancellation.
    pub fn new(
        model: Arc<dyn DynamicsModel + Send + Sync>,
        reference: Vec<DVector<f64>>,
        dt: f64,
        params: Params,
    ) -> Self {
        Self {
            model,
            reference,
            dt,
            initial_controls: None,
            constraints: Vec::new(),
            params,
            cancel: None,
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Build an optimiser from the configuration and run it to completion.
pub fn optimise<B>(config: OptConfig, backend: &mut B) -> Result<OptReport, OptError>
where
    B: QpBackend + ?Sized,
{
    let mut opt = ScvxOptimiser::new(config.model, config.reference, config.dt, config.params)?;

    if let Some(controls) = config.initial_controls {
        opt.set_initial_controls(controls)?;
    }
    for constraint in config.constraints {
        opt.add_constraint(constraint)?;
    }
    if let Some(token) = config.cancel {
        opt.set_cancel_token(token);
    }

    opt.solve(backend)
}
