//! # State constraints
//!
//! Scalar constraints `g(x) >= 0` on a single state. The optimiser
//! linearises each one about the nominal trajectory and adds the row
//!
//! ```text
//! grad_g(x_bar)' x_i >= grad_g(x_bar)' x_bar - g(x_bar)
//! ```
//!
//! for every state after the fixed initial one.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::fmt;
use std::sync::Arc;

use nalgebra::{DVector, Vector2};

// Internal
use crate::dynamics::DynamicsModel;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A scalar constraint on a state, satisfied when `evaluate` is non-negative.
pub trait StateConstraint: Send + Sync {
    fn evaluate(&self, x: &DVector<f64>) -> f64;

    /// Gradient of `evaluate` with respect to the state.
    fn gradient(&self, x: &DVector<f64>) -> DVector<f64>;

    /// Whether the constraint can be evaluated on states of this dimension.
    fn is_compatible(&self, _state_dim: usize) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Circular region in the plane of state components 0 and 1.
#[derive(Debug, Clone)]
pub struct CircleConstraint {
    centre: Vector2<f64>,
    radius: f64,
    sense: Sense,
    probe: Probe,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    /// `r^2 - d^2 >= 0`
    KeepIn,

    /// `d^2 - r^2 >= 0`
    KeepOut,
}

/// Which state a constraint is evaluated at.
#[derive(Clone)]
pub enum Probe {
    /// The state itself.
    Current,

    /// The state one step ahead under a zero control, `f(x, 0)`.
    LookAhead(Arc<dyn DynamicsModel + Send + Sync>),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CircleConstraint {
    /// Keep the position inside the circle.
    pub fn keep_in(centre: Vector2<f64>, radius: f64) -> Self {
        Self {
            centre,
            radius,
            sense: Sense::KeepIn,
            probe: Probe::Current,
        }
    }

    /// Keep the position outside the circle.
    pub fn keep_out(centre: Vector2<f64>, radius: f64) -> Self {
        Self {
            centre,
            radius,
            sense: Sense::KeepOut,
            probe: Probe::Current,
        }
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    fn sign(&self) -> f64 {
        match self.sense {
            Sense::KeepIn => -1.0,
            Sense::KeepOut => 1.0,
        }
    }

    fn probe_state(&self, x: &DVector<f64>) -> DVector<f64> {
        match self.probe {
            Probe::Current => x.clone(),
            Probe::LookAhead(ref model) => {
                model.transition(x, &DVector::zeros(model.control_dim()))
            }
        }
    }
}

impl StateConstraint for CircleConstraint {
    fn evaluate(&self, x: &DVector<f64>) -> f64 {
        let p = self.probe_state(x);
        let d_sq = (p[0] - self.centre[0]).powi(2) + (p[1] - self.centre[1]).powi(2);
        self.sign() * (d_sq - self.radius.powi(2))
    }

    fn gradient(&self, x: &DVector<f64>) -> DVector<f64> {
        let p = self.probe_state(x);

        let mut grad = DVector::zeros(p.len());
        grad[0] = 2.0 * self.sign() * (p[0] - self.centre[0]);
        grad[1] = 2.0 * self.sign() * (p[1] - self.centre[1]);

        match self.probe {
            Probe::Current => grad,
            Probe::LookAhead(ref model) => {
                // Chain rule through the zero-control step
                let a = model.jacobian_state(x, &DVector::zeros(model.control_dim()));
                a.tr_mul(&grad)
            }
        }
    }

    fn is_compatible(&self, state_dim: usize) -> bool {
        match self.probe {
            Probe::Current => state_dim >= 2,
            Probe::LookAhead(ref model) => state_dim >= 2 && model.state_dim() == state_dim,
        }
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Current => write!(f, "Current"),
            Probe::LookAhead(model) => write!(
                f,
                "LookAhead(n = {}, m = {}, dt = {})",
                model.state_dim(),
                model.control_dim(),
                model.dt()
            ),
        }
    }
}

impl Default for Probe {
    fn default() -> Self {
        Probe::Current
    }
}
