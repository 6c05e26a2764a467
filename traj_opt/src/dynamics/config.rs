//! Dynamics model configuration

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Scale applied to the stage cost to get the default terminal cost.
pub const DEFAULT_FINAL_COST_SCALE: f64 = 100.0;

/// Relative tolerance used when checking cost matrices for symmetry and
/// positive semi-definiteness.
const MATRIX_CHECK_TOL: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Static configuration shared by every dynamics model.
///
/// The dimensions and time step are fixed at construction. Cost matrices and
/// bounds may be changed afterwards through the setters, all of which check
/// the new values against the dimensions.
#[derive(Debug, Clone, Serialize)]
pub struct ModelConfig {
    state_dim: usize,
    control_dim: usize,
    dt: f64,

    /// Stage cost on the state error
    q: DMatrix<f64>,

    /// Stage cost on the control
    r: DMatrix<f64>,

    /// Terminal cost on the final state error
    qf: DMatrix<f64>,

    control_bounds: Option<BoxBounds>,
    state_bounds: Option<BoxBounds>,
}

/// Elementwise lower and upper bounds on a vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoxBounds {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Inconsistent configuration of a model or of an optimisation problem.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("The time step must be finite and positive, got {0}")]
    InvalidTimeStep(f64),

    #[error("State and control dimensions must be non-zero")]
    ZeroDimension,

    #[error("Expected {what} to be {expected:?} but found {found:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("The {0} matrix is not symmetric")]
    NotSymmetric(&'static str),

    #[error("The {0} matrix is not positive semi-definite")]
    NotPositiveSemiDefinite(&'static str),

    #[error("Bound {index} has lower {lower} greater than upper {upper}")]
    InvalidBounds { index: usize, lower: f64, upper: f64 },

    #[error("The horizon must contain at least 2 states, got {0}")]
    HorizonTooShort(usize),

    #[error("The optimiser time step {given} does not match the model's {model}")]
    TimeStepMismatch { model: f64, given: f64 },

    #[error("Reference state {index} has dimension {found}, expected {expected}")]
    ReferenceShape {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Expected {expected} controls of dimension {dim}, got {found_len} (first bad index {bad_index:?})")]
    ControlsShape {
        expected: usize,
        dim: usize,
        found_len: usize,
        bad_index: Option<usize>,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("The constraint cannot be evaluated on a {0}-dimensional state")]
    IncompatibleConstraint(usize),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ModelConfig {
    /// Create a new configuration with identity stage costs, the default
    /// terminal cost and no bounds.
    pub fn new(state_dim: usize, control_dim: usize, dt: f64) -> Result<Self, ConfigError> {
        if state_dim == 0 || control_dim == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(ConfigError::InvalidTimeStep(dt));
        }

        let q = DMatrix::identity(state_dim, state_dim);
        Ok(Self {
            state_dim,
            control_dim,
            dt,
            qf: &q * DEFAULT_FINAL_COST_SCALE,
            q,
            r: DMatrix::identity(control_dim, control_dim),
            control_bounds: None,
            state_bounds: None,
        })
    }

    /// Set the stage costs. The terminal cost is reset to
    /// `DEFAULT_FINAL_COST_SCALE * q`, call `set_final_cost` afterwards to
    /// override it.
    pub fn set_cost(&mut self, q: DMatrix<f64>, r: DMatrix<f64>) -> Result<(), ConfigError> {
        check_cost_matrix("Q", &q, self.state_dim)?;
        check_cost_matrix("R", &r, self.control_dim)?;

        self.qf = &q * DEFAULT_FINAL_COST_SCALE;
        self.q = q;
        self.r = r;

        Ok(())
    }

    /// Override the terminal cost.
    pub fn set_final_cost(&mut self, qf: DMatrix<f64>) -> Result<(), ConfigError> {
        check_cost_matrix("Qf", &qf, self.state_dim)?;
        self.qf = qf;
        Ok(())
    }

    /// Enable per-component control bounds. Infinite values leave that side
    /// unbounded.
    pub fn set_control_limits(
        &mut self,
        lower: DVector<f64>,
        upper: DVector<f64>,
    ) -> Result<(), ConfigError> {
        self.control_bounds = Some(BoxBounds::new(
            lower,
            upper,
            self.control_dim,
            "control bounds",
        )?);
        Ok(())
    }

    /// Enable per-component state bounds. Infinite values leave that side
    /// unbounded.
    pub fn set_state_limits(
        &mut self,
        lower: DVector<f64>,
        upper: DVector<f64>,
    ) -> Result<(), ConfigError> {
        self.state_bounds = Some(BoxBounds::new(lower, upper, self.state_dim, "state bounds")?);
        Ok(())
    }

    /// Check that this configuration describes a model of the given size.
    pub fn check_dims(&self, state_dim: usize, control_dim: usize) -> Result<(), ConfigError> {
        if self.state_dim != state_dim || self.control_dim != control_dim {
            return Err(ConfigError::DimensionMismatch {
                what: "(state_dim, control_dim)",
                expected: (state_dim, control_dim),
                found: (self.state_dim, self.control_dim),
            });
        }
        Ok(())
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn control_dim(&self) -> usize {
        self.control_dim
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn q(&self) -> &DMatrix<f64> {
        &self.q
    }

    pub fn r(&self) -> &DMatrix<f64> {
        &self.r
    }

    pub fn qf(&self) -> &DMatrix<f64> {
        &self.qf
    }

    pub fn control_bounds(&self) -> Option<&BoxBounds> {
        self.control_bounds.as_ref()
    }

    pub fn state_bounds(&self) -> Option<&BoxBounds> {
        self.state_bounds.as_ref()
    }
}

impl BoxBounds {
    fn new(
        lower: DVector<f64>,
        upper: DVector<f64>,
        dim: usize,
        what: &'static str,
    ) -> Result<Self, ConfigError> {
        if lower.len() != dim || upper.len() != dim {
            return Err(ConfigError::DimensionMismatch {
                what,
                expected: (dim, dim),
                found: (lower.len(), upper.len()),
            });
        }

        for (index, (&l, &u)) in lower.iter().zip(upper.iter()).enumerate() {
            if l.is_nan() || u.is_nan() || l > u {
                return Err(ConfigError::InvalidBounds {
                    index,
                    lower: l,
                    upper: u,
                });
            }
        }

        Ok(Self { lower, upper })
    }

    /// True if every component of `v` is within the bounds, allowing `tol`
    /// of violation.
    pub fn contains(&self, v: &DVector<f64>, tol: f64) -> bool {
        v.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(&x, (&l, &u))| x >= l - tol && x <= u + tol)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_cost_matrix(
    what: &'static str,
    m: &DMatrix<f64>,
    dim: usize,
) -> Result<(), ConfigError> {
    if m.shape() != (dim, dim) {
        return Err(ConfigError::DimensionMismatch {
            what,
            expected: (dim, dim),
            found: m.shape(),
        });
    }

    let scale = m.amax().max(1.0);
    if (m - m.transpose()).amax() > MATRIX_CHECK_TOL * scale {
        return Err(ConfigError::NotSymmetric(what));
    }

    let min_eig = m.clone().symmetric_eigenvalues().min();
    if min_eig < -MATRIX_CHECK_TOL * scale {
        return Err(ConfigError::NotPositiveSemiDefinite(what));
    }

    Ok(())
}
