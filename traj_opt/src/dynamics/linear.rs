//! Linear time-invariant model `x' = A x + B u`

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

use super::{ConfigError, DynamicsModel, ModelConfig};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A discrete linear plant. Its Jacobians are `A` and `B` everywhere, so a
/// single linearisation describes it exactly.
#[derive(Debug, Clone)]
pub struct LinearModel {
    config: ModelConfig,
    a: DMatrix<f64>,
    b: DMatrix<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl LinearModel {
    /// Create a new model from the discrete state and input matrices.
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>, dt: f64) -> Result<Self, ConfigError> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(ConfigError::DimensionMismatch {
                what: "A",
                expected: (n, n),
                found: a.shape(),
            });
        }
        if b.nrows() != n {
            return Err(ConfigError::DimensionMismatch {
                what: "B",
                expected: (n, b.ncols()),
                found: b.shape(),
            });
        }

        let config = ModelConfig::new(n, b.ncols(), dt)?;
        Ok(Self { config, a, b })
    }

    /// The scalar integrator `x' = x + u dt`.
    pub fn scalar_integrator(dt: f64) -> Result<Self, ConfigError> {
        Self::new(
            DMatrix::identity(1, 1),
            DMatrix::from_element(1, 1, dt),
            dt,
        )
    }

    /// A planar single integrator, state `[x, y]` and control `[vx, vy]`.
    pub fn planar_integrator(dt: f64) -> Result<Self, ConfigError> {
        Self::new(DMatrix::identity(2, 2), DMatrix::identity(2, 2) * dt, dt)
    }

    pub fn config_mut(&mut self) -> &mut ModelConfig {
        &mut self.config
    }
}

impl DynamicsModel for LinearModel {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.a * x + &self.b * u
    }

    fn jacobian_state(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        self.a.clone()
    }

    fn jacobian_control(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        self.b.clone()
    }
}
