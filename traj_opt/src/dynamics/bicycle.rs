//! Kinematic bicycle model
//!
//! State `[x, y, v, theta]`, control `[acc, theta_rate]`:
//!
//! ```text
//! x'     = x + v cos(theta) dt
//! y'     = y + v sin(theta) dt
//! v'     = v + acc dt
//! theta' = theta + theta_rate dt
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

use super::{ConfigError, DynamicsModel, ModelConfig};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Kinematic bicycle driven by longitudinal acceleration and heading rate.
#[derive(Debug, Clone)]
pub struct Bicycle {
    config: ModelConfig,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Bicycle {
    pub const STATE_DIM: usize = 4;
    pub const CONTROL_DIM: usize = 2;

    pub fn new(config: ModelConfig) -> Result<Self, ConfigError> {
        config.check_dims(Self::STATE_DIM, Self::CONTROL_DIM)?;
        Ok(Self { config })
    }

    /// Bicycle with default costs and no bounds.
    pub fn with_dt(dt: f64) -> Result<Self, ConfigError> {
        Self::new(ModelConfig::new(Self::STATE_DIM, Self::CONTROL_DIM, dt)?)
    }

    pub fn config_mut(&mut self) -> &mut ModelConfig {
        &mut self.config
    }
}

impl DynamicsModel for Bicycle {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let dt = self.config.dt();
        let (v, theta) = (x[2], x[3]);

        DVector::from_vec(vec![
            x[0] + v * theta.cos() * dt,
            x[1] + v * theta.sin() * dt,
            v + u[0] * dt,
            theta + u[1] * dt,
        ])
    }

    fn jacobian_state(&self, x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        let dt = self.config.dt();
        let (v, theta) = (x[2], x[3]);
        let (s, c) = theta.sin_cos();

        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(4, 4, &[
            1.0, 0.0, c * dt, -s * v * dt,
            0.0, 1.0, s * dt,  c * v * dt,
            0.0, 0.0, 1.0,     0.0,
            0.0, 0.0, 0.0,     1.0,
        ]);
        a
    }

    fn jacobian_control(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        let dt = self.config.dt();

        #[rustfmt::skip]
        let b = DMatrix::from_row_slice(4, 2, &[
            0.0, 0.0,
            0.0, 0.0,
            dt,  0.0,
            0.0, dt,
        ]);
        b
    }
}
