//! Jerk-extended bicycle model
//!
//! State `[x, y, v, acc, theta]`, control `[jerk, theta_rate]`. Acceleration
//! is a state integrated from the commanded jerk, which gives smoother speed
//! profiles than commanding acceleration directly.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

use super::{ConfigError, DynamicsModel, ModelConfig};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JerkBicycle {
    config: ModelConfig,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl JerkBicycle {
    pub const STATE_DIM: usize = 5;
    pub const CONTROL_DIM: usize = 2;

    pub fn new(config: ModelConfig) -> Result<Self, ConfigError> {
        config.check_dims(Self::STATE_DIM, Self::CONTROL_DIM)?;
        Ok(Self { config })
    }

    pub fn with_dt(dt: f64) -> Result<Self, ConfigError> {
        Self::new(ModelConfig::new(Self::STATE_DIM, Self::CONTROL_DIM, dt)?)
    }

    pub fn config_mut(&mut self) -> &mut ModelConfig {
        &mut self.config
    }
}

impl DynamicsModel for JerkBicycle {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let dt = self.config.dt();
        let (v, acc, theta) = (x[2], x[3], x[4]);

        DVector::from_vec(vec![
            x[0] + v * theta.cos() * dt,
            x[1] + v * theta.sin() * dt,
            v + acc * dt,
            acc + u[0] * dt,
            theta + u[1] * dt,
        ])
    }

    fn jacobian_state(&self, x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        let dt = self.config.dt();
        let (v, theta) = (x[2], x[4]);
        let (s, c) = theta.sin_cos();

        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(5, 5, &[
            1.0, 0.0, c * dt, 0.0, -s * v * dt,
            0.0, 1.0, s * dt, 0.0,  c * v * dt,
            0.0, 0.0, 1.0,    dt,   0.0,
            0.0, 0.0, 0.0,    1.0,  0.0,
            0.0, 0.0, 0.0,    0.0,  1.0,
        ]);
        a
    }

    fn jacobian_control(&self, _x: &DVector<f64>, _u: &DVector<f64>) -> DMatrix<f64> {
        let dt = self.config.dt();

        let mut b = DMatrix::zeros(5, 2);
        b[(3, 0)] = dt;
        b[(4, 1)] = dt;
        b
    }
}
