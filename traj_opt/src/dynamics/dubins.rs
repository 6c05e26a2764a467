//! Unicycle (Dubins vehicle) model
//!
//! State `[x, y, theta]`, control `[v, curvature]`. Unlike the bicycle models
//! the speed is a free control rather than a state, and the heading rate is
//! the product of speed and curvature.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::{DMatrix, DVector};

use super::{ConfigError, DynamicsModel, ModelConfig};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Dubins {
    config: ModelConfig,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Dubins {
    pub const STATE_DIM: usize = 3;
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

impl DynamicsModel for Dubins {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        let dt = self.config.dt();
        let theta = x[2];
        let (v, curv) = (u[0], u[1]);

        DVector::from_vec(vec![
            x[0] + v * theta.cos() * dt,
            x[1] + v * theta.sin() * dt,
            theta + v * curv * dt,
        ])
    }

    fn jacobian_state(&self, x: &DVector<f64>, u: &DVector<f64>) -> DMatrix<f64> {
        let dt = self.config.dt();
        let theta = x[2];
        let v = u[0];

        #[rustfmt::skip]
        let a = DMatrix::from_row_slice(3, 3, &[
            1.0, 0.0, -theta.sin() * v * dt,
            0.0, 1.0,  theta.cos() * v * dt,
            0.0, 0.0,  1.0,
        ]);
        a
    }

    fn jacobian_control(&self, x: &DVector<f64>, u: &DVector<f64>) -> DMatrix<f64> {
        let dt = self.config.dt();
        let theta = x[2];
        let (v, curv) = (u[0], u[1]);

        #[rustfmt::skip]
        let b = DMatrix::from_row_slice(3, 2, &[
            theta.cos() * dt, 0.0,
            theta.sin() * dt, 0.0,
            curv * dt,        v * dt,
        ]);
        b
    }
}
