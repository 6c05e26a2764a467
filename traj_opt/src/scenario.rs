//! # Scenarios
//!
//! A scenario describes a tracking problem to run through the optimiser: the
//! model and its costs and limits, and a synthetic reference made from a
//! constant speed, constant heading rate path with Perlin noise added to the
//! positions and heading.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector};
use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

// Internal
use crate::dynamics::{ConfigError, DynamicsModel, ModelConfig, ModelKind};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Speeds below which the Dubins curvature guess is set to zero.
const MIN_GUESS_SPEED_MS: f64 = 1e-6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters describing a scenario
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ScenarioParams {
    /// The dynamics model to optimise with
    pub model: ModelKind,

    /// Number of states in the trajectory
    pub horizon: usize,

    /// Time step of the model
    pub dt: f64,

    /// Diagonal of the stage state cost
    pub state_cost: Vec<f64>,

    /// Diagonal of the control cost
    pub control_cost: Vec<f64>,

    /// If set the terminal cost is this multiple of the state cost, otherwise
    /// the model default is used
    pub final_cost_scale: Option<f64>,

    pub control_limits: Option<Limits>,

    pub state_limits: Option<Limits>,

    pub reference: ReferenceParams,
}

/// Elementwise limits. `inf` and `-inf` may be used for unbounded components.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Limits {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// Shape of the synthetic reference
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReferenceParams {
    /// Constant reference speed
    pub speed_ms: f64,

    /// Constant reference heading rate
    pub heading_rate_rads: f64,

    #[serde(default)]
    pub initial_heading_rad: f64,

    /// Amplitude of the noise added to the x and y positions
    #[serde(default)]
    pub position_noise_m: f64,

    /// Amplitude of the noise added to the heading
    #[serde(default)]
    pub heading_noise_rad: f64,

    /// Scale from time to the Perlin noise input
    #[serde(default = "default_noise_scale")]
    pub noise_scale: f64,

    /// Offset of the Perlin noise input
    #[serde(default)]
    pub noise_offset: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScenarioParams {
    /// Build the configuration of the scenario's model.
    pub fn model_config(&self) -> Result<ModelConfig, ConfigError> {
        let mut config =
            ModelConfig::new(self.model.state_dim(), self.model.control_dim(), self.dt)?;

        let q = DMatrix::from_diagonal(&DVector::from_column_slice(&self.state_cost));
        let r = DMatrix::from_diagonal(&DVector::from_column_slice(&self.control_cost));
        config.set_cost(q.clone(), r)?;

        if let Some(scale) = self.final_cost_scale {
            config.set_final_cost(q * scale)?;
        }

        if let Some(ref limits) = self.control_limits {
            config.set_control_limits(
                DVector::from_column_slice(&limits.lower),
                DVector::from_column_slice(&limits.upper),
            )?;
        }

        if let Some(ref limits) = self.state_limits {
            config.set_state_limits(
                DVector::from_column_slice(&limits.lower),
                DVector::from_column_slice(&limits.upper),
            )?;
        }

        Ok(config)
    }

    /// Build the scenario's model.
    pub fn build_model(&self) -> Result<Box<dyn DynamicsModel + Send + Sync>, ConfigError> {
        self.model.build(self.model_config()?)
    }

    /// Generate the noisy reference trajectory in the model's state layout.
    pub fn reference(&self) -> Vec<DVector<f64>> {
        let r = &self.reference;
        let perlin = Perlin::new();

        let mut x = 0.0;
        let mut y = 0.0;
        let mut theta = r.initial_heading_rad;
        let mut states = Vec::with_capacity(self.horizon);

        for i in 0..self.horizon {
            // The initial state is left clean
            let t = (i as f64) * self.dt * r.noise_scale + r.noise_offset;
            let (nx, ny, nt) = if i == 0 {
                (0.0, 0.0, 0.0)
            } else {
                (
                    r.position_noise_m * perlin.get([t, 0.5]),
                    r.position_noise_m * perlin.get([t, 10.5]),
                    r.heading_noise_rad * perlin.get([t, 20.5]),
                )
            };

            states.push(self.layout_state(x + nx, y + ny, r.speed_ms, theta + nt));

            x += r.speed_ms * theta.cos() * self.dt;
            y += r.speed_ms * theta.sin() * self.dt;
            theta += r.heading_rate_rads * self.dt;
        }

        states
    }

    /// Place a pose and speed into the state vector of the scenario's model.
    fn layout_state(&self, x: f64, y: f64, v: f64, theta: f64) -> DVector<f64> {
        match self.model {
            ModelKind::Bicycle => DVector::from_vec(vec![x, y, v, theta]),
            ModelKind::JerkBicycle => DVector::from_vec(vec![x, y, v, 0.0, theta]),
            ModelKind::Dubins => DVector::from_vec(vec![x, y, theta]),
        }
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Finite difference control guess consistent with a reference in the given
/// model's state layout.
pub fn control_guess(kind: ModelKind, reference: &[DVector<f64>], dt: f64) -> Vec<DVector<f64>> {
    reference
        .windows(2)
        .map(|pair| {
            let (x0, x1) = (&pair[0], &pair[1]);
            match kind {
                ModelKind::Bicycle => {
                    DVector::from_vec(vec![(x1[2] - x0[2]) / dt, (x1[3] - x0[3]) / dt])
                }
                ModelKind::JerkBicycle => {
                    DVector::from_vec(vec![(x1[3] - x0[3]) / dt, (x1[4] - x0[4]) / dt])
                }
                ModelKind::Dubins => {
                    let v = ((x1[0] - x0[0]).powi(2) + (x1[1] - x0[1]).powi(2)).sqrt() / dt;
                    let curv = if v > MIN_GUESS_SPEED_MS {
                        (x1[2] - x0[2]) / (v * dt)
                    } else {
                        0.0
                    };
                    DVector::from_vec(vec![v, curv])
                }
            }
        })
        .collect()
}

fn default_noise_scale() -> f64 {
    1.0
}
