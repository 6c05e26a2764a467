//! # Dynamics models
//!
//! A dynamics model is a discrete-time, nonlinear state transition together
//! with its exact Jacobians and the static configuration (dimensions, time
//! step, cost matrices and bounds) the optimiser needs.
//!
//! All of the provided vehicle models integrate their continuous kinematics
//! with a single explicit Euler step of length `dt`, holding the control
//! constant over the step. Their Jacobians are the partial derivatives of that
//! discrete update, not of the continuous dynamics.
//!
//! | Model          | State                      | Control              |
//! |----------------|----------------------------|----------------------|
//! | `Bicycle`      | `[x, y, v, theta]`         | `[acc, theta_rate]`  |
//! | `JerkBicycle`  | `[x, y, v, acc, theta]`    | `[jerk, theta_rate]` |
//! | `Dubins`       | `[x, y, theta]`            | `[v, curvature]`     |
//! | `LinearModel`  | any                        | any                  |

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod bicycle;
pub mod config;
pub mod dubins;
pub mod jerk_bicycle;
pub mod linear;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

// Internal
pub use bicycle::Bicycle;
pub use config::{BoxBounds, ConfigError, ModelConfig};
pub use dubins::Dubins;
pub use jerk_bicycle::JerkBicycle;
pub use linear::LinearModel;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A discrete-time dynamics model.
pub trait DynamicsModel {
    /// The model's static configuration.
    fn config(&self) -> &ModelConfig;

    /// Propagate the state by one time step under the given control.
    fn transition(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64>;

    /// Jacobian of `transition` with respect to the state, `n x n`.
    fn jacobian_state(&self, x: &DVector<f64>, u: &DVector<f64>) -> DMatrix<f64>;

    /// Jacobian of `transition` with respect to the control, `n x m`.
    fn jacobian_control(&self, x: &DVector<f64>, u: &DVector<f64>) -> DMatrix<f64>;

    fn state_dim(&self) -> usize {
        self.config().state_dim()
    }

    fn control_dim(&self) -> usize {
        self.config().control_dim()
    }

    fn dt(&self) -> f64 {
        self.config().dt()
    }

    /// Simulate the model from `x0` under the control sequence, returning
    /// `controls.len() + 1` states.
    fn rollout(&self, x0: &DVector<f64>, controls: &[DVector<f64>]) -> Vec<DVector<f64>> {
        let mut states = Vec::with_capacity(controls.len() + 1);
        let mut x = x0.clone();

        for u in controls {
            let next = self.transition(&x, u);
            states.push(x);
            x = next;
        }

        states.push(x);
        states
    }

    /// Quadratic tracking cost of a trajectory against a reference.
    ///
    /// Computes `sum (x_i - r_i)' Q (x_i - r_i) + u_i' R u_i` over the first
    /// `H - 1` states plus `(x_H - r_H)' Qf (x_H - r_H)` on the last one.
    fn trajectory_cost(
        &self,
        states: &[DVector<f64>],
        controls: &[DVector<f64>],
        reference: &[DVector<f64>],
    ) -> f64 {
        let config = self.config();
        let horizon = states.len();
        if horizon == 0 {
            return 0.0;
        }

        let mut cost = 0.0;
        for i in 0..(horizon - 1) {
            let err = &states[i] - &reference[i];
            cost += quad_form(config.q(), &err);
            if let Some(u) = controls.get(i) {
                cost += quad_form(config.r(), u);
            }
        }

        let err = &states[horizon - 1] - &reference[horizon - 1];
        cost + quad_form(config.qf(), &err)
    }
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The kinematic variants which can be selected from a parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Bicycle,
    JerkBicycle,
    Dubins,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ModelKind {
    pub fn state_dim(&self) -> usize {
        match self {
            ModelKind::Bicycle => Bicycle::STATE_DIM,
            ModelKind::JerkBicycle => JerkBicycle::STATE_DIM,
            ModelKind::Dubins => Dubins::STATE_DIM,
        }
    }

    pub fn control_dim(&self) -> usize {
        match self {
            ModelKind::Bicycle => Bicycle::CONTROL_DIM,
            ModelKind::JerkBicycle => JerkBicycle::CONTROL_DIM,
            ModelKind::Dubins => Dubins::CONTROL_DIM,
        }
    }

    /// Build the model of this kind from the given configuration.
    pub fn build(
        &self,
        config: ModelConfig,
    ) -> Result<Box<dyn DynamicsModel + Send + Sync>, ConfigError> {
        Ok(match self {
            ModelKind::Bicycle => Box::new(Bicycle::new(config)?),
            ModelKind::JerkBicycle => Box::new(JerkBicycle::new(config)?),
            ModelKind::Dubins => Box::new(Dubins::new(config)?),
        })
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Compute `v' M v`.
pub fn quad_form(m: &DMatrix<f64>, v: &DVector<f64>) -> f64 {
    v.dot(&(m * v))
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Check the analytical Jacobians of a model against central finite
    /// differences of its transition.
    pub(crate) fn check_jacobians<M: DynamicsModel>(model: &M, x: &DVector<f64>, u: &DVector<f64>) {
        const H: f64 = 1e-6;
        const TOL: f64 = 1e-6;

        let a = model.jacobian_state(x, u);
        let b = model.jacobian_control(x, u);
        assert_eq!(a.shape(), (model.state_dim(), model.state_dim()));
        assert_eq!(b.shape(), (model.state_dim(), model.control_dim()));

        for j in 0..model.state_dim() {
            let mut xp = x.clone();
            let mut xm = x.clone();
            xp[j] += H;
            xm[j] -= H;
            let col = (model.transition(&xp, u) - model.transition(&xm, u)) / (2.0 * H);
            for i in 0..model.state_dim() {
                assert!(
                    (col[i] - a[(i, j)]).abs() < TOL,
                    "df/dx[{}, {}]: fd {} vs analytic {}",
                    i, j, col[i], a[(i, j)]
                );
            }
        }

        for j in 0..model.control_dim() {
            let mut up = u.clone();
            let mut um = u.clone();
            up[j] += H;
            um[j] -= H;
            let col = (model.transition(x, &up) - model.transition(x, &um)) / (2.0 * H);
            for i in 0..model.state_dim() {
                assert!(
                    (col[i] - b[(i, j)]).abs() < TOL,
                    "df/du[{}, {}]: fd {} vs analytic {}",
                    i, j, col[i], b[(i, j)]
                );
            }
        }
    }

    /// Largest one-step error between the model and its linearisation about
    /// `(x, u)` for the perturbation `(dx, du)`.
    pub(crate) fn linearisation_error<M: DynamicsModel>(
        model: &M,
        x: &DVector<f64>,
        u: &DVector<f64>,
        dx: &DVector<f64>,
        du: &DVector<f64>,
    ) -> f64 {
        let exact = model.transition(&(x + dx), &(u + du));
        let linear = model.transition(x, u)
            + model.jacobian_state(x, u) * dx
            + model.jacobian_control(x, u) * du;
        (exact - linear).amax()
    }

    #[test]
    fn test_rollout_and_cost() {
        let model = LinearModel::scalar_integrator(1.0).unwrap();
        let x0 = DVector::from_element(1, 0.0);
        let controls = vec![DVector::from_element(1, 1.0), DVector::from_element(1, 1.0)];

        let states = model.rollout(&x0, &controls);
        assert_eq!(states.len(), 3);
        assert_eq!(states[2][0], 2.0);

        // Perfect tracking only pays for the control effort
        let reference = states.clone();
        assert_eq!(model.trajectory_cost(&states, &controls, &reference), 2.0);

        // Terminal error is weighted by Qf = 100
        let mut reference = states.clone();
        reference[2][0] = 3.0;
        assert_eq!(model.trajectory_cost(&states, &controls, &reference), 102.0);
    }

    #[test]
    fn test_model_kind_build() {
        for kind in &[ModelKind::Bicycle, ModelKind::JerkBicycle, ModelKind::Dubins] {
            let config = ModelConfig::new(kind.state_dim(), kind.control_dim(), 0.2).unwrap();
            let model = kind.build(config).unwrap();
            assert_eq!(model.state_dim(), kind.state_dim());
            assert_eq!(model.control_dim(), kind.control_dim());
        }

        // Mismatched dimensions are rejected
        let config = ModelConfig::new(3, 2, 0.2).unwrap();
        assert!(matches!(
            ModelKind::Bicycle.build(config),
            Err(ConfigError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_model_kind_deserialise() {
        let kind: ModelKind = serde_json::from_str("\"JerkBicycle\"").unwrap();
        assert_eq!(kind, ModelKind::JerkBicycle);
    }
}
