//! Sequential convex optimiser state

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use nalgebra::DVector;
use serde::Serialize;

// Internal
use super::assemble::{assemble, Layout};
use super::linearise::{linearise, Linearisation};
use super::Params;
use crate::constraint::StateConstraint;
use crate::dynamics::{ConfigError, DynamicsModel};
use crate::qp::{QpBackend, QpError};
use crate::trajectory::Trajectory;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Relative tolerance when comparing the optimiser and model time steps.
const DT_MATCH_TOL: f64 = 1e-9;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Sequential convex trajectory optimiser.
///
/// Each iteration linearises the model about the nominal trajectory, solves
/// the resulting QP, rolls the QP's controls out through the nonlinear model
/// and decides whether to keep the new trajectory. The nominal trajectory is
/// always the best one accepted so far.
pub struct ScvxOptimiser {
    params: Params,

    model: Arc<dyn DynamicsModel + Send + Sync>,
    layout: Layout,

    /// Tracking target, also the nominal trajectory of the first iteration
    reference: Vec<DVector<f64>>,

    initial_controls: Vec<DVector<f64>>,

    /// Nominal (best accepted) states
    states: Vec<DVector<f64>>,

    /// Nominal (best accepted) controls
    controls: Vec<DVector<f64>>,

    best_cost: Option<f64>,
    status: OptStatus,
    history: Vec<IterRecord>,

    constraints: Vec<Box<dyn StateConstraint>>,
    cancel: Option<Arc<AtomicBool>>,
}

/// Monitoring record for a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IterRecord {
    pub iteration: usize,

    /// True cost of the nonlinear rollout
    pub cost: f64,

    /// `(best - cost) / |best|`, not set on the first accepted iteration
    pub rel_improvement: Option<f64>,

    pub accepted: bool,

    /// Largest difference between the QP's predicted states and the
    /// nonlinear rollout
    pub max_model_mismatch: f64,

    /// False if a rollout state broke the configured state bounds
    pub within_bounds: bool,

    pub solve_time_s: f64,
}

/// The result of a run of the optimiser.
#[derive(Debug, Clone, Serialize)]
pub struct OptReport {
    pub status: OptStatus,

    /// Number of completed iterations
    pub iterations: usize,

    /// Cost of the returned trajectory, `None` if no iterate was accepted
    pub cost: Option<f64>,

    /// Best trajectory found. If no iterate was accepted this is the
    /// reference with the initial control guess.
    pub trajectory: Trajectory,

    pub history: Vec<IterRecord>,
}

/// Outcome of the acceptance test for one iterate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Decision {
    accept: bool,
    stop: Option<StopReason>,
    rel_improvement: Option<f64>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum OptStatus {
    /// `solve` has not been called
    NotStarted,

    /// Stopped before the iteration budget was used
    Converged(StopReason),

    /// The iteration budget was used up while the cost was still improving
    NotConverged,

    /// The QP backend failed on the given iteration
    SolverFailed { iteration: usize },

    /// The cancellation token was raised
    Cancelled,
}

/// Why a converged run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The relative improvement fell to or below the tolerance
    Stagnated,

    /// The rollout cost was worse than the best so far
    CostIncreased,

    /// The rollout cost was NaN or infinite
    NonFiniteCost,

    /// The rollout cost reached the absolute floor
    CostFloorReached,

    /// The rollout left the state bounds
    StateBoundsViolated,
}

#[derive(Debug, thiserror::Error)]
pub enum OptError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("The QP solver failed on iteration {iteration}: {source}")]
    SolverFailure { iteration: usize, source: QpError },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScvxOptimiser {
    /// Create a new optimiser.
    ///
    /// The initial control guess is all zeros until set with
    /// `set_initial_controls`.
    pub fn new(
        model: Arc<dyn DynamicsModel + Send + Sync>,
        reference: Vec<DVector<f64>>,
        dt: f64,
        params: Params,
    ) -> Result<Self, ConfigError> {
        params.validate()?;

        let horizon = reference.len();
        if horizon < 2 {
            return Err(ConfigError::HorizonTooShort(horizon));
        }

        if (dt - model.dt()).abs() > DT_MATCH_TOL * model.dt().max(1.0) {
            return Err(ConfigError::TimeStepMismatch {
                model: model.dt(),
                given: dt,
            });
        }

        let n = model.state_dim();
        let m = model.control_dim();
        if let Some((index, r)) = reference.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(ConfigError::ReferenceShape {
                index,
                expected: n,
                found: r.len(),
            });
        }

        let initial_controls = vec![DVector::zeros(m); horizon - 1];

        Ok(Self {
            params,
            layout: Layout::new(n, m, horizon),
            states: reference.clone(),
            controls: initial_controls.clone(),
            reference,
            initial_controls,
            model,
            best_cost: None,
            status: OptStatus::NotStarted,
            history: Vec::new(),
            constraints: Vec::new(),
            cancel: None,
        })
    }

    /// Set the control guess used to linearise the first iteration.
    pub fn set_initial_controls(&mut self, controls: Vec<DVector<f64>>) -> Result<(), ConfigError> {
        let expected = self.layout.horizon - 1;
        let dim = self.layout.control_dim;
        let bad_index = controls.iter().position(|u| u.len() != dim);

        if controls.len() != expected || bad_index.is_some() {
            return Err(ConfigError::ControlsShape {
                expected,
                dim,
                found_len: controls.len(),
                bad_index,
            });
        }

        self.controls = controls.clone();
        self.initial_controls = controls;
        Ok(())
    }

    /// Add a state constraint, linearised and enforced on every state after
    /// the initial one.
    pub fn add_constraint(
        &mut self,
        constraint: Box<dyn StateConstraint>,
    ) -> Result<(), ConfigError> {
        if !constraint.is_compatible(self.layout.state_dim) {
            return Err(ConfigError::IncompatibleConstraint(self.layout.state_dim));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Set a token which stops the optimiser before the next iteration when
    /// raised.
    pub fn set_cancel_token(&mut self, token: Arc<AtomicBool>) {
        self.cancel = Some(token);
    }

    /// Run the optimiser to completion.
    ///
    /// Every call starts again from the reference and the initial control
    /// guess. On a solver failure the getters still return the best
    /// trajectory accepted before the failure.
    pub fn solve<B>(&mut self, backend: &mut B) -> Result<OptReport, OptError>
    where
        B: QpBackend + ?Sized,
    {
        self.reset();

        let mut outcome = OptStatus::NotConverged;

        for iteration in 0..self.params.max_iters {
            if self.is_cancelled() {
                info!("Optimisation cancelled before iteration {}", iteration);
                outcome = OptStatus::Cancelled;
                break;
            }

            // Linearise and build the subproblem
            let mut lins = linearise(&*self.model, &self.states, &self.controls);
            if !self.params.affine_remainder {
                lins.iter_mut().for_each(Linearisation::drop_remainder);
            }
            let qp = assemble(
                self.model.config(),
                &self.layout,
                &self.reference,
                &self.states,
                &lins,
                &self.constraints,
            );

            debug!(
                "Iteration {}: QP with {} variables and {} constraints",
                iteration,
                qp.num_vars(),
                qp.num_constraints()
            );

            // Solve
            let start = Instant::now();
            let z = match backend.solve(&qp) {
                Ok(z) if z.len() == self.layout.num_vars() => z,
                Ok(z) => {
                    return Err(self.solver_failed(
                        iteration,
                        QpError::SolutionSize {
                            expected: self.layout.num_vars(),
                            found: z.len(),
                        },
                    ))
                }
                Err(e) => return Err(self.solver_failed(iteration, e)),
            };
            let solve_time_s = start.elapsed().as_secs_f64();

            // Roll the new controls out through the nonlinear model
            let controls = self.layout.controls(&z);
            let states = self.model.rollout(&self.reference[0], &controls);
            let cost = self
                .model
                .trajectory_cost(&states, &controls, &self.reference);

            let max_model_mismatch = self
                .layout
                .states(&z)
                .iter()
                .zip(states.iter())
                .map(|(predicted, rolled)| (predicted - rolled).amax())
                .fold(0.0, f64::max);

            // The QP only bounds its linear prediction of the states, so the
            // rollout is checked too. The initial state is fixed.
            let within_bounds = match self.model.config().state_bounds() {
                Some(bounds) => states
                    .iter()
                    .skip(1)
                    .all(|x| bounds.contains(x, self.params.bound_tol)),
                None => true,
            };

            let mut decision = decide(self.best_cost, cost, &self.params);
            if !within_bounds {
                warn!("Iteration {}: rollout breaks the state bounds", iteration);
                decision.accept = false;
                decision.stop = Some(StopReason::StateBoundsViolated);
            }

            info!(
                "Iteration {}: cost {:.6e}, rel. improvement {}, {}",
                iteration,
                cost,
                match decision.rel_improvement {
                    Some(r) => format!("{:.3e}", r),
                    None => String::from("n/a"),
                },
                if decision.accept { "accepted" } else { "rejected" }
            );
            debug!(
                "Iteration {}: solve time {:.6} s, max model mismatch {:.3e}",
                iteration, solve_time_s, max_model_mismatch
            );

            self.history.push(IterRecord {
                iteration,
                cost,
                rel_improvement: decision.rel_improvement,
                accepted: decision.accept,
                max_model_mismatch,
                within_bounds,
                solve_time_s,
            });

            if decision.accept {
                self.states = states;
                self.controls = controls;
                self.best_cost = Some(cost);
            }

            if let Some(reason) = decision.stop {
                info!("Stopping after iteration {}: {:?}", iteration, reason);
                outcome = OptStatus::Converged(reason);
                break;
            }
        }

        if outcome == OptStatus::NotConverged {
            warn!(
                "Iteration budget of {} used without converging",
                self.params.max_iters
            );
        }
        self.status = outcome;

        if self.best_cost.is_none() {
            warn!("No iterate was accepted, returning the reference");
        }

        Ok(self.report())
    }

    /// Build a report of the current state of the optimiser.
    pub fn report(&self) -> OptReport {
        OptReport {
            status: self.status,
            iterations: self.history.len(),
            cost: self.best_cost,
            trajectory: self.trajectory(),
            history: self.history.clone(),
        }
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }

    pub fn controls(&self) -> &[DVector<f64>] {
        &self.controls
    }

    pub fn trajectory(&self) -> Trajectory {
        Trajectory::new(self.states.clone(), self.controls.clone())
    }

    /// Cost of the nominal trajectory, `None` if no iterate has been
    /// accepted.
    pub fn cost(&self) -> Option<f64> {
        self.best_cost
    }

    pub fn status(&self) -> OptStatus {
        self.status
    }

    pub fn history(&self) -> &[IterRecord] {
        &self.history
    }

    fn reset(&mut self) {
        self.states = self.reference.clone();
        self.controls = self.initial_controls.clone();
        self.best_cost = None;
        self.status = OptStatus::NotStarted;
        self.history.clear();
    }

    fn is_cancelled(&self) -> bool {
        match self.cancel {
            Some(ref c) => c.load(Ordering::Relaxed),
            None => false,
        }
    }

    fn solver_failed(&mut self, iteration: usize, source: QpError) -> OptError {
        warn!("QP solve failed on iteration {}: {}", iteration, source);
        self.status = OptStatus::SolverFailed { iteration };
        OptError::SolverFailure { iteration, source }
    }
}

impl OptStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, OptStatus::Converged(_))
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Decide whether to accept an iterate with the given true cost, and whether
/// to stop afterwards.
fn decide(best: Option<f64>, cost: f64, params: &Params) -> Decision {
    if !cost.is_finite() {
        return Decision {
            accept: false,
            stop: Some(StopReason::NonFiniteCost),
            rel_improvement: None,
        };
    }

    let rel_improvement =
        best.map(|b| (b - cost) / b.abs().max(std::f64::MIN_POSITIVE));

    if cost <= params.abs_cost_tol {
        return Decision {
            accept: true,
            stop: Some(StopReason::CostFloorReached),
            rel_improvement,
        };
    }

    let best = match best {
        Some(b) => b,
        None => {
            return Decision {
                accept: true,
                stop: None,
                rel_improvement,
            }
        }
    };

    if cost > best {
        Decision {
            accept: false,
            stop: Some(StopReason::CostIncreased),
            rel_improvement,
        }
    } else if cost == best {
        Decision {
            accept: false,
            stop: Some(StopReason::Stagnated),
            rel_improvement,
        }
    } else {
        let improving = rel_improvement.map_or(true, |r| r > params.rel_tol);
        Decision {
            accept: true,
            stop: if improving {
                None
            } else {
                Some(StopReason::Stagnated)
            },
            rel_improvement,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constraint::CircleConstraint;
    use crate::dynamics::{Bicycle, LinearModel};
    use crate::qp::{ClarabelBackend, QpProblem};
    use nalgebra::{DMatrix, Vector2};

    /// Backend which always fails.
    struct FailingBackend;

    impl QpBackend for FailingBackend {
        fn solve(&mut self, _problem: &QpProblem) -> Result<DVector<f64>, QpError> {
            Err(QpError::Infeasible)
        }
    }

    /// Backend returning a solution of the wrong size.
    struct TruncatingBackend;

    impl QpBackend for TruncatingBackend {
        fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpError> {
            Ok(DVector::zeros(problem.num_vars() - 1))
        }
    }

    /// Backend returning fixed solutions in order.
    struct ScriptedBackend {
        solutions: Vec<DVector<f64>>,
    }

    impl QpBackend for ScriptedBackend {
        fn solve(&mut self, _problem: &QpProblem) -> Result<DVector<f64>, QpError> {
            if self.solutions.is_empty() {
                Err(QpError::Infeasible)
            } else {
                Ok(self.solutions.remove(0))
            }
        }
    }

    /// Backend which raises the cancel token after a number of solves.
    struct CancellingBackend {
        inner: ClarabelBackend,
        token: Arc<AtomicBool>,
        solves_before_cancel: usize,
    }

    impl QpBackend for CancellingBackend {
        fn solve(&mut self, problem: &QpProblem) -> Result<DVector<f64>, QpError> {
            let z = self.inner.solve(problem)?;
            self.solves_before_cancel = self.solves_before_cancel.saturating_sub(1);
            if self.solves_before_cancel == 0 {
                self.token.store(true, Ordering::Relaxed);
            }
            Ok(z)
        }
    }

    fn scalar_model(q: f64, r: f64, qf: f64) -> Arc<LinearModel> {
        let mut model = LinearModel::scalar_integrator(1.0).unwrap();
        model
            .config_mut()
            .set_cost(DMatrix::from_element(1, 1, q), DMatrix::from_element(1, 1, r))
            .unwrap();
        model
            .config_mut()
            .set_final_cost(DMatrix::from_element(1, 1, qf))
            .unwrap();
        Arc::new(model)
    }

    fn unbounded_except(
        dim: usize,
        index: usize,
        lower: f64,
        upper: f64,
    ) -> (DVector<f64>, DVector<f64>) {
        let mut l = DVector::from_element(dim, f64::NEG_INFINITY);
        let mut u = DVector::from_element(dim, f64::INFINITY);
        l[index] = lower;
        u[index] = upper;
        (l, u)
    }

    fn scalars(values: &[f64]) -> Vec<DVector<f64>> {
        values.iter().map(|&v| DVector::from_element(1, v)).collect()
    }

    /// A wavy bicycle reference which is not a rollout of the model.
    fn bicycle_reference(horizon: usize, dt: f64) -> Vec<DVector<f64>> {
        (0..horizon)
            .map(|i| {
                let t = i as f64 * dt;
                DVector::from_vec(vec![
                    2.0 * t,
                    0.5 * (0.8 * t).sin() + 0.05 * (7.0 * t).cos(),
                    2.0,
                    0.2 * (0.8 * t).cos(),
                ])
            })
            .collect()
    }

    #[test]
    fn test_decide() {
        let params = Params::default();

        let d = decide(None, 10.0, &params);
        assert!(d.accept);
        assert_eq!(d.stop, None);
        assert_eq!(d.rel_improvement, None);

        let d = decide(Some(10.0), 5.0, &params);
        assert!(d.accept);
        assert_eq!(d.stop, None);
        assert_eq!(d.rel_improvement, Some(0.5));

        let d = decide(Some(10.0), 9.9999, &params);
        assert!(d.accept);
        assert_eq!(d.stop, Some(StopReason::Stagnated));

        let d = decide(Some(10.0), 10.0, &params);
        assert!(!d.accept);
        assert_eq!(d.stop, Some(StopReason::Stagnated));

        let d = decide(Some(10.0), 11.0, &params);
        assert!(!d.accept);
        assert_eq!(d.stop, Some(StopReason::CostIncreased));

        let d = decide(Some(10.0), f64::NAN, &params);
        assert!(!d.accept);
        assert_eq!(d.stop, Some(StopReason::NonFiniteCost));

        let d = decide(None, 0.0, &params);
        assert!(d.accept);
        assert_eq!(d.stop, Some(StopReason::CostFloorReached));
    }

    #[test]
    fn test_scalar_integrator_scenario() {
        let model = scalar_model(1.0, 0.01, 100.0);
        let mut opt =
            ScvxOptimiser::new(model, scalars(&[0.0, 1.0, 2.0]), 1.0, Params::default()).unwrap();
        opt.set_initial_controls(scalars(&[0.0, 0.0])).unwrap();

        let report = opt.solve(&mut ClarabelBackend::default()).unwrap();

        assert!(report.status.is_converged(), "status {:?}", report.status);
        for (x, expected) in opt.states().iter().zip(&[0.0, 1.0, 2.0]) {
            assert!((x[0] - expected).abs() < 0.02);
        }
        for u in opt.controls() {
            assert!((u[0] - 1.0).abs() < 0.02);
        }
        assert!(opt.cost().unwrap() < 0.05);
        assert_eq!(report.cost, opt.cost());
        assert_eq!(report.trajectory.horizon(), 3);
    }

    #[test]
    fn test_fixed_point_converges_in_one_iteration() {
        let model = Arc::new(Bicycle::with_dt(0.1).unwrap());
        let controls = vec![DVector::zeros(2); 9];
        let reference = model.rollout(&DVector::from_vec(vec![0.0, 0.0, 1.0, 0.2]), &controls);

        let mut params = Params::default();
        params.abs_cost_tol = 1e-6;
        let mut opt = ScvxOptimiser::new(model, reference, 0.1, params).unwrap();

        let report = opt.solve(&mut ClarabelBackend::default()).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(
            report.status,
            OptStatus::Converged(StopReason::CostFloorReached)
        );
        assert!(report.cost.unwrap() < 1e-6);
    }

    #[test]
    fn test_accepted_costs_non_increasing() {
        let dt = 0.2;
        let model = Arc::new(Bicycle::with_dt(dt).unwrap());
        let mut opt =
            ScvxOptimiser::new(model, bicycle_reference(20, dt), dt, Params::default()).unwrap();

        let report = opt.solve(&mut ClarabelBackend::default()).unwrap();
        assert!(report.iterations >= 1);

        let accepted: Vec<f64> = report
            .history
            .iter()
            .filter(|r| r.accepted)
            .map(|r| r.cost)
            .collect();
        assert!(!accepted.is_empty());
        for pair in accepted.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
        assert_eq!(report.cost, accepted.last().copied());

        // Rejected iterates never beat the best
        let best = report.cost.unwrap();
        assert!(report.history.iter().all(|r| r.accepted || r.cost >= best || !r.cost.is_finite()));
    }

    #[test]
    fn test_control_bounds_respected() {
        let dt = 0.2;
        let mut bicycle = Bicycle::with_dt(dt).unwrap();
        bicycle
            .config_mut()
            .set_control_limits(
                DVector::from_vec(vec![-0.5, -0.3]),
                DVector::from_vec(vec![0.5, 0.3]),
            )
            .unwrap();

        // Reference asks for a hard turn and a speed change
        let reference: Vec<DVector<f64>> = (0..15)
            .map(|i| {
                let t = i as f64 * dt;
                DVector::from_vec(vec![t, t * t, 1.0 + 2.0 * t, 1.5 * t])
            })
            .collect();

        let model = Arc::new(bicycle);
        let mut opt = ScvxOptimiser::new(model, reference, dt, Params::default()).unwrap();
        opt.solve(&mut ClarabelBackend::default()).unwrap();

        for u in opt.controls() {
            assert!(u[0].abs() <= 0.5 + 1e-5, "acc {}", u[0]);
            assert!(u[1].abs() <= 0.3 + 1e-5, "rate {}", u[1]);
        }
        assert!(opt.controls().iter().any(|u| (u[0].abs() - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_speed_limits_respected() {
        let dt = 0.2;
        let mut bicycle = Bicycle::with_dt(dt).unwrap();
        let (lower, upper) = unbounded_except(4, 2, 0.5, 1.5);
        bicycle.config_mut().set_state_limits(lower, upper).unwrap();

        // Reference speeds up well past the limit
        let reference: Vec<DVector<f64>> = (0..15)
            .map(|i| {
                let t = i as f64 * dt;
                DVector::from_vec(vec![t + 0.5 * t * t, 0.2 * t, 1.0 + t, 0.1])
            })
            .collect();

        let model = Arc::new(bicycle);
        let mut opt = ScvxOptimiser::new(model, reference, dt, Params::default()).unwrap();
        let report = opt.solve(&mut ClarabelBackend::default()).unwrap();
        assert!(report.cost.is_some());

        for x in opt.states() {
            assert!(x[2] >= 0.5 - 1e-6 && x[2] <= 1.5 + 1e-6, "speed {}", x[2]);
        }
        assert!(opt.states().iter().any(|x| x[2] > 1.4));
    }

    #[test]
    fn test_rollout_outside_state_bounds_rejected() {
        let mut model = LinearModel::scalar_integrator(1.0).unwrap();
        model
            .config_mut()
            .set_state_limits(DVector::from_element(1, -10.0), DVector::from_element(1, 1.5))
            .unwrap();
        let mut opt =
            ScvxOptimiser::new(Arc::new(model), scalars(&[0.0, 1.0, 2.0]), 1.0, Params::default())
                .unwrap();

        // z = [x_0, x_1, x_2, u_0, u_1]. The second rollout tracks perfectly
        // but ends above the upper bound.
        let mut backend = ScriptedBackend {
            solutions: vec![
                DVector::from_vec(vec![0.0, 0.5, 1.0, 0.5, 0.5]),
                DVector::from_vec(vec![0.0, 1.0, 2.0, 1.0, 1.0]),
            ],
        };

        let report = opt.solve(&mut backend).unwrap();
        assert_eq!(
            report.status,
            OptStatus::Converged(StopReason::StateBoundsViolated)
        );
        assert_eq!(report.iterations, 2);
        assert!(report.history[0].accepted && report.history[0].within_bounds);
        assert!(!report.history[1].accepted && !report.history[1].within_bounds);
        assert!(report.history[1].cost < report.history[0].cost);

        assert_eq!(report.cost, Some(report.history[0].cost));
        assert_eq!(opt.states(), &scalars(&[0.0, 0.5, 1.0])[..]);
    }

    #[test]
    fn test_bicycle_rollout_within_state_bounds() {
        let dt = 0.5;
        let mut bicycle = Bicycle::with_dt(dt).unwrap();
        let (lower, upper) = unbounded_except(4, 1, f64::NEG_INFINITY, 1.0);
        bicycle.config_mut().set_state_limits(lower, upper).unwrap();

        // The heading keeps turning after the path flattens at the bound
        let reference: Vec<DVector<f64>> = (0..15)
            .map(|i| {
                let t = i as f64 * dt;
                DVector::from_vec(vec![t, (0.3 * t * t).min(1.0), 1.0, (0.6 * t).min(1.2)])
            })
            .collect();

        let model = Arc::new(bicycle);
        let mut opt = ScvxOptimiser::new(model, reference, dt, Params::default()).unwrap();
        let report = opt.solve(&mut ClarabelBackend::default()).unwrap();

        for x in opt.states() {
            assert!(x[1] <= 1.0 + 1e-6, "y {}", x[1]);
        }
        for record in report.history.iter().filter(|r| r.accepted) {
            assert!(record.within_bounds);
        }
    }

    #[test]
    fn test_model_mismatch_shrinks_with_dt() {
        // Controls pinned by their bounds to a constant turn, linearised
        // about straight line motion
        let mismatch = |dt: f64| {
            let mut bicycle = Bicycle::with_dt(dt).unwrap();
            bicycle
                .config_mut()
                .set_control_limits(
                    DVector::from_vec(vec![0.0, 0.5]),
                    DVector::from_vec(vec![0.0, 0.5]),
                )
                .unwrap();
            let reference = bicycle.rollout(
                &DVector::from_vec(vec![0.0, 0.0, 1.0, 0.0]),
                &vec![DVector::zeros(2); 9],
            );

            let mut params = Params::default();
            params.max_iters = 1;
            let mut opt = ScvxOptimiser::new(Arc::new(bicycle), reference, dt, params).unwrap();
            let report = opt.solve(&mut ClarabelBackend::default()).unwrap();
            report.history[0].max_model_mismatch
        };

        let coarse = mismatch(0.2);
        let mid = mismatch(0.1);
        let fine = mismatch(0.05);

        assert!(coarse > 1e-2, "coarse {}", coarse);
        assert!(mid < 0.3 * coarse, "{} vs {}", mid, coarse);
        assert!(fine < 0.3 * mid, "{} vs {}", fine, mid);
    }

    #[test]
    fn test_affine_remainder_settings() {
        // A linear model has no remainder, so both settings agree
        let run = |affine_remainder: bool| {
            let mut params = Params::default();
            params.affine_remainder = affine_remainder;
            let model = scalar_model(1.0, 0.01, 100.0);
            let mut opt =
                ScvxOptimiser::new(model, scalars(&[0.0, 1.0, 2.0]), 1.0, params).unwrap();
            opt.solve(&mut ClarabelBackend::default()).unwrap();
            opt.states().to_vec()
        };
        let with = run(true);
        let without = run(false);
        for (a, b) in with.iter().zip(without.iter()) {
            assert!((a - b).amax() < 1e-6);
        }

        // Without the remainder the bicycle still only accepts improvements
        let dt = 0.2;
        let mut params = Params::default();
        params.affine_remainder = false;
        let model = Arc::new(Bicycle::with_dt(dt).unwrap());
        let mut opt = ScvxOptimiser::new(model, bicycle_reference(20, dt), dt, params).unwrap();
        let report = opt.solve(&mut ClarabelBackend::default()).unwrap();

        assert!(report.cost.is_some());
        let accepted: Vec<f64> = report
            .history
            .iter()
            .filter(|r| r.accepted)
            .map(|r| r.cost)
            .collect();
        for pair in accepted.windows(2) {
            assert!(pair[1] <= pair[0]);
        }
    }

    #[test]
    fn test_non_finite_first_cost() {
        let model = scalar_model(1.0, 1.0, 1.0);
        let mut opt =
            ScvxOptimiser::new(model, scalars(&[0.0, 1.0, 2.0]), 1.0, Params::default()).unwrap();
        let mut backend = ScriptedBackend {
            solutions: vec![DVector::from_vec(vec![0.0, 1.0, 2.0, f64::NAN, 1.0])],
        };

        let report = opt.solve(&mut backend).unwrap();
        assert_eq!(report.status, OptStatus::Converged(StopReason::NonFiniteCost));
        assert_eq!(report.iterations, 1);
        assert_eq!(report.cost, None);
        assert_eq!(report.trajectory.states, scalars(&[0.0, 1.0, 2.0]));
    }

    #[test]
    fn test_terminal_weight_sensitivity() {
        let reference = scalars(&[0.0, 1.0, 2.0, 3.0]);

        let final_error = |qf: f64| {
            let model = scalar_model(1.0, 1.0, qf);
            let mut opt =
                ScvxOptimiser::new(model, reference.clone(), 1.0, Params::default()).unwrap();
            opt.solve(&mut ClarabelBackend::default()).unwrap();
            (opt.states()[3][0] - 3.0).abs()
        };

        let loose = final_error(1.0);
        let tight = final_error(100.0);
        assert!(tight < loose, "tight {} loose {}", tight, loose);
        assert!(tight < 0.05);
    }

    #[test]
    fn test_keep_out_constraint() {
        let mut model = LinearModel::planar_integrator(1.0).unwrap();
        model
            .config_mut()
            .set_cost(DMatrix::identity(2, 2), DMatrix::identity(2, 2) * 0.01)
            .unwrap();
        let model = Arc::new(model);

        let reference: Vec<DVector<f64>> = (0..5)
            .map(|i| DVector::from_vec(vec![i as f64, 0.0]))
            .collect();
        let circle = CircleConstraint::keep_out(Vector2::new(2.0, 0.3), 1.0);

        let mut opt = ScvxOptimiser::new(model, reference.clone(), 1.0, Params::default()).unwrap();
        opt.add_constraint(Box::new(circle.clone())).unwrap();
        opt.solve(&mut ClarabelBackend::default()).unwrap();

        for x in opt.states() {
            assert!(circle.evaluate(x) >= -1e-4, "state {} inside", x);
        }

        // Without the constraint the reference passes through the circle
        assert!(circle.evaluate(&reference[2]) < 0.0);
    }

    #[test]
    fn test_incompatible_constraint() {
        let model = scalar_model(1.0, 1.0, 1.0);
        let mut opt =
            ScvxOptimiser::new(model, scalars(&[0.0, 1.0]), 1.0, Params::default()).unwrap();
        assert_eq!(
            opt.add_constraint(Box::new(CircleConstraint::keep_out(Vector2::zeros(), 1.0)))
                .err(),
            Some(ConfigError::IncompatibleConstraint(1))
        );
    }

    #[test]
    fn test_construction_errors() {
        let model = scalar_model(1.0, 1.0, 1.0);

        assert!(matches!(
            ScvxOptimiser::new(model.clone(), scalars(&[0.0]), 1.0, Params::default()),
            Err(ConfigError::HorizonTooShort(1))
        ));

        assert!(matches!(
            ScvxOptimiser::new(model.clone(), scalars(&[0.0, 1.0]), 0.5, Params::default()),
            Err(ConfigError::TimeStepMismatch { .. })
        ));

        let reference = vec![DVector::zeros(1), DVector::zeros(2)];
        assert!(matches!(
            ScvxOptimiser::new(model.clone(), reference, 1.0, Params::default()),
            Err(ConfigError::ReferenceShape { index: 1, expected: 1, found: 2 })
        ));

        let mut opt =
            ScvxOptimiser::new(model, scalars(&[0.0, 1.0, 2.0]), 1.0, Params::default()).unwrap();
        assert!(matches!(
            opt.set_initial_controls(scalars(&[0.0])),
            Err(ConfigError::ControlsShape { found_len: 1, .. })
        ));
        assert!(matches!(
            opt.set_initial_controls(vec![DVector::zeros(1), DVector::zeros(3)]),
            Err(ConfigError::ControlsShape { bad_index: Some(1), .. })
        ));
    }

    #[test]
    fn test_solver_failure() {
        let model = scalar_model(1.0, 1.0, 1.0);
        let mut opt =
            ScvxOptimiser::new(model, scalars(&[0.0, 1.0, 2.0]), 1.0, Params::default()).unwrap();

        match opt.solve(&mut FailingBackend) {
            Err(OptError::SolverFailure { iteration, source }) => {
                assert_eq!(iteration, 0);
                assert_eq!(source, QpError::Infeasible);
            }
            other => panic!("unexpected result {:?}", other.map(|r| r.status)),
        }
        assert_eq!(opt.status(), OptStatus::SolverFailed { iteration: 0 });
        assert_eq!(opt.cost(), None);

        assert!(matches!(
            opt.solve(&mut TruncatingBackend),
            Err(OptError::SolverFailure {
                source: QpError::SolutionSize { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_cancelled_before_start() {
        let model = scalar_model(1.0, 1.0, 1.0);
        let mut opt =
            ScvxOptimiser::new(model, scalars(&[0.0, 1.0, 2.0]), 1.0, Params::default()).unwrap();
        let token = Arc::new(AtomicBool::new(true));
        opt.set_cancel_token(token);

        let report = opt.solve(&mut FailingBackend).unwrap();
        assert_eq!(report.status, OptStatus::Cancelled);
        assert_eq!(report.iterations, 0);
        assert_eq!(report.cost, None);
    }

    #[test]
    fn test_cancelled_keeps_best_so_far() {
        let dt = 0.2;
        let model = Arc::new(Bicycle::with_dt(dt).unwrap());
        let mut opt =
            ScvxOptimiser::new(model, bicycle_reference(20, dt), dt, Params::default()).unwrap();
        let token = Arc::new(AtomicBool::new(false));
        opt.set_cancel_token(token.clone());

        let mut backend = CancellingBackend {
            inner: ClarabelBackend::default(),
            token,
            solves_before_cancel: 1,
        };

        let report = opt.solve(&mut backend).unwrap();
        assert_eq!(report.iterations, 1);
        assert!(report.history[0].accepted);
        assert_eq!(report.cost, Some(report.history[0].cost));
        assert_eq!(report.status, OptStatus::Cancelled);
        assert_eq!(opt.states().len(), 20);
    }

    #[test]
    fn test_budget_exhausted() {
        let dt = 0.2;
        let model = Arc::new(Bicycle::with_dt(dt).unwrap());
        let mut params = Params::default();
        params.max_iters = 1;
        let mut opt = ScvxOptimiser::new(model, bicycle_reference(20, dt), dt, params).unwrap();

        let report = opt.solve(&mut ClarabelBackend::default()).unwrap();
        assert_eq!(report.iterations, 1);
        assert_eq!(report.status, OptStatus::NotConverged);
        assert!(report.cost.is_some());
    }
}
