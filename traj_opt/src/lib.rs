//! # Trajectory optimisation library
//!
//! Sequential convex trajectory optimisation for wheeled vehicle kinematics.
//! A nonlinear dynamics model is linearised about a nominal trajectory, the
//! resulting tracking problem is solved as a sparse QP and the QP's controls
//! are rolled back out through the nonlinear model, repeating until the
//! tracking cost stops improving.
//!
//! ## Modules
//!
//! - `dynamics` - the dynamics model trait, its configuration and the
//!   bicycle, jerk bicycle, Dubins and linear models
//! - `qp` - the QP problem, sparse builders and the Clarabel backend
//! - `scvx` - the optimiser itself
//! - `constraint` - scalar state constraints which can be added to the
//!   optimiser
//! - `scenario` - synthetic tracking scenarios loaded from parameter files
//! - `trajectory` - state/control sequences

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod constraint;
pub mod dynamics;
pub mod qp;
pub mod scenario;
pub mod scvx;
pub mod trajectory;
