//! State and control sequences

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A trajectory over a horizon of `H` states, driven by `H - 1` controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub states: Vec<DVector<f64>>,
    pub controls: Vec<DVector<f64>>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Trajectory {
    pub fn new(states: Vec<DVector<f64>>, controls: Vec<DVector<f64>>) -> Self {
        Self { states, controls }
    }

    /// Number of states.
    pub fn horizon(&self) -> usize {
        self.states.len()
    }

    pub fn final_state(&self) -> Option<&DVector<f64>> {
        self.states.last()
    }
}
