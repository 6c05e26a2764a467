//! Linearisation of the dynamics about the nominal trajectory

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector};

// Internal
use crate::dynamics::DynamicsModel;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// First order model of one transition about a nominal point:
///
/// ```text
/// x' ~= A x + B u + c
/// ```
///
/// where `c = f(x_bar, u_bar) - A x_bar - B u_bar`.
#[derive(Debug, Clone)]
pub struct Linearisation {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
    pub c: DVector<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Linearisation {
    /// Linearise the model about `(x, u)`.
    pub fn about<M>(model: &M, x: &DVector<f64>, u: &DVector<f64>) -> Self
    where
        M: DynamicsModel + ?Sized,
    {
        let a = model.jacobian_state(x, u);
        let b = model.jacobian_control(x, u);
        let c = model.transition(x, u) - &a * x - &b * u;

        Self { a, b, c }
    }

    /// Discard the affine term, leaving `x' ~= A x + B u`.
    pub fn drop_remainder(&mut self) {
        self.c.fill(0.0);
    }

    /// Evaluate the linear model at `(x, u)`.
    pub fn predict(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.a * x + &self.b * u + &self.c
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Linearise every transition of the nominal trajectory.
///
/// Returns `controls.len()` linearisations, one per interval. Each one
/// depends only on the nominal pair at its own index.
pub fn linearise<M>(
    model: &M,
    states: &[DVector<f64>],
    controls: &[DVector<f64>],
) -> Vec<Linearisation>
where
    M: DynamicsModel + ?Sized,
{
    states
        .iter()
        .zip(controls.iter())
        .map(|(x, u)| Linearisation::about(model, x, u))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dynamics::{Bicycle, LinearModel};

    #[test]
    fn test_linear_model_has_no_remainder() {
        let model = LinearModel::planar_integrator(0.1).unwrap();
        let lin = Linearisation::about(
            &model,
            &DVector::from_vec(vec![1.0, -2.0]),
            &DVector::from_vec(vec![0.5, 0.5]),
        );
        assert_eq!(lin.c, DVector::zeros(2));
    }

    #[test]
    fn test_prediction_exact_at_nominal() {
        let model = Bicycle::with_dt(0.1).unwrap();
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 0.7]);
        let u = DVector::from_vec(vec![0.1, -0.4]);

        let lin = Linearisation::about(&model, &x, &u);
        let err = (lin.predict(&x, &u) - model.transition(&x, &u)).amax();
        assert!(err < 1e-12);
    }

    #[test]
    fn test_drop_remainder() {
        let model = Bicycle::with_dt(0.1).unwrap();
        let x = DVector::from_vec(vec![1.0, 2.0, 3.0, 0.7]);
        let u = DVector::from_vec(vec![0.1, -0.4]);

        let mut lin = Linearisation::about(&model, &x, &u);
        assert!(lin.c.amax() > 0.0);

        lin.drop_remainder();
        assert_eq!(lin.c, DVector::zeros(4));
        assert_eq!(lin.predict(&x, &u), &lin.a * &x + &lin.b * &u);
    }

    #[test]
    fn test_linearise_about_rollout() {
        let model = Bicycle::with_dt(0.1).unwrap();
        let controls = vec![DVector::from_vec(vec![0.5, 0.2]); 5];
        let states = model.rollout(&DVector::from_vec(vec![0.0, 0.0, 1.0, 0.0]), &controls);

        let lins = linearise(&model, &states, &controls);
        assert_eq!(lins.len(), 5);

        // Linearised about the rollout itself, so every prediction is exact
        for (i, lin) in lins.iter().enumerate() {
            let err = (lin.predict(&states[i], &controls[i]) - &states[i + 1]).amax();
            assert!(err < 1e-12);
        }
    }
}
