use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;

use super::corrector::NewtonSettings;
use super::types::Stability;

/// Per-point information reported by a continuation problem once a point
/// has converged.
#[derive(Debug, Clone, PartialEq)]
pub struct PointDiagnostics {
    pub stability: Stability,
    pub exponents: Vec<Complex<f64>>,
    pub amplitude: Vec<f64>,
}

/// A residual that can be traced in one parameter by the arclength loop.
///
/// Augmented states are laid out as `[p, x...]`, the (scaled) continuation
/// parameter first.
pub trait ContinuationProblem {
    /// Number of unknowns besides the parameter.
    fn dimension(&self) -> usize;

    /// Residual `F(p, x)` together with the extended Jacobian `[dF/dp | dF/dx]`.
    fn evaluate(&mut self, aug_state: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)>;

    /// Tolerance and iteration budget of the corrector.
    fn newton_settings(&self) -> NewtonSettings;

    /// Real parts up to this value count as stable.
    fn stability_tolerance(&self) -> f64 {
        0.0
    }

    /// Norm the residual is measured against in the convergence test.
    fn residual_scale(&self) -> f64 {
        1.0
    }

    /// Factor between the physical parameter and `aug_state[0]`.
    fn parameter_scale(&self) -> f64 {
        1.0
    }

    /// Optional fill-reducing order of the state unknowns for linear solves.
    fn ordering(&self) -> Option<&[usize]> {
        None
    }

    /// Stability and bookkeeping for an accepted point.
    fn diagnostics(&mut self, aug_state: &DVector<f64>) -> Result<PointDiagnostics>;
}
