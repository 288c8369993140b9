//! Core types for continuation output.
//!
//! A [`Branch`] is an append-only arena of accepted points; bifurcation
//! records refer to points by index.

use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Stability classification of a periodic solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stability {
    Stable,
    Unstable,
    /// The eigen-decomposition failed; the point is kept without a verdict.
    Unknown,
}

impl Stability {
    pub fn is_known(self) -> bool {
        self != Stability::Unknown
    }
}

/// A single accepted solution on a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPoint {
    /// Excitation frequency in rad/s.
    pub omega: f64,
    /// Scaled Fourier state, harmonic blocks of `ndof` values.
    pub z: Vec<f64>,
    pub stability: Stability,
    /// Floquet exponents in physical time units (empty when not computed).
    #[serde(default)]
    pub exponents: Vec<Complex<f64>>,
    /// Cumulative distance along the branch in the scaled augmented space.
    pub arc_length: f64,
    /// Step size of the predictor that produced this point.
    pub step_size: f64,
    /// Corrector iterations spent on this point.
    pub iterations: usize,
    /// Frequency component of the unit tangent at this point.
    pub tangent_omega: f64,
    /// Peak absolute displacement per DOF over one period.
    pub amplitude: Vec<f64>,
}

impl BranchPoint {
    /// Floquet multipliers `exp(lambda * T)` for the base period `T`.
    pub fn multipliers(&self, nu: usize) -> Vec<Complex<f64>> {
        let period = crate::harmonics::base_period(self.omega, nu);
        super::stability::floquet_multipliers(&self.exponents, period)
    }
}

/// Append-only sequence of accepted points, ordered by arc length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    points: Vec<BranchPoint>,
}

impl Branch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[BranchPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BranchPoint> {
        self.points.get(index)
    }

    pub fn last(&self) -> Option<&BranchPoint> {
        self.points.last()
    }

    pub fn omegas(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.omega).collect()
    }

    /// Peak amplitude of one DOF along the branch, `None` when `dof` is
    /// out of range.
    pub fn amplitudes(&self, dof: usize) -> Option<Vec<f64>> {
        self.points.iter().map(|p| p.amplitude.get(dof).copied()).collect()
    }

    pub(crate) fn push(&mut self, point: BranchPoint) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }
}

/// Classification of bifurcation events detected during continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BifurcationKind {
    /// Turning point: the frequency component of the tangent changes sign.
    Fold,
    /// A complex-conjugate pair of exponents crosses the stability boundary.
    BranchPoint,
    /// A real exponent crosses the stability boundary without a turning point.
    RealCrossing,
}

impl BifurcationKind {
    pub fn marker(self) -> &'static str {
        match self {
            BifurcationKind::Fold => "s",
            BifurcationKind::BranchPoint => "o",
            BifurcationKind::RealCrossing => "d",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BifurcationKind::Fold => "fold",
            BifurcationKind::BranchPoint => "branch point",
            BifurcationKind::RealCrossing => "real crossing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BifurcationRecord {
    /// Index into the branch of the first point after the change.
    pub index: usize,
    pub kind: BifurcationKind,
    pub marker: String,
}

impl BifurcationRecord {
    pub fn new(index: usize, kind: BifurcationKind) -> Self {
        Self {
            index,
            kind,
            marker: kind.marker().to_string(),
        }
    }
}

/// Why a continuation run stopped. None of these is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The next point would leave `[omega_cont_min, omega_cont_max]`.
    FrequencyBound,
    /// `it_cont_max` points were accepted.
    StepBudget,
    /// The corrector kept failing until the step fell below `step_min`.
    CorrectorStalled,
}

/// Everything a continuation run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationResult {
    pub branch: Branch,
    pub bifurcations: Vec<BifurcationRecord>,
    pub termination: Termination,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(omega: f64, arc_length: f64) -> BranchPoint {
        BranchPoint {
            omega,
            z: vec![0.1, -0.2, 1.0 / 3.0],
            stability: Stability::Stable,
            exponents: vec![Complex::new(-0.1, 0.7)],
            arc_length,
            step_size: 0.01,
            iterations: 2,
            tangent_omega: 0.5,
            amplitude: vec![0.3],
        }
    }

    #[test]
    fn branch_is_append_only_and_indexed() {
        let mut branch = Branch::new();
        assert!(branch.is_empty());
        assert_eq!(branch.push(point(1.0, 0.0)), 0);
        assert_eq!(branch.push(point(1.1, 0.1)), 1);
        assert_eq!(branch.len(), 2);
        assert_eq!(branch.omegas(), vec![1.0, 1.1]);
        assert_eq!(branch.amplitudes(0), Some(vec![0.3, 0.3]));
        assert_eq!(branch.amplitudes(1), None);
        assert_eq!(branch.last().map(|p| p.omega), Some(1.1));
    }

    #[test]
    fn records_carry_their_marker() {
        let record = BifurcationRecord::new(4, BifurcationKind::Fold);
        assert_eq!(record.marker, "s");
        assert_eq!(BifurcationKind::BranchPoint.label(), "branch point");
    }

    #[test]
    fn result_round_trips_through_json_without_precision_loss() {
        let mut branch = Branch::new();
        branch.push(point(std::f64::consts::PI, 0.0));
        branch.push(point(1.0 + f64::EPSILON, 1e-17));
        let result = ContinuationResult {
            branch,
            bifurcations: vec![BifurcationRecord::new(1, BifurcationKind::RealCrossing)],
            termination: Termination::StepBudget,
        };
        let json = serde_json::to_string(&result).expect("serialize");
        let back: ContinuationResult = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, result);
    }
}
