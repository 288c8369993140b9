//! Bifurcation detection between consecutive branch points.
//!
//! A fold is flagged when the frequency component of the tangent changes
//! sign. Otherwise a change in the number of unstable Floquet exponents is
//! classified by the kind of exponent that crossed.

use super::stability::unstable_count;
use super::types::{BifurcationKind, BifurcationRecord, Branch, BranchPoint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BifurcationDetector {
    tol_stability: f64,
}

impl BifurcationDetector {
    pub fn new(tol_stability: f64) -> Self {
        Self { tol_stability }
    }

    /// Compares `prev` with `next`, the point stored at `next_index`.
    pub fn compare(
        &self,
        prev: &BranchPoint,
        next: &BranchPoint,
        next_index: usize,
    ) -> Option<BifurcationRecord> {
        if prev.tangent_omega * next.tangent_omega < 0.0 {
            return Some(BifurcationRecord::new(next_index, BifurcationKind::Fold));
        }
        if !prev.stability.is_known() || !next.stability.is_known() {
            return None;
        }
        let before = unstable_count(&prev.exponents, self.tol_stability);
        let after = unstable_count(&next.exponents, self.tol_stability);
        if before.complex != after.complex {
            Some(BifurcationRecord::new(next_index, BifurcationKind::BranchPoint))
        } else if before.real != after.real {
            Some(BifurcationRecord::new(next_index, BifurcationKind::RealCrossing))
        } else {
            None
        }
    }

    /// Runs [`compare`](Self::compare) over a finished branch.
    pub fn scan(&self, branch: &Branch) -> Vec<BifurcationRecord> {
        branch
            .points()
            .windows(2)
            .enumerate()
            .filter_map(|(i, pair)| self.compare(&pair[0], &pair[1], i + 1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::types::Stability;
    use num_complex::Complex;

    fn point(tangent_omega: f64, stability: Stability, exponents: Vec<Complex<f64>>) -> BranchPoint {
        BranchPoint {
            omega: 1.0,
            z: vec![0.0; 3],
            stability,
            exponents,
            arc_length: 0.0,
            step_size: 0.01,
            iterations: 1,
            tangent_omega,
            amplitude: vec![0.0],
        }
    }

    fn stable() -> Vec<Complex<f64>> {
        vec![Complex::new(-0.1, 0.5), Complex::new(-0.1, -0.5)]
    }

    #[test]
    fn tangent_sign_change_is_a_fold() {
        let detector = BifurcationDetector::new(1e-8);
        let a = point(0.3, Stability::Stable, stable());
        let b = point(-0.2, Stability::Unstable, vec![Complex::new(0.2, 0.0), Complex::new(-0.4, 0.0)]);
        assert_eq!(
            detector.compare(&a, &b, 7),
            Some(BifurcationRecord::new(7, BifurcationKind::Fold))
        );
    }

    #[test]
    fn complex_pair_crossing_is_a_branch_point() {
        let detector = BifurcationDetector::new(1e-8);
        let a = point(0.3, Stability::Stable, stable());
        let b = point(0.2, Stability::Unstable, vec![Complex::new(0.05, 0.5), Complex::new(0.05, -0.5)]);
        let record = detector.compare(&a, &b, 3).unwrap();
        assert_eq!(record.kind, BifurcationKind::BranchPoint);
        assert_eq!(record.marker, "o");
    }

    #[test]
    fn real_crossing_without_turning_point() {
        let detector = BifurcationDetector::new(1e-8);
        let a = point(0.3, Stability::Stable, vec![Complex::new(-0.01, 0.0), Complex::new(-0.3, 0.0)]);
        let b = point(0.3, Stability::Unstable, vec![Complex::new(0.01, 0.0), Complex::new(-0.3, 0.0)]);
        assert_eq!(detector.compare(&a, &b, 1).map(|r| r.kind), Some(BifurcationKind::RealCrossing));
    }

    #[test]
    fn unknown_stability_suppresses_stability_events() {
        let detector = BifurcationDetector::new(1e-8);
        let a = point(0.3, Stability::Stable, stable());
        let b = point(0.3, Stability::Unknown, Vec::new());
        assert_eq!(detector.compare(&a, &b, 1), None);
        assert_eq!(detector.compare(&b, &a, 1), None);
    }

    #[test]
    fn scan_reports_first_index_after_each_change() {
        let detector = BifurcationDetector::new(1e-8);
        let mut branch = Branch::new();
        branch.push(point(0.5, Stability::Stable, stable()));
        branch.push(point(0.1, Stability::Stable, stable()));
        branch.push(point(-0.1, Stability::Stable, stable()));
        branch.push(point(-0.5, Stability::Stable, stable()));
        branch.push(point(0.2, Stability::Stable, stable()));
        let records = detector.scan(&branch);
        assert_eq!(
            records,
            vec![
                BifurcationRecord::new(2, BifurcationKind::Fold),
                BifurcationRecord::new(4, BifurcationKind::Fold),
            ]
        );
    }
}
