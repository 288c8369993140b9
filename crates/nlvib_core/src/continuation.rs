//! Pseudo-arclength continuation of periodic solutions in the excitation
//! frequency.

pub mod bifurcation;
pub mod corrector;
pub mod problem;
pub mod stability;
pub mod types;
pub mod util;

pub use bifurcation::BifurcationDetector;
pub use corrector::{correct, Constraint, CorrectorOutcome, FailureReason, NewtonSettings};
pub use problem::{ContinuationProblem, PointDiagnostics};
pub use stability::{classify, floquet_exponents, floquet_multipliers, HillMatrices};
pub use types::{
    BifurcationKind, BifurcationRecord, Branch, BranchPoint, ContinuationResult, Stability,
    Termination,
};

use anyhow::{bail, Result};
use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::config::ContinuationConfig;
use crate::error::HbError;
use util::{angle_degrees, bordered_tangent, nullspace_tangent, orient, secant};

/// Augmented solver state `[omega * parameter_scale, z...]` of a point.
pub fn point_to_aug(point: &BranchPoint, parameter_scale: f64) -> DVector<f64> {
    let mut aug = DVector::zeros(point.z.len() + 1);
    aug[0] = point.omega * parameter_scale;
    for (i, &val) in point.z.iter().enumerate() {
        aug[i + 1] = val;
    }
    aug
}

/// Traces a branch from `start` until a frequency bound, the step budget or
/// a stalled corrector ends the run.
pub fn continue_branch<P: ContinuationProblem + ?Sized>(
    problem: &mut P,
    start: &BranchPoint,
    config: &ContinuationConfig,
) -> Result<ContinuationResult> {
    continue_branch_observed(problem, start, config, |_, _| {})
}

/// Like [`continue_branch`], calling `observer` for every accepted point
/// (the start point included) together with the bifurcation it closes.
pub fn continue_branch_observed<P, F>(
    problem: &mut P,
    start: &BranchPoint,
    config: &ContinuationConfig,
    mut observer: F,
) -> Result<ContinuationResult>
where
    P: ContinuationProblem + ?Sized,
    F: FnMut(&BranchPoint, Option<&BifurcationRecord>),
{
    config.validate()?;
    let dim = problem.dimension();
    if start.z.len() != dim {
        bail!(HbError::Dimension(format!(
            "start point has {} unknowns, the problem has {dim}",
            start.z.len()
        )));
    }
    if !(start.omega >= config.omega_cont_min && start.omega <= config.omega_cont_max) {
        bail!(HbError::Continuation(format!(
            "start frequency {} lies outside [{}, {}]",
            start.omega, config.omega_cont_min, config.omega_cont_max
        )));
    }

    let newton = problem.newton_settings();
    let detector = BifurcationDetector::new(problem.stability_tolerance());
    let scale = problem.parameter_scale();

    let (mut prev_aug, start_iterations) = match correct(
        problem,
        &point_to_aug(start, scale),
        Constraint::FixedParameter,
        newton,
    ) {
        CorrectorOutcome::Converged {
            aug_state,
            iterations,
            ..
        } => (aug_state, iterations),
        CorrectorOutcome::Failed { reason, .. } => {
            bail!("start point at omega = {} is not a solution: {reason:?}", start.omega)
        }
    };

    let (_, j_ext) = problem.evaluate(&prev_aug)?;
    let mut preferred = DVector::zeros(dim + 1);
    preferred[0] = config.direction();
    let mut prev_tangent = orient(nullspace_tangent(&j_ext)?, &preferred);

    let mut branch = Branch::new();
    let diagnostics = problem.diagnostics(&prev_aug)?;
    let first = branch.push(BranchPoint {
        omega: start.omega,
        z: prev_aug.rows(1, dim).iter().copied().collect(),
        stability: diagnostics.stability,
        exponents: diagnostics.exponents,
        arc_length: 0.0,
        step_size: 0.0,
        iterations: start_iterations,
        tangent_omega: prev_tangent[0],
        amplitude: diagnostics.amplitude,
    });
    observer(&branch.points()[first], None);

    info!(
        omega = start.omega,
        unknowns = dim,
        direction = config.cont_dir,
        "Starting continuation"
    );

    let mut bifurcations = Vec::new();
    let mut step = config.step;
    let mut arc_length = 0.0;
    let mut accepted = 0;

    let termination = loop {
        if accepted >= config.it_cont_max {
            break Termination::StepBudget;
        }

        let predictor = &prev_aug + &prev_tangent * step;
        let outcome = correct(
            problem,
            &predictor,
            Constraint::Arclength {
                predictor: &predictor,
                tangent: &prev_tangent,
            },
            newton,
        );

        let rejection = match outcome {
            CorrectorOutcome::Converged {
                aug_state,
                iterations,
                ..
            } => match next_tangent(problem, &prev_aug, &aug_state, &prev_tangent) {
                Ok(Some(tangent)) => {
                    let angle = angle_degrees(&prev_tangent, &tangent);
                    let omega = aug_state[0] / scale;
                    if config.adaptive_stepsize
                        && angle > config.angle_max_pred
                        && 0.5 * step >= config.step_min
                    {
                        Some(format!("tangent turned by {angle:.1} degrees"))
                    } else if omega < config.omega_cont_min || omega > config.omega_cont_max {
                        break Termination::FrequencyBound;
                    } else {
                        match problem.diagnostics(&aug_state) {
                            Err(err) => Some(format!("point diagnostics failed: {err}")),
                            Ok(diagnostics) => {
                                arc_length += (&aug_state - &prev_aug).norm();
                                let index = branch.push(BranchPoint {
                                    omega,
                                    z: aug_state.rows(1, dim).iter().copied().collect(),
                                    stability: diagnostics.stability,
                                    exponents: diagnostics.exponents,
                                    arc_length,
                                    step_size: step,
                                    iterations,
                                    tangent_omega: tangent[0],
                                    amplitude: diagnostics.amplitude,
                                });
                                let points = branch.points();
                                let record =
                                    detector.compare(&points[index - 1], &points[index], index);
                                debug!(omega, step, iterations, arc_length, "Accepted continuation point");
                                if let Some(record) = &record {
                                    info!(omega, index, kind = record.kind.label(), "Bifurcation detected");
                                }
                                observer(&points[index], record.as_ref());
                                bifurcations.extend(record);

                                accepted += 1;
                                prev_aug = aug_state;
                                prev_tangent = tangent;
                                if config.adaptive_stepsize {
                                    let ratio = (config.opt_it_nr as f64 / iterations.max(1) as f64)
                                        .clamp(0.5, 2.0);
                                    step = (step * ratio).clamp(config.step_min, config.step_max);
                                }
                                None
                            }
                        }
                    }
                }
                Ok(None) => Some("no usable tangent at the corrected point".to_string()),
                Err(err) => Some(format!("tangent evaluation failed: {err}")),
            },
            CorrectorOutcome::Failed { iterations, reason } => {
                Some(format!("corrector failed after {iterations} iterations: {reason:?}"))
            }
        };

        if let Some(reason) = rejection {
            step *= 0.5;
            debug!(step, reason = %reason, "Rejected continuation step");
            if step < config.step_min {
                warn!(
                    omega = prev_aug[0] / scale,
                    step,
                    "Continuation stalled below the minimum step size"
                );
                break Termination::CorrectorStalled;
            }
        }
    };

    info!(
        points = branch.len(),
        bifurcations = bifurcations.len(),
        termination = ?termination,
        "Continuation finished"
    );

    Ok(ContinuationResult {
        branch,
        bifurcations,
        termination,
    })
}

/// Unit tangent at `aug`, pointing the same way as `prev_tangent`.
///
/// `None` when the corrected point coincides with the previous one and no
/// null vector can be found either.
fn next_tangent<P: ContinuationProblem + ?Sized>(
    problem: &mut P,
    prev_aug: &DVector<f64>,
    aug: &DVector<f64>,
    prev_tangent: &DVector<f64>,
) -> Result<Option<DVector<f64>>> {
    if (aug - prev_aug).norm() == 0.0 {
        return Ok(None);
    }
    let (_, j_ext) = problem.evaluate(aug)?;
    let tangent = bordered_tangent(&j_ext, prev_tangent)
        .or_else(|| nullspace_tangent(&j_ext).ok())
        .or_else(|| secant(prev_aug, aug));
    Ok(tangent.map(|t| orient(t, prev_tangent)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use nalgebra::DMatrix;
    use num_complex::Complex;

    /// F(p, x) = x^2 + (p - 2)^2 - 1: a unit circle with a fold at p = 3.
    struct Circle {
        /// Evaluations above this parameter value fail.
        ceiling: f64,
        /// Diagnostics above this parameter value fail.
        blind_above: f64,
    }

    impl ContinuationProblem for Circle {
        fn dimension(&self) -> usize {
            1
        }

        fn evaluate(&mut self, aug: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
            let (p, x) = (aug[0], aug[1]);
            if p > self.ceiling {
                return Err(anyhow!("parameter {p} above ceiling"));
            }
            let residual = DVector::from_element(1, x * x + (p - 2.0).powi(2) - 1.0);
            let j_ext = DMatrix::from_row_slice(1, 2, &[2.0 * (p - 2.0), 2.0 * x]);
            Ok((residual, j_ext))
        }

        fn newton_settings(&self) -> NewtonSettings {
            NewtonSettings {
                tolerance: 1e-10,
                max_iterations: 10,
            }
        }

        fn diagnostics(&mut self, aug: &DVector<f64>) -> Result<PointDiagnostics> {
            if aug[0] > self.blind_above {
                return Err(anyhow!("no diagnostics above {}", self.blind_above));
            }
            let exponents = vec![Complex::new(-aug[1], 0.0)];
            Ok(PointDiagnostics {
                stability: classify(&exponents, 0.0),
                exponents,
                amplitude: vec![aug[1].abs()],
            })
        }
    }

    fn circle() -> Circle {
        Circle {
            ceiling: f64::INFINITY,
            blind_above: f64::INFINITY,
        }
    }

    fn start() -> BranchPoint {
        BranchPoint {
            omega: 2.0,
            z: vec![1.0],
            stability: Stability::Stable,
            exponents: Vec::new(),
            arc_length: 0.0,
            step_size: 0.0,
            iterations: 0,
            tangent_omega: 0.0,
            amplitude: vec![1.0],
        }
    }

    fn config() -> ContinuationConfig {
        ContinuationConfig {
            omega_cont_min: 1.5,
            omega_cont_max: 5.0,
            step: 0.05,
            step_min: 1e-4,
            step_max: 0.1,
            ..ContinuationConfig::default()
        }
    }

    #[test]
    fn passes_the_fold_and_stops_at_the_lower_bound() {
        let result = continue_branch(&mut circle(), &start(), &config()).unwrap();
        assert_eq!(result.termination, Termination::FrequencyBound);
        let folds: Vec<_> = result
            .bifurcations
            .iter()
            .filter(|r| r.kind == BifurcationKind::Fold)
            .collect();
        assert_eq!(folds.len(), 1);
        assert_eq!(result.bifurcations.len(), 1);

        let fold = &result.branch.points()[folds[0].index];
        assert!((fold.omega - 3.0).abs() < 0.1);
        assert!(fold.z[0] < 0.0);

        let points = result.branch.points();
        assert!(points.iter().all(|p| p.omega >= 1.5 && p.omega <= 5.0));
        assert!(points.windows(2).all(|w| w[1].arc_length > w[0].arc_length));
        assert!(points[0].tangent_omega > 0.0);
    }

    #[test]
    fn scan_reproduces_live_detection() {
        let mut seen = Vec::new();
        let mut count = 0;
        let result = continue_branch_observed(&mut circle(), &start(), &config(), |_, record| {
            count += 1;
            seen.extend(record.cloned());
        })
        .unwrap();
        assert_eq!(count, result.branch.len());
        assert_eq!(seen, result.bifurcations);
        assert_eq!(BifurcationDetector::new(0.0).scan(&result.branch), result.bifurcations);
    }

    #[test]
    fn step_budget_counts_accepted_points() {
        let config = ContinuationConfig {
            it_cont_max: 5,
            ..config()
        };
        let result = continue_branch(&mut circle(), &start(), &config).unwrap();
        assert_eq!(result.termination, Termination::StepBudget);
        assert_eq!(result.branch.len(), 6);
    }

    #[test]
    fn steps_stay_within_bounds_and_shrink_when_newton_works_hard() {
        let config = ContinuationConfig {
            opt_it_nr: 1,
            it_cont_max: 200,
            ..config()
        };
        let result = continue_branch(&mut circle(), &start(), &config).unwrap();
        let steps: Vec<f64> = result.branch.points()[1..].iter().map(|p| p.step_size).collect();
        assert!(steps.iter().all(|&s| s >= 1e-4 && s <= 0.1));
        assert!(steps.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn failing_corrector_stalls_the_run() {
        let mut problem = Circle {
            ceiling: 2.0,
            ..circle()
        };
        let result = continue_branch(&mut problem, &start(), &config()).unwrap();
        assert_eq!(result.termination, Termination::CorrectorStalled);
        assert_eq!(result.branch.len(), 1);
    }

    #[test]
    fn failing_diagnostics_keep_the_accepted_branch() {
        let mut problem = Circle {
            blind_above: 2.5,
            ..circle()
        };
        let result = continue_branch(&mut problem, &start(), &config()).unwrap();
        assert_eq!(result.termination, Termination::CorrectorStalled);
        let points = result.branch.points();
        assert!(points.len() > 3, "only {} points kept", points.len());
        assert!(points.iter().all(|p| p.omega <= 2.5));
        assert!(points.last().unwrap().omega > 2.4);
    }

    #[test]
    fn start_outside_the_window_is_rejected() {
        let mut point = start();
        point.omega = 1.0;
        point.z = vec![0.0];
        let err = continue_branch(&mut circle(), &point, &config()).unwrap_err();
        assert!(matches!(err.downcast_ref::<HbError>(), Some(HbError::Continuation(_))));
    }

    #[test]
    fn backward_direction_moves_down_first() {
        let config = ContinuationConfig {
            cont_dir: -1,
            it_cont_max: 3,
            ..config()
        };
        let result = continue_branch(&mut circle(), &start(), &config).unwrap();
        let points = result.branch.points();
        assert!(points[1].omega < points[0].omega);
    }
}
