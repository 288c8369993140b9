//! Newton-Raphson corrector.
//!
//! Two modes share one loop: with the parameter held fixed only the state
//! is updated; with an arclength constraint the bordered system
//! `[[J, dF/dp], [t_x^T, t_p]]` updates state and parameter together while
//! keeping `t . (y - y_pred) = 0`.

use nalgebra::{DMatrix, DVector};

use super::problem::ContinuationProblem;
use crate::ordering;

#[derive(Debug, Clone, Copy)]
pub enum Constraint<'a> {
    /// Parameter held at `aug_state[0]`.
    FixedParameter,
    /// Stay on the hyperplane through `predictor` orthogonal to `tangent`.
    Arclength {
        predictor: &'a DVector<f64>,
        tangent: &'a DVector<f64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonSettings {
    /// Threshold on the relative residual and on the constraint.
    pub tolerance: f64,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    MaxIterations,
    SingularJacobian,
    NonFinite,
    Evaluation(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CorrectorOutcome {
    Converged {
        aug_state: DVector<f64>,
        iterations: usize,
        residual_norm: f64,
    },
    Failed {
        iterations: usize,
        reason: FailureReason,
    },
}

/// Runs Newton from `initial` until `|F| / residual_scale <= tolerance`
/// and the constraint holds. Never returns an error: every failure mode is
/// a non-converged outcome the caller can react to.
pub fn correct<P: ContinuationProblem + ?Sized>(
    problem: &mut P,
    initial: &DVector<f64>,
    constraint: Constraint<'_>,
    settings: NewtonSettings,
) -> CorrectorOutcome {
    let dim = problem.dimension();
    let scale = problem.residual_scale();
    let mut aug = initial.clone();

    for iteration in 0..=settings.max_iterations {
        let (residual, j_ext) = match problem.evaluate(&aug) {
            Ok(value) => value,
            Err(err) => {
                return CorrectorOutcome::Failed {
                    iterations: iteration,
                    reason: FailureReason::Evaluation(err.to_string()),
                }
            }
        };
        if residual.iter().any(|v| !v.is_finite()) || j_ext.iter().any(|v| !v.is_finite()) {
            return CorrectorOutcome::Failed {
                iterations: iteration,
                reason: FailureReason::NonFinite,
            };
        }

        let constraint_value = match constraint {
            Constraint::FixedParameter => 0.0,
            Constraint::Arclength { predictor, tangent } => tangent.dot(&(&aug - predictor)),
        };
        let residual_norm = residual.norm() / scale;
        if residual_norm <= settings.tolerance && constraint_value.abs() <= settings.tolerance {
            return CorrectorOutcome::Converged {
                aug_state: aug,
                iterations: iteration,
                residual_norm,
            };
        }
        if iteration == settings.max_iterations {
            break;
        }

        let update = match constraint {
            Constraint::FixedParameter => {
                let jac = j_ext.columns(1, dim).into_owned();
                ordering::solve(&jac, &(-&residual), problem.ordering()).map(|dx| {
                    let mut full = DVector::zeros(dim + 1);
                    full.rows_mut(1, dim).copy_from(&dx);
                    full
                })
            }
            Constraint::Arclength { tangent, .. } => {
                // Unknowns ordered [dx, dp] so the state order stays valid.
                let mut a = DMatrix::zeros(dim + 1, dim + 1);
                a.view_mut((0, 0), (dim, dim))
                    .copy_from(&j_ext.columns(1, dim));
                a.view_mut((0, dim), (dim, 1)).copy_from(&j_ext.column(0));
                for j in 0..dim {
                    a[(dim, j)] = tangent[j + 1];
                }
                a[(dim, dim)] = tangent[0];
                let mut rhs = DVector::zeros(dim + 1);
                rhs.rows_mut(0, dim).copy_from(&(-&residual));
                rhs[dim] = -constraint_value;
                ordering::solve(&a, &rhs, problem.ordering()).map(|delta| {
                    let mut full = DVector::zeros(dim + 1);
                    full[0] = delta[dim];
                    full.rows_mut(1, dim).copy_from(&delta.rows(0, dim));
                    full
                })
            }
        };

        let Some(update) = update else {
            return CorrectorOutcome::Failed {
                iterations: iteration + 1,
                reason: FailureReason::SingularJacobian,
            };
        };
        if update.iter().any(|v| !v.is_finite()) {
            return CorrectorOutcome::Failed {
                iterations: iteration + 1,
                reason: FailureReason::NonFinite,
            };
        }
        aug += update;
    }

    CorrectorOutcome::Failed {
        iterations: settings.max_iterations,
        reason: FailureReason::MaxIterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::problem::PointDiagnostics;
    use crate::continuation::types::Stability;
    use anyhow::Result;

    /// F(p, x) = [x0^2 + x1^2 - p, x0 - x1]
    struct Circle;

    impl ContinuationProblem for Circle {
        fn dimension(&self) -> usize {
            2
        }

        fn evaluate(&mut self, aug: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
            let (p, x0, x1) = (aug[0], aug[1], aug[2]);
            let residual = DVector::from_vec(vec![x0 * x0 + x1 * x1 - p, x0 - x1]);
            let j_ext = DMatrix::from_row_slice(2, 3, &[-1.0, 2.0 * x0, 2.0 * x1, 0.0, 1.0, -1.0]);
            Ok((residual, j_ext))
        }

        fn newton_settings(&self) -> NewtonSettings {
            settings()
        }

        fn diagnostics(&mut self, _aug: &DVector<f64>) -> Result<PointDiagnostics> {
            Ok(PointDiagnostics {
                stability: Stability::Stable,
                exponents: Vec::new(),
                amplitude: Vec::new(),
            })
        }
    }

    fn settings() -> NewtonSettings {
        NewtonSettings {
            tolerance: 1e-10,
            max_iterations: 20,
        }
    }

    #[test]
    fn fixed_parameter_converges_without_moving_p() {
        let initial = DVector::from_vec(vec![2.0, 1.5, 0.5]);
        let outcome = correct(&mut Circle, &initial, Constraint::FixedParameter, settings());
        let aug_state = match outcome {
            CorrectorOutcome::Converged { aug_state, .. } => aug_state,
            other => panic!("corrector failed: {other:?}"),
        };
        assert_eq!(aug_state[0], 2.0);
        assert!((aug_state[1] - 1.0).abs() < 1e-9);
        assert!((aug_state[2] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn converged_point_is_returned_unchanged() {
        let initial = DVector::from_vec(vec![2.0, 1.0, 1.0]);
        let outcome = correct(&mut Circle, &initial, Constraint::FixedParameter, settings());
        assert_eq!(
            outcome,
            CorrectorOutcome::Converged {
                aug_state: initial,
                iterations: 0,
                residual_norm: 0.0
            }
        );
    }

    #[test]
    fn arclength_stays_on_the_hyperplane() {
        let predictor = DVector::from_vec(vec![2.0, 1.2, 1.2]);
        let tangent = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let outcome = correct(
            &mut Circle,
            &predictor,
            Constraint::Arclength {
                predictor: &predictor,
                tangent: &tangent,
            },
            settings(),
        );
        let aug_state = match outcome {
            CorrectorOutcome::Converged { aug_state, .. } => aug_state,
            other => panic!("corrector failed: {other:?}"),
        };
        assert!((aug_state[0] - 2.0).abs() < 1e-12);
        assert!((aug_state[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn arclength_with_permutation_agrees() {
        struct Permuted(Circle, Vec<usize>);
        impl ContinuationProblem for Permuted {
            fn dimension(&self) -> usize {
                2
            }
            fn evaluate(&mut self, aug: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
                self.0.evaluate(aug)
            }
            fn newton_settings(&self) -> NewtonSettings {
                settings()
            }
            fn ordering(&self) -> Option<&[usize]> {
                Some(&self.1)
            }
            fn diagnostics(&mut self, aug: &DVector<f64>) -> Result<PointDiagnostics> {
                self.0.diagnostics(aug)
            }
        }

        let predictor = DVector::from_vec(vec![2.1, 1.1, 0.9]);
        let tangent = DVector::from_vec(vec![0.8, 0.3, 0.3]).normalize();
        let constraint = Constraint::Arclength {
            predictor: &predictor,
            tangent: &tangent,
        };
        let plain = correct(&mut Circle, &predictor, constraint, settings());
        let permuted = correct(&mut Permuted(Circle, vec![1, 0]), &predictor, constraint, settings());
        match (plain, permuted) {
            (
                CorrectorOutcome::Converged { aug_state: a, .. },
                CorrectorOutcome::Converged { aug_state: b, .. },
            ) => assert!((a - b).amax() < 1e-9),
            other => panic!("expected convergence, got {other:?}"),
        }
    }

    #[test]
    fn singular_jacobian_is_a_failure() {
        // At x = 0 the fixed-parameter Jacobian [[0, 0], [1, -1]] is singular.
        let initial = DVector::from_vec(vec![1.0, 0.0, 0.0]);
        let outcome = correct(&mut Circle, &initial, Constraint::FixedParameter, settings());
        assert_eq!(
            outcome,
            CorrectorOutcome::Failed {
                iterations: 1,
                reason: FailureReason::SingularJacobian
            }
        );
    }

    #[test]
    fn iteration_budget_is_respected() {
        let initial = DVector::from_vec(vec![2.0, 40.0, -3.0]);
        let outcome = correct(
            &mut Circle,
            &initial,
            Constraint::FixedParameter,
            NewtonSettings {
                tolerance: 1e-14,
                max_iterations: 2,
            },
        );
        assert!(matches!(
            outcome,
            CorrectorOutcome::Failed {
                reason: FailureReason::MaxIterations,
                ..
            }
        ));
    }
}
