//! Harmonic-balance residual of a forced nonlinear mechanical system.
//!
//! The unknown is the scaled Fourier state `z` (harmonic blocks of `ndof`
//! values, see [`crate::aft`]) together with the scaled frequency
//! `omega_hat = omega * scale_t`. Displacements are `scale_x * z` and time
//! derivatives are taken with respect to `tau = t / scale_t`, so the linear
//! part of the residual uses
//! `M_hat = M sx / st^2`, `C_hat = C sx / st`, `K_hat = K sx`.
//! Nonlinear forces are always evaluated on physical displacements and
//! velocities through the alternating frequency/time scheme.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use tracing::{debug, warn};

use crate::aft::{coefficient_matrix, coefficient_vector, derivative_operator, Aft};
use crate::config::{ContinuationConfig, HbConfig};
use crate::continuation::{
    self, classify, correct, floquet_exponents, BranchPoint, Constraint, ContinuationProblem,
    ContinuationResult, CorrectorOutcome, HillMatrices, NewtonSettings, PointDiagnostics,
    Stability,
};
use crate::error::HbError;
use crate::harmonics::{base_period, signal, time_grid, HarmonicComponents, SignalKind};
use crate::nlforce::NonlinearForce;
use crate::ordering::{pattern_of, reverse_cuthill_mckee};
use crate::solvers::{integrate, ForcedResponse};
use crate::system::{Excitation, LinearSystem};

/// Residual, state Jacobian and frequency derivative at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct HbEvaluation {
    pub residual: DVector<f64>,
    pub jacobian: DMatrix<f64>,
    pub d_omega: DVector<f64>,
    /// Sensitivity of the nonlinear force coefficients to the scaled
    /// velocity coefficients; enters the first-order Hill matrix.
    pub velocity_jacobian: DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct HarmonicBalance {
    config: HbConfig,
    system: LinearSystem,
    force: NonlinearForce,
    excitation: Excitation,
    mass: DMatrix<f64>,
    damping: DMatrix<f64>,
    stiffness: DMatrix<f64>,
    aft: Aft,
    coupled: Vec<(usize, usize)>,
    forcing: DVector<f64>,
    reference_norm: f64,
    ordering: Option<Vec<usize>>,
}

impl HarmonicBalance {
    pub fn new(
        system: LinearSystem,
        force: NonlinearForce,
        excitation: Excitation,
        config: HbConfig,
    ) -> Result<Self> {
        config.validate()?;
        let ndof = system.ndof();
        if excitation.amplitude.len() != ndof {
            bail!(HbError::Dimension(format!(
                "excitation has {} entries for a {ndof}-DOF system",
                excitation.amplitude.len()
            )));
        }
        if excitation.amplitude.iter().any(|v| !v.is_finite()) || !excitation.phase.is_finite() {
            bail!(HbError::Dimension("excitation must be finite".into()));
        }
        force.validate(ndof)?;

        let (sx, st) = (config.scale_x, config.scale_t);
        let mass = &system.mass * (sx / (st * st));
        let damping = &system.damping * (sx / st);
        let stiffness = &system.stiffness * sx;
        let aft = Aft::new(config.nh, config.time_samples());
        let coupled = force.coupled_pairs();

        let mut forcing = DVector::zeros(ndof * config.coefficients_per_dof());
        for dof in 0..ndof {
            let (cos, sin) = excitation.coefficients(dof);
            forcing[(2 * config.nu - 1) * ndof + dof] = cos;
            forcing[2 * config.nu * ndof + dof] = sin;
        }
        let reference_norm = if excitation.is_zero() {
            debug!("Unforced system, residuals are measured against unit forcing");
            1.0
        } else {
            forcing.norm()
        };

        let mut hb = Self {
            config,
            system,
            force,
            excitation,
            mass,
            damping,
            stiffness,
            aft,
            coupled,
            forcing,
            reference_norm,
            ordering: None,
        };
        if config.rcm_permute {
            let perm = reverse_cuthill_mckee(&pattern_of(&hb.structure()));
            debug!(unknowns = perm.len(), "Computed reverse Cuthill-McKee order");
            hb.ordering = Some(perm);
        }
        Ok(hb)
    }

    pub fn config(&self) -> &HbConfig {
        &self.config
    }

    pub fn system(&self) -> &LinearSystem {
        &self.system
    }

    pub fn force(&self) -> &NonlinearForce {
        &self.force
    }

    pub fn excitation(&self) -> &Excitation {
        &self.excitation
    }

    pub fn ndof(&self) -> usize {
        self.system.ndof()
    }

    /// Number of Fourier unknowns.
    pub fn dimension(&self) -> usize {
        self.ndof() * self.config.coefficients_per_dof()
    }

    pub fn reference_norm(&self) -> f64 {
        self.reference_norm
    }

    /// Fill-reducing order of the unknowns, when enabled.
    pub fn ordering(&self) -> Option<&[usize]> {
        self.ordering.as_deref()
    }

    /// Excitation in Fourier form.
    pub fn excitation_vector(&self) -> &DVector<f64> {
        &self.forcing
    }

    /// Derivative operator on one DOF per unit of `omega_hat`.
    fn unit_derivative(&self) -> DMatrix<f64> {
        derivative_operator(self.config.nh, 1.0 / self.config.nu as f64)
    }

    /// Linear dynamic stiffness `I (x) K + D (x) C + D^2 (x) M` at `omega_hat`.
    pub fn linear_operator(&self, omega_hat: f64) -> DMatrix<f64> {
        let d = self.unit_derivative() * omega_hat;
        let nc = self.config.coefficients_per_dof();
        DMatrix::<f64>::identity(nc, nc).kronecker(&self.stiffness)
            + d.kronecker(&self.damping)
            + (&d * &d).kronecker(&self.mass)
    }

    /// Solution of the linear problem, `None` when it is singular.
    pub fn linear_solution(&self, omega_hat: f64) -> Option<DVector<f64>> {
        self.linear_operator(omega_hat).lu().solve(&self.forcing)
    }

    /// Residual and derivatives at state `z` and scaled frequency `omega_hat`.
    pub fn evaluate(&self, z: &DVector<f64>, omega_hat: f64) -> Result<HbEvaluation> {
        if !(omega_hat > 0.0 && omega_hat.is_finite()) {
            bail!(HbError::NonPositiveFrequency(omega_hat / self.config.scale_t));
        }
        let n = self.ndof();
        let nz = self.dimension();
        if z.len() != nz {
            bail!(HbError::Dimension(format!("state has {} entries, expected {nz}", z.len())));
        }

        let unit = self.unit_derivative();
        let d = &unit * omega_hat;
        let linear = self.linear_operator(omega_hat);
        let d_linear = unit.kronecker(&self.damping) + (&unit * &d * 2.0).kronecker(&self.mass);

        let mut residual = &linear * z - &self.forcing;
        let mut jacobian = linear;
        let mut d_omega = &d_linear * z;
        let mut velocity_jacobian = DMatrix::zeros(nz, nz);

        if !self.force.is_none() {
            let (sx, st) = (self.config.scale_x, self.config.scale_t);
            let coeffs = coefficient_matrix(z, n) * sx;
            let velocity_coeffs = &coeffs * d.transpose() / st;
            let x = self.aft.to_time(&coeffs);
            let xd = self.aft.to_time(&velocity_coeffs);
            let history = self.force.evaluate(&x, &xd);
            residual += coefficient_vector(&self.aft.to_frequency(&history.force));

            let mut has_velocity = false;
            for &(i, j) in &self.coupled {
                let row = history.derivative_row(i, j);
                let gx: Vec<f64> = history.dfdx.row(row).iter().copied().collect();
                if gx.iter().any(|v| *v != 0.0) {
                    scatter(&mut jacobian, &(self.aft.projection(&gx) * sx), i, j, n);
                }
                let gv: Vec<f64> = history.dfdxd.row(row).iter().copied().collect();
                if gv.iter().any(|v| *v != 0.0) {
                    scatter(&mut velocity_jacobian, &(self.aft.projection(&gv) * (sx / st)), i, j, n);
                    has_velocity = true;
                }
            }
            if has_velocity {
                let identity = DMatrix::<f64>::identity(n, n);
                jacobian += &velocity_jacobian * d.kronecker(&identity);
                d_omega += &velocity_jacobian * (unit.kronecker(&identity) * z);
            }
        }

        Ok(HbEvaluation {
            residual,
            jacobian,
            d_omega,
            velocity_jacobian,
        })
    }

    /// Matrices of Hill's eigenvalue problem at `(z, omega_hat)`, in scaled time.
    pub fn hill_matrices(&self, z: &DVector<f64>, omega_hat: f64) -> Result<HillMatrices> {
        let evaluation = self.evaluate(z, omega_hat)?;
        let nc = self.config.coefficients_per_dof();
        let identity = DMatrix::<f64>::identity(nc, nc);
        let d = self.unit_derivative() * omega_hat;
        Ok(HillMatrices {
            h: evaluation.jacobian,
            delta1: (d * 2.0).kronecker(&self.mass)
                + identity.kronecker(&self.damping)
                + evaluation.velocity_jacobian,
            delta2: identity.kronecker(&self.mass),
        })
    }

    /// Floquet exponents of a solution, in 1/s.
    pub fn floquet_exponents(&self, z: &DVector<f64>, omega_hat: f64) -> Result<Vec<Complex<f64>>> {
        let hill = self.hill_matrices(z, omega_hat)?;
        let exponents = floquet_exponents(&hill, self.ndof())?;
        let st = self.config.scale_t;
        Ok(exponents.into_iter().map(|lambda| lambda / st).collect())
    }

    /// Physical Fourier coefficients, `ndof x (2*NH+1)`.
    pub fn physical_coefficients(&self, z: &[f64]) -> DMatrix<f64> {
        DMatrix::from_column_slice(self.ndof(), self.config.coefficients_per_dof(), z)
            * self.config.scale_x
    }

    /// Peak absolute displacement of every DOF over the AFT grid.
    pub fn amplitudes(&self, z: &[f64]) -> Vec<f64> {
        let history = self.aft.to_time(&self.physical_coefficients(z));
        history.row_iter().map(|row| row.amax()).collect()
    }

    pub fn components(&self, point: &BranchPoint) -> HarmonicComponents {
        HarmonicComponents::from_coefficients(&self.physical_coefficients(&point.z))
    }

    /// Samples one base period of `point` at `samples` instants.
    pub fn time_signal(
        &self,
        point: &BranchPoint,
        kind: SignalKind,
        samples: usize,
    ) -> (Vec<f64>, DMatrix<f64>) {
        let times = time_grid(point.omega, self.config.nu, samples);
        let values = signal(
            &self.physical_coefficients(&point.z),
            point.omega,
            self.config.nu,
            &times,
            kind,
        );
        (times, values)
    }

    /// Integrates the equations of motion from the state of `point` at
    /// `t = 0` over `periods` base periods and returns the largest
    /// displacement deviation from the harmonic-balance signal.
    pub fn time_domain_deviation(
        &self,
        point: &BranchPoint,
        periods: usize,
        steps_per_period: usize,
    ) -> Result<f64> {
        let n = self.ndof();
        let nu = self.config.nu;
        let coeffs = self.physical_coefficients(&point.z);
        let x0 = signal(&coeffs, point.omega, nu, &[0.0], SignalKind::Displacement);
        let v0 = signal(&coeffs, point.omega, nu, &[0.0], SignalKind::Velocity);
        let initial: Vec<f64> = x0.iter().chain(v0.iter()).copied().collect();

        let ode = ForcedResponse::new(&self.system, &self.force, &self.excitation, point.omega)?;
        let dt = base_period(point.omega, nu) / steps_per_period as f64;
        let mut worst: f64 = 0.0;
        integrate(&ode, 0.0, &initial, dt, periods * steps_per_period, |t, state| {
            let expected = signal(&coeffs, point.omega, nu, &[t], SignalKind::Displacement);
            for i in 0..n {
                worst = worst.max((state[i] - expected[(i, 0)]).abs());
            }
        });
        Ok(worst)
    }

    /// Periodic solution at `omega`, seeded with the linear response.
    pub fn periodic(&mut self, omega: f64) -> Result<BranchPoint> {
        if !(omega > 0.0 && omega.is_finite()) {
            bail!(HbError::NonPositiveFrequency(omega));
        }
        let omega_hat = omega * self.config.scale_t;
        let guess = self
            .linear_solution(omega_hat)
            .unwrap_or_else(|| DVector::zeros(self.dimension()));
        self.periodic_from(omega, &guess)
    }

    /// Periodic solution at `omega` starting Newton from `guess`.
    pub fn periodic_from(&mut self, omega: f64, guess: &DVector<f64>) -> Result<BranchPoint> {
        if !(omega > 0.0 && omega.is_finite()) {
            bail!(HbError::NonPositiveFrequency(omega));
        }
        let nz = self.dimension();
        if guess.len() != nz {
            bail!(HbError::Dimension(format!(
                "initial guess has {} entries, expected {nz}",
                guess.len()
            )));
        }
        let mut aug = DVector::zeros(nz + 1);
        aug[0] = omega * self.config.scale_t;
        aug.rows_mut(1, nz).copy_from(guess);

        let settings = self.newton_settings();
        match correct(self, &aug, Constraint::FixedParameter, settings) {
            CorrectorOutcome::Converged {
                aug_state,
                iterations,
                residual_norm,
            } => {
                debug!(omega, iterations, residual_norm, "Converged periodic solution");
                let diagnostics = self.diagnostics(&aug_state)?;
                Ok(BranchPoint {
                    omega,
                    z: aug_state.rows(1, nz).iter().copied().collect(),
                    stability: diagnostics.stability,
                    exponents: diagnostics.exponents,
                    arc_length: 0.0,
                    step_size: 0.0,
                    iterations,
                    tangent_omega: 0.0,
                    amplitude: diagnostics.amplitude,
                })
            }
            CorrectorOutcome::Failed { iterations, reason } => bail!(
                "no periodic solution found at omega = {omega} after {iterations} iterations: {reason:?}"
            ),
        }
    }

    /// Continues the branch through `start` in the excitation frequency.
    pub fn continuation(
        &mut self,
        start: &BranchPoint,
        config: &ContinuationConfig,
    ) -> Result<ContinuationResult> {
        continuation::continue_branch(self, start, config)
    }

    /// Structural non-zeros of the Jacobian for every frequency.
    fn structure(&self) -> DMatrix<f64> {
        let n = self.ndof();
        let nc = self.config.coefficients_per_dof();
        let local = self.stiffness.abs() + self.damping.abs() + self.mass.abs();
        let d = derivative_operator(self.config.nh, 1.0).abs();
        let mut pattern = DMatrix::<f64>::identity(nc, nc).kronecker(&local)
            + d.kronecker(&self.damping.abs());
        for &(i, j) in &self.coupled {
            for p in 0..nc {
                for q in 0..nc {
                    pattern[(p * n + i, q * n + j)] = 1.0;
                }
            }
        }
        pattern
    }
}

/// Adds a per-harmonic block for the DOF pair `(i, j)` into a full matrix.
fn scatter(target: &mut DMatrix<f64>, block: &DMatrix<f64>, i: usize, j: usize, ndof: usize) {
    for p in 0..block.nrows() {
        for q in 0..block.ncols() {
            target[(p * ndof + i, q * ndof + j)] += block[(p, q)];
        }
    }
}

impl ContinuationProblem for HarmonicBalance {
    fn dimension(&self) -> usize {
        HarmonicBalance::dimension(self)
    }

    fn evaluate(&mut self, aug_state: &DVector<f64>) -> Result<(DVector<f64>, DMatrix<f64>)> {
        let nz = HarmonicBalance::dimension(self);
        let z = aug_state.rows(1, nz).into_owned();
        let evaluation = HarmonicBalance::evaluate(self, &z, aug_state[0])?;
        let mut j_ext = DMatrix::zeros(nz, nz + 1);
        j_ext.column_mut(0).copy_from(&evaluation.d_omega);
        j_ext.columns_mut(1, nz).copy_from(&evaluation.jacobian);
        Ok((evaluation.residual, j_ext))
    }

    fn newton_settings(&self) -> NewtonSettings {
        NewtonSettings {
            tolerance: self.config.tol_nr,
            max_iterations: self.config.max_it_nr,
        }
    }

    fn stability_tolerance(&self) -> f64 {
        self.config.tol_stability
    }

    fn residual_scale(&self) -> f64 {
        self.reference_norm
    }

    fn parameter_scale(&self) -> f64 {
        self.config.scale_t
    }

    fn ordering(&self) -> Option<&[usize]> {
        self.ordering.as_deref()
    }

    fn diagnostics(&mut self, aug_state: &DVector<f64>) -> Result<PointDiagnostics> {
        let nz = HarmonicBalance::dimension(self);
        let z = aug_state.rows(1, nz).into_owned();
        let amplitude = self.amplitudes(z.as_slice());
        if !self.config.stability {
            return Ok(PointDiagnostics {
                stability: Stability::Stable,
                exponents: Vec::new(),
                amplitude,
            });
        }
        match self.floquet_exponents(&z, aug_state[0]) {
            Ok(exponents) => Ok(PointDiagnostics {
                stability: classify(&exponents, self.config.tol_stability),
                exponents,
                amplitude,
            }),
            Err(err) => {
                warn!(
                    omega = aug_state[0] / self.config.scale_t,
                    error = %err,
                    "Stability analysis failed"
                );
                Ok(PointDiagnostics {
                    stability: Stability::Unknown,
                    exponents: Vec::new(),
                    amplitude,
                })
            }
        }
    }
}
