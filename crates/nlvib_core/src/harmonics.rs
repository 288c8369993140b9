//! Post-processing of Fourier-coefficient solutions: time grids, signal
//! reconstruction and per-harmonic amplitude/phase.

use crate::aft::derivative_operator;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Period of the Fourier basis for excitation frequency `omega`.
pub fn base_period(omega: f64, nu: usize) -> f64 {
    2.0 * PI * nu as f64 / omega
}

/// `samples` equidistant instants covering one base period (end excluded).
pub fn time_grid(omega: f64, nu: usize, samples: usize) -> Vec<f64> {
    let period = base_period(omega, nu);
    (0..samples)
        .map(|j| period * j as f64 / samples as f64)
        .collect()
}

/// Which time derivative of the response to reconstruct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Displacement,
    Velocity,
    Acceleration,
}

/// Evaluates the series described by `coeffs` (`ndof x (2*NH+1)`, physical
/// units) at the given instants. Returns `ndof x times.len()`.
pub fn signal(
    coeffs: &DMatrix<f64>,
    omega: f64,
    nu: usize,
    times: &[f64],
    kind: SignalKind,
) -> DMatrix<f64> {
    let nh = (coeffs.ncols() - 1) / 2;
    let w = omega / nu as f64;
    let d = derivative_operator(nh, w);
    let derived = match kind {
        SignalKind::Displacement => coeffs.clone(),
        SignalKind::Velocity => coeffs * d.transpose(),
        SignalKind::Acceleration => coeffs * (&d * &d).transpose(),
    };

    let mut out = DMatrix::zeros(coeffs.nrows(), times.len());
    for (j, &t) in times.iter().enumerate() {
        for row in 0..coeffs.nrows() {
            let mut value = derived[(row, 0)];
            for k in 1..=nh {
                let phase = k as f64 * w * t;
                value += derived[(row, 2 * k - 1)] * phase.cos() + derived[(row, 2 * k)] * phase.sin();
            }
            out[(row, j)] = value;
        }
    }
    out
}

/// Amplitude and phase per DOF and harmonic, `x_k(t) = c_k cos(k w t - phi_k)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicComponents {
    /// `ndof x (NH+1)`; column 0 is the absolute static offset.
    pub amplitude: DMatrix<f64>,
    /// `ndof x (NH+1)` in radians.
    pub phase: DMatrix<f64>,
}

impl HarmonicComponents {
    pub fn from_coefficients(coeffs: &DMatrix<f64>) -> Self {
        let ndof = coeffs.nrows();
        let nh = (coeffs.ncols() - 1) / 2;
        let mut amplitude = DMatrix::zeros(ndof, nh + 1);
        let mut phase = DMatrix::zeros(ndof, nh + 1);
        for row in 0..ndof {
            let c0 = coeffs[(row, 0)];
            amplitude[(row, 0)] = c0.abs();
            phase[(row, 0)] = if c0 < 0.0 { PI } else { 0.0 };
            for k in 1..=nh {
                let a = coeffs[(row, 2 * k - 1)];
                let b = coeffs[(row, 2 * k)];
                amplitude[(row, k)] = a.hypot(b);
                phase[(row, k)] = b.atan2(a);
            }
        }
        Self { amplitude, phase }
    }

    /// Amplitudes divided by the largest harmonic amplitude of each DOF.
    pub fn normalized(&self) -> DMatrix<f64> {
        let mut out = self.amplitude.clone();
        for mut row in out.row_iter_mut() {
            let peak = row.amax();
            if peak > 0.0 {
                row /= peak;
            }
        }
        out
    }
}
