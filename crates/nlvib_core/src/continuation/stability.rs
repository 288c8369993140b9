//! Floquet stability of harmonic-balance solutions by Hill's method.
//!
//! Perturbing a periodic solution with `exp(lambda t) v(t)` leads to the
//! quadratic eigenvalue problem `(H + lambda D1 + lambda^2 D2) v = 0`. It is
//! linearized into a companion matrix of twice the size, and of its
//! eigenvalues only the `2 * ndof` with the smallest imaginary parts are
//! kept: the others are copies shifted by multiples of the base frequency.

use anyhow::{bail, Result};
use nalgebra::DMatrix;
use num_complex::Complex;

use super::types::Stability;

/// Matrices of Hill's quadratic eigenvalue problem.
#[derive(Debug, Clone, PartialEq)]
pub struct HillMatrices {
    /// Harmonic-balance Jacobian with respect to the Fourier state.
    pub h: DMatrix<f64>,
    pub delta1: DMatrix<f64>,
    pub delta2: DMatrix<f64>,
}

/// Floquet exponents of `hill`, in the time units of the matrices.
pub fn floquet_exponents(hill: &HillMatrices, ndof: usize) -> Result<Vec<Complex<f64>>> {
    let n = hill.h.nrows();
    if hill.delta1.shape() != (n, n) || hill.delta2.shape() != (n, n) {
        bail!("Hill matrices must all be {n}x{n}");
    }
    if ndof > n {
        bail!("cannot keep {} exponents out of {}", 2 * ndof, 2 * n);
    }

    let lu = hill.delta2.clone().lu();
    let (Some(k), Some(c)) = (lu.solve(&hill.h), lu.solve(&hill.delta1)) else {
        bail!("Hill second-order matrix is singular");
    };

    let mut companion = DMatrix::zeros(2 * n, 2 * n);
    companion
        .view_mut((0, n), (n, n))
        .copy_from(&DMatrix::<f64>::identity(n, n));
    companion.view_mut((n, 0), (n, n)).copy_from(&(-k));
    companion.view_mut((n, n), (n, n)).copy_from(&(-c));
    if companion.iter().any(|v| !v.is_finite()) {
        bail!("Hill companion matrix has non-finite entries");
    }

    let mut eigenvalues: Vec<Complex<f64>> = companion.complex_eigenvalues().iter().copied().collect();
    if eigenvalues.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
        bail!("Hill eigenvalue computation produced non-finite values");
    }
    eigenvalues.sort_by(|a, b| a.im.abs().total_cmp(&b.im.abs()));
    eigenvalues.truncate(2 * ndof);
    eigenvalues.sort_by(|a, b| b.re.total_cmp(&a.re).then(a.im.total_cmp(&b.im)));
    Ok(eigenvalues)
}

/// Stable iff every real part is at most `tolerance`.
pub fn classify(exponents: &[Complex<f64>], tolerance: f64) -> Stability {
    if exponents.iter().all(|lambda| lambda.re <= tolerance) {
        Stability::Stable
    } else {
        Stability::Unstable
    }
}

/// `exp(lambda * period)` for every exponent.
pub fn floquet_multipliers(exponents: &[Complex<f64>], period: f64) -> Vec<Complex<f64>> {
    exponents.iter().map(|lambda| (*lambda * period).exp()).collect()
}

/// Unstable exponents split into real ones and members of complex pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnstableCount {
    pub real: usize,
    pub complex: usize,
}

pub fn unstable_count(exponents: &[Complex<f64>], tolerance: f64) -> UnstableCount {
    let mut count = UnstableCount::default();
    for lambda in exponents.iter().filter(|lambda| lambda.re > tolerance) {
        if is_real(*lambda) {
            count.real += 1;
        } else {
            count.complex += 1;
        }
    }
    count
}

fn is_real(lambda: Complex<f64>) -> bool {
    lambda.im.abs() <= 1e-8 * (1.0 + lambda.norm())
}
