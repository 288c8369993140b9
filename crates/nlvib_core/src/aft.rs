//! Alternating frequency/time transforms.
//!
//! Coefficient matrices are `ndof x (2*NH+1)` with columns ordered
//! `[c0, a1, b1, a2, b2, ...]`, meaning
//! `x(theta) = c0 + sum_k a_k cos(k theta) + b_k sin(k theta)` over one base
//! period sampled at `theta_j = 2 pi j / N`.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex;
use num_traits::Zero;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Aft {
    nh: usize,
    samples: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for Aft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aft")
            .field("nh", &self.nh)
            .field("samples", &self.samples)
            .finish()
    }
}

impl Aft {
    /// Plans transforms for `nh` harmonics on `samples` points per period.
    /// Callers guarantee `samples > 2 * nh + 1` (checked by `HbConfig::validate`).
    pub fn new(nh: usize, samples: usize) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(samples);
        let inverse = planner.plan_fft_inverse(samples);
        Self {
            nh,
            samples,
            forward,
            inverse,
        }
    }

    pub fn coefficients(&self) -> usize {
        2 * self.nh + 1
    }

    /// Frequency -> time: one row of samples per row of coefficients.
    pub fn to_time(&self, coeffs: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.samples;
        let mut out = DMatrix::zeros(coeffs.nrows(), n);
        let mut buffer = vec![Complex::zero(); n];
        for row in 0..coeffs.nrows() {
            buffer.fill(Complex::zero());
            buffer[0] = Complex::new(coeffs[(row, 0)], 0.0);
            for k in 1..=self.nh {
                let a = coeffs[(row, 2 * k - 1)];
                let b = coeffs[(row, 2 * k)];
                let half = Complex::new(0.5 * a, -0.5 * b);
                buffer[k] = half;
                buffer[n - k] = half.conj();
            }
            self.inverse.process(&mut buffer);
            for (j, value) in buffer.iter().enumerate() {
                out[(row, j)] = value.re;
            }
        }
        out
    }

    /// Time -> frequency: projects each row onto the retained harmonics.
    pub fn to_frequency(&self, history: &DMatrix<f64>) -> DMatrix<f64> {
        let n = self.samples;
        let scale = 1.0 / n as f64;
        let mut out = DMatrix::zeros(history.nrows(), self.coefficients());
        let mut buffer = vec![Complex::zero(); n];
        for row in 0..history.nrows() {
            for (j, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(history[(row, j)], 0.0);
            }
            self.forward.process(&mut buffer);
            out[(row, 0)] = buffer[0].re * scale;
            for k in 1..=self.nh {
                out[(row, 2 * k - 1)] = 2.0 * buffer[k].re * scale;
                out[(row, 2 * k)] = -2.0 * buffer[k].im * scale;
            }
        }
        out
    }

    /// Matrix of the map `v -> to_frequency(g * to_time(v))` for a scalar
    /// history `g`, i.e. the AFT derivative of a pointwise product.
    ///
    /// Built from the discrete Fourier coefficients of `g` through the
    /// product-to-sum identities, so it is exact for the sampled transform.
    pub fn projection(&self, history: &[f64]) -> DMatrix<f64> {
        let n = self.samples;
        let mut spectrum: Vec<Complex<f64>> =
            history.iter().map(|&v| Complex::new(v, 0.0)).collect();
        self.forward.process(&mut spectrum);
        let scale = 1.0 / n as f64;
        let cos_mean = |m: isize| spectrum[m.rem_euclid(n as isize) as usize].re * scale;
        let sin_mean = |m: isize| -spectrum[m.rem_euclid(n as isize) as usize].im * scale;

        let size = self.coefficients();
        let mut block = DMatrix::zeros(size, size);
        for p_idx in 0..size {
            let (p, p_sin) = harmonic_of(p_idx);
            let weight = if p == 0 { 1.0 } else { 2.0 };
            for q_idx in 0..size {
                let (q, q_sin) = harmonic_of(q_idx);
                let diff = p - q;
                let sum = p + q;
                let value = match (p_sin, q_sin) {
                    (false, false) => 0.5 * (cos_mean(diff) + cos_mean(sum)),
                    (false, true) => 0.5 * (sin_mean(sum) - sin_mean(diff)),
                    (true, false) => 0.5 * (sin_mean(sum) + sin_mean(diff)),
                    (true, true) => 0.5 * (cos_mean(diff) - cos_mean(sum)),
                };
                block[(p_idx, q_idx)] = weight * value;
            }
        }
        block
    }
}

/// Harmonic order of a coefficient column and whether it is a sine term.
fn harmonic_of(index: usize) -> (isize, bool) {
    if index == 0 {
        (0, false)
    } else {
        (((index + 1) / 2) as isize, index % 2 == 0)
    }
}

/// Time-derivative operator on one DOF's coefficients at base frequency `w`.
pub fn derivative_operator(nh: usize, w: f64) -> DMatrix<f64> {
    let size = 2 * nh + 1;
    let mut d = DMatrix::zeros(size, size);
    for k in 1..=nh {
        let wk = k as f64 * w;
        d[(2 * k - 1, 2 * k)] = wk;
        d[(2 * k, 2 * k - 1)] = -wk;
    }
    d
}

/// Reshapes a state vector (harmonic blocks of `ndof` values) into a
/// `ndof x (2*NH+1)` coefficient matrix.
pub fn coefficient_matrix(z: &DVector<f64>, ndof: usize) -> DMatrix<f64> {
    DMatrix::from_column_slice(ndof, z.len() / ndof, z.as_slice())
}

/// Inverse of [`coefficient_matrix`].
pub fn coefficient_vector(coeffs: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_column_slice(coeffs.as_slice())
}
