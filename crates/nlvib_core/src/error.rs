use thiserror::Error;

/// Configuration errors raised before any continuation step runs.
///
/// Public entry points return `anyhow::Result`; these variants travel inside
/// the `anyhow::Error` and can be recovered with `downcast_ref::<HbError>()`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HbError {
    #[error("excitation frequency must be positive and finite (got {0})")]
    NonPositiveFrequency(f64),

    #[error("2^npow2 = {samples} time samples cannot resolve {coefficients} Fourier coefficients")]
    Aliasing { samples: usize, coefficients: usize },

    #[error("invalid harmonic setting: {0}")]
    Harmonics(String),

    #[error("dimension mismatch: {0}")]
    Dimension(String),

    #[error("invalid nonlinear force description: {0}")]
    NonlinearForce(String),

    #[error("invalid solver option: {0}")]
    Option(String),

    #[error("invalid continuation parameter: {0}")]
    Continuation(String),
}
