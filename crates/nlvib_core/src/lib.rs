//! The `nlvib_core` crate computes periodic responses of harmonically forced
//! mechanical systems with local nonlinearities and follows them in the
//! excitation frequency.
//!
//! Key components:
//! - **Harmonic balance**: Fourier-Galerkin residual with alternating
//!   frequency/time evaluation of the nonlinear forces (`harmonic_balance`, `aft`).
//! - **Continuation**: Newton-Raphson corrector, pseudo-arclength predictor with
//!   adaptive steps, Hill stability and bifurcation detection (`continuation`).
//! - **Nonlinear forces**: polynomial and cubic-spline elements between DOFs or to
//!   ground (`nlforce`).
//! - **Time domain**: RK4 integration of the equations of motion for cross-checks
//!   (`solvers`).

pub mod aft;
pub mod config;
pub mod continuation;
pub mod error;
pub mod harmonic_balance;
pub mod harmonics;
pub mod nlforce;
pub mod ordering;
pub mod solvers;
pub mod system;

pub use config::{ContinuationConfig, HbConfig};
pub use continuation::{
    BifurcationKind, BifurcationRecord, Branch, BranchPoint, ContinuationResult, Stability,
    Termination,
};
pub use error::HbError;
pub use harmonic_balance::{HarmonicBalance, HbEvaluation};
pub use nlforce::NonlinearForce;
pub use system::{Excitation, LinearSystem};
