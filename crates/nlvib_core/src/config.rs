//! Solver and continuation options.
//!
//! Both structs deserialize from flat mappings using the historical option
//! names (`NH`, `tol_NR`, `omega_cont_min`, ...). Unknown keys are rejected at
//! deserialization time, and `validate` catches inconsistent values before a
//! run starts. Neither struct is modified once handed to a solver.

use crate::error::HbError;
use serde::{de, Deserialize, Deserializer, Serialize};

/// Reads an iteration count written either as an integer or as a whole
/// float such as `1e6`.
fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Integer(usize),
        Float(f64),
    }

    match Count::deserialize(deserializer)? {
        Count::Integer(n) => Ok(n),
        Count::Float(x) if x >= 0.0 && x.fract() == 0.0 && x <= usize::MAX as f64 => Ok(x as usize),
        Count::Float(x) => Err(de::Error::custom(format!(
            "expected a non-negative whole number, got {x}"
        ))),
    }
}

/// Harmonic-balance discretization and Newton options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HbConfig {
    /// Number of harmonics retained in the Fourier series.
    #[serde(rename = "NH")]
    pub nh: usize,
    /// The AFT uses `2^npow2` time samples per period.
    pub npow2: u32,
    /// Ultra-subharmonic factor: the series is built on `omega / nu`.
    pub nu: usize,
    /// Compute Floquet exponents for every accepted point.
    pub stability: bool,
    /// Reorder unknowns with reverse Cuthill-McKee before each linear solve.
    pub rcm_permute: bool,
    #[serde(rename = "tol_NR")]
    pub tol_nr: f64,
    #[serde(rename = "max_it_NR", deserialize_with = "count")]
    pub max_it_nr: usize,
    pub scale_x: f64,
    pub scale_t: f64,
    /// Real parts up to this value still count as stable.
    pub tol_stability: f64,
}

impl Default for HbConfig {
    fn default() -> Self {
        Self {
            nh: 3,
            npow2: 8,
            nu: 1,
            stability: true,
            rcm_permute: false,
            tol_nr: 1e-6,
            max_it_nr: 15,
            scale_x: 1.0,
            scale_t: 1.0,
            tol_stability: 1e-8,
        }
    }
}

impl HbConfig {
    /// Number of time samples per period used by the AFT.
    pub fn time_samples(&self) -> usize {
        1usize << self.npow2
    }

    /// Number of Fourier coefficients per degree of freedom.
    pub fn coefficients_per_dof(&self) -> usize {
        2 * self.nh + 1
    }

    pub fn validate(&self) -> Result<(), HbError> {
        if self.nh == 0 {
            return Err(HbError::Harmonics("NH must be at least 1".into()));
        }
        if self.nu == 0 || self.nu > self.nh {
            return Err(HbError::Harmonics(format!(
                "nu = {} must lie in 1..=NH (NH = {})",
                self.nu, self.nh
            )));
        }
        if self.npow2 >= usize::BITS - 1 {
            return Err(HbError::Option(format!("npow2 = {} is too large", self.npow2)));
        }
        let samples = self.time_samples();
        let coefficients = self.coefficients_per_dof();
        if samples <= coefficients {
            return Err(HbError::Aliasing {
                samples,
                coefficients,
            });
        }
        if !(self.tol_nr > 0.0 && self.tol_nr.is_finite()) {
            return Err(HbError::Option(format!("tol_NR must be positive (got {})", self.tol_nr)));
        }
        if self.max_it_nr == 0 {
            return Err(HbError::Option("max_it_NR must be at least 1".into()));
        }
        for (name, value) in [("scale_x", self.scale_x), ("scale_t", self.scale_t)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(HbError::Option(format!("{name} must be positive (got {value})")));
            }
        }
        if !(self.tol_stability >= 0.0 && self.tol_stability.is_finite()) {
            return Err(HbError::Option(format!(
                "tol_stability must be non-negative (got {})",
                self.tol_stability
            )));
        }
        Ok(())
    }
}

/// Pseudo-arclength continuation parameters.
///
/// Frequencies are physical (rad/s). Step sizes are measured in the scaled
/// augmented space `[omega * scale_t, z]` the solver works in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContinuationConfig {
    pub omega_cont_min: f64,
    pub omega_cont_max: f64,
    /// `1` sweeps towards higher frequencies, `-1` towards lower ones.
    pub cont_dir: i32,
    /// Corrector iteration count the step adaptation aims for.
    #[serde(rename = "opt_it_NR", deserialize_with = "count")]
    pub opt_it_nr: usize,
    pub step: f64,
    pub step_min: f64,
    pub step_max: f64,
    /// Largest accepted angle between consecutive tangents, in degrees.
    pub angle_max_pred: f64,
    /// Maximum number of accepted continuation steps.
    #[serde(deserialize_with = "count")]
    pub it_cont_max: usize,
    pub adaptive_stepsize: bool,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            omega_cont_min: 0.1,
            omega_cont_max: 10.0,
            cont_dir: 1,
            opt_it_nr: 3,
            step: 0.01,
            step_min: 1e-4,
            step_max: 0.1,
            angle_max_pred: 90.0,
            it_cont_max: 10_000,
            adaptive_stepsize: true,
        }
    }
}

impl ContinuationConfig {
    pub fn direction(&self) -> f64 {
        if self.cont_dir < 0 {
            -1.0
        } else {
            1.0
        }
    }

    pub fn validate(&self) -> Result<(), HbError> {
        if !(self.omega_cont_min > 0.0 && self.omega_cont_min.is_finite()) {
            return Err(HbError::NonPositiveFrequency(self.omega_cont_min));
        }
        if !(self.omega_cont_max > self.omega_cont_min && self.omega_cont_max.is_finite()) {
            return Err(HbError::Continuation(format!(
                "omega_cont_max ({}) must exceed omega_cont_min ({})",
                self.omega_cont_max, self.omega_cont_min
            )));
        }
        if self.cont_dir != 1 && self.cont_dir != -1 {
            return Err(HbError::Continuation(format!(
                "cont_dir must be 1 or -1 (got {})",
                self.cont_dir
            )));
        }
        if self.opt_it_nr == 0 {
            return Err(HbError::Continuation("opt_it_NR must be at least 1".into()));
        }
        if !(self.step_min > 0.0 && self.step_min <= self.step_max && self.step_max.is_finite()) {
            return Err(HbError::Continuation(format!(
                "step bounds must satisfy 0 < step_min <= step_max (got {} and {})",
                self.step_min, self.step_max
            )));
        }
        if !(self.step >= self.step_min && self.step <= self.step_max) {
            return Err(HbError::Continuation(format!(
                "step ({}) must lie in [step_min, step_max]",
                self.step
            )));
        }
        if !(self.angle_max_pred > 0.0 && self.angle_max_pred <= 180.0) {
            return Err(HbError::Continuation(format!(
                "angle_max_pred must lie in (0, 180] degrees (got {})",
                self.angle_max_pred
            )));
        }
        Ok(())
    }
}
