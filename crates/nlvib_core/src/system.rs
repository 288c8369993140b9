use crate::error::HbError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Linear part of the structure, `M xdd + C xd + K x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSystem {
    pub mass: DMatrix<f64>,
    pub damping: DMatrix<f64>,
    pub stiffness: DMatrix<f64>,
}

impl LinearSystem {
    pub fn new(
        mass: DMatrix<f64>,
        damping: DMatrix<f64>,
        stiffness: DMatrix<f64>,
    ) -> Result<Self, HbError> {
        let n = mass.nrows();
        for (name, matrix) in [("mass", &mass), ("damping", &damping), ("stiffness", &stiffness)] {
            if matrix.nrows() != n || matrix.ncols() != n {
                return Err(HbError::Dimension(format!(
                    "{name} matrix is {}x{}, expected {n}x{n}",
                    matrix.nrows(),
                    matrix.ncols()
                )));
            }
            if matrix.iter().any(|v| !v.is_finite()) {
                return Err(HbError::Dimension(format!("{name} matrix has non-finite entries")));
            }
        }
        if n == 0 {
            return Err(HbError::Dimension("system has zero degrees of freedom".into()));
        }
        Ok(Self {
            mass,
            damping,
            stiffness,
        })
    }

    pub fn ndof(&self) -> usize {
        self.mass.nrows()
    }
}

/// Harmonic forcing `f(t) = amplitude * cos(omega t + phase)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excitation {
    pub amplitude: Vec<f64>,
    pub phase: f64,
}

impl Excitation {
    /// Single-point forcing with peak value `amplitude` on `dof`.
    pub fn at_dof(ndof: usize, dof: usize, amplitude: f64) -> Result<Self, HbError> {
        if dof >= ndof {
            return Err(HbError::Dimension(format!(
                "forced DOF {dof} out of range for a {ndof}-DOF system"
            )));
        }
        let mut values = vec![0.0; ndof];
        values[dof] = amplitude;
        Ok(Self {
            amplitude: values,
            phase: 0.0,
        })
    }

    /// Single-point forcing specified by its RMS value.
    pub fn rms(ndof: usize, dof: usize, vrms: f64) -> Result<Self, HbError> {
        Self::at_dof(ndof, dof, vrms * std::f64::consts::SQRT_2)
    }

    pub fn is_zero(&self) -> bool {
        self.amplitude.iter().all(|v| *v == 0.0)
    }

    /// Cosine and sine coefficients of the forcing for one DOF.
    pub fn coefficients(&self, dof: usize) -> (f64, f64) {
        let amp = self.amplitude[dof];
        (amp * self.phase.cos(), -amp * self.phase.sin())
    }
}
