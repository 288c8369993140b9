//! Nonlinear restoring forces.
//!
//! A [`NonlinearForce`] maps displacement and velocity histories (one column
//! per time sample, one row per degree of freedom) to the nonlinear force
//! history and its derivatives. The same description is shared by the
//! harmonic-balance solver and by identification code that estimates the
//! coefficients from measurements.

pub mod polynomial;
pub mod spline;

pub use polynomial::{PolynomialForce, PolynomialTerm, Quantity};
pub use spline::{CubicSpline, SplineForce, SplineTerm};

use crate::error::HbError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Two ends of a nonlinear element. `None` is the fixed ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub first: Option<usize>,
    pub second: Option<usize>,
}

impl Connection {
    /// Builds a connection from a pair of DOF indices where `-1` is ground.
    pub fn from_indices(pair: [i64; 2]) -> Result<Self, HbError> {
        let convert = |idx: i64| -> Result<Option<usize>, HbError> {
            match idx {
                -1 => Ok(None),
                i if i >= 0 => Ok(Some(i as usize)),
                i => Err(HbError::NonlinearForce(format!(
                    "DOF index {i} is neither a DOF nor ground (-1)"
                ))),
            }
        };
        let connection = Self {
            first: convert(pair[0])?,
            second: convert(pair[1])?,
        };
        if connection.first.is_none() && connection.second.is_none() {
            return Err(HbError::NonlinearForce(
                "an element cannot connect ground to ground".into(),
            ));
        }
        Ok(connection)
    }

    fn validate(&self, ndof: usize) -> Result<(), HbError> {
        if self.first.is_none() && self.second.is_none() {
            return Err(HbError::NonlinearForce(
                "an element cannot connect ground to ground".into(),
            ));
        }
        for dof in [self.first, self.second].into_iter().flatten() {
            if dof >= ndof {
                return Err(HbError::NonlinearForce(format!(
                    "DOF {dof} out of range for a {ndof}-DOF system"
                )));
            }
        }
        if self.first.is_some() && self.first == self.second {
            return Err(HbError::NonlinearForce(format!(
                "element connects DOF {:?} to itself",
                self.first
            )));
        }
        Ok(())
    }

    /// Relative coordinate `q_first - q_second` at one sample.
    fn relative(&self, q: &DMatrix<f64>, sample: usize) -> f64 {
        let a = self.first.map_or(0.0, |i| q[(i, sample)]);
        let b = self.second.map_or(0.0, |i| q[(i, sample)]);
        a - b
    }

    fn dofs(&self) -> impl Iterator<Item = (usize, f64)> {
        self.first
            .map(|i| (i, 1.0))
            .into_iter()
            .chain(self.second.map(|i| (i, -1.0)))
    }
}

/// Force history and its pointwise derivatives.
///
/// `force` is `ndof x nt`. `dfdx` and `dfdxd` are `ndof^2 x nt`; row
/// `i * ndof + j` holds `d f_i / d x_j` (respectively `d xd_j`) over time.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceHistory {
    pub force: DMatrix<f64>,
    pub dfdx: DMatrix<f64>,
    pub dfdxd: DMatrix<f64>,
}

impl ForceHistory {
    pub fn zeros(ndof: usize, samples: usize) -> Self {
        Self {
            force: DMatrix::zeros(ndof, samples),
            dfdx: DMatrix::zeros(ndof * ndof, samples),
            dfdxd: DMatrix::zeros(ndof * ndof, samples),
        }
    }

    pub fn ndof(&self) -> usize {
        self.force.nrows()
    }

    pub fn derivative_row(&self, i: usize, j: usize) -> usize {
        i * self.ndof() + j
    }

    /// Adds an element force `f(r)` acting along `connection`, with
    /// `slope = df/dr`: `+f` on the first DOF and `-f` on the second.
    fn add_element(
        &mut self,
        connection: &Connection,
        sample: usize,
        force: f64,
        slope: f64,
        quantity: Quantity,
    ) {
        let ndof = self.ndof();
        for (i, si) in connection.dofs() {
            self.force[(i, sample)] += si * force;
            for (j, sj) in connection.dofs() {
                let row = i * ndof + j;
                match quantity {
                    Quantity::Displacement => self.dfdx[(row, sample)] += si * sj * slope,
                    Quantity::Velocity => self.dfdxd[(row, sample)] += si * sj * slope,
                }
            }
        }
    }
}

/// The nonlinear force model attached to a structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum NonlinearForce {
    /// Purely linear structure.
    #[default]
    None,
    Polynomial(PolynomialForce),
    Spline(SplineForce),
}

impl NonlinearForce {
    pub fn is_none(&self) -> bool {
        matches!(self, NonlinearForce::None)
    }

    /// Checks every element against a `ndof`-DOF structure. Descriptions
    /// read from serialized data only pass through here.
    pub fn validate(&self, ndof: usize) -> Result<(), HbError> {
        let elements: Vec<(Connection, f64)> = match self {
            NonlinearForce::None => Vec::new(),
            NonlinearForce::Polynomial(poly) => poly
                .terms()
                .iter()
                .map(|t| (t.connection, t.coefficient))
                .collect(),
            NonlinearForce::Spline(spline) => spline
                .terms()
                .iter()
                .map(|t| (t.connection, t.coefficient))
                .collect(),
        };
        for (connection, coefficient) in elements {
            connection.validate(ndof)?;
            if !coefficient.is_finite() {
                return Err(HbError::NonlinearForce(format!(
                    "coefficient {coefficient} is not finite"
                )));
            }
        }
        Ok(())
    }

    /// Evaluates the force history for displacement `x` and velocity `xd`.
    pub fn evaluate(&self, x: &DMatrix<f64>, xd: &DMatrix<f64>) -> ForceHistory {
        let (ndof, samples) = x.shape();
        let mut history = ForceHistory::zeros(ndof, samples);
        match self {
            NonlinearForce::None => {}
            NonlinearForce::Polynomial(poly) => poly.accumulate(x, xd, &mut history),
            NonlinearForce::Spline(spline) => spline.accumulate(x, &mut history),
        }
        history
    }

    /// DOF pairs `(i, j)` whose derivative `d f_i / d q_j` can be non-zero.
    pub fn coupled_pairs(&self) -> Vec<(usize, usize)> {
        let connections: Vec<Connection> = match self {
            NonlinearForce::None => Vec::new(),
            NonlinearForce::Polynomial(poly) => poly.terms().iter().map(|t| t.connection).collect(),
            NonlinearForce::Spline(spline) => spline.terms().iter().map(|t| t.connection).collect(),
        };
        let mut pairs = Vec::new();
        for connection in &connections {
            for (i, _) in connection.dofs() {
                for (j, _) in connection.dofs() {
                    if !pairs.contains(&(i, j)) {
                        pairs.push((i, j));
                    }
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }
}
