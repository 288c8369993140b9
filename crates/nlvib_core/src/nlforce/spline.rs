use super::{Connection, ForceHistory, Quantity};
use crate::error::HbError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Natural cubic spline through a measured force-displacement relation.
///
/// Outside the knot range the spline continues linearly with the end slope.
/// Serialized as its knot table; deserializing rebuilds it through
/// [`CubicSpline::natural`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SplineTable", into = "SplineTable")]
pub struct CubicSpline {
    knots: Vec<f64>,
    values: Vec<f64>,
    second: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SplineTable {
    knots: Vec<f64>,
    values: Vec<f64>,
}

impl TryFrom<SplineTable> for CubicSpline {
    type Error = HbError;

    fn try_from(table: SplineTable) -> Result<Self, HbError> {
        Self::natural(table.knots, table.values)
    }
}

impl From<CubicSpline> for SplineTable {
    fn from(spline: CubicSpline) -> Self {
        Self {
            knots: spline.knots,
            values: spline.values,
        }
    }
}

impl CubicSpline {
    pub fn natural(knots: Vec<f64>, values: Vec<f64>) -> Result<Self, HbError> {
        if knots.len() != values.len() {
            return Err(HbError::NonlinearForce(format!(
                "{} knots but {} values",
                knots.len(),
                values.len()
            )));
        }
        if knots.len() < 2 {
            return Err(HbError::NonlinearForce("a spline needs at least two knots".into()));
        }
        if knots.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(HbError::NonlinearForce(
                "spline knots must be strictly increasing".into(),
            ));
        }
        if knots.iter().chain(values.iter()).any(|v| !v.is_finite()) {
            return Err(HbError::NonlinearForce("spline data must be finite".into()));
        }

        let n = knots.len();
        let mut second = vec![0.0; n];
        if n > 2 {
            // Thomas algorithm on the interior second derivatives.
            let m = n - 2;
            let mut diag = vec![0.0; m];
            let mut upper = vec![0.0; m];
            let mut rhs = vec![0.0; m];
            for k in 0..m {
                let i = k + 1;
                let h0 = knots[i] - knots[i - 1];
                let h1 = knots[i + 1] - knots[i];
                diag[k] = 2.0 * (h0 + h1);
                upper[k] = h1;
                rhs[k] = 6.0
                    * ((values[i + 1] - values[i]) / h1 - (values[i] - values[i - 1]) / h0);
            }
            for k in 1..m {
                let lower = knots[k + 1] - knots[k];
                let w = lower / diag[k - 1];
                diag[k] -= w * upper[k - 1];
                rhs[k] -= w * rhs[k - 1];
            }
            second[m] = rhs[m - 1] / diag[m - 1];
            for k in (0..m - 1).rev() {
                second[k + 1] = (rhs[k] - upper[k] * second[k + 2]) / diag[k];
            }
        }

        Ok(Self {
            knots,
            values,
            second,
        })
    }

    /// Value and first derivative at `r`.
    pub fn evaluate(&self, r: f64) -> (f64, f64) {
        let n = self.knots.len();
        let first = self.knots[0];
        let last = self.knots[n - 1];
        if r < first {
            let (value, slope) = self.segment(0, first);
            return (value + slope * (r - first), slope);
        }
        if r > last {
            let (value, slope) = self.segment(n - 2, last);
            return (value + slope * (r - last), slope);
        }
        let upper = self.knots.partition_point(|&k| k <= r);
        let segment = upper.saturating_sub(1).min(n - 2);
        self.segment(segment, r)
    }

    fn segment(&self, i: usize, r: f64) -> (f64, f64) {
        let (x0, x1) = (self.knots[i], self.knots[i + 1]);
        let (y0, y1) = (self.values[i], self.values[i + 1]);
        let (m0, m1) = (self.second[i], self.second[i + 1]);
        let h = x1 - x0;
        let a = x1 - r;
        let b = r - x0;
        let c0 = y0 / h - m0 * h / 6.0;
        let c1 = y1 / h - m1 * h / 6.0;
        let value = m0 * a.powi(3) / (6.0 * h) + m1 * b.powi(3) / (6.0 * h) + c0 * a + c1 * b;
        let slope = -m0 * a * a / (2.0 * h) + m1 * b * b / (2.0 * h) - c0 + c1;
        (value, slope)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineTerm {
    pub connection: Connection,
    pub spline: CubicSpline,
    pub coefficient: f64,
}

/// Displacement-driven nonlinearity described by cubic splines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineForce {
    terms: Vec<SplineTerm>,
}

impl SplineForce {
    pub fn new(inl: &[[i64; 2]], splines: Vec<CubicSpline>, knl: &[f64]) -> Result<Self, HbError> {
        if splines.len() != inl.len() || knl.len() != inl.len() {
            return Err(HbError::NonlinearForce(format!(
                "{} connections but {} splines and {} coefficients",
                inl.len(),
                splines.len(),
                knl.len()
            )));
        }
        let terms = inl
            .iter()
            .zip(splines)
            .zip(knl)
            .map(|((&pair, spline), &coefficient)| {
                if !coefficient.is_finite() {
                    return Err(HbError::NonlinearForce(format!(
                        "coefficient {coefficient} is not finite"
                    )));
                }
                Ok(SplineTerm {
                    connection: Connection::from_indices(pair)?,
                    spline,
                    coefficient,
                })
            })
            .collect::<Result<Vec<_>, HbError>>()?;
        Ok(Self { terms })
    }

    pub fn terms(&self) -> &[SplineTerm] {
        &self.terms
    }

    pub(super) fn accumulate(&self, x: &DMatrix<f64>, out: &mut ForceHistory) {
        for term in &self.terms {
            for sample in 0..x.ncols() {
                let r = term.connection.relative(x, sample);
                let (value, slope) = term.spline.evaluate(r);
                out.add_element(
                    &term.connection,
                    sample,
                    term.coefficient * value,
                    term.coefficient * slope,
                    Quantity::Displacement,
                );
            }
        }
    }
}
