use super::{Connection, ForceHistory};
use crate::error::HbError;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Which relative coordinate a polynomial element acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantity {
    /// Stiffness-type element, `k * (x_a - x_b)^e`.
    Displacement,
    /// Damping-type element, `k * (xd_a - xd_b)^e`.
    Velocity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialTerm {
    pub connection: Connection,
    pub exponent: u32,
    pub coefficient: f64,
}

impl PolynomialTerm {
    /// Element force and its derivative with respect to the relative coordinate.
    pub fn evaluate(&self, r: f64) -> (f64, f64) {
        let force = self.coefficient * r.powi(self.exponent as i32);
        let slope = match self.exponent {
            0 => 0.0,
            e => self.coefficient * f64::from(e) * r.powi(e as i32 - 1),
        };
        (force, slope)
    }
}

/// Polynomial nonlinearity `sum_i knl_i * (q_a - q_b)^enl_i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialForce {
    quantity: Quantity,
    terms: Vec<PolynomialTerm>,
}

impl PolynomialForce {
    /// Stiffness-type polynomial from connectivity (`-1` = ground),
    /// exponents and coefficients.
    pub fn new(inl: &[[i64; 2]], enl: &[u32], knl: &[f64]) -> Result<Self, HbError> {
        Self::with_quantity(Quantity::Displacement, inl, enl, knl)
    }

    /// Damping-type polynomial acting on relative velocities.
    pub fn damping(inl: &[[i64; 2]], enl: &[u32], knl: &[f64]) -> Result<Self, HbError> {
        Self::with_quantity(Quantity::Velocity, inl, enl, knl)
    }

    pub fn with_quantity(
        quantity: Quantity,
        inl: &[[i64; 2]],
        enl: &[u32],
        knl: &[f64],
    ) -> Result<Self, HbError> {
        if enl.len() != inl.len() || knl.len() != inl.len() {
            return Err(HbError::NonlinearForce(format!(
                "{} connections but {} exponents and {} coefficients",
                inl.len(),
                enl.len(),
                knl.len()
            )));
        }
        let terms = inl
            .iter()
            .zip(enl.iter().zip(knl))
            .map(|(&pair, (&exponent, &coefficient))| {
                if !coefficient.is_finite() {
                    return Err(HbError::NonlinearForce(format!(
                        "coefficient {coefficient} is not finite"
                    )));
                }
                Ok(PolynomialTerm {
                    connection: Connection::from_indices(pair)?,
                    exponent,
                    coefficient,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { quantity, terms })
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn terms(&self) -> &[PolynomialTerm] {
        &self.terms
    }

    pub(super) fn accumulate(&self, x: &DMatrix<f64>, xd: &DMatrix<f64>, out: &mut ForceHistory) {
        let source = match self.quantity {
            Quantity::Displacement => x,
            Quantity::Velocity => xd,
        };
        for term in &self.terms {
            for sample in 0..source.ncols() {
                let r = term.connection.relative(source, sample);
                let (force, slope) = term.evaluate(r);
                out.add_element(&term.connection, sample, force, slope, self.quantity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nlforce::NonlinearForce;

    #[test]
    fn rejects_mismatched_arrays() {
        let err = PolynomialForce::new(&[[0, -1], [1, -1]], &[3], &[1.0, 2.0])
            .expect_err("length mismatch must fail");
        assert!(matches!(err, HbError::NonlinearForce(_)));
    }

    #[test]
    fn cubic_spring_between_dofs_obeys_action_reaction() {
        let poly = PolynomialForce::new(&[[0, 1]], &[3], &[2.0]).unwrap();
        let model = NonlinearForce::Polynomial(poly);
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, -1.0, 0.0]);
        let xd = DMatrix::zeros(2, 2);
        let history = model.evaluate(&x, &xd);

        // sample 0: r = 2, f = 2 * 8
        assert_eq!(history.force[(0, 0)], 16.0);
        assert_eq!(history.force[(1, 0)], -16.0);
        // df0/dx0 = 2 * 3 * 4, df0/dx1 = -24
        let r00 = history.derivative_row(0, 0);
        let r01 = history.derivative_row(0, 1);
        let r11 = history.derivative_row(1, 1);
        assert_eq!(history.dfdx[(r00, 0)], 24.0);
        assert_eq!(history.dfdx[(r01, 0)], -24.0);
        assert_eq!(history.dfdx[(r11, 0)], 24.0);
        // sample 1: r = 0.5
        assert!((history.force[(0, 1)] - 0.25).abs() < 1e-15);
        assert!(history.dfdxd.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn grounded_term_only_loads_its_dof() {
        let poly = PolynomialForce::new(&[[1, -1]], &[2], &[1.0]).unwrap();
        let model = NonlinearForce::Polynomial(poly);
        let x = DMatrix::from_row_slice(2, 1, &[5.0, -3.0]);
        let history = model.evaluate(&x, &DMatrix::zeros(2, 1));
        assert_eq!(history.force[(0, 0)], 0.0);
        assert_eq!(history.force[(1, 0)], 9.0);
        assert_eq!(history.dfdx[(history.derivative_row(1, 1), 0)], -6.0);
    }

    #[test]
    fn even_exponent_at_zero_has_zero_slope() {
        let term = PolynomialTerm {
            connection: Connection::from_indices([0, -1]).unwrap(),
            exponent: 2,
            coefficient: 3.0,
        };
        assert_eq!(term.evaluate(0.0), (0.0, 0.0));
        let constant = PolynomialTerm { exponent: 0, ..term };
        assert_eq!(constant.evaluate(0.0), (3.0, 0.0));
    }

    #[test]
    fn damping_terms_fill_velocity_derivatives() {
        let poly = PolynomialForce::damping(&[[0, -1]], &[2], &[0.5]).unwrap();
        let model = NonlinearForce::Polynomial(poly);
        let x = DMatrix::from_element(1, 1, 10.0);
        let xd = DMatrix::from_element(1, 1, 2.0);
        let history = model.evaluate(&x, &xd);
        assert_eq!(history.force[(0, 0)], 2.0);
        assert_eq!(history.dfdxd[(0, 0)], 2.0);
        assert_eq!(history.dfdx[(0, 0)], 0.0);
    }
}
