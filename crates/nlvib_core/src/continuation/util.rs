//! Tangent helpers for pseudo-arclength continuation.

use anyhow::{bail, Result};
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Unit null vector of an extended Jacobian `[dF/dp | dF/dx]`.
///
/// Tries bordered solves first, fixing one component at a time starting
/// with the parameter, and falls back to the smallest eigenvector of the
/// Gram matrix.
pub fn nullspace_tangent(j_ext: &DMatrix<f64>) -> Result<DVector<f64>> {
    let dim = j_ext.nrows();
    if dim == 0 {
        bail!("Failed to compute tangent: zero-dimensional system");
    }
    if j_ext.ncols() != dim + 1 {
        bail!(
            "Failed to compute tangent: expected {} columns, got {}",
            dim + 1,
            j_ext.ncols()
        );
    }
    for col in 0..=dim {
        let mut border = DVector::zeros(dim + 1);
        border[col] = 1.0;
        if let Some(tangent) = bordered_tangent(j_ext, &border) {
            return Ok(tangent);
        }
    }
    if let Some(tangent) = gram_tangent(j_ext) {
        return Ok(tangent);
    }
    bail!("Failed to compute tangent: extended Jacobian has no usable null vector")
}

/// Solves `[J_ext; border^T] t = e_last` and normalizes the result.
pub fn bordered_tangent(j_ext: &DMatrix<f64>, border: &DVector<f64>) -> Option<DVector<f64>> {
    let dim = j_ext.nrows();
    let mut a = DMatrix::zeros(dim + 1, dim + 1);
    a.view_mut((0, 0), (dim, dim + 1)).copy_from(j_ext);
    a.row_mut(dim).copy_from(&border.transpose());
    let mut rhs = DVector::zeros(dim + 1);
    rhs[dim] = 1.0;

    let solution = a.lu().solve(&rhs)?;
    let norm = solution.norm();
    if !norm.is_finite() || norm == 0.0 {
        return None;
    }
    Some(solution / norm)
}

fn gram_tangent(j_ext: &DMatrix<f64>) -> Option<DVector<f64>> {
    let gram = j_ext.transpose() * j_ext;
    if gram.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let eig = SymmetricEigen::new(gram);
    let (index, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let vec = eig.eigenvectors.column(index).into_owned();
    let norm = vec.norm();
    if !norm.is_finite() || norm == 0.0 {
        return None;
    }
    Some(vec / norm)
}

/// Flips `tangent` so that it points the same way as `reference`.
pub fn orient(tangent: DVector<f64>, reference: &DVector<f64>) -> DVector<f64> {
    if tangent.dot(reference) < 0.0 {
        -tangent
    } else {
        tangent
    }
}

/// Unit secant between two augmented states, if they differ.
pub fn secant(from: &DVector<f64>, to: &DVector<f64>) -> Option<DVector<f64>> {
    let diff = to - from;
    let norm = diff.norm();
    (norm > 0.0 && norm.is_finite()).then(|| diff / norm)
}

/// Angle between two vectors in degrees.
pub fn angle_degrees(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    let denom = a.norm() * b.norm();
    if denom == 0.0 {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        match result {
            Ok(value) => panic!("expected error containing '{needle}', got {value:?}"),
            Err(err) => assert!(
                err.to_string().contains(needle),
                "expected '{needle}' in '{err}'"
            ),
        }
    }

    #[test]
    fn nullspace_tangent_is_unit_null_vector() {
        // F(p, x) = x - 2p has tangent (1, 2)/sqrt(5).
        let j_ext = DMatrix::from_row_slice(1, 2, &[-2.0, 1.0]);
        let t = nullspace_tangent(&j_ext).unwrap();
        assert!((t.norm() - 1.0).abs() < 1e-12);
        assert!((&j_ext * &t).amax() < 1e-12);
        assert!((t[1] / t[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn nullspace_tangent_handles_fold_geometry() {
        // At a fold dF/dx is singular and the tangent is purely along x.
        let j_ext = DMatrix::from_row_slice(2, 3, &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        let t = nullspace_tangent(&j_ext).unwrap();
        assert!(t[0].abs() < 1e-12);
        assert!((t[1].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn nullspace_tangent_rejects_bad_shapes() {
        assert_err_contains(nullspace_tangent(&DMatrix::zeros(0, 1)), "zero-dimensional");
        assert_err_contains(nullspace_tangent(&DMatrix::zeros(2, 2)), "expected 3 columns");
    }

    #[test]
    fn orientation_follows_reference() {
        let reference = DVector::from_vec(vec![1.0, 0.0]);
        let flipped = orient(DVector::from_vec(vec![-0.6, 0.8]), &reference);
        assert_eq!(flipped.as_slice(), &[0.6, -0.8]);
    }

    #[test]
    fn secant_and_angle() {
        let a = DVector::from_vec(vec![0.0, 0.0]);
        let b = DVector::from_vec(vec![3.0, 4.0]);
        let s = secant(&a, &b).unwrap();
        assert!((s[0] - 0.6).abs() < 1e-15);
        assert!(secant(&a, &a).is_none());

        let x = DVector::from_vec(vec![1.0, 0.0]);
        let y = DVector::from_vec(vec![0.0, 2.0]);
        assert!((angle_degrees(&x, &y) - 90.0).abs() < 1e-12);
        assert!(angle_degrees(&x, &x).abs() < 1e-6);
    }
}
