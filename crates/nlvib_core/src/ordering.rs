//! Fill-reducing reordering of the Newton systems.
//!
//! The harmonic-balance Jacobian is block banded: the linear operator couples
//! each harmonic only with its own cosine/sine partner, while the nonlinear
//! elements couple every harmonic of the DOFs they connect. A reverse
//! Cuthill-McKee order of that pattern keeps the LU fill close to the band.

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::VecDeque;

/// Symmetric sparsity pattern of `dense` (entries with `|a_ij| > 0`).
pub fn pattern_of(dense: &DMatrix<f64>) -> CsrMatrix<f64> {
    let n = dense.nrows();
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 1.0);
        for j in 0..dense.ncols() {
            if i != j && dense[(i, j)] != 0.0 {
                coo.push(i, j, 1.0);
                coo.push(j, i, 1.0);
            }
        }
    }
    CsrMatrix::from(&coo)
}

/// Reverse Cuthill-McKee order of a symmetric pattern.
///
/// Returns `perm` with `perm[new] = old`. Every connected component is
/// started from one of its lowest-degree vertices.
pub fn reverse_cuthill_mckee(pattern: &CsrMatrix<f64>) -> Vec<usize> {
    let n = pattern.nrows();
    let offsets = pattern.row_offsets();
    let columns = pattern.col_indices();
    let neighbours = |i: usize| {
        columns[offsets[i]..offsets[i + 1]]
            .iter()
            .copied()
            .filter(move |&j| j != i)
    };
    let degree: Vec<usize> = (0..n).map(|i| neighbours(i).count()).collect();

    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut queue = VecDeque::new();
    while order.len() < n {
        let start = (0..n)
            .filter(|&i| !visited[i])
            .min_by_key(|&i| degree[i])
            .unwrap_or(0);
        visited[start] = true;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            order.push(node);
            let mut next: Vec<usize> = neighbours(node).filter(|&j| !visited[j]).collect();
            next.sort_by_key(|&j| (degree[j], j));
            for j in next {
                visited[j] = true;
                queue.push_back(j);
            }
        }
    }
    order.reverse();
    order
}

/// Bandwidth of `pattern` after applying `perm`.
pub fn bandwidth(pattern: &CsrMatrix<f64>, perm: &[usize]) -> usize {
    let mut position = vec![0; perm.len()];
    for (new, &old) in perm.iter().enumerate() {
        position[old] = new;
    }
    let mut width = 0;
    for (i, j, _) in pattern.triplet_iter() {
        width = width.max(position[i].abs_diff(position[j]));
    }
    width
}

/// Solves `a x = b` after the symmetric reordering `perm`.
///
/// `perm` may be shorter than the system; trailing unknowns (bordering rows
/// and columns) keep their place at the end. Returns `None` when the
/// factorization is singular.
pub fn solve_permuted(a: &DMatrix<f64>, b: &DVector<f64>, perm: &[usize]) -> Option<DVector<f64>> {
    let n = a.nrows();
    let full: Vec<usize> = perm.iter().copied().chain(perm.len()..n).collect();
    let permuted = DMatrix::from_fn(n, n, |i, j| a[(full[i], full[j])]);
    let rhs = DVector::from_fn(n, |i, _| b[full[i]]);
    let y = permuted.lu().solve(&rhs)?;
    let mut x = DVector::zeros(n);
    for (new, &old) in full.iter().enumerate() {
        x[old] = y[new];
    }
    Some(x)
}

/// Plain LU solve, or [`solve_permuted`] when an order is supplied.
pub fn solve(a: &DMatrix<f64>, b: &DVector<f64>, perm: Option<&[usize]>) -> Option<DVector<f64>> {
    match perm {
        Some(perm) => solve_permuted(a, b, perm),
        None => a.clone().lu().solve(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Path graph 0-1-...-n-1 with labels scrambled.
    fn scrambled_path(n: usize) -> DMatrix<f64> {
        let label = |i: usize| (i * 7) % n;
        let mut a = DMatrix::identity(n, n) * 4.0;
        for i in 0..n - 1 {
            a[(label(i), label(i + 1))] = -1.0;
            a[(label(i + 1), label(i))] = -1.0;
        }
        a
    }

    #[test]
    fn rcm_is_a_permutation() {
        let pattern = pattern_of(&scrambled_path(10));
        let mut perm = reverse_cuthill_mckee(&pattern);
        assert_eq!(perm.len(), 10);
        perm.sort_unstable();
        assert_eq!(perm, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn rcm_recovers_band_of_scrambled_path() {
        let pattern = pattern_of(&scrambled_path(10));
        let identity: Vec<usize> = (0..10).collect();
        assert!(bandwidth(&pattern, &identity) > 1);
        let perm = reverse_cuthill_mckee(&pattern);
        assert_eq!(bandwidth(&pattern, &perm), 1);
    }

    #[test]
    fn rcm_handles_disconnected_components() {
        let mut a = DMatrix::identity(4, 4);
        a[(0, 3)] = 1.0;
        let perm = reverse_cuthill_mckee(&pattern_of(&a));
        assert_eq!(perm.len(), 4);
    }

    #[test]
    fn permuted_solve_matches_plain_solve() {
        let a = scrambled_path(6);
        let b = DVector::from_fn(6, |i, _| 1.0 + i as f64);
        let perm = reverse_cuthill_mckee(&pattern_of(&a));
        let plain = a.clone().lu().solve(&b).unwrap();
        let reordered = solve_permuted(&a, &b, &perm).unwrap();
        assert!((plain - reordered).amax() < 1e-12);
    }

    #[test]
    fn short_permutation_leaves_border_in_place() {
        let mut a = DMatrix::identity(4, 4) * 2.0;
        a[(3, 0)] = 1.0;
        a[(0, 3)] = 1.0;
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let x = solve_permuted(&a, &b, &[2, 0, 1]).unwrap();
        assert!((&a * &x - &b).amax() < 1e-12);
    }

    #[test]
    fn singular_system_yields_none() {
        let a = DMatrix::zeros(3, 3);
        let b = DVector::from_element(3, 1.0);
        assert!(solve(&a, &b, None).is_none());
        assert!(solve(&a, &b, Some(&[0, 1, 2][..])).is_none());
    }
}
