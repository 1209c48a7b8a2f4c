use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;

/// Threshold below which a projection (or a Gram-Schmidt residual norm) counts as zero.
pub const DEFAULT_BASIS_EPSILON: f64 = 1e-6;

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error(
        "Constraint vector {column} is linearly dependent on the previous constraints; no free basis slot has a projection above {epsilon:e}."
    )]
    LinearDependence { column: usize, epsilon: f64 },

    #[error("Cannot place {constraints} constraint vectors in a space of dimension {dimension}.")]
    TooManyConstraints {
        constraints: usize,
        dimension: usize,
    },
}

/// An orthonormal basis of `Rⁿ` split into constrained and free directions.
#[derive(Debug, Clone)]
pub struct OrthonormalBasis {
    /// `n × (n − k)` orthonormal basis of the orthogonal complement of the constraints.
    pub complement: Array2<f64>,
    /// The full `n × n` orthonormal basis. Column `p` holds the direction that occupies
    /// slot `p`: constraint directions sit in the slots they displaced.
    pub full: Array2<f64>,
    /// Slots that were never displaced by a constraint, in ascending order. Column `q` of
    /// `complement` is column `free_indices[q]` of `full`.
    pub free_indices: Vec<usize>,
}

/// Extends `k` linearly independent constraint columns to an orthonormal basis of `Rⁿ`.
///
/// Starting from the standard basis, each constraint column replaces the first still-free
/// slot (ascending index) whose basis vector has a projection onto it larger than
/// `epsilon`. The constraint directions are then orthonormalised in input order, followed by
/// the untouched standard vectors in ascending slot order, so every free direction ends up
/// orthogonal to the whole constraint span. Plain slot order would leave a free slot that
/// precedes a displaced one only orthogonal to the earlier constraints, which breaks
/// `dᵀ e = 0` whenever the constraints are not mutually orthogonal.
///
/// # Arguments
/// * `constraints`: An `n × k` view whose columns are the constraint vectors.
/// * `epsilon`: Projection threshold, normally [`DEFAULT_BASIS_EPSILON`].
///
/// # Returns
/// An [`OrthonormalBasis`] whose `complement` satisfies `complementᵀ complement = I` and
/// `constraintsᵀ complement ≈ 0`.
pub fn orthogonal_complement(
    constraints: ArrayView2<f64>,
    epsilon: f64,
) -> Result<OrthonormalBasis, BasisError> {
    let (n, k) = constraints.dim();
    if k > n {
        return Err(BasisError::TooManyConstraints {
            constraints: k,
            dimension: n,
        });
    }

    let mut full = Array2::<f64>::eye(n);
    let mut free_indices: Vec<usize> = (0..n).collect();
    let mut displaced = Vec::with_capacity(k);

    for (column, v) in constraints.columns().into_iter().enumerate() {
        let position = free_indices
            .iter()
            .position(|&slot| full.column(slot).dot(&v).abs() > epsilon)
            .ok_or(BasisError::LinearDependence { column, epsilon })?;
        let slot = free_indices.remove(position);
        full.column_mut(slot).assign(&v);
        displaced.push(slot);
    }

    // Modified Gram-Schmidt: constraints first, then the surviving standard vectors.
    let order: Vec<usize> = displaced.iter().chain(free_indices.iter()).copied().collect();
    for (step, &slot) in order.iter().enumerate() {
        let mut w: Array1<f64> = full.column(slot).to_owned();
        for &previous in &order[..step] {
            let q = full.column(previous);
            let projection = q.dot(&w);
            w.scaled_add(-projection, &q);
        }
        let norm = w.dot(&w).sqrt();
        if norm <= epsilon {
            // Only reachable for a constraint column that is spanned by earlier ones.
            let column = displaced.iter().position(|&s| s == slot).unwrap_or(step);
            return Err(BasisError::LinearDependence { column, epsilon });
        }
        w /= norm;
        full.column_mut(slot).assign(&w);
    }

    let complement = full.select(ndarray::Axis(1), &free_indices);

    Ok(OrthonormalBasis {
        complement,
        full,
        free_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_orthonormal_complement(constraints: &Array2<f64>, basis: &OrthonormalBasis) {
        let e = &basis.complement;
        let gram = e.t().dot(e);
        let identity = Array2::<f64>::eye(e.ncols());
        for (g, i) in gram.iter().zip(identity.iter()) {
            assert_abs_diff_eq!(*g, *i, epsilon = 1e-12);
        }
        for value in constraints.t().dot(e).iter() {
            assert_abs_diff_eq!(*value, 0.0, epsilon = 1e-12);
        }
        let full_gram = basis.full.t().dot(&basis.full);
        for (g, i) in full_gram.iter().zip(Array2::<f64>::eye(basis.full.ncols()).iter()) {
            assert_abs_diff_eq!(*g, *i, epsilon = 1e-12);
        }
    }

    #[test]
    fn single_alternating_constraint_displaces_first_slot() {
        let d = array![[1.0], [-1.0], [1.0], [-1.0]];
        let basis = orthogonal_complement(d.view(), DEFAULT_BASIS_EPSILON).unwrap();
        assert_eq!(basis.free_indices, vec![1, 2, 3]);
        assert_eq!(basis.complement.dim(), (4, 3));
        assert_orthonormal_complement(&d, &basis);
    }

    #[test]
    fn zero_leading_entries_are_skipped() {
        // The first slot has no projection onto the constraint, so slot 1 is displaced.
        let d = array![[0.0], [2.0], [1.0]];
        let basis = orthogonal_complement(d.view(), DEFAULT_BASIS_EPSILON).unwrap();
        assert_eq!(basis.free_indices, vec![0, 2]);
        assert_abs_diff_eq!(basis.complement[[0, 0]], 1.0, epsilon = 1e-14);
        assert_orthonormal_complement(&d, &basis);
    }

    #[test]
    fn interleaved_layer_constraints() {
        // Two layers, three modes: rows ordered j * N + i.
        let d = array![
            [1.0, 0.0],
            [0.0, 1.0],
            [-1.0, 0.0],
            [0.0, -1.0],
            [1.0, 0.0],
            [0.0, 1.0]
        ];
        let basis = orthogonal_complement(d.view(), DEFAULT_BASIS_EPSILON).unwrap();
        assert_eq!(basis.free_indices, vec![2, 3, 4, 5]);
        assert_orthonormal_complement(&d, &basis);
    }

    #[test]
    fn random_independent_constraints() {
        let mut rng = StdRng::seed_from_u64(0x5EED_0B5);
        for &(n, k) in &[(5_usize, 1_usize), (6, 3), (8, 8), (10, 4)] {
            let d = Array2::from_shape_fn((n, k), |_| rng.gen_range(-1.0..1.0));
            let basis = orthogonal_complement(d.view(), DEFAULT_BASIS_EPSILON).unwrap();
            assert_eq!(basis.complement.ncols(), n - k);
            assert_eq!(basis.free_indices.len(), n - k);
            assert_orthonormal_complement(&d, &basis);
        }
    }

    #[test]
    fn non_orthogonal_constraints_still_give_an_orthogonal_complement() {
        // Free slot 1 sits before the displaced slot 2 and must still end up orthogonal to
        // the second constraint.
        let d = array![[1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let basis = orthogonal_complement(d.view(), DEFAULT_BASIS_EPSILON).unwrap();
        assert_eq!(basis.free_indices, vec![1, 3]);
        assert_orthonormal_complement(&d, &basis);
    }

    #[test]
    fn error_conditions() {
        let repeated = array![[1.0, 1.0], [1.0, 1.0], [0.0, 0.0]];
        match orthogonal_complement(repeated.view(), DEFAULT_BASIS_EPSILON).unwrap_err() {
            BasisError::LinearDependence { column, .. } => assert_eq!(column, 1),
            other => panic!("Expected LinearDependence error, got {other:?}"),
        }

        let exhausted = array![[1.0, 2.0], [0.0, 0.0]];
        match orthogonal_complement(exhausted.view(), DEFAULT_BASIS_EPSILON).unwrap_err() {
            BasisError::LinearDependence { column, .. } => assert_eq!(column, 1),
            other => panic!("Expected LinearDependence error, got {other:?}"),
        }

        let wide = Array2::<f64>::ones((2, 3));
        match orthogonal_complement(wide.view(), DEFAULT_BASIS_EPSILON).unwrap_err() {
            BasisError::TooManyConstraints {
                constraints,
                dimension,
            } => {
                assert_eq!(constraints, 3);
                assert_eq!(dimension, 2);
            }
            other => panic!("Expected TooManyConstraints error, got {other:?}"),
        }
    }
}
