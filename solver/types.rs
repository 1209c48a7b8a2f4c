use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shape inconsistencies between the four operators of a [`LinearSystem`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Operator A must be square, but has shape {rows}x{cols}.")]
    NonSquareA { rows: usize, cols: usize },

    #[error("Operator {name} has shape {found:?}, but {expected:?} was expected from A and d.")]
    Mismatch {
        name: &'static str,
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("The system must have at least one layer (d has zero columns).")]
    NoLayers,

    #[error("{rows} rows cannot be split evenly across {layers} layers.")]
    UnevenLayers { rows: usize, layers: usize },
}

/// The dense operators of the inhomogeneous eigenvalue problem
///
/// `[A − Σₙ Kₙᵐ B[:, :, n]] a = c[:, 0] + Σₙ Kₙᵐ c[:, n + 1]`,  `d[:, n]ᵀ a = 0`.
///
/// Rows and columns are ordered `j * N + i` for Hankel mode `j` and layer `i`, so one
/// grid block of `N` rows holds every layer for a single mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSystem {
    /// Layer-independent linear term, `rows × rows`.
    pub a: Array2<f64>,
    /// One `rows × rows` slice per layer along the third axis; slice `n` keeps only the
    /// rows of layer `n`.
    pub b: Array3<f64>,
    /// Column 0 is the μ-weighted baseline forcing, columns `1..=N` the per-layer forcing.
    pub c: Array2<f64>,
    /// Column `n` is the boundary condition vector of layer `n`.
    pub d: Array2<f64>,
}

impl LinearSystem {
    pub fn num_layers(&self) -> usize {
        self.d.ncols()
    }

    pub fn num_rows(&self) -> usize {
        self.a.nrows()
    }

    /// Number of Hankel modes per layer (`M`).
    pub fn truncation(&self) -> usize {
        match self.num_layers() {
            0 => 0,
            n => self.num_rows() / n,
        }
    }

    pub fn layer_operator(&self, layer: usize) -> ArrayView2<'_, f64> {
        self.b.index_axis(Axis(2), layer)
    }

    pub fn baseline_forcing(&self) -> ArrayView1<'_, f64> {
        self.c.column(0)
    }

    pub fn layer_forcing(&self, layer: usize) -> ArrayView1<'_, f64> {
        self.c.column(layer + 1)
    }

    pub fn validate(&self) -> Result<(), ShapeError> {
        let (rows, cols) = self.a.dim();
        if rows != cols {
            return Err(ShapeError::NonSquareA { rows, cols });
        }
        let layers = self.num_layers();
        if layers == 0 {
            return Err(ShapeError::NoLayers);
        }
        if rows % layers != 0 {
            return Err(ShapeError::UnevenLayers { rows, layers });
        }
        let checks: [(&'static str, Vec<usize>, Vec<usize>); 3] = [
            ("B", self.b.shape().to_vec(), vec![rows, rows, layers]),
            ("c", self.c.shape().to_vec(), vec![rows, layers + 1]),
            ("d", self.d.shape().to_vec(), vec![rows, layers]),
        ];
        for (name, found, expected) in checks {
            if found != expected {
                return Err(ShapeError::Mismatch {
                    name,
                    found,
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// Eigenvalues `K` (one per layer) and coefficients `a` (`M × N`, one column per layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub k: Array1<f64>,
    pub a: Array2<f64>,
}
