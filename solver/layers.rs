//! Restricting a layered system to its active layers and expanding solutions back.
//!
//! Three index sets are derived from one activity mask and must stay consistent:
//! the grid index (rows `j * N + i` for every mode `j` and active layer `i`), the layer index
//! (active `i`), and the extended index (column 0 of `c` followed by columns `i + 1`).

use crate::types::{LinearSystem, ShapeError, Solution};
use itertools::iproduct;
use ndarray::{Array1, Array2, Axis};
use std::iter;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    #[error("The activity mask has {mask} entries, but the system has {layers} layers.")]
    MaskLengthMismatch { mask: usize, layers: usize },

    #[error("{found} is {found_count} values wide, but the mask marks {expected} active layers.")]
    ActiveCountMismatch {
        found: &'static str,
        found_count: usize,
        expected: usize,
    },

    #[error("The activity mask does not mark any layer as active.")]
    NoActiveLayers,

    #[error("Cannot mask an inconsistent system: {0}")]
    Shape(#[from] ShapeError),
}

/// Restricts `A`, `B`, `c` and `d` to the layers with `active[i] == true`.
///
/// The reduced system keeps the row ordering `j * N' + i'` over the `N'` active layers and
/// keeps the baseline forcing column of `c` untouched.
pub fn apply_passive_layers(
    system: &LinearSystem,
    active: &[bool],
) -> Result<LinearSystem, LayerError> {
    system.validate()?;
    let n = system.num_layers();
    if active.len() != n {
        return Err(LayerError::MaskLengthMismatch {
            mask: active.len(),
            layers: n,
        });
    }
    let layers: Vec<usize> = (0..n).filter(|&i| active[i]).collect();
    if layers.is_empty() {
        return Err(LayerError::NoActiveLayers);
    }

    let grid: Vec<usize> = iproduct!(0..system.truncation(), 0..n)
        .filter(|&(_, i)| active[i])
        .map(|(j, i)| j * n + i)
        .collect();
    let extended: Vec<usize> = iter::once(0).chain(layers.iter().map(|i| i + 1)).collect();

    log::debug!(
        "Masking {n}-layer system down to layers {layers:?} ({} of {} rows)",
        grid.len(),
        system.num_rows()
    );

    Ok(LinearSystem {
        a: system.a.select(Axis(0), &grid).select(Axis(1), &grid),
        b: system
            .b
            .select(Axis(0), &grid)
            .select(Axis(1), &grid)
            .select(Axis(2), &layers),
        c: system.c.select(Axis(0), &grid).select(Axis(1), &extended),
        d: system.d.select(Axis(0), &grid).select(Axis(1), &layers),
    })
}

/// Scatters a solution over the active layers into the full layer set, with zeros in the
/// passive positions.
pub fn include_passive_layers(
    k: &Array1<f64>,
    a: &Array2<f64>,
    active: &[bool],
) -> Result<Solution, LayerError> {
    let expected = active.iter().filter(|&&on| on).count();
    if k.len() != expected {
        return Err(LayerError::ActiveCountMismatch {
            found: "K",
            found_count: k.len(),
            expected,
        });
    }
    if a.ncols() != expected {
        return Err(LayerError::ActiveCountMismatch {
            found: "a",
            found_count: a.ncols(),
            expected,
        });
    }

    let mut full_k = Array1::zeros(active.len());
    let mut full_a = Array2::zeros((a.nrows(), active.len()));
    let positions = active
        .iter()
        .enumerate()
        .filter_map(|(i, &on)| on.then_some(i));
    for (compact, layer) in positions.enumerate() {
        full_k[layer] = k[compact];
        full_a.column_mut(layer).assign(&a.column(compact));
    }
    Ok(Solution {
        k: full_k,
        a: full_a,
    })
}
