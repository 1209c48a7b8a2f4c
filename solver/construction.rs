use crate::kernels::{LayeredKernel, LayeredPart, SqgKernel};
use crate::quadrature::{HankelKernel, QuadratureError, jj_int};
use crate::types::LinearSystem;
use itertools::iproduct;
use ndarray::{Array2, Array3, Axis, s};
use rayon::prelude::*;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("The truncation order M must be at least 1, but was {0}.")]
    InvalidTruncation(usize),

    #[error("Parameter '{name}' has length {found}, but {expected} was expected.")]
    ParameterLength {
        name: &'static str,
        expected: String,
        found: usize,
    },

    #[error("Quadrature of an operator entry failed: {0}")]
    Quadrature(#[from] QuadratureError),
}

/// Builds the operators `A`, `B`, `c`, `d` of the inhomogeneous eigenvalue problem.
///
/// # Arguments
/// * `truncation`: Number of Hankel modes `M` retained per layer.
/// * `lambda`: SQG: `[λ₁, λ₂]` (depth ratio and Ekman-type damping). Layered QG: one
///   vortex-radius to Rossby-radius ratio per layer.
/// * `mu`: SQG: a single background gradient. Layered QG: one gradient per layer; its
///   length fixes the number of layers `N`.
/// * `tol`: Relative tolerance handed unchanged to [`jj_int`].
/// * `sqg`: Selects the SQG problem (`M × M` operators) instead of layered QG with its
///   `NM × NM` operators.
pub fn build_linear_system(
    truncation: usize,
    lambda: &[f64],
    mu: &[f64],
    tol: f64,
    sqg: bool,
) -> Result<LinearSystem, AssemblyError> {
    if truncation == 0 {
        return Err(AssemblyError::InvalidTruncation(truncation));
    }
    if sqg {
        if lambda.len() != 2 {
            return Err(AssemblyError::ParameterLength {
                name: "lambda",
                expected: "2 for SQG".to_string(),
                found: lambda.len(),
            });
        }
        if mu.len() != 1 {
            return Err(AssemblyError::ParameterLength {
                name: "mu",
                expected: "1 for SQG".to_string(),
                found: mu.len(),
            });
        }
        build_sqg(truncation, [lambda[0], lambda[1]], mu[0], tol)
    } else {
        if mu.is_empty() {
            return Err(AssemblyError::ParameterLength {
                name: "mu",
                expected: "at least 1".to_string(),
                found: 0,
            });
        }
        if lambda.len() != mu.len() {
            return Err(AssemblyError::ParameterLength {
                name: "lambda",
                expected: format!("{} (one per layer)", mu.len()),
                found: lambda.len(),
            });
        }
        build_layered(truncation, lambda, mu, tol)
    }
}

fn build_sqg(m: usize, lambda: [f64; 2], mu: f64, tol: f64) -> Result<LinearSystem, AssemblyError> {
    log::info!("Assembling SQG system: M={m}, λ={lambda:?}, μ={mu}");

    let a = Array2::from_diag(&ndarray::Array1::from_shape_fn(m, |j| {
        1.0 / (4.0 * (j + 1) as f64)
    }));

    let b0 = if mu == 0.0 && lambda == [0.0, 0.0] {
        sqg_closed_form(m)
    } else {
        integrate_blocks(&SqgKernel::new(lambda, mu), m, tol)?
    };

    let mut c = Array2::zeros((m, 2));
    c[[0, 1]] = 0.25;
    let d = Array2::from_shape_fn((m, 1), |(j, _)| alternating_sign(j));

    Ok(LinearSystem {
        a,
        b: b0.insert_axis(Axis(2)),
        c,
        d,
    })
}

fn build_layered(
    m: usize,
    lambda: &[f64],
    mu: &[f64],
    tol: f64,
) -> Result<LinearSystem, AssemblyError> {
    let n = mu.len();
    log::info!("Assembling {n}-layer QG system: M={m}, λ={lambda:?}, μ={mu:?}");

    let a = integrate_blocks(&LayeredKernel::new(LayeredPart::A, lambda, mu), m, tol)?;
    let b0 = integrate_blocks(&LayeredKernel::new(LayeredPart::B, lambda, mu), m, tol)?;

    let rows = n * m;
    let mut b = Array3::zeros((rows, rows, n));
    let mut c = Array2::zeros((rows, n + 1));
    let mut d = Array2::zeros((rows, n));

    for layer in 0..n {
        // Kronecker(I_M, diag(e_n)) keeps rows j * N + n of B₀.
        for j in 0..m {
            let row = j * n + layer;
            b.slice_mut(s![row, .., layer]).assign(&b0.row(row));
            d[[row, layer]] = alternating_sign(j);
        }
        // c₀_base has a 1 in each of the first N rows, so only mode j = 0 is forced.
        c[[layer, layer + 1]] = 0.25;
        c[[layer, 0]] += mu[layer] * 0.25;
    }

    Ok(LinearSystem { a, b, c, d })
}

/// Exact `B` for SQG with `μ = 0`, `λ = [0, 0]`:
/// `B[j, k] = 4 (−1)^{j−k+1} / (π (2(j−k)−1)(2(j−k)+1)(2j+2k+3)(2j+2k+5))`.
pub fn sqg_closed_form(m: usize) -> Array2<f64> {
    Array2::from_shape_fn((m, m), |(j, k)| {
        let diff = j as f64 - k as f64;
        let sum = (2 * (j + k)) as f64;
        4.0 * -alternating_sign(j + k)
            / (PI * (2.0 * diff - 1.0) * (2.0 * diff + 1.0) * (sum + 3.0) * (sum + 5.0))
    })
}

/// Fills the `(Nm × Nm)` block matrix whose block `(j, k)` is `jj_int(kernel, j, k)`.
///
/// The Bessel product is symmetric in `(j, k)`, so only `j ≤ k` is integrated and the block
/// is copied (untransposed) to `(k, j)`.
fn integrate_blocks<K: HankelKernel>(
    kernel: &K,
    m: usize,
    tol: f64,
) -> Result<Array2<f64>, AssemblyError> {
    let n = kernel.dim();
    let pairs: Vec<(usize, usize)> = iproduct!(0..m, 0..m).filter(|(j, k)| j <= k).collect();

    let blocks = pairs
        .into_par_iter()
        .map(|(j, k)| jj_int(kernel, j, k, tol).map(|(value, error)| (j, k, value, error)))
        .collect::<Result<Vec<_>, QuadratureError>>()?;

    let mut out = Array2::zeros((n * m, n * m));
    let mut worst_error = 0.0_f64;
    for (j, k, value, error) in blocks {
        worst_error = worst_error.max(error);
        out.slice_mut(s![j * n..(j + 1) * n, k * n..(k + 1) * n])
            .assign(&value);
        if j != k {
            out.slice_mut(s![k * n..(k + 1) * n, j * n..(j + 1) * n])
                .assign(&value);
        }
    }
    log::debug!(
        "Integrated {} Hankel blocks of size {n}x{n}; worst error estimate {worst_error:.3e}",
        m * (m + 1) / 2
    );
    Ok(out)
}

fn alternating_sign(j: usize) -> f64 {
    if j % 2 == 0 { 1.0 } else { -1.0 }
}
