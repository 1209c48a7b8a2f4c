//! Hankel-type integrals of products of Bessel functions.
//!
//! Every operator entry is an integral of the form
//!
//! `JJ(j, k) = ∫₀^∞ F(ξ) J_{2j+2}(ξ) J_{2k+2}(ξ) dξ`
//!
//! where `F` is a (possibly matrix-valued) kernel. The integrand decays only algebraically
//! and oscillates, so a plain truncation of the range converges far too slowly.
//!
//! # Implementation
//!
//! Each kernel reports its large-ξ expansion `F ≈ f₁/ξ + f₂/ξ² + f₃/ξ³`. The three moments
//! `∫₀^∞ ξ^{-p} J_{2j+2} J_{2k+2} dξ` are known in closed form (Weber–Schafheitlin), so only
//! the remainder `F − f₁/ξ − f₂/ξ² − f₃/ξ³`, which decays like `ξ^{-5}` once multiplied by
//! the Bessel pair, is integrated numerically. The remainder is integrated over `[0, L]`
//! in panels of width π with adaptive 15-point Gauss–Kronrod quadrature.

use crate::bessel::bessel_j_sequence;
use ndarray::Array2;
use std::f64::consts::PI;
use thiserror::Error;

/// Kronrod abscissae for the 15-point rule on `[-1, 1]` (non-negative half).
const XGK: [f64; 8] = [
    0.991_455_371_120_812_6,
    0.949_107_912_342_758_5,
    0.864_864_423_359_769_1,
    0.741_531_185_599_394_4,
    0.586_087_235_467_691_1,
    0.405_845_151_377_397_2,
    0.207_784_955_007_898_5,
    0.0,
];

/// Kronrod weights matching `XGK`.
const WGK: [f64; 8] = [
    0.022_935_322_010_529_22,
    0.063_092_092_629_978_55,
    0.104_790_010_322_250_2,
    0.140_653_259_715_525_9,
    0.169_004_726_639_267_9,
    0.190_350_578_064_785_4,
    0.204_432_940_075_298_9,
    0.209_482_141_084_727_8,
];

/// Embedded 7-point Gauss weights, at `XGK[1]`, `XGK[3]`, `XGK[5]` and the centre.
const WG: [f64; 4] = [
    0.129_484_966_168_869_7,
    0.279_705_391_489_276_7,
    0.381_830_050_505_118_9,
    0.417_959_183_673_469_4,
];

/// Smallest integration cutoff used for any kernel.
const MIN_CUTOFF: f64 = 120.0;

/// The cutoff is at least this many asymptotic length scales.
const SCALE_CUTOFF_FACTOR: f64 = 40.0;

/// Absolute floor, relative to `tol`, for panels whose integral is close to zero.
const ABSOLUTE_FLOOR: f64 = 1e-4;

/// Maximum depth of interval bisection within one panel.
const MAX_BISECTION_DEPTH: usize = 40;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuadratureError {
    #[error(
        "Adaptive quadrature did not reach tolerance {tol:e} on [{lower}, {upper}] (error estimate {error:e})."
    )]
    NonConvergence {
        lower: f64,
        upper: f64,
        error: f64,
        tol: f64,
    },

    #[error("The integrand is not finite at ξ = {0}.")]
    NonFinite(f64),
}

/// A kernel `F(ξ)` for [`jj_int`].
///
/// Implementors must be `Sync`: the assembly loop integrates independent entries in
/// parallel.
pub trait HankelKernel: Sync {
    /// Side length of the square matrix returned by [`HankelKernel::eval`].
    fn dim(&self) -> usize;

    /// The kernel value at `xi > 0`.
    fn eval(&self, xi: f64) -> Array2<f64>;

    /// Coefficients `[f₁, f₂, f₃]` of the large-ξ expansion `f₁/ξ + f₂/ξ² + f₃/ξ³`.
    /// The neglected part must be `O(ξ⁻⁴)`.
    fn tail(&self) -> [Array2<f64>; 3];

    /// Value of ξ beyond which the expansion in [`HankelKernel::tail`] is accurate.
    fn asymptotic_scale(&self) -> f64 {
        1.0
    }
}

/// `∫₀^∞ ξ^{-p} J_{2j+2}(ξ) J_{2k+2}(ξ) dξ` for `p ∈ {1, 2, 3}`.
pub fn bessel_moment(p: u32, j: usize, k: usize) -> f64 {
    match p {
        1 => {
            if j == k {
                1.0 / (4.0 * (j + 1) as f64)
            } else {
                0.0
            }
        }
        2 => {
            let n = j as f64 - k as f64;
            let s = (2 * j + 2 * k) as f64;
            let sign = if (j + k) % 2 == 0 { -1.0 } else { 1.0 };
            4.0 * sign / (PI * (2.0 * n - 1.0) * (2.0 * n + 1.0) * (s + 3.0) * (s + 5.0))
        }
        3 => {
            let n = (j + k) as f64;
            let denominator = (n + 1.0) * (n + 2.0) * (n + 3.0);
            match j.abs_diff(k) {
                0 => 1.0 / (4.0 * denominator),
                1 => 1.0 / (8.0 * denominator),
                _ => 0.0,
            }
        }
        _ => panic!("bessel_moment is only defined for p = 1, 2, 3 (got {p})"),
    }
}

/// Integrates `F(ξ) J_{2j+2}(ξ) J_{2k+2}(ξ)` over `[0, ∞)`.
///
/// # Arguments
/// * `kernel`: The kernel `F`; matrix-valued kernels are integrated entrywise.
/// * `j`, `k`: Mode indices (non-negative).
/// * `tol`: Relative tolerance handed to the adaptive rule on every panel.
///
/// # Returns
/// The integral (a `dim × dim` matrix) and an estimate of its absolute error.
pub fn jj_int<K: HankelKernel + ?Sized>(
    kernel: &K,
    j: usize,
    k: usize,
    tol: f64,
) -> Result<(Array2<f64>, f64), QuadratureError> {
    let order_j = 2 * j + 2;
    let order_k = 2 * k + 2;
    let top_order = order_j.max(order_k);
    let tail = kernel.tail();

    let integrand = |xi: f64| -> Array2<f64> {
        let orders = bessel_j_sequence(xi, top_order);
        let product = orders[order_j] * orders[order_k];
        let mut remainder = kernel.eval(xi);
        remainder.scaled_add(-1.0 / xi, &tail[0]);
        remainder.scaled_add(-1.0 / (xi * xi), &tail[1]);
        remainder.scaled_add(-1.0 / (xi * xi * xi), &tail[2]);
        remainder *= product;
        remainder
    };

    let cutoff = MIN_CUTOFF
        .max(SCALE_CUTOFF_FACTOR * kernel.asymptotic_scale())
        .max(4.0 * top_order as f64);
    let panels = (cutoff / PI).ceil() as usize;

    let dim = kernel.dim();
    let mut total = Array2::<f64>::zeros((dim, dim));
    let mut error = 0.0;
    for panel in 0..panels {
        let lower = panel as f64 * PI;
        let (value, panel_error) = adaptive_gauss_kronrod(&integrand, lower, lower + PI, tol)?;
        total += &value;
        error += panel_error;
    }

    for (p, coefficient) in (1..=3).zip(tail.iter()) {
        total.scaled_add(bessel_moment(p, j, k), coefficient);
    }

    Ok((total, error))
}

/// One application of the 15-point Kronrod rule with its embedded 7-point Gauss rule.
/// Returns the Kronrod estimate and the entrywise maximum of `|K15 − G7|`.
fn gauss_kronrod_15<F>(f: &F, lower: f64, upper: f64) -> Result<(Array2<f64>, f64), QuadratureError>
where
    F: Fn(f64) -> Array2<f64>,
{
    let centre = 0.5 * (lower + upper);
    let half = 0.5 * (upper - lower);

    let f_centre = f(centre);
    let mut kronrod = &f_centre * WGK[7];
    let mut gauss = &f_centre * WG[3];

    for (i, (&x, &w)) in XGK.iter().zip(WGK.iter()).take(7).enumerate() {
        let offset = half * x;
        let pair = f(centre - offset) + f(centre + offset);
        kronrod.scaled_add(w, &pair);
        if i % 2 == 1 {
            gauss.scaled_add(WG[i / 2], &pair);
        }
    }

    kronrod *= half;
    gauss *= half;

    if kronrod.iter().any(|v| !v.is_finite()) {
        return Err(QuadratureError::NonFinite(centre));
    }

    let error = kronrod
        .iter()
        .zip(gauss.iter())
        .map(|(k, g)| (k - g).abs())
        .fold(0.0, f64::max);
    Ok((kronrod, error))
}

/// Bisects `[lower, upper]` until every piece meets `err ≤ tol · max(|I|, ABSOLUTE_FLOOR)`.
fn adaptive_gauss_kronrod<F>(
    f: &F,
    lower: f64,
    upper: f64,
    tol: f64,
) -> Result<(Array2<f64>, f64), QuadratureError>
where
    F: Fn(f64) -> Array2<f64>,
{
    let mut pending = vec![(lower, upper, 0_usize)];
    let mut total: Option<Array2<f64>> = None;
    let mut total_error = 0.0;

    while let Some((a, b, depth)) = pending.pop() {
        let (value, error) = gauss_kronrod_15(f, a, b)?;
        let magnitude = value.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        if error <= tol * magnitude.max(ABSOLUTE_FLOOR) {
            total_error += error;
            total = Some(match total {
                Some(acc) => acc + value,
                None => value,
            });
            continue;
        }
        if depth >= MAX_BISECTION_DEPTH {
            return Err(QuadratureError::NonConvergence {
                lower: a,
                upper: b,
                error,
                tol,
            });
        }
        let middle = 0.5 * (a + b);
        pending.push((middle, b, depth + 1));
        pending.push((a, middle, depth + 1));
    }

    // The stack always accepts at least one interval before it empties.
    let total = total.unwrap_or_else(|| Array2::zeros((0, 0)));
    Ok((total, total_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    /// `F(ξ) = ξ / (ξ² + p²)`, whose diagonal integral is `I_ν(p) K_ν(p)`.
    struct Lorentzian {
        p: f64,
    }

    impl HankelKernel for Lorentzian {
        fn dim(&self) -> usize {
            1
        }

        fn eval(&self, xi: f64) -> Array2<f64> {
            array![[xi / (xi * xi + self.p * self.p)]]
        }

        fn tail(&self) -> [Array2<f64>; 3] {
            [array![[1.0]], array![[0.0]], array![[-self.p * self.p]]]
        }
    }

    /// A pure power `ξ^{-p}` with no declared tail, so the range truncation is visible.
    struct Power {
        p: i32,
    }

    impl HankelKernel for Power {
        fn dim(&self) -> usize {
            1
        }

        fn eval(&self, xi: f64) -> Array2<f64> {
            array![[xi.powi(-self.p)]]
        }

        fn tail(&self) -> [Array2<f64>; 3] {
            [array![[0.0]], array![[0.0]], array![[0.0]]]
        }
    }

    #[test]
    fn test_lorentzian_matches_modified_bessel_product() {
        // Reference value is I_2(1) K_2(1).
        let expected = 0.135_747_669_767_038_3 * 1.624_838_898_635_177;
        let (value, error) = jj_int(&Lorentzian { p: 1.0 }, 0, 0, 1e-8).unwrap();
        assert_relative_eq!(value[[0, 0]], expected, epsilon = 1e-9);
        assert!(error < 1e-6);
    }

    #[test]
    fn test_truncated_powers_approach_closed_form_moments() {
        // Without a tail the range truncation dominates: ~1e-5 for ξ⁻², ~1e-7 for ξ⁻³.
        let (second, _) = jj_int(&Power { p: 2 }, 0, 0, 1e-8).unwrap();
        assert_relative_eq!(second[[0, 0]], bessel_moment(2, 0, 0), epsilon = 5e-5);
        let (third, _) = jj_int(&Power { p: 3 }, 1, 0, 1e-8).unwrap();
        assert_relative_eq!(third[[0, 0]], bessel_moment(3, 1, 0), epsilon = 5e-7);
    }

    #[test]
    fn test_moment_values() {
        assert_relative_eq!(bessel_moment(1, 2, 2), 1.0 / 12.0);
        assert_eq!(bessel_moment(1, 0, 1), 0.0);
        assert_relative_eq!(bessel_moment(2, 0, 0), 4.0 / (15.0 * PI), epsilon = 1e-15);
        assert_relative_eq!(bessel_moment(2, 0, 1), bessel_moment(2, 1, 0), epsilon = 1e-15);
        assert_relative_eq!(bessel_moment(3, 0, 0), 1.0 / 24.0, epsilon = 1e-15);
        assert_eq!(bessel_moment(3, 0, 2), 0.0);
    }

    #[test]
    fn test_gauss_kronrod_is_exact_for_polynomials() {
        let cubic = |x: f64| array![[x * x * x - 2.0 * x + 1.0]];
        let (value, error) = adaptive_gauss_kronrod(&cubic, 0.0, 2.0, 1e-12).unwrap();
        assert_relative_eq!(value[[0, 0]], 2.0, epsilon = 1e-13);
        assert!(error < 1e-13);
    }

    #[test]
    fn test_non_finite_integrand_is_reported() {
        let singular = |x: f64| array![[1.0 / (x - 0.5)]];
        match gauss_kronrod_15(&singular, 0.0, 1.0).unwrap_err() {
            QuadratureError::NonFinite(at) => assert_relative_eq!(at, 0.5),
            other => panic!("Expected NonFinite error, got {other:?}"),
        }
    }
}
