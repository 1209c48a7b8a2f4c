//! Bessel functions of the first kind for integer order.
//!
//! The quadrature in [`crate::quadrature`] needs `J_{2j+2}(ξ)` for every mode `j` at each
//! node, so the routines here return the whole sequence `J_0(x), …, J_n(x)` in one pass:
//! - Miller's backward recurrence, normalised with `J_0 + 2 Σ J_{2k} = 1`, for moderate x.
//! - Hankel's asymptotic expansion for `J_0`, `J_1` followed by forward recurrence when
//!   `x ≥ 25` and `x > n`, where forward recurrence is stable.

use std::f64::consts::PI;

/// Arguments at or above this use the asymptotic branch (when also above the top order).
const ASYMPTOTIC_THRESHOLD: f64 = 25.0;

/// Rescaling bound for the backward recurrence.
const RESCALE_LIMIT: f64 = 1e250;

/// Extra orders added above `max(n, x)` before starting Miller's recurrence.
const MILLER_PADDING: usize = 15;

/// Returns `[J_0(x), J_1(x), …, J_n(x)]` for `x ≥ 0`.
pub fn bessel_j_sequence(x: f64, n: usize) -> Vec<f64> {
    let mut values = vec![0.0; n + 1];
    if x == 0.0 {
        values[0] = 1.0;
        return values;
    }
    if x >= ASYMPTOTIC_THRESHOLD && x > n as f64 {
        forward_recurrence(x, &mut values);
    } else {
        miller_recurrence(x, &mut values);
    }
    values
}

fn forward_recurrence(x: f64, values: &mut [f64]) {
    values[0] = hankel_asymptotic(0, x);
    if values.len() > 1 {
        values[1] = hankel_asymptotic(1, x);
    }
    for k in 1..values.len().saturating_sub(1) {
        values[k + 1] = 2.0 * k as f64 / x * values[k] - values[k - 1];
    }
}

fn miller_recurrence(x: f64, values: &mut [f64]) {
    let n = values.len() - 1;
    let top = n.max(x.ceil() as usize);
    let start = 2 * ((top + MILLER_PADDING + (40.0 * top as f64).sqrt() as usize) / 2);

    let mut above = 0.0;
    let mut current = 1e-30;
    let mut norm = 0.0;
    for k in (1..=start).rev() {
        let below = 2.0 * k as f64 / x * current - above;
        if k <= n {
            values[k] = current;
        }
        if k % 2 == 0 {
            norm += 2.0 * current;
        }
        above = current;
        current = below;
        if current.abs() > RESCALE_LIMIT {
            let scale = 1.0 / RESCALE_LIMIT;
            current *= scale;
            above *= scale;
            norm *= scale;
            values.iter_mut().for_each(|v| *v *= scale);
        }
    }
    values[0] = current;
    norm += current;
    values.iter_mut().for_each(|v| *v /= norm);
}

/// Hankel's expansion `J_ν(x) = √(2/πx) (P cos χ − Q sin χ)`, `χ = x − (ν/2 + 1/4)π`.
fn hankel_asymptotic(order: u32, x: f64) -> f64 {
    let mu = 4.0 * (order * order) as f64;
    let mut p = 1.0;
    let mut q = 0.0;
    let mut term = 1.0_f64;
    for k in 1..64_u32 {
        let next = term * (mu - ((2 * k - 1) * (2 * k - 1)) as f64) / (k as f64 * 8.0 * x);
        // The series is asymptotic: stop once terms start growing.
        if k > 2 && next.abs() > term.abs() {
            break;
        }
        term = next;
        let sign = if (k / 2) % 2 == 0 { 1.0 } else { -1.0 };
        if k % 2 == 1 {
            q += sign * term;
        } else {
            p += sign * term;
        }
        if term.abs() < 1e-17 {
            break;
        }
    }
    let chi = x - (order as f64 / 2.0 + 0.25) * PI;
    (2.0 / (PI * x)).sqrt() * (p * chi.cos() - q * chi.sin())
}
