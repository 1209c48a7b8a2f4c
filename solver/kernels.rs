//! Kernels `F(ξ)` entering the Hankel integrals of [`crate::quadrature::jj_int`].

use crate::quadrature::HankelKernel;
use ndarray::{Array1, Array2};
use ndarray_linalg::Inverse;

/// `F(ξ) = 1/ξ`. Its integral against `J_{2j+2} J_{2k+2}` is `δ_{jk} / (4(j+1))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKernel;

impl HankelKernel for IdentityKernel {
    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, xi: f64) -> Array2<f64> {
        Array2::from_elem((1, 1), 1.0 / xi)
    }

    fn tail(&self) -> [Array2<f64>; 3] {
        [
            Array2::ones((1, 1)),
            Array2::zeros((1, 1)),
            Array2::zeros((1, 1)),
        ]
    }
}

/// SQG kernel `F(ξ) = 1 / (D(ξ) ξ)` with
/// `D(ξ) = √(ξ² + μ) tanh(√(ξ² + μ) / λ₁) + λ₂` for `λ₁ > 0` and `√(ξ² + μ) + λ₂` otherwise.
#[derive(Debug, Clone, Copy)]
pub struct SqgKernel {
    pub depth: f64,
    pub damping: f64,
    pub mu: f64,
}

impl SqgKernel {
    /// Builds the kernel from `λ = [λ₁, λ₂]` and the background gradient `μ`.
    pub fn new(lambda: [f64; 2], mu: f64) -> Self {
        Self {
            depth: lambda[0],
            damping: lambda[1],
            mu,
        }
    }

    pub fn denominator(&self, xi: f64) -> f64 {
        let root = (xi * xi + self.mu).sqrt();
        if self.depth > 0.0 {
            root * (root / self.depth).tanh() + self.damping
        } else {
            root + self.damping
        }
    }
}

impl HankelKernel for SqgKernel {
    fn dim(&self) -> usize {
        1
    }

    fn eval(&self, xi: f64) -> Array2<f64> {
        Array2::from_elem((1, 1), 1.0 / (self.denominator(xi) * xi))
    }

    fn tail(&self) -> [Array2<f64>; 3] {
        // 1/(ξ D) = ξ⁻² − λ₂ ξ⁻³ + O(ξ⁻⁴); the tanh factor converges exponentially.
        [
            Array2::zeros((1, 1)),
            Array2::ones((1, 1)),
            Array2::from_elem((1, 1), -self.damping),
        ]
    }

    fn asymptotic_scale(&self) -> f64 {
        self.mu.abs().sqrt().max(self.damping.abs()).max(3.0 * self.depth)
    }
}

/// Which of the two layered-QG kernels to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayeredPart {
    /// `A(ξ) = K(ξ) [K(ξ) + D(μ)]⁻¹ / ξ`
    A,
    /// `B(ξ) = [K(ξ) + D(μ)]⁻¹ / ξ`
    B,
}

/// Matrix kernels of the `N`-layer QG problem.
///
/// `K(ξ) = ξ² I + L` where `L` couples the layers: a single layer sees `L = [λ₁²]`, a stack
/// of `N > 1` layers between a rigid lid and a flat bottom has `L[i, i±1] = −λᵢ²` and
/// `L[i, i] = λᵢ²` times the number of neighbouring layers. `D(μ) = diag(μ)`.
#[derive(Debug, Clone)]
pub struct LayeredKernel {
    part: LayeredPart,
    coupling: Array2<f64>,
    mu: Array1<f64>,
}

impl LayeredKernel {
    pub fn new(part: LayeredPart, lambda: &[f64], mu: &[f64]) -> Self {
        Self {
            part,
            coupling: coupling_matrix(lambda),
            mu: Array1::from(mu.to_vec()),
        }
    }

    /// `[K(ξ) + D(μ)]⁻¹`; for `ξ > 0` the matrix is an M-matrix plus `ξ² I`, so invertible
    /// whenever `ξ² + min(μ) > 0`.
    fn resolvent(&self, xi: f64) -> Array2<f64> {
        let n = self.mu.len();
        let mut operator = self.coupling.clone();
        for i in 0..n {
            operator[[i, i]] += xi * xi + self.mu[i];
        }
        if n == 1 {
            return Array2::from_elem((1, 1), 1.0 / operator[[0, 0]]);
        }
        // A singular resolvent only occurs at isolated ξ for negative μ; NaNs are reported
        // by the quadrature as a non-finite integrand.
        operator
            .inv()
            .unwrap_or_else(|_| Array2::from_elem((n, n), f64::NAN))
    }
}

impl HankelKernel for LayeredKernel {
    fn dim(&self) -> usize {
        self.mu.len()
    }

    fn eval(&self, xi: f64) -> Array2<f64> {
        let resolvent = self.resolvent(xi);
        match self.part {
            LayeredPart::B => resolvent / xi,
            LayeredPart::A => {
                // K (K + D)⁻¹ equals I − D (K + D)⁻¹
                let mut value = -&resolvent;
                for (i, mut row) in value.rows_mut().into_iter().enumerate() {
                    row *= self.mu[i];
                    row[i] += 1.0;
                }
                value / xi
            }
        }
    }

    fn tail(&self) -> [Array2<f64>; 3] {
        let n = self.dim();
        match self.part {
            LayeredPart::A => [
                Array2::eye(n),
                Array2::zeros((n, n)),
                Array2::from_diag(&self.mu.mapv(|m| -m)),
            ],
            LayeredPart::B => [Array2::zeros((n, n)), Array2::zeros((n, n)), Array2::eye(n)],
        }
    }

    fn asymptotic_scale(&self) -> f64 {
        let coupling: f64 = self.coupling.iter().map(|v| v.abs()).sum();
        let gradient: f64 = self.mu.iter().map(|v| v.abs()).sum();
        (coupling + gradient).sqrt().max(1.0)
    }
}

/// The layer-coupling matrix `L` built from the per-layer parameters `λ`.
pub fn coupling_matrix(lambda: &[f64]) -> Array2<f64> {
    let n = lambda.len();
    let mut coupling = Array2::zeros((n, n));
    if n == 1 {
        coupling[[0, 0]] = lambda[0] * lambda[0];
        return coupling;
    }
    for i in 0..n {
        let strength = lambda[i] * lambda[i];
        if i > 0 {
            coupling[[i, i - 1]] = -strength;
            coupling[[i, i]] += strength;
        }
        if i + 1 < n {
            coupling[[i, i + 1]] = -strength;
            coupling[[i, i]] += strength;
        }
    }
    coupling
}
