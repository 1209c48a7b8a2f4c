//! Residual and Jacobian of the constrained inhomogeneous eigenvalue problem.
//!
//! The unknown vector is `x = [K₁ᵐ, …, K_Nᵐ, y]` where `y` holds the coordinates of `a` in an
//! orthonormal basis `e` of the complement of the boundary-condition vectors, so `a = e y`
//! satisfies `dᵀ a = 0` by construction. With
//!
//! `M(x) = A − Σₙ xₙ B[:, :, n]` and `v(x) = c₀ + Σₙ xₙ cₙ`,
//!
//! the residual is `F(x) = M(x) e y − v(x)` and the Jacobian is
//! `∂F/∂xₙ = −B[:, :, n] a − cₙ`, `∂F/∂y = M(x) e`.

use crate::newton::RootSystem;
use crate::types::LinearSystem;
use ndarray::{Array1, Array2, ArrayView1, Axis, s};

/// Which outputs [`InhomEvpSystem::evaluate`] should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluate {
    Residual,
    Jacobian,
    Both,
}

impl Evaluate {
    fn wants_residual(self) -> bool {
        matches!(self, Evaluate::Residual | Evaluate::Both)
    }

    fn wants_jacobian(self) -> bool {
        matches!(self, Evaluate::Jacobian | Evaluate::Both)
    }
}

/// The outputs requested from [`InhomEvpSystem::evaluate`]; unrequested ones are `None`.
#[derive(Debug, Clone, Default)]
pub struct ResidualJacobian {
    pub residual: Option<Array1<f64>>,
    pub jacobian: Option<Array2<f64>>,
}

/// Quantities shared by the residual and the Jacobian at one point.
struct Intermediates<'x> {
    eigenvalues: ArrayView1<'x, f64>,
    effective: Array2<f64>,
    coefficients: Array1<f64>,
}

/// The projected root-finding problem for one [`LinearSystem`] and complement basis.
pub struct InhomEvpSystem<'a> {
    system: &'a LinearSystem,
    basis: &'a Array2<f64>,
}

impl<'a> InhomEvpSystem<'a> {
    /// `basis` must have `system.num_rows()` rows and `num_rows − num_layers` orthonormal
    /// columns orthogonal to every column of `system.d`.
    pub fn new(system: &'a LinearSystem, basis: &'a Array2<f64>) -> Self {
        Self { system, basis }
    }

    pub fn num_layers(&self) -> usize {
        self.system.num_layers()
    }

    /// Packs per-layer `Kᵐ` values and a full coefficient vector `a` into `x`.
    pub fn pack(&self, eigenvalues: &[f64], coefficients: ArrayView1<f64>) -> Array1<f64> {
        let coordinates = self.basis.t().dot(&coefficients);
        eigenvalues
            .iter()
            .copied()
            .chain(coordinates.iter().copied())
            .collect()
    }

    /// Splits `x` into the per-layer `Kᵐ` and the full coefficient vector `a = e y`.
    pub fn unpack(&self, x: ArrayView1<f64>) -> (Array1<f64>, Array1<f64>) {
        let (eigenvalues, coordinates) = x.split_at(Axis(0), self.num_layers());
        (eigenvalues.to_owned(), self.basis.dot(&coordinates))
    }

    fn intermediates<'x>(&self, x: ArrayView1<'x, f64>) -> Intermediates<'x> {
        debug_assert_eq!(x.len(), self.dimension());
        let (eigenvalues, coordinates) = x.split_at(Axis(0), self.num_layers());
        let mut effective = self.system.a.clone();
        for (layer, &value) in eigenvalues.iter().enumerate() {
            effective.scaled_add(-value, &self.system.layer_operator(layer));
        }
        Intermediates {
            eigenvalues,
            effective,
            coefficients: self.basis.dot(&coordinates),
        }
    }

    fn residual_from(&self, shared: &Intermediates) -> Array1<f64> {
        let mut forcing = self.system.baseline_forcing().to_owned();
        for (layer, &value) in shared.eigenvalues.iter().enumerate() {
            forcing.scaled_add(value, &self.system.layer_forcing(layer));
        }
        shared.effective.dot(&shared.coefficients) - forcing
    }

    fn jacobian_from(&self, shared: &Intermediates) -> Array2<f64> {
        let n = self.num_layers();
        let mut jacobian = Array2::zeros((self.system.num_rows(), self.dimension()));
        for layer in 0..n {
            let column = -self.system.layer_operator(layer).dot(&shared.coefficients)
                - &self.system.layer_forcing(layer);
            jacobian.column_mut(layer).assign(&column);
        }
        jacobian
            .slice_mut(s![.., n..])
            .assign(&shared.effective.dot(self.basis));
        jacobian
    }

    /// Evaluates the residual, the Jacobian, or both at `x`, building `M(x)` and `a` once.
    pub fn evaluate(&self, x: ArrayView1<f64>, want: Evaluate) -> ResidualJacobian {
        let shared = self.intermediates(x);
        ResidualJacobian {
            residual: want
                .wants_residual()
                .then(|| self.residual_from(&shared)),
            jacobian: want
                .wants_jacobian()
                .then(|| self.jacobian_from(&shared)),
        }
    }
}

impl RootSystem for InhomEvpSystem<'_> {
    fn dimension(&self) -> usize {
        self.num_layers() + self.basis.ncols()
    }

    fn residual(&self, x: ArrayView1<f64>) -> Array1<f64> {
        self.residual_from(&self.intermediates(x))
    }

    fn residual_and_jacobian(&self, x: ArrayView1<f64>) -> (Array1<f64>, Array2<f64>) {
        let shared = self.intermediates(x);
        (self.residual_from(&shared), self.jacobian_from(&shared))
    }
}
