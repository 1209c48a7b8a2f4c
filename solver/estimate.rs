//! # Inhomogeneous Eigenvalue Solver
//!
//! Finds `K` (one value per layer) and coefficients `a` such that
//!
//! `[A − Σₙ Kₙᵐ B[:, :, n]] a = c₀ + Σₙ Kₙᵐ cₙ` and `dₙᵀ a = 0` for every layer `n`.
//!
//! ### Single layer
//!
//! With one layer the constraint can be eliminated analytically. Writing `λ = Kᵐ` and
//! `w = A⁻ᵀ d`, the problem becomes the quadratic eigenvalue problem
//! `(D₀ + λ D₁ + λ² D₂) a = 0` with
//!
//! - `D₀ = (wᵀc₀) A`
//! - `D₁ = (wᵀc₁) A − (wᵀc₀) B + c₀ (wᵀB)`
//! - `D₂ = −(wᵀc₁) B + c₁ (wᵀB)`
//!
//! which is linearised on a doubled state to the pencil `D₃ z = λ D₄ z`,
//! `D₃ = [[D₀, 0], [0, I]]`, `D₄ = [[−D₁, −D₂], [I, 0]]`. The eigenvalue closest to `K₀ᵐ` is
//! kept and `a` is recovered from the original linear system.
//!
//! ### Several layers
//!
//! The constraints are removed by writing `a = e y` for an orthonormal basis `e` of their
//! complement, and the square system in `[K₁ᵐ, …, K_Nᵐ, y]` is solved by damped Newton
//! iteration with the analytic Jacobian of [`crate::residual`].

use crate::basis::{BasisError, orthogonal_complement};
use crate::model::{Method, SolverOptions};
use crate::newton::{NewtonError, NewtonOptions, NewtonSolver};
use crate::residual::InhomEvpSystem;
use crate::types::{LinearSystem, ShapeError, Solution};
use ndarray::{Array1, Array2, s};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{EigVals, Factorize, Solve, c64};
use thiserror::Error;

/// Initial guess for `K` used by the single-layer eigensolve.
const DEFAULT_EIGENSOLVE_K0: f64 = 4.0;

/// Initial guess for every layer's `K` in the nonlinear solve.
const DEFAULT_NLSOLVE_K0: f64 = 5.0;

#[derive(Error, Debug)]
pub enum EvpError {
    #[error(
        "The eigensolve method needs a single active layer, but the system has {layers}; use the nonlinear solve instead."
    )]
    MethodIncompatible { layers: usize },

    #[error("The boundary condition vectors are not linearly independent: {0}")]
    LinearDependence(#[from] BasisError),

    #[error("Linear solve failed while {context}: {source}")]
    LinearSolve {
        context: &'static str,
        #[source]
        source: LinalgError,
    },

    #[error("The nonlinear solve did not converge: {0}")]
    RootFindNonConvergence(NewtonError),

    #[error("The matrix pencil has no finite eigenvalue.")]
    NoFiniteEigenvalue,

    #[error("Inconsistent operator shapes: {0}")]
    ShapeMismatch(#[from] ShapeError),

    #[error("Initial guess '{name}' has shape {found:?}, but {expected:?} was expected.")]
    InvalidGuess {
        name: &'static str,
        found: Vec<usize>,
        expected: Vec<usize>,
    },
}

impl From<NewtonError> for EvpError {
    fn from(err: NewtonError) -> Self {
        match err {
            NewtonError::LinearSolve { source, .. } => EvpError::LinearSolve {
                context: "solving for a Newton step",
                source,
            },
            other => EvpError::RootFindNonConvergence(other),
        }
    }
}

/// Eigenvalues of a real matrix pencil `lhs z = λ rhs z`.
pub trait PencilEigenSolver {
    /// Returns every finite eigenvalue found. `shift` is a point near the eigenvalues of
    /// interest; implementations may use it to improve accuracy there.
    fn eigenvalues(
        &self,
        lhs: &Array2<f64>,
        rhs: &Array2<f64>,
        shift: f64,
    ) -> Result<Vec<c64>, LinalgError>;
}

/// Shift-invert reduction to a standard eigenvalue problem.
///
/// The eigenvalues `θ` of `(lhs − σ rhs)⁻¹ rhs` are `1 / (λ − σ)`, so eigenvalues near the
/// shift become the dominant `θ`. `θ ≈ 0` (relative to the largest `θ`) corresponds to an
/// infinite `λ` and is dropped.
#[derive(Debug, Clone, Copy)]
pub struct ShiftInvertEigenSolver {
    /// How often the shift is moved when `lhs − σ rhs` is singular.
    pub max_shift_attempts: usize,
}

impl Default for ShiftInvertEigenSolver {
    fn default() -> Self {
        Self {
            max_shift_attempts: 3,
        }
    }
}

impl PencilEigenSolver for ShiftInvertEigenSolver {
    fn eigenvalues(
        &self,
        lhs: &Array2<f64>,
        rhs: &Array2<f64>,
        shift: f64,
    ) -> Result<Vec<c64>, LinalgError> {
        let mut sigma = shift;
        let mut attempt = 0;
        let lu = loop {
            let shifted = lhs - &(rhs * sigma);
            match shifted.factorize() {
                Ok(lu) => break lu,
                Err(err) if attempt < self.max_shift_attempts => {
                    attempt += 1;
                    let nudged = sigma + 1e-3 * attempt as f64 * sigma.abs().max(1.0);
                    log::warn!("Shifted pencil is singular at σ = {sigma}; retrying at σ = {nudged} ({err})");
                    sigma = nudged;
                }
                Err(err) => return Err(err),
            }
        };

        let mut operator = Array2::zeros(rhs.raw_dim());
        for (source, mut target) in rhs.columns().into_iter().zip(operator.columns_mut()) {
            target.assign(&lu.solve(&source)?);
        }
        let thetas = operator.eigvals()?;
        let largest = thetas.iter().fold(0.0_f64, |acc, theta| acc.max(theta.norm()));
        Ok(thetas
            .iter()
            .filter(|theta| theta.norm() > f64::EPSILON * largest)
            .map(|&theta| sigma + 1.0 / theta)
            .filter(|lambda| lambda.re.is_finite() && lambda.im.is_finite())
            .collect())
    }
}

/// Solves the inhomogeneous eigenvalue problem for `K` and `a`.
///
/// # Arguments
/// * `system`: The operators from [`crate::construction::build_linear_system`], possibly
///   reduced by [`crate::layers::apply_passive_layers`].
/// * `options`: Initial guesses, tolerance, method and exponent. See [`SolverOptions`].
///
/// # Returns
/// A [`Solution`] with real `K` (length `N`) and `a` (`M × N`). If `K` came out complex, a
/// warning is logged and only the real part is returned. Entries of `a` below `tol` in
/// magnitude are set to zero.
pub fn solve_inhom_evp(
    system: &LinearSystem,
    options: &SolverOptions,
) -> Result<Solution, EvpError> {
    solve_inhom_evp_with(system, options, &ShiftInvertEigenSolver::default())
}

/// [`solve_inhom_evp`] with a caller-provided pencil eigenvalue routine.
pub fn solve_inhom_evp_with<P: PencilEigenSolver + ?Sized>(
    system: &LinearSystem,
    options: &SolverOptions,
    pencil: &P,
) -> Result<Solution, EvpError> {
    system.validate()?;
    let layers = system.num_layers();
    let method = match (options.method, layers) {
        (Method::Auto | Method::Eigensolve, 1) => Method::Eigensolve,
        (Method::Eigensolve, _) => return Err(EvpError::MethodIncompatible { layers }),
        _ => Method::Nlsolve,
    };
    log::info!(
        "Solving inhomogeneous EVP: N={layers}, M={}, m={}, method={method:?}",
        system.truncation(),
        options.exponent()
    );

    let (k, a) = match method {
        Method::Eigensolve => eigensolve(system, options, pencil)?,
        _ => nlsolve(system, options)?,
    };
    Ok(finalize(k, a, options.tol))
}

fn eigensolve<P: PencilEigenSolver + ?Sized>(
    system: &LinearSystem,
    options: &SolverOptions,
    pencil: &P,
) -> Result<(Vec<c64>, Array2<f64>), EvpError> {
    let m = system.truncation();
    let exponent = options.exponent();
    let k0 = match &options.k0 {
        None => DEFAULT_EIGENSOLVE_K0,
        Some(values) if values.len() == 1 => values[0],
        Some(values) => {
            return Err(EvpError::InvalidGuess {
                name: "k0",
                found: vec![values.len()],
                expected: vec![1],
            });
        }
    };
    let shift = k0.powi(exponent as i32);

    let a = &system.a;
    let b = system.layer_operator(0);
    let c0 = system.baseline_forcing();
    let c1 = system.layer_forcing(0);

    let w = a
        .t()
        .solve(&system.d.column(0))
        .map_err(|source| EvpError::LinearSolve {
            context: "eliminating the boundary condition",
            source,
        })?;
    let s0 = w.dot(&c0);
    let s1 = w.dot(&c1);
    let projected = b.t().dot(&w);
    let outer = |column: &ndarray::ArrayView1<f64>| {
        Array2::from_shape_fn((m, m), |(i, j)| column[i] * projected[j])
    };

    let d0 = a * s0;
    let d1 = a * s1 - &b * s0 + outer(&c0);
    let d2 = &b * -s1 + outer(&c1);

    let mut lhs = Array2::<f64>::zeros((2 * m, 2 * m));
    let mut rhs = Array2::<f64>::zeros((2 * m, 2 * m));
    lhs.slice_mut(s![..m, ..m]).assign(&d0);
    lhs.slice_mut(s![m.., m..]).assign(&Array2::eye(m));
    rhs.slice_mut(s![..m, ..m]).assign(&-d1);
    rhs.slice_mut(s![..m, m..]).assign(&-d2);
    rhs.slice_mut(s![m.., ..m]).assign(&Array2::eye(m));

    let eigenvalues = pencil
        .eigenvalues(&lhs, &rhs, shift)
        .map_err(|source| EvpError::LinearSolve {
            context: "computing the pencil eigenvalues",
            source,
        })?;
    let lambda = eigenvalues
        .into_iter()
        .filter(|z| !z.re.is_nan() && !z.im.is_nan())
        .min_by(|x, y| {
            (*x - shift)
                .norm_sqr()
                .total_cmp(&(*y - shift).norm_sqr())
        })
        .ok_or(EvpError::NoFiniteEigenvalue)?;
    log::debug!("Selected pencil eigenvalue {lambda} closest to K₀ᵐ = {shift}");

    // (A − λB) a = c₀ + λ c₁ in complex arithmetic; the real part is kept afterwards.
    let operator = Array2::from_shape_fn((m, m), |(i, j)| c64::new(a[[i, j]], 0.0) - lambda * b[[i, j]]);
    let forcing = Array1::from_shape_fn(m, |i| c0[i] + lambda * c1[i]);
    let coefficients = operator
        .solve_into(forcing)
        .map_err(|source| EvpError::LinearSolve {
            context: "recovering the coefficients",
            source,
        })?;

    let k = vec![lambda.powf(1.0 / exponent as f64)];
    let a = Array2::from_shape_fn((m, 1), |(i, _)| coefficients[i].re);
    Ok((k, a))
}

fn nlsolve(
    system: &LinearSystem,
    options: &SolverOptions,
) -> Result<(Vec<c64>, Array2<f64>), EvpError> {
    let n = system.num_layers();
    let m = system.truncation();
    let exponent = options.exponent();

    let k0 = options
        .k0
        .clone()
        .unwrap_or_else(|| vec![DEFAULT_NLSOLVE_K0; n]);
    if k0.len() != n {
        return Err(EvpError::InvalidGuess {
            name: "k0",
            found: vec![k0.len()],
            expected: vec![n],
        });
    }
    let eigenvalues0: Vec<f64> = k0.iter().map(|k| k.powi(exponent as i32)).collect();

    let a0 = match &options.a0 {
        Some(guess) if guess.dim() == (m, n) => guess.clone(),
        Some(guess) => {
            return Err(EvpError::InvalidGuess {
                name: "a0",
                found: guess.shape().to_vec(),
                expected: vec![m, n],
            });
        }
        None => {
            let mut guess = Array2::zeros((m, n));
            guess[[0, 0]] = -eigenvalues0[0];
            guess
        }
    };
    // Row j of a0 holds mode j for every layer, matching the j * N + i ordering.
    let flat: Array1<f64> = a0.iter().copied().collect();

    let basis = orthogonal_complement(system.d.view(), options.basis_epsilon)?;
    log::debug!("Free basis slots: {:?}", basis.free_indices);
    let problem = InhomEvpSystem::new(system, &basis.complement);
    let x0 = problem.pack(&eigenvalues0, flat.view());

    let solver = NewtonSolver::new(NewtonOptions {
        tol: options.tol,
        max_iterations: options.max_iterations,
        ..NewtonOptions::default()
    });
    let result = solver.solve(&problem, x0)?;
    log::info!(
        "Nonlinear solve converged in {} iterations (‖F‖∞ = {:.3e})",
        result.iterations,
        result.residual_norm
    );

    let (eigenvalues, coefficients) = problem.unpack(result.x.view());
    let k = eigenvalues
        .iter()
        .map(|&value| c64::new(value, 0.0).powf(1.0 / exponent as f64))
        .collect();
    let a = Array2::from_shape_fn((m, n), |(j, i)| coefficients[j * n + i]);
    Ok((k, a))
}

fn finalize(k: Vec<c64>, a: Array2<f64>, tol: f64) -> Solution {
    if k.iter().any(|value| value.im.abs() > tol) {
        log::warn!(
            "K = {k:?} has a non-negligible imaginary part, which usually means a layer is passive or decoupled; keeping the real part."
        );
    }
    Solution {
        k: k.iter().map(|value| value.re).collect(),
        a: a.mapv(|value| if value.abs() < tol { 0.0 } else { value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array3, array};

    /// A pencil solver that always reports the same eigenvalues.
    struct FixedPencil(Vec<c64>);

    impl PencilEigenSolver for FixedPencil {
        fn eigenvalues(
            &self,
            lhs: &Array2<f64>,
            rhs: &Array2<f64>,
            shift: f64,
        ) -> Result<Vec<c64>, LinalgError> {
            assert_eq!(lhs.dim(), rhs.dim());
            assert!(shift > 0.0);
            Ok(self.0.clone())
        }
    }

    fn toy_system() -> LinearSystem {
        LinearSystem {
            a: array![[0.25, 0.0], [0.0, 0.125]],
            b: Array3::from_shape_vec((2, 2, 1), vec![0.1, 0.02, 0.02, 0.05]).unwrap(),
            c: array![[0.0, 0.25], [0.0, 0.0]],
            d: array![[1.0], [-1.0]],
        }
    }

    #[test]
    fn shift_invert_recovers_diagonal_pencil() {
        let lhs = Array2::from_diag(&array![2.0, 6.0, 12.0]);
        let rhs = Array2::from_diag(&array![1.0, 2.0, 0.0]);
        let mut values = ShiftInvertEigenSolver::default()
            .eigenvalues(&lhs, &rhs, 1.0)
            .unwrap();
        values.sort_by(|x, y| x.re.total_cmp(&y.re));
        assert_eq!(values.len(), 2);
        assert_relative_eq!(values[0].re, 2.0, epsilon = 1e-12);
        assert_relative_eq!(values[1].re, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn shift_on_an_eigenvalue_is_nudged() {
        let lhs = Array2::from_diag(&array![2.0, 6.0]);
        let rhs = Array2::eye(2);
        let values = ShiftInvertEigenSolver::default()
            .eigenvalues(&lhs, &rhs, 2.0)
            .unwrap();
        let mut reals: Vec<f64> = values.iter().map(|z| z.re).collect();
        reals.sort_by(f64::total_cmp);
        assert_relative_eq!(reals[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(reals[1], 6.0, epsilon = 1e-10);
    }

    #[test]
    fn eigensolve_satisfies_both_equations() {
        let system = toy_system();
        let options = SolverOptions {
            k0: Some(vec![2.0]),
            tol: 1e-12,
            ..SolverOptions::default()
        };
        let solution = solve_inhom_evp(&system, &options).unwrap();
        let lambda = solution.k[0].powi(2);
        let a = solution.a.column(0);
        let residual = (&system.a - &(&system.layer_operator(0) * lambda)).dot(&a)
            - (&system.baseline_forcing() + &(&system.layer_forcing(0) * lambda));
        assert!(residual.iter().all(|r| r.abs() < 1e-10), "{residual:?}");
        assert!(system.d.column(0).dot(&a).abs() < 1e-10);
    }

    #[test]
    fn closest_eigenvalue_wins_and_imaginary_part_is_dropped() {
        let pencil = FixedPencil(vec![
            c64::new(f64::NAN, 0.0),
            c64::new(1.0, 0.0),
            c64::new(9.0, 1e-3),
            c64::new(30.0, 0.0),
        ]);
        let options = SolverOptions {
            k0: Some(vec![3.0]),
            ..SolverOptions::default()
        };
        let solution = solve_inhom_evp_with(&toy_system(), &options, &pencil).unwrap();
        // √(9 + 0.001i) ≈ 3 + 1.7e-4 i
        assert_relative_eq!(solution.k[0], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn finalize_zeroes_small_coefficients() {
        let solution = finalize(
            vec![c64::new(2.0, 0.5)],
            array![[1.0], [1e-9], [-3e-7]],
            1e-6,
        );
        assert_eq!(solution.k, array![2.0]);
        assert_eq!(solution.a, array![[1.0], [0.0], [0.0]]);
    }

    #[test]
    fn error_conditions() {
        let mut two_layer = LinearSystem {
            a: Array2::eye(4),
            b: Array3::zeros((4, 4, 2)),
            c: Array2::zeros((4, 3)),
            d: array![[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]],
        };
        let eigensolve = SolverOptions {
            method: Method::Eigensolve,
            ..SolverOptions::default()
        };
        match solve_inhom_evp(&two_layer, &eigensolve).unwrap_err() {
            EvpError::MethodIncompatible { layers } => assert_eq!(layers, 2),
            other => panic!("Expected MethodIncompatible error, got {other:?}"),
        }

        let bad_guess = SolverOptions {
            k0: Some(vec![5.0]),
            ..SolverOptions::default()
        };
        match solve_inhom_evp(&two_layer, &bad_guess).unwrap_err() {
            EvpError::InvalidGuess { name, .. } => assert_eq!(name, "k0"),
            other => panic!("Expected InvalidGuess error, got {other:?}"),
        }

        two_layer.d = array![[1.0, 2.0], [0.0, 0.0], [-1.0, -2.0], [0.0, 0.0]];
        match solve_inhom_evp(&two_layer, &SolverOptions::default()).unwrap_err() {
            EvpError::LinearDependence(_) => {}
            other => panic!("Expected LinearDependence error, got {other:?}"),
        }

        let mut ragged = toy_system();
        ragged.c = Array2::zeros((2, 3));
        match solve_inhom_evp(&ragged, &SolverOptions::default()).unwrap_err() {
            EvpError::ShapeMismatch(_) => {}
            other => panic!("Expected ShapeMismatch error, got {other:?}"),
        }

        match solve_inhom_evp_with(&toy_system(), &SolverOptions::default(), &FixedPencil(vec![]))
            .unwrap_err()
        {
            EvpError::NoFiniteEigenvalue => {}
            other => panic!("Expected NoFiniteEigenvalue error, got {other:?}"),
        }
    }

    #[test]
    fn newton_failures_are_split_by_cause() {
        let system =
            crate::construction::build_linear_system(3, &[1.0, 0.5], &[0.1, 0.0], 1e-6, false)
                .unwrap();
        let capped = SolverOptions {
            max_iterations: 1,
            tol: 1e-14,
            ..SolverOptions::default()
        };
        match solve_inhom_evp(&system, &capped).unwrap_err() {
            EvpError::RootFindNonConvergence(_) => {}
            other => panic!("Expected RootFindNonConvergence error, got {other:?}"),
        }

        // Zero A and B make the Jacobian vanish while the baseline forcing keeps F nonzero.
        let mut degenerate = LinearSystem {
            a: Array2::zeros((4, 4)),
            b: Array3::zeros((4, 4, 2)),
            c: Array2::zeros((4, 3)),
            d: array![[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]],
        };
        degenerate.c[[0, 0]] = 1.0;
        match solve_inhom_evp(&degenerate, &SolverOptions::default()).unwrap_err() {
            EvpError::LinearSolve { context, .. } => {
                assert_eq!(context, "solving for a Newton step")
            }
            other => panic!("Expected LinearSolve error, got {other:?}"),
        }
    }
}
