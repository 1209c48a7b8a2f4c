//! Damped Newton iteration for square nonlinear systems `F(x) = 0`.
//!
//! Each iteration solves `J δ = −F` and accepts `x + t δ` for the largest `t = 2⁻ʰ` that does
//! not increase `‖F‖₂`, with at most `max_step_halvings` halvings. Convergence is declared on
//! the infinity norm of the residual.

use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::Solve;
use thiserror::Error;

/// A square system of equations with an analytic Jacobian.
pub trait RootSystem {
    /// Number of unknowns, which equals the number of equations.
    fn dimension(&self) -> usize;

    fn residual(&self, x: ArrayView1<f64>) -> Array1<f64>;

    /// Residual and Jacobian together, sharing intermediate work.
    fn residual_and_jacobian(&self, x: ArrayView1<f64>) -> (Array1<f64>, Array2<f64>);
}

#[derive(Error, Debug)]
pub enum NewtonError {
    #[error(
        "Newton iteration did not converge within {max_iterations} iterations (last residual norm {residual_norm:e})."
    )]
    NonConvergence {
        max_iterations: usize,
        residual_norm: f64,
    },

    #[error("Could not find a decreasing step after {halvings} halvings (residual norm {residual_norm:e}).")]
    StepHalvingExhausted { halvings: usize, residual_norm: f64 },

    #[error("The Jacobian is singular at iteration {iteration}: {source}")]
    LinearSolve {
        iteration: usize,
        #[source]
        source: ndarray_linalg::error::LinalgError,
    },

    #[error("The residual became non-finite at iteration {0}.")]
    NonFinite(usize),

    #[error("The initial guess has {found} entries, but the system has {expected} unknowns.")]
    DimensionMismatch { found: usize, expected: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct NewtonOptions {
    pub tol: f64,
    pub max_iterations: usize,
    pub max_step_halvings: usize,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iterations: 1000,
            max_step_halvings: 30,
        }
    }
}

/// The converged point together with the iteration count and final residual norm.
#[derive(Debug, Clone)]
pub struct NewtonResult {
    pub x: Array1<f64>,
    pub iterations: usize,
    pub residual_norm: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NewtonSolver {
    pub options: NewtonOptions,
}

impl NewtonSolver {
    pub fn new(options: NewtonOptions) -> Self {
        Self { options }
    }

    pub fn solve<S: RootSystem + ?Sized>(
        &self,
        system: &S,
        x0: Array1<f64>,
    ) -> Result<NewtonResult, NewtonError> {
        let expected = system.dimension();
        if x0.len() != expected {
            return Err(NewtonError::DimensionMismatch {
                found: x0.len(),
                expected,
            });
        }

        let mut x = x0;
        let (mut residual, mut jacobian) = system.residual_and_jacobian(x.view());
        if !residual.iter().all(|v| v.is_finite()) {
            return Err(NewtonError::NonFinite(0));
        }

        for iter in 0..self.options.max_iterations {
            let max_norm = infinity_norm(&residual);
            if max_norm <= self.options.tol {
                log::debug!("Newton converged after {iter} iterations | ‖F‖∞ = {max_norm:.3e}");
                return Ok(NewtonResult {
                    x,
                    iterations: iter,
                    residual_norm: max_norm,
                });
            }

            let neg_residual = -&residual;
            let step = jacobian
                .solve_into(neg_residual)
                .map_err(|source| NewtonError::LinearSolve {
                    iteration: iter,
                    source,
                })?;

            let current = euclidean_norm(&residual);
            let mut scale = 1.0;
            let mut step_halving_count = 0;
            let (trial, trial_residual) = loop {
                let mut trial = x.clone();
                trial.scaled_add(scale, &step);
                let trial_residual = system.residual(trial.view());
                let trial_norm = euclidean_norm(&trial_residual);
                if trial_norm.is_finite() && trial_norm <= current {
                    break (trial, trial_residual);
                }
                if step_halving_count >= self.options.max_step_halvings {
                    log::warn!(
                        "Newton failed to find a decreasing step after {step_halving_count} halvings"
                    );
                    return Err(NewtonError::StepHalvingExhausted {
                        halvings: step_halving_count,
                        residual_norm: current,
                    });
                }
                step_halving_count += 1;
                scale *= 0.5;
                log::debug!(
                    "Step halving #{step_halving_count} | current: {current:.8e}, trial: {trial_norm:.8e}"
                );
            };

            log::debug!(
                "Newton iteration {} | ‖F‖₂: {:.6e} -> {:.6e}{}",
                iter + 1,
                current,
                euclidean_norm(&trial_residual),
                if step_halving_count > 0 {
                    format!(" | Step Halving: {step_halving_count} attempts")
                } else {
                    String::new()
                }
            );

            x = trial;
            (residual, jacobian) = system.residual_and_jacobian(x.view());
        }

        let residual_norm = infinity_norm(&residual);
        if residual_norm <= self.options.tol {
            return Ok(NewtonResult {
                x,
                iterations: self.options.max_iterations,
                residual_norm,
            });
        }
        log::warn!(
            "Newton failed to converge after {} iterations.",
            self.options.max_iterations
        );
        Err(NewtonError::NonConvergence {
            max_iterations: self.options.max_iterations,
            residual_norm,
        })
    }
}

fn infinity_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

fn euclidean_norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// `x² + y² = 4`, `x y = 1`.
    struct CircleHyperbola;

    impl RootSystem for CircleHyperbola {
        fn dimension(&self) -> usize {
            2
        }

        fn residual(&self, x: ArrayView1<f64>) -> Array1<f64> {
            array![x[0] * x[0] + x[1] * x[1] - 4.0, x[0] * x[1] - 1.0]
        }

        fn residual_and_jacobian(&self, x: ArrayView1<f64>) -> (Array1<f64>, Array2<f64>) {
            (
                self.residual(x),
                array![[2.0 * x[0], 2.0 * x[1]], [x[1], x[0]]],
            )
        }
    }

    /// `atan(x) = 0`: undamped Newton diverges from |x₀| > 1.39.
    struct Arctangent;

    impl RootSystem for Arctangent {
        fn dimension(&self) -> usize {
            1
        }

        fn residual(&self, x: ArrayView1<f64>) -> Array1<f64> {
            array![x[0].atan()]
        }

        fn residual_and_jacobian(&self, x: ArrayView1<f64>) -> (Array1<f64>, Array2<f64>) {
            (self.residual(x), array![[1.0 / (1.0 + x[0] * x[0])]])
        }
    }

    #[test]
    fn converges_on_a_smooth_system() {
        let solver = NewtonSolver::new(NewtonOptions {
            tol: 1e-12,
            ..NewtonOptions::default()
        });
        let result = solver.solve(&CircleHyperbola, array![2.0, 0.3]).unwrap();
        let (x, y) = (result.x[0], result.x[1]);
        assert_abs_diff_eq!(x * x + y * y, 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x * y, 1.0, epsilon = 1e-12);
        assert!(result.iterations < 20);
    }

    #[test]
    fn step_halving_rescues_a_divergent_start() {
        let result = NewtonSolver::default()
            .solve(&Arctangent, array![5.0])
            .unwrap();
        assert_abs_diff_eq!(result.x[0], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn already_converged_guess_takes_no_steps() {
        let result = NewtonSolver::default()
            .solve(&Arctangent, array![0.0])
            .unwrap();
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn error_conditions() {
        match NewtonSolver::default()
            .solve(&CircleHyperbola, array![1.0])
            .unwrap_err()
        {
            NewtonError::DimensionMismatch { found, expected } => {
                assert_eq!(found, 1);
                assert_eq!(expected, 2);
            }
            other => panic!("Expected DimensionMismatch error, got {other:?}"),
        }

        // The Jacobian of CircleHyperbola is singular on the line x = y.
        match NewtonSolver::default()
            .solve(&CircleHyperbola, array![1.0, 1.0])
            .unwrap_err()
        {
            NewtonError::LinearSolve { iteration, .. } => assert_eq!(iteration, 0),
            other => panic!("Expected LinearSolve error, got {other:?}"),
        }

        let capped = NewtonSolver::new(NewtonOptions {
            tol: 1e-14,
            max_iterations: 1,
            ..NewtonOptions::default()
        });
        match capped.solve(&CircleHyperbola, array![2.0, 0.3]).unwrap_err() {
            NewtonError::NonConvergence { max_iterations, .. } => assert_eq!(max_iterations, 1),
            other => panic!("Expected NonConvergence error, got {other:?}"),
        }
    }
}
