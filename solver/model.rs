use crate::construction::{AssemblyError, build_linear_system};
use crate::types::LinearSystem;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Strategy used by [`crate::estimate::solve_inhom_evp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Eigensolve for a single layer, nonlinear solve otherwise.
    #[default]
    Auto,
    /// Quadratic eigenvalue problem; single-layer systems only.
    Eigensolve,
    /// Newton iteration on the projected residual.
    Nlsolve,
}

/// Parameters of one call to [`crate::estimate::solve_inhom_evp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Initial guess for `K`, one value per layer. Defaults to 4 for the eigensolve and 5
    /// per layer for the nonlinear solve.
    pub k0: Option<Vec<f64>>,
    /// Residual tolerance, and the magnitude below which entries of `a` are zeroed.
    pub tol: f64,
    pub method: Method,
    /// Exponent in `Kᵐ`. Ignored (treated as 1) when `sqg` is set.
    pub m: u32,
    pub sqg: bool,
    /// Projection threshold of the complement basis construction.
    pub basis_epsilon: f64,
    pub max_iterations: usize,
    /// Initial guess for `a`, `M × N`. Defaults to zeros with `a0[0, 0] = −K₀[0]ᵐ`.
    pub a0: Option<Array2<f64>>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            k0: None,
            tol: 1e-6,
            method: Method::Auto,
            m: 2,
            sqg: false,
            basis_epsilon: crate::basis::DEFAULT_BASIS_EPSILON,
            max_iterations: 1000,
            a0: None,
        }
    }
}

impl SolverOptions {
    /// The exponent actually applied to `K`.
    pub fn exponent(&self) -> u32 {
        if self.sqg { 1 } else { self.m }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize to TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn default_quadrature_tol() -> f64 {
    1e-6
}

/// A complete problem description as read from a TOML file.
///
/// ```toml
/// truncation = 4
/// lambda = [1.0]
/// mu = [0.0]
///
/// [solver]
/// m = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemConfig {
    pub truncation: usize,
    pub lambda: Vec<f64>,
    pub mu: Vec<f64>,
    /// Quadrature tolerance used during assembly.
    #[serde(default = "default_quadrature_tol")]
    pub tol: f64,
    #[serde(default)]
    pub sqg: bool,
    /// Layers to keep; all layers are active when absent.
    #[serde(default)]
    pub active_layers: Option<Vec<bool>>,
    #[serde(default)]
    pub solver: SolverOptions,
}

impl ProblemConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn build_system(&self) -> Result<LinearSystem, AssemblyError> {
        build_linear_system(self.truncation, &self.lambda, &self.mu, self.tol, self.sqg)
    }

    /// Solver options with the problem-level `sqg` flag applied.
    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            sqg: self.sqg,
            ..self.solver.clone()
        }
    }
}
