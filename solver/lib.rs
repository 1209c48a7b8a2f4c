#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
#![allow(non_snake_case)]

pub mod basis;
pub mod bessel;
pub mod construction;
pub mod estimate;
pub mod kernels;
pub mod layers;
pub mod model;
pub mod newton;
pub mod quadrature;
pub mod residual;
pub mod types;

pub use construction::build_linear_system;
pub use estimate::solve_inhom_evp;
pub use layers::{apply_passive_layers, include_passive_layers};
pub use model::{Method, ProblemConfig, SolverOptions};
pub use types::{LinearSystem, Solution};
