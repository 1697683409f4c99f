//! Adaptive Simulated Annealing (ASA).
//!
//! A single-solution trajectory global optimizer over bounded real-valued
//! parameter vectors. Unlike classical Boltzmann annealing, ASA cools each
//! parameter on its own schedule and draws candidate moves from a
//! heavy-tailed generating distribution whose tails collapse as the
//! temperature drops. High-temperature phases explore the whole box while
//! low-temperature phases refine locally.
//!
//! The distinguishing feature is *reannealing*: the optimizer periodically
//! measures how sensitive the cost is to each parameter (by finite
//! differences at the best state) and rescales the per-parameter schedules
//! so that insensitive directions keep exploring at high temperature while
//! sensitive ones settle.
//!
//! # Example
//!
//! ```
//! use asanneal::{AsaConfig, AsaProblem, AsaRunner, EvalPhase, Parameter};
//!
//! struct Quadratic;
//!
//! impl AsaProblem for Quadratic {
//!     fn cost(&self, p: &[f64], _phase: EvalPhase) -> Option<f64> {
//!         Some((p[0] - 3.0) * (p[0] - 3.0))
//!     }
//! }
//!
//! let parameters = [Parameter::continuous(-10.0, 10.0)];
//! let config = AsaConfig::default()
//!     .with_limit_generated(500)
//!     .with_temperature_anneal_scale(1000.0)
//!     .with_seed(42);
//! let result = AsaRunner::run(&Quadratic, &parameters, &config).unwrap();
//! assert!(result.best_cost < 1e-2);
//! ```
//!
//! # References
//!
//! - Ingber (1989), "Very fast simulated re-annealing"
//! - Ingber (1996), "Adaptive simulated annealing (ASA): Lessons learned"

mod config;
mod derivatives;
mod generate;
mod reanneal;
mod runner;
mod schedule;
mod types;

pub use config::{
    AsaConfig, CalibrationStatistic, CurvatureSchedule, GenerationMode, ReannealCost,
};
pub use derivatives::Curvature;
pub use runner::{AsaResult, AsaRunner};
pub use types::{
    AsaError, AsaProblem, EvalPhase, ExitStatus, Parameter, ParameterKind, Violation,
};
