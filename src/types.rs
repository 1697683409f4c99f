//! Core types for the ASA optimizer.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::schedule::EPS;

/// Why the cost function is being invoked. Diagnostic metadata only; most
/// implementations ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EvalPhase {
    /// Sampling to calibrate the initial cost temperature.
    Calibration,
    /// Evaluating or generating the starting state.
    InitialState,
    /// A candidate inside the main annealing loop.
    NewState,
    /// Sampling to re-estimate the cost temperature during reannealing.
    ReannealCost,
    /// A perturbed point during tangent/curvature computation.
    Derivatives,
}

/// Defines an ASA problem: a cost function over a bounded parameter vector.
///
/// The framework handles candidate generation, acceptance, temperature
/// management, and reannealing.
///
/// # Minimization
///
/// ASA minimizes the cost function. For maximization, negate the cost.
///
/// # Invalid candidates
///
/// Return `None` to reject a candidate that violates a domain constraint
/// not expressible through the box bounds. The runner regenerates, up to
/// the configured invalid-state limit. A `NaN` or non-finite return value
/// is different: it signals a broken cost function and aborts the run.
///
/// # References
///
/// Ingber (1989), "Very fast simulated re-annealing";
/// Ingber (1996), "Adaptive simulated annealing (ASA): Lessons learned"
pub trait AsaProblem: Send + Sync {
    /// Computes the cost at `parameters`. Lower is better.
    fn cost(&self, parameters: &[f64], phase: EvalPhase) -> Option<f64>;
}

/// Whether a parameter moves on the continuum or on the integer lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParameterKind {
    Continuous,
    Integer,
}

/// One dimension of the search space.
///
/// A parameter whose range is below machine epsilon is *fixed*: it never
/// moves and does not count toward the effective dimensionality of the
/// temperature schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Parameter {
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (inclusive).
    pub max: f64,
    /// Continuous or integer lattice.
    pub kind: ParameterKind,
    /// Whether this parameter participates in sensitivity reannealing.
    pub reanneal: bool,
}

impl Parameter {
    /// A continuous parameter on `[min, max]`, reannealed by default.
    pub fn continuous(min: f64, max: f64) -> Self {
        Parameter {
            min,
            max,
            kind: ParameterKind::Continuous,
            reanneal: true,
        }
    }

    /// An integer parameter on `[min, max]`, reannealed by default.
    ///
    /// Integer parameters only contribute tangents when
    /// [`AsaConfig::include_integer_parameters`](crate::AsaConfig) is set.
    pub fn integer(min: f64, max: f64) -> Self {
        Parameter {
            min,
            max,
            kind: ParameterKind::Integer,
            reanneal: true,
        }
    }

    /// Excludes this parameter from reannealing.
    pub fn without_reanneal(mut self) -> Self {
        self.reanneal = false;
        self
    }

    /// Width of the feasible interval.
    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    /// Whether the range is too small for the parameter to ever move.
    pub fn is_fixed(&self) -> bool {
        self.range().abs() < EPS
    }

    pub(crate) fn is_integer(&self) -> bool {
        self.kind == ParameterKind::Integer
    }
}

/// How a run ended. Every status comes with the best state found, even
/// the degenerate ones: once a best state exists it is never discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExitStatus {
    /// An acceptance or generation limit was reached.
    Normal,
    /// The saved cost stopped moving relative to the best cost for
    /// `maximum_cost_repeat` consecutive periodic checks.
    CostRepeating,
    /// The cancellation token was set.
    Cancelled,
    /// The temperature of this parameter decayed below machine epsilon,
    /// so its schedule cannot continue.
    ParameterTemperatureTooSmall {
        /// Index of the frozen parameter.
        index: usize,
    },
    /// The cost temperature decayed below machine epsilon. Typical when
    /// the run converges to an exactly-zero cost and the spread-based
    /// reanneal collapses the schedule.
    CostTemperatureTooSmall,
    /// The invalid-state retry limit was exhausted mid-run, after a best
    /// state had already been found.
    TooManyInvalidStates,
}

/// One input-validation failure.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Violation {
    /// Human-readable description of the problem.
    pub message: String,
    /// Index of the offending parameter, when the failure is per-parameter.
    pub index: Option<usize>,
}

impl Violation {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Violation {
            message: message.into(),
            index: None,
        }
    }

    pub(crate) fn at(index: usize, message: impl Into<String>) -> Self {
        Violation {
            message: message.into(),
            index: Some(index),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "parameter {i}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Errors that abort an ASA run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AsaError {
    /// Configuration or parameter definitions failed validation.
    #[error("invalid input: {}", format_violations(.0))]
    InvalidInput(Vec<Violation>),

    /// The cost function returned NaN or a value outside the `f64` range.
    #[error("cost function returned an unusable value during {phase:?}")]
    InvalidCostFunction {
        /// Phase in which the bad evaluation occurred.
        phase: EvalPhase,
    },

    /// The cost function failed while computing tangents or curvatures.
    #[error("cost function failed during derivative evaluation")]
    InvalidCostFunctionDerivatives,

    /// Too many consecutive candidates were rejected as invalid before
    /// any best state existed (during calibration or initial seeding).
    /// The same exhaustion mid-run ends with
    /// [`ExitStatus::TooManyInvalidStates`] instead, keeping the best
    /// state found so far.
    #[error("exceeded the invalid-state retry limit ({limit})")]
    TooManyInvalidStates {
        /// The configured `limit_invalid_states`.
        limit: u64,
    },
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
