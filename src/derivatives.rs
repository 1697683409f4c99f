//! Finite-difference sensitivities of the cost at the best state.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::runner::AsaRun;
use crate::schedule::{EPS, SMALL_FLOAT};
use crate::types::{AsaError, AsaProblem};

/// Symmetric curvature matrix in packed lower-triangle storage,
/// `N * (N + 1) / 2` values row-major.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Curvature {
    dimension: usize,
    values: Vec<f64>,
}

impl Curvature {
    pub(crate) fn zeroed(dimension: usize) -> Self {
        Curvature {
            dimension,
            values: vec![0.0; dimension * (dimension + 1) / 2],
        }
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        let (row, col) = if i >= j { (i, j) } else { (j, i) };
        row * (row + 1) / 2 + col
    }

    /// The second derivative estimate for the pair `(i, j)`. Symmetric,
    /// so argument order does not matter.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[self.offset(i, j)]
    }

    pub(crate) fn set(&mut self, i: usize, j: usize, value: f64) {
        let offset = self.offset(i, j);
        self.values[offset] = value;
    }

    /// Number of parameters the matrix covers.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The packed lower triangle, row-major.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

impl<P: AsaProblem> AsaRun<'_, P> {
    /// Computes tangents (and optionally curvatures) of the cost at the
    /// best state by relative finite differences of size `delta_x`.
    ///
    /// A perturbation that would leave the bounds flips sign; parameters
    /// ineligible for reannealing get zero. Any invalid or non-finite
    /// evaluation here is fatal to the caller.
    pub(crate) fn cost_derivatives(&mut self, with_curvature: bool) -> Result<(), AsaError> {
        let n = self.parameters.len();
        let best_cost = self.best.cost;
        self.current
            .parameters
            .copy_from_slice(&self.best.parameters);
        // Re-evaluate at the best point so a stateful cost function is
        // positioned there before the perturbed calls.
        self.eval_derivative_point()?;

        for i in 0..n {
            if !self.reanneal_eligible(i) || self.config.delta_x < SMALL_FLOAT {
                self.tangents[i] = 0.0;
                continue;
            }
            let p = self.parameters[i];
            let value = self.best.parameters[i];
            let mut delta = self.config.delta_x;
            let mut offset = (1.0 + delta) * value;
            if offset > p.max || offset < p.min {
                delta = -delta;
                offset = (1.0 + delta) * value;
            }
            self.current.parameters[i] = offset;
            let perturbed = self.eval_derivative_point()?;
            self.current.parameters[i] = value;
            self.tangents[i] = (perturbed - best_cost) / (delta * value + EPS);
        }

        self.maximum_tangent = (0..n)
            .filter(|&i| self.reanneal_eligible(i))
            .map(|i| self.tangents[i].abs())
            .fold(0.0, f64::max);

        if with_curvature {
            self.compute_curvature(best_cost)?;
        }

        self.current.cost = best_cost;
        Ok(())
    }

    /// Diagonal terms from 3-point second differences with boundary-aware
    /// stencils, off-diagonal terms from 3 extra evaluations per pair.
    fn compute_curvature(&mut self, best_cost: f64) -> Result<(), AsaError> {
        let n = self.parameters.len();
        let mut curvature = self
            .curvature
            .take()
            .unwrap_or_else(|| Curvature::zeroed(n));

        for i in 0..n {
            if !self.reanneal_eligible(i) || self.config.delta_x < SMALL_FLOAT {
                curvature.set(i, i, 0.0);
                continue;
            }
            let p = self.parameters[i];
            let value = self.best.parameters[i];
            let delta = self.config.delta_x;
            let denominator = delta * delta * value * value + EPS;

            let second = if value + delta * value.abs() > p.max {
                // Too close to the upper bound: one-sided backward stencil.
                self.current.parameters[i] = value - 2.0 * delta * value.abs();
                let far = self.eval_derivative_point()?;
                self.current.parameters[i] = value - delta * value.abs();
                let near = self.eval_derivative_point()?;
                (best_cost - 2.0 * near + far) / denominator
            } else if value - delta * value.abs() < p.min {
                self.current.parameters[i] = value + 2.0 * delta * value.abs();
                let far = self.eval_derivative_point()?;
                self.current.parameters[i] = value + delta * value.abs();
                let near = self.eval_derivative_point()?;
                (best_cost - 2.0 * near + far) / denominator
            } else {
                self.current.parameters[i] = (1.0 + delta) * value;
                let above = self.eval_derivative_point()?;
                self.current.parameters[i] = (1.0 - delta) * value;
                let below = self.eval_derivative_point()?;
                (above - 2.0 * best_cost + below) / denominator
            };
            self.current.parameters[i] = value;
            curvature.set(i, i, second);
        }

        for i in 0..n {
            let mut delta_i = self.config.delta_x;
            let value_i = self.best.parameters[i];
            for j in 0..i {
                if !self.reanneal_eligible(i)
                    || !self.reanneal_eligible(j)
                    || delta_i < SMALL_FLOAT
                {
                    curvature.set(i, j, 0.0);
                    continue;
                }
                let mut delta_j = self.config.delta_x;
                let value_j = self.best.parameters[j];

                let mut offset_i = (1.0 + delta_i) * value_i;
                if offset_i > self.parameters[i].max || offset_i < self.parameters[i].min {
                    delta_i = -delta_i;
                    offset_i = (1.0 + delta_i) * value_i;
                }
                let mut offset_j = (1.0 + delta_j) * value_j;
                if offset_j > self.parameters[j].max || offset_j < self.parameters[j].min {
                    delta_j = -delta_j;
                    offset_j = (1.0 + delta_j) * value_j;
                }

                self.current.parameters[i] = offset_i;
                self.current.parameters[j] = offset_j;
                let both = self.eval_derivative_point()?;
                self.current.parameters[i] = value_i;
                let only_j = self.eval_derivative_point()?;
                self.current.parameters[j] = value_j;
                self.current.parameters[i] = offset_i;
                let only_i = self.eval_derivative_point()?;
                self.current.parameters[i] = value_i;

                curvature.set(
                    i,
                    j,
                    (both - only_j - only_i + best_cost)
                        / (delta_i * delta_j * value_i * value_j + EPS),
                );
            }
        }

        self.curvature = Some(curvature);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AsaConfig;
    use crate::types::{EvalPhase, Parameter};

    struct CoupledQuadratic;

    // f(x, y) = x^2 + x*y + y^2
    impl AsaProblem for CoupledQuadratic {
        fn cost(&self, p: &[f64], _phase: EvalPhase) -> Option<f64> {
            Some(p[0] * p[0] + p[0] * p[1] + p[1] * p[1])
        }
    }

    fn run_at_best(best: [f64; 2]) -> AsaRun<'static, CoupledQuadratic> {
        static PROBLEM: CoupledQuadratic = CoupledQuadratic;
        static PARAMETERS: [Parameter; 2] = [
            Parameter {
                min: -10.0,
                max: 10.0,
                kind: crate::types::ParameterKind::Continuous,
                reanneal: true,
            },
            Parameter {
                min: -10.0,
                max: 10.0,
                kind: crate::types::ParameterKind::Continuous,
                reanneal: true,
            },
        ];
        static CONFIG: std::sync::OnceLock<AsaConfig> = std::sync::OnceLock::new();
        let config = CONFIG.get_or_init(AsaConfig::default);
        let mut run = AsaRun::new(&PROBLEM, &PARAMETERS, Some(best.as_slice()), config, None);
        run.best.cost = PROBLEM.cost(&best, EvalPhase::Derivatives).unwrap();
        run
    }

    #[test]
    fn test_tangents_match_gradient() {
        let mut run = run_at_best([1.0, 1.0]);
        run.cost_derivatives(false).unwrap();
        // grad f(1, 1) = (2x + y, x + 2y) = (3, 3); forward differences
        // carry an O(delta_x) bias.
        assert!((run.tangents[0] - 3.0).abs() < 1e-2);
        assert!((run.tangents[1] - 3.0).abs() < 1e-2);
        assert!((run.maximum_tangent - run.tangents[0].abs().max(run.tangents[1].abs())).abs()
            < 1e-12);
    }

    #[test]
    fn test_curvature_matches_hessian() {
        let mut run = run_at_best([1.0, 1.0]);
        run.cost_derivatives(true).unwrap();
        let curvature = run.curvature.expect("curvature was requested");
        // Hessian of f is [[2, 1], [1, 2]] and the second differences are
        // exact on a quadratic.
        assert!((curvature.get(0, 0) - 2.0).abs() < 1e-3);
        assert!((curvature.get(1, 1) - 2.0).abs() < 1e-3);
        assert!((curvature.get(0, 1) - 1.0).abs() < 1e-3);
        assert!((curvature.get(1, 0) - 1.0).abs() < 1e-3);
        assert_eq!(curvature.dimension(), 2);
        assert_eq!(curvature.as_slice().len(), 3);
    }

    #[test]
    fn test_boundary_stencil_near_upper_bound() {
        // Best state pinned at the bound still gets a finite diagonal.
        static PROBLEM: CoupledQuadratic = CoupledQuadratic;
        static PARAMETERS: [Parameter; 2] = [
            Parameter {
                min: -10.0,
                max: 1.0,
                kind: crate::types::ParameterKind::Continuous,
                reanneal: true,
            },
            Parameter {
                min: -10.0,
                max: 10.0,
                kind: crate::types::ParameterKind::Continuous,
                reanneal: true,
            },
        ];
        static CONFIG: std::sync::OnceLock<AsaConfig> = std::sync::OnceLock::new();
        let config = CONFIG.get_or_init(AsaConfig::default);
        let best = [1.0, 0.5];
        let mut run = AsaRun::new(&PROBLEM, &PARAMETERS, Some(best.as_slice()), config, None);
        run.best.cost = PROBLEM.cost(&best, EvalPhase::Derivatives).unwrap();
        run.cost_derivatives(true).unwrap();
        let curvature = run.curvature.unwrap();
        assert!((curvature.get(0, 0) - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_ineligible_parameters_get_zero_tangent() {
        static PROBLEM: CoupledQuadratic = CoupledQuadratic;
        static PARAMETERS: [Parameter; 2] = [
            Parameter {
                min: -10.0,
                max: 10.0,
                kind: crate::types::ParameterKind::Continuous,
                reanneal: true,
            },
            Parameter {
                min: -10.0,
                max: 10.0,
                kind: crate::types::ParameterKind::Continuous,
                reanneal: false,
            },
        ];
        static CONFIG: std::sync::OnceLock<AsaConfig> = std::sync::OnceLock::new();
        let config = CONFIG.get_or_init(AsaConfig::default);
        let best = [1.0, 1.0];
        let mut run = AsaRun::new(&PROBLEM, &PARAMETERS, Some(best.as_slice()), config, None);
        run.best.cost = PROBLEM.cost(&best, EvalPhase::Derivatives).unwrap();
        run.cost_derivatives(false).unwrap();
        assert_eq!(run.tangents[1], 0.0);
        assert!(run.tangents[0].abs() > 1.0);
    }

    #[test]
    fn test_failing_cost_function_is_fatal() {
        struct Broken;
        impl AsaProblem for Broken {
            fn cost(&self, _p: &[f64], _phase: EvalPhase) -> Option<f64> {
                None
            }
        }
        static PROBLEM: Broken = Broken;
        static PARAMETERS: [Parameter; 1] = [Parameter {
            min: -1.0,
            max: 1.0,
            kind: crate::types::ParameterKind::Continuous,
            reanneal: true,
        }];
        static CONFIG: std::sync::OnceLock<AsaConfig> = std::sync::OnceLock::new();
        let config = CONFIG.get_or_init(AsaConfig::default);
        let mut run = AsaRun::new(&PROBLEM, &PARAMETERS, Some([0.5].as_slice()), config, None);
        let err = run.cost_derivatives(false).unwrap_err();
        assert_eq!(err, AsaError::InvalidCostFunctionDerivatives);
    }
}
