//! ASA configuration and validation.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::{Parameter, Violation};

/// How candidates are built from the last saved state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GenerationMode {
    /// Regenerate every non-fixed parameter each iteration.
    #[default]
    AllAtOnce,
    /// Regenerate one non-fixed parameter per iteration, cycling through
    /// the vector. Useful when single evaluations are cheap relative to
    /// the dimensionality.
    RoundRobin,
}

/// Statistic used to calibrate the initial cost temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CalibrationStatistic {
    /// Mean of |cost| over the calibration samples.
    #[default]
    MeanAbsolute,
    /// Sample standard deviation of the calibration costs. Requires at
    /// least two samples.
    StandardDeviation,
}

/// How the cost temperature is rescaled during reannealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReannealCost {
    /// Never rescale the cost temperature.
    Off,
    /// Rescale from the spread between the last saved and best costs,
    /// also tightening the initial cost temperature when the spread is
    /// smaller.
    FromBestSpread,
    /// Re-estimate the initial cost temperature from the standard
    /// deviation of `samples` freshly generated states.
    Resample {
        /// Number of states to sample (at least 2).
        samples: usize,
        /// Also reset the current cost temperature to the new estimate
        /// and restart the acceptance index at 1.
        reset_current: bool,
    },
}

impl Default for ReannealCost {
    fn default() -> Self {
        ReannealCost::FromBestSpread
    }
}

/// When the packed curvature matrix is computed. Each computation costs
/// O(N^2) extra evaluations, so it is off by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CurvatureSchedule {
    /// Tangents only; `AsaResult::curvature` stays `None`.
    #[default]
    Off,
    /// One curvature pass at the best state when the run ends.
    AtExit,
    /// Curvatures at every reanneal as well as at exit.
    EveryReanneal,
}

/// Configuration for the Adaptive Simulated Annealing algorithm.
///
/// The defaults are the canonical ASA tunings and work unchanged for most
/// problems; the limits and the two anneal scales are the knobs worth
/// touching first.
///
/// # Examples
///
/// ```
/// use asanneal::{AsaConfig, GenerationMode};
///
/// let config = AsaConfig::default()
///     .with_limit_generated(30_000)
///     .with_generation_mode(GenerationMode::RoundRobin)
///     .with_seed(42);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AsaConfig {
    /// Stop after this many accepted states. 0 = no limit.
    pub limit_acceptances: u64,

    /// Stop after this many generated states. 0 = no limit.
    pub limit_generated: u64,

    /// Consecutive generation attempts allowed while the cost function
    /// keeps rejecting candidates as invalid.
    pub limit_invalid_states: u64,

    /// When the recent accepted-to-generated ratio drops below this,
    /// a reanneal cycle is forced.
    pub accepted_to_generated_ratio: f64,

    /// Two costs closer than this are considered equal by the
    /// cost-repeat termination test.
    pub cost_precision: f64,

    /// Consecutive periodic checks with an unchanged cost before the run
    /// ends with `ExitStatus::CostRepeating`. 0 disables the test.
    pub maximum_cost_repeat: u32,

    /// States sampled to calibrate the initial cost temperature.
    pub calibration_samples: usize,

    /// Statistic applied to the calibration sample.
    pub calibration_statistic: CalibrationStatistic,

    /// Target ratio T/T0 reached at the anneal-scale index. Must lie in
    /// (0, 1); smaller values cool faster.
    pub temperature_ratio_scale: f64,

    /// Multiplier relating the cost schedule to the parameter schedule.
    pub cost_parameter_scale_ratio: f64,

    /// Index scale of the annealing schedule. Larger values cool slower.
    pub temperature_anneal_scale: f64,

    /// Starting temperature of every parameter.
    pub initial_parameter_temperature: f64,

    /// Whether integer parameters contribute tangents to reannealing.
    pub include_integer_parameters: bool,

    /// Run the periodic section every this many acceptances. 0 disables.
    pub acceptance_frequency_modulus: u64,

    /// Run the periodic section every this many generated states.
    /// 0 disables.
    pub generated_frequency_modulus: u64,

    /// Whether parameter temperatures are rescaled from tangents.
    pub reanneal_parameters: bool,

    /// How the cost temperature is rescaled during reannealing.
    pub reanneal_cost: ReannealCost,

    /// Relative step for the finite differences behind reannealing.
    pub delta_x: f64,

    /// When the packed curvature matrix is computed.
    pub curvature: CurvatureSchedule,

    /// How candidates are built from the last saved state.
    pub generation_mode: GenerationMode,

    /// Random seed for reproducibility.
    pub seed: Option<u64>,
}

impl Default for AsaConfig {
    fn default() -> Self {
        Self {
            limit_acceptances: 10_000,
            limit_generated: 99_999,
            limit_invalid_states: 1000,
            accepted_to_generated_ratio: 1e-4,
            cost_precision: 1e-18,
            maximum_cost_repeat: 5,
            calibration_samples: 5,
            calibration_statistic: CalibrationStatistic::default(),
            temperature_ratio_scale: 1e-5,
            cost_parameter_scale_ratio: 1.0,
            temperature_anneal_scale: 100.0,
            initial_parameter_temperature: 1.0,
            include_integer_parameters: false,
            acceptance_frequency_modulus: 100,
            generated_frequency_modulus: 10_000,
            reanneal_parameters: true,
            reanneal_cost: ReannealCost::default(),
            delta_x: 0.001,
            curvature: CurvatureSchedule::default(),
            generation_mode: GenerationMode::default(),
            seed: None,
        }
    }
}

impl AsaConfig {
    pub fn with_limit_acceptances(mut self, n: u64) -> Self {
        self.limit_acceptances = n;
        self
    }

    pub fn with_limit_generated(mut self, n: u64) -> Self {
        self.limit_generated = n;
        self
    }

    pub fn with_limit_invalid_states(mut self, n: u64) -> Self {
        self.limit_invalid_states = n;
        self
    }

    pub fn with_accepted_to_generated_ratio(mut self, ratio: f64) -> Self {
        self.accepted_to_generated_ratio = ratio;
        self
    }

    pub fn with_cost_precision(mut self, precision: f64) -> Self {
        self.cost_precision = precision;
        self
    }

    pub fn with_maximum_cost_repeat(mut self, n: u32) -> Self {
        self.maximum_cost_repeat = n;
        self
    }

    pub fn with_calibration_samples(mut self, n: usize) -> Self {
        self.calibration_samples = n;
        self
    }

    pub fn with_calibration_statistic(mut self, statistic: CalibrationStatistic) -> Self {
        self.calibration_statistic = statistic;
        self
    }

    pub fn with_temperature_ratio_scale(mut self, scale: f64) -> Self {
        self.temperature_ratio_scale = scale;
        self
    }

    pub fn with_cost_parameter_scale_ratio(mut self, ratio: f64) -> Self {
        self.cost_parameter_scale_ratio = ratio;
        self
    }

    pub fn with_temperature_anneal_scale(mut self, scale: f64) -> Self {
        self.temperature_anneal_scale = scale;
        self
    }

    pub fn with_initial_parameter_temperature(mut self, t: f64) -> Self {
        self.initial_parameter_temperature = t;
        self
    }

    pub fn with_include_integer_parameters(mut self, include: bool) -> Self {
        self.include_integer_parameters = include;
        self
    }

    pub fn with_acceptance_frequency_modulus(mut self, n: u64) -> Self {
        self.acceptance_frequency_modulus = n;
        self
    }

    pub fn with_generated_frequency_modulus(mut self, n: u64) -> Self {
        self.generated_frequency_modulus = n;
        self
    }

    pub fn with_reanneal_parameters(mut self, reanneal: bool) -> Self {
        self.reanneal_parameters = reanneal;
        self
    }

    pub fn with_reanneal_cost(mut self, mode: ReannealCost) -> Self {
        self.reanneal_cost = mode;
        self
    }

    pub fn with_delta_x(mut self, delta: f64) -> Self {
        self.delta_x = delta;
        self
    }

    pub fn with_curvature(mut self, schedule: CurvatureSchedule) -> Self {
        self.curvature = schedule;
        self
    }

    pub fn with_generation_mode(mut self, mode: GenerationMode) -> Self {
        self.generation_mode = mode;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates the configuration together with the parameter definitions
    /// and an optional user-supplied starting point. Returns every failure
    /// found, not just the first.
    pub fn validate(
        &self,
        parameters: &[Parameter],
        initial: Option<&[f64]>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();

        if parameters.is_empty() {
            violations.push(Violation::new("at least one parameter is required"));
        } else if parameters.iter().all(Parameter::is_fixed) {
            violations.push(Violation::new(
                "every parameter range is below machine epsilon",
            ));
        }

        for (i, p) in parameters.iter().enumerate() {
            if !p.min.is_finite() || !p.max.is_finite() {
                violations.push(Violation::at(i, "bounds must be finite"));
            } else if p.min > p.max {
                violations.push(Violation::at(
                    i,
                    format!("min {} exceeds max {}", p.min, p.max),
                ));
            }
        }

        if let Some(initial) = initial {
            if initial.len() != parameters.len() {
                violations.push(Violation::new(format!(
                    "initial state has {} values but {} parameters are defined",
                    initial.len(),
                    parameters.len()
                )));
            } else {
                for (i, (&value, p)) in initial.iter().zip(parameters).enumerate() {
                    if p.is_fixed() {
                        continue;
                    }
                    if value < p.min || value > p.max {
                        violations.push(Violation::at(
                            i,
                            format!("initial value {value} outside [{}, {}]", p.min, p.max),
                        ));
                    }
                }
            }
        }

        if self.accepted_to_generated_ratio <= 0.0 {
            violations.push(Violation::new(
                "accepted_to_generated_ratio must be positive",
            ));
        }
        if self.cost_precision <= 0.0 {
            violations.push(Violation::new("cost_precision must be positive"));
        }
        if self.calibration_samples == 0 {
            violations.push(Violation::new(
                "calibration_samples must be at least 1",
            ));
        }
        if self.calibration_statistic == CalibrationStatistic::StandardDeviation
            && self.calibration_samples < 2
        {
            violations.push(Violation::new(
                "standard-deviation calibration needs at least 2 samples",
            ));
        }
        if self.temperature_ratio_scale <= 0.0 || self.temperature_ratio_scale >= 1.0 {
            violations.push(Violation::new(format!(
                "temperature_ratio_scale must be in (0, 1), got {}",
                self.temperature_ratio_scale
            )));
        }
        if self.cost_parameter_scale_ratio <= 0.0 {
            violations.push(Violation::new(
                "cost_parameter_scale_ratio must be positive",
            ));
        }
        if self.temperature_anneal_scale <= 0.0 {
            violations.push(Violation::new(
                "temperature_anneal_scale must be positive",
            ));
        }
        if self.initial_parameter_temperature <= 0.0 {
            violations.push(Violation::new(
                "initial_parameter_temperature must be positive",
            ));
        }
        if self.delta_x < 0.0 {
            violations.push(Violation::new("delta_x must be non-negative"));
        }
        if let ReannealCost::Resample { samples, .. } = self.reanneal_cost {
            if samples < 2 {
                violations.push(Violation::new(
                    "cost-temperature resampling needs at least 2 samples",
                ));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_parameters() -> Vec<Parameter> {
        vec![
            Parameter::continuous(-1.0, 1.0),
            Parameter::integer(0.0, 10.0),
        ]
    }

    #[test]
    fn test_default_config_validates() {
        let config = AsaConfig::default();
        assert!(config.validate(&simple_parameters(), None).is_empty());
    }

    #[test]
    fn test_validate_no_parameters() {
        let config = AsaConfig::default();
        let violations = config.validate(&[], None);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("at least one parameter"));
    }

    #[test]
    fn test_validate_all_fixed() {
        let config = AsaConfig::default();
        let params = [Parameter::continuous(1.0, 1.0), Parameter::integer(3.0, 3.0)];
        let violations = config.validate(&params, None);
        assert!(!violations.is_empty());
    }

    #[test]
    fn test_validate_inverted_bounds() {
        let config = AsaConfig::default();
        let params = [Parameter::continuous(2.0, -2.0)];
        let violations = config.validate(&params, None);
        assert!(violations.iter().any(|v| v.index == Some(0)));
    }

    #[test]
    fn test_validate_initial_out_of_bounds() {
        let config = AsaConfig::default();
        let violations = config.validate(&simple_parameters(), Some(&[5.0, 5.0]));
        assert!(violations.iter().any(|v| v.index == Some(0)));
    }

    #[test]
    fn test_validate_initial_length_mismatch() {
        let config = AsaConfig::default();
        let violations = config.validate(&simple_parameters(), Some(&[0.0]));
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_validate_bad_ratio_scale() {
        let config = AsaConfig::default().with_temperature_ratio_scale(1.5);
        assert!(!config.validate(&simple_parameters(), None).is_empty());
    }

    #[test]
    fn test_validate_stddev_needs_two_samples() {
        let config = AsaConfig::default()
            .with_calibration_statistic(CalibrationStatistic::StandardDeviation)
            .with_calibration_samples(1);
        assert!(!config.validate(&simple_parameters(), None).is_empty());
    }

    #[test]
    fn test_validate_collects_multiple_violations() {
        let config = AsaConfig::default()
            .with_cost_precision(0.0)
            .with_initial_parameter_temperature(-1.0);
        let violations = config.validate(&simple_parameters(), None);
        assert!(violations.len() >= 2);
    }
}
