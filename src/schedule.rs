//! Temperature-schedule math shared by the annealing loop and reannealing.

use crate::types::Parameter;
use crate::config::AsaConfig;

/// Threshold below which a statistic is considered to have rounded to zero.
pub(crate) const SMALL_FLOAT: f64 = 1e-18;

/// Epsilon used for range, bound, and temperature degeneracy tests.
pub(crate) const EPS: f64 = f64::EPSILON;

/// Fallback initial cost temperature when calibration rounds to zero.
pub(crate) const COST_TEMPERATURE_FLOOR: f64 = 2.718;

/// Divisor applied to an oversized reanneal index until it fits.
pub(crate) const REANNEAL_SCALE: f64 = 50.0;

/// Largest generation/acceptance index a reanneal may produce directly.
pub(crate) const MAXIMUM_REANNEAL_INDEX: f64 = 50_000.0;

/// Exponents beyond this magnitude would overflow or denormalize `exp`.
const MAX_EXPONENT: f64 = 708.0;

/// Clamps an exponent into the representable range before `exp`.
pub(crate) fn exponent_check(x: f64) -> f64 {
    x.clamp(-MAX_EXPONENT, MAX_EXPONENT)
}

/// Number of parameters that actually participate in annealing.
///
/// Parameters whose range is below machine epsilon are fixed and do not
/// contribute to the dimensionality used in the schedule exponents.
pub(crate) fn effective_dimension(parameters: &[Parameter]) -> f64 {
    parameters.iter().filter(|p| !p.is_fixed()).count() as f64
}

/// Decay-rate constants for the parameter and cost temperature schedules.
///
/// `scale = -ln(temperature_ratio_scale) * exp(-ln(temperature_anneal_scale) / x_n)`,
/// with the cost scale additionally multiplied by the cost/parameter ratio.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TemperatureScales {
    pub parameter: f64,
    pub cost: f64,
}

impl TemperatureScales {
    pub(crate) fn new(config: &AsaConfig, effective_dim: f64) -> Self {
        let ratio = -config.temperature_ratio_scale.ln();
        let anneal = config.temperature_anneal_scale.ln();
        let parameter = ratio * (-anneal / effective_dim).exp();
        TemperatureScales {
            parameter,
            cost: parameter * config.cost_parameter_scale_ratio,
        }
    }
}

/// Temperature after `index` generations (or acceptances) under the ASA
/// exponential decay law `T = T0 * exp(-scale * index^(1/x_n))`.
pub(crate) fn annealed_temperature(initial: f64, scale: f64, index: f64, effective_dim: f64) -> f64 {
    initial * exponent_check(-scale * index.powf(effective_dim.recip())).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponent_check_clamps() {
        assert_eq!(exponent_check(1e9), MAX_EXPONENT);
        assert_eq!(exponent_check(-1e9), -MAX_EXPONENT);
        assert_eq!(exponent_check(1.5), 1.5);
    }

    #[test]
    fn test_effective_dimension_skips_fixed() {
        let params = [
            Parameter::continuous(0.0, 1.0),
            Parameter::continuous(2.0, 2.0),
            Parameter::integer(-3.0, 3.0),
        ];
        assert!((effective_dimension(&params) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_decreases_with_index() {
        let config = AsaConfig::default();
        let scales = TemperatureScales::new(&config, 2.0);
        let t1 = annealed_temperature(1.0, scales.parameter, 1.0, 2.0);
        let t10 = annealed_temperature(1.0, scales.parameter, 10.0, 2.0);
        let t100 = annealed_temperature(1.0, scales.parameter, 100.0, 2.0);
        assert!(t1 < 1.0);
        assert!(t10 < t1);
        assert!(t100 < t10);
    }

    #[test]
    fn test_cost_scale_tracks_ratio() {
        let config = AsaConfig::default().with_cost_parameter_scale_ratio(2.0);
        let scales = TemperatureScales::new(&config, 3.0);
        assert!((scales.cost - 2.0 * scales.parameter).abs() < 1e-12);
    }
}
