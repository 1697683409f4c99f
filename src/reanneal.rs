//! Sensitivity-based rescaling of the annealing schedules.

use crate::config::ReannealCost;
use crate::runner::AsaRun;
use crate::schedule::{
    annealed_temperature, EPS, MAXIMUM_REANNEAL_INDEX, REANNEAL_SCALE,
};
use crate::types::AsaProblem;

impl<P: AsaProblem> AsaRun<'_, P> {
    /// Rescales the parameter generation indices from the freshly computed
    /// tangents, then the cost acceptance index from the cost spread.
    ///
    /// A parameter with a small tangent relative to the largest one gets
    /// its temperature raised (index lowered), so insensitive directions
    /// keep exploring while sensitive ones settle.
    pub(crate) fn reanneal(&mut self) {
        if self.config.reanneal_parameters {
            for i in 0..self.parameters.len() {
                if !self.reanneal_eligible(i) || self.tangents[i].abs() < EPS {
                    continue;
                }
                let new_temperature = (self.current_parameter_temperatures[i]
                    * (self.maximum_tangent / self.tangents[i]))
                    .abs();
                let index = if new_temperature < self.initial_parameter_temperatures[i] {
                    let log_ratio = ((EPS + self.initial_parameter_temperatures[i])
                        / (EPS + new_temperature))
                        .ln()
                        .abs();
                    EPS + (log_ratio / self.scales.parameter).powf(self.effective_dim)
                } else {
                    // Hotter than the start: restart this parameter's clock.
                    1.0
                };
                self.generation_index[i] = self.clamp_reanneal_index(index, i);
            }
        }

        match self.config.reanneal_cost {
            ReannealCost::Off => {}
            ReannealCost::Resample {
                reset_current: true,
                ..
            } => {
                self.cost_acceptance_index = 1.0;
            }
            ReannealCost::FromBestSpread | ReannealCost::Resample { .. } => {
                self.reanneal_cost_index();
            }
        }
    }

    /// Solves the decay law for the acceptance index matching the spread
    /// between the last saved and best costs.
    fn reanneal_cost_index(&mut self) {
        let cost_best = self.best.cost;
        let cost_last = self.last.cost;

        if self.config.reanneal_cost == ReannealCost::FromBestSpread {
            let spread = cost_last
                .abs()
                .max(cost_best.abs())
                .max((cost_last - cost_best).abs())
                .max(EPS);
            if spread < self.initial_cost_temperature {
                self.initial_cost_temperature = spread;
            }
        }

        let bound = (cost_last - cost_best)
            .abs()
            .max(self.current_cost_temperature)
            .max(EPS)
            .min(self.initial_cost_temperature);
        let target = if self.current_cost_temperature > bound {
            bound
        } else {
            EPS + self.current_cost_temperature
        };
        let log_ratio = ((EPS + self.initial_cost_temperature) / target).ln().abs();
        let index = EPS + (log_ratio / self.scales.cost).powf(self.effective_dim);
        self.cost_acceptance_index = self.clamp_cost_index(index);
    }

    /// Divides an oversized index down by the reanneal scale, rescaling
    /// the initial temperature so the current temperature is preserved.
    fn clamp_reanneal_index(&mut self, mut index: f64, i: usize) -> f64 {
        let rescale_power = REANNEAL_SCALE.powf(self.effective_dim.recip()).recip();
        while index > MAXIMUM_REANNEAL_INDEX {
            let t = annealed_temperature(
                self.initial_parameter_temperatures[i],
                self.scales.parameter,
                index,
                self.effective_dim,
            );
            index /= REANNEAL_SCALE;
            self.initial_parameter_temperatures[i] =
                t * (self.initial_parameter_temperatures[i] / t).powf(rescale_power);
        }
        index.trunc()
    }

    fn clamp_cost_index(&mut self, mut index: f64) -> f64 {
        let rescale_power = REANNEAL_SCALE.powf(self.effective_dim.recip()).recip();
        while index > MAXIMUM_REANNEAL_INDEX {
            let t = annealed_temperature(
                self.initial_cost_temperature,
                self.scales.cost,
                index,
                self.effective_dim,
            );
            index /= REANNEAL_SCALE;
            self.initial_cost_temperature =
                t * (self.initial_cost_temperature / t).powf(rescale_power);
        }
        index.trunc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AsaConfig;
    use crate::schedule::TemperatureScales;
    use crate::types::{AsaProblem, EvalPhase, Parameter, ParameterKind};

    struct NoOpProblem;

    impl AsaProblem for NoOpProblem {
        fn cost(&self, _p: &[f64], _phase: EvalPhase) -> Option<f64> {
            Some(0.0)
        }
    }

    static PROBLEM: NoOpProblem = NoOpProblem;
    static PARAMETERS: [Parameter; 2] = [
        Parameter {
            min: -10.0,
            max: 10.0,
            kind: ParameterKind::Continuous,
            reanneal: true,
        },
        Parameter {
            min: -10.0,
            max: 10.0,
            kind: ParameterKind::Continuous,
            reanneal: true,
        },
    ];

    fn fresh_run(config: &'static AsaConfig) -> AsaRun<'static, NoOpProblem> {
        AsaRun::new(&PROBLEM, &PARAMETERS, Some([0.0, 0.0].as_slice()), config, None)
    }

    fn default_config() -> &'static AsaConfig {
        static CONFIG: std::sync::OnceLock<AsaConfig> = std::sync::OnceLock::new();
        CONFIG.get_or_init(AsaConfig::default)
    }

    #[test]
    fn test_insensitive_parameter_gets_lower_index() {
        let mut run = fresh_run(default_config());
        let scales = TemperatureScales::new(run.config, 2.0);
        let temperature = annealed_temperature(1.0, scales.parameter, 500.0, 2.0);

        run.generation_index = vec![500.0, 500.0];
        run.current_parameter_temperatures = vec![temperature, temperature];
        run.tangents = vec![10.0, 0.1];
        run.maximum_tangent = 10.0;
        run.reanneal();

        // The sensitive parameter keeps roughly its index; the insensitive
        // one is reheated to a much earlier point of the schedule.
        assert!(run.generation_index[1] < run.generation_index[0]);
        assert!(run.generation_index[0] >= 490.0);
        assert!(run.generation_index[1] < 400.0);
    }

    #[test]
    fn test_hot_parameter_restarts_clock() {
        let mut run = fresh_run(default_config());
        run.generation_index = vec![500.0, 500.0];
        // Current temperatures above the initial temperature force the
        // "restart" branch for both parameters.
        run.current_parameter_temperatures = vec![2.0, 2.0];
        run.tangents = vec![1.0, 1.0];
        run.maximum_tangent = 1.0;
        run.reanneal();

        assert_eq!(run.generation_index[0], 1.0);
        assert_eq!(run.generation_index[1], 1.0);
    }

    fn slow_anneal_config() -> &'static AsaConfig {
        static CONFIG: std::sync::OnceLock<AsaConfig> = std::sync::OnceLock::new();
        CONFIG.get_or_init(|| AsaConfig::default().with_temperature_anneal_scale(1e6))
    }

    #[test]
    fn test_oversized_index_is_divided_down() {
        // Under a slow schedule the index solved for a near-zero
        // temperature is astronomical, so the clamp loop must divide it
        // down while rescaling the initial temperature to keep the target
        // temperature reachable.
        let mut run = fresh_run(slow_anneal_config());
        run.generation_index = vec![500.0, 500.0];
        run.current_parameter_temperatures = vec![1e-300, 0.5];
        run.tangents = vec![10.0, 10.0];
        run.maximum_tangent = 10.0;
        run.reanneal();

        assert!(run.generation_index[0] > 1_000.0);
        assert!(run.generation_index[0] <= 50_000.0);
        assert!(run.initial_parameter_temperatures[0] < 1e-10);
        // The second parameter's index stays within range and is solved
        // directly, with its initial temperature untouched.
        assert!(run.generation_index[1] <= 50_000.0);
        assert_eq!(run.initial_parameter_temperatures[1], 1.0);
    }

    #[test]
    fn test_zero_tangent_leaves_index_untouched() {
        let mut run = fresh_run(default_config());
        run.generation_index = vec![123.0, 456.0];
        run.current_parameter_temperatures = vec![0.5, 0.5];
        run.tangents = vec![0.0, 1.0];
        run.maximum_tangent = 1.0;
        run.reanneal();

        assert_eq!(run.generation_index[0], 123.0);
    }

    #[test]
    fn test_cost_index_follows_spread() {
        let mut run = fresh_run(default_config());
        run.initial_cost_temperature = 10.0;
        run.current_cost_temperature = 1.0;
        run.cost_acceptance_index = 300.0;
        run.best.cost = 0.0;
        run.last.cost = 5.0;
        run.reanneal();

        // FromBestSpread tightens toward max(|last|, |best|, spread) = 5,
        // so the implied index drops below the decay-law solution for the
        // old temperature.
        assert!(run.initial_cost_temperature <= 5.0);
        assert!(run.cost_acceptance_index < 300.0);
    }
}
