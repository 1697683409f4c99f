//! ASA execution loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::{AsaConfig, CalibrationStatistic, CurvatureSchedule, ReannealCost};
use crate::derivatives::Curvature;
use crate::generate::{generate_new_state, Cursor};
use crate::schedule::{
    annealed_temperature, effective_dimension, exponent_check, TemperatureScales,
    COST_TEMPERATURE_FLOOR, EPS, SMALL_FLOAT,
};
use crate::types::{AsaError, AsaProblem, EvalPhase, ExitStatus, Parameter};

/// How often the best cost is sampled into the history.
const HISTORY_INTERVAL: u64 = 100;

/// Result of an ASA run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AsaResult {
    /// The best parameter vector found.
    pub best_parameters: Vec<f64>,

    /// Cost of the best parameter vector.
    pub best_cost: f64,

    /// How the run ended.
    pub status: ExitStatus,

    /// Total number of generated states.
    pub number_generated: u64,

    /// Total number of accepted states.
    pub number_accepted: u64,

    /// Value of the generated counter when the best state was found.
    pub best_number_generated: u64,

    /// Value of the accepted counter when the best state was found.
    pub best_number_accepted: u64,

    /// Total number of candidates the cost function rejected as invalid.
    pub number_invalid: u64,

    /// Cost tangents at the best state from the final derivative pass.
    /// Zero for parameters excluded from reannealing.
    pub tangents: Vec<f64>,

    /// Packed symmetric curvature matrix at the best state, present when
    /// a curvature schedule other than `Off` was configured.
    pub curvature: Option<Curvature>,

    /// Per-parameter temperatures when the run ended.
    pub final_parameter_temperatures: Vec<f64>,

    /// Cost temperature when the run ended.
    pub final_cost_temperature: f64,

    /// Best cost sampled at regular intervals for history tracking.
    pub cost_history: Vec<f64>,
}

/// Executes the Adaptive Simulated Annealing algorithm.
pub struct AsaRunner;

impl AsaRunner {
    /// Runs ASA from a generated starting state.
    pub fn run<P: AsaProblem>(
        problem: &P,
        parameters: &[Parameter],
        config: &AsaConfig,
    ) -> Result<AsaResult, AsaError> {
        Self::run_with_cancel(problem, parameters, None, config, None)
    }

    /// Runs ASA from a user-supplied starting state.
    pub fn run_from<P: AsaProblem>(
        problem: &P,
        parameters: &[Parameter],
        initial: &[f64],
        config: &AsaConfig,
    ) -> Result<AsaResult, AsaError> {
        Self::run_with_cancel(problem, parameters, Some(initial), config, None)
    }

    /// Runs ASA with an optional starting state and cancellation token.
    /// The token is polled once per main-loop iteration; a cancelled run
    /// still returns the best state found so far.
    pub fn run_with_cancel<P: AsaProblem>(
        problem: &P,
        parameters: &[Parameter],
        initial: Option<&[f64]>,
        config: &AsaConfig,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<AsaResult, AsaError> {
        let violations = config.validate(parameters, initial);
        if !violations.is_empty() {
            return Err(AsaError::InvalidInput(violations));
        }

        let mut run = AsaRun::new(problem, parameters, initial, config, cancel);
        run.calibrate_cost_temperature()?;
        run.seed_initial_state(initial.is_some())?;
        let status = run.anneal()?;
        Ok(run.finish(status))
    }
}

/// A parameter vector with its cost.
#[derive(Debug, Clone)]
pub(crate) struct State {
    pub parameters: Vec<f64>,
    pub cost: f64,
}

/// Owned working storage of one annealing run. Every run owns its state,
/// so nested invocations from inside a cost function are safe.
pub(crate) struct AsaRun<'a, P: AsaProblem> {
    problem: &'a P,
    pub(crate) parameters: &'a [Parameter],
    pub(crate) config: &'a AsaConfig,
    cancel: Option<Arc<AtomicBool>>,
    rng: StdRng,

    /// Starting point: user-supplied, or the range midpoints.
    start: Vec<f64>,

    /// Effective dimensionality (non-fixed parameter count).
    pub(crate) effective_dim: f64,
    pub(crate) scales: TemperatureScales,
    cursor: Cursor,

    /// Candidate under evaluation.
    pub(crate) current: State,
    /// Last accepted state.
    pub(crate) last: State,
    /// Best state seen so far.
    pub(crate) best: State,

    pub(crate) initial_parameter_temperatures: Vec<f64>,
    pub(crate) current_parameter_temperatures: Vec<f64>,
    /// Per-parameter generation indices driving the decay law.
    pub(crate) generation_index: Vec<f64>,

    pub(crate) initial_cost_temperature: f64,
    pub(crate) current_cost_temperature: f64,
    /// Acceptance index driving the cost temperature decay.
    pub(crate) cost_acceptance_index: f64,

    /// Slot regenerated by the most recent draw in round-robin mode.
    last_generated_index: Option<usize>,

    number_generated: u64,
    recent_generated: u64,
    number_accepted: u64,
    recent_acceptances: u64,
    best_number_generated: u64,
    best_number_accepted: u64,
    number_invalid: u64,
    last_move_accepted: bool,
    cost_repeat_count: u32,
    accepted_to_generated_ratio: f64,

    pub(crate) tangents: Vec<f64>,
    pub(crate) maximum_tangent: f64,
    pub(crate) curvature: Option<Curvature>,

    cost_history: Vec<f64>,
}

impl<'a, P: AsaProblem> AsaRun<'a, P> {
    pub(crate) fn new(
        problem: &'a P,
        parameters: &'a [Parameter],
        initial: Option<&[f64]>,
        config: &'a AsaConfig,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Self {
        let n = parameters.len();
        let seed = config.seed.unwrap_or_else(rand::random);
        let effective_dim = effective_dimension(parameters);
        let start: Vec<f64> = match initial {
            Some(values) => values.to_vec(),
            None => parameters.iter().map(|p| 0.5 * (p.min + p.max)).collect(),
        };
        let state = State {
            parameters: start.clone(),
            cost: 0.0,
        };

        AsaRun {
            problem,
            parameters,
            config,
            cancel,
            rng: StdRng::seed_from_u64(seed),
            start,
            effective_dim,
            scales: TemperatureScales::new(config, effective_dim),
            cursor: Cursor::new(config.generation_mode),
            current: state.clone(),
            last: state.clone(),
            best: state,
            initial_parameter_temperatures: vec![config.initial_parameter_temperature; n],
            current_parameter_temperatures: vec![config.initial_parameter_temperature; n],
            generation_index: vec![1.0; n],
            initial_cost_temperature: 0.0,
            current_cost_temperature: 0.0,
            cost_acceptance_index: 0.0,
            last_generated_index: None,
            number_generated: 0,
            recent_generated: 0,
            number_accepted: 0,
            recent_acceptances: 0,
            best_number_generated: 0,
            best_number_accepted: 0,
            number_invalid: 0,
            last_move_accepted: false,
            cost_repeat_count: 0,
            accepted_to_generated_ratio: 1.0,
            tangents: vec![0.0; n],
            maximum_tangent: 0.0,
            curvature: None,
            cost_history: Vec::new(),
        }
    }

    /// Evaluates the cost function at the current candidate. `Ok(None)`
    /// means the candidate is invalid and must be regenerated; a NaN or
    /// out-of-range cost is fatal.
    fn evaluate(&mut self, phase: EvalPhase) -> Result<Option<f64>, AsaError> {
        match self.problem.cost(&self.current.parameters, phase) {
            Some(cost) if !cost.is_finite() => Err(AsaError::InvalidCostFunction { phase }),
            other => Ok(other),
        }
    }

    /// Generates candidates until one evaluates as valid, or the retry
    /// limit is exhausted.
    fn generate_valid_state(&mut self, phase: EvalPhase) -> Result<f64, AsaError> {
        let mut attempts = 0u64;
        loop {
            self.last_generated_index = generate_new_state(
                &mut self.rng,
                self.parameters,
                &self.current_parameter_temperatures,
                &mut self.cursor,
                &self.last.parameters,
                &mut self.current.parameters,
            );
            let evaluated = self.evaluate(phase)?;
            if evaluated.is_none() {
                self.number_invalid += 1;
            }
            attempts += 1;
            if attempts > self.config.limit_invalid_states {
                return Err(AsaError::TooManyInvalidStates {
                    limit: self.config.limit_invalid_states,
                });
            }
            if let Some(cost) = evaluated {
                self.current.cost = cost;
                return Ok(cost);
            }
        }
    }

    /// Samples valid states around the starting point and sets the initial
    /// cost temperature from the configured statistic.
    pub(crate) fn calibrate_cost_temperature(&mut self) -> Result<(), AsaError> {
        let samples = self.config.calibration_samples;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for _ in 0..samples {
            self.cursor.reset();
            let cost = self.generate_valid_state(EvalPhase::Calibration)?;
            match self.config.calibration_statistic {
                CalibrationStatistic::MeanAbsolute => sum += cost.abs(),
                CalibrationStatistic::StandardDeviation => {
                    sum += cost;
                    sum_sq += cost * cost;
                }
            }
        }

        let n = samples as f64;
        let mut temperature = match self.config.calibration_statistic {
            CalibrationStatistic::MeanAbsolute => sum / n,
            CalibrationStatistic::StandardDeviation => {
                sample_stddev(sum, sum_sq, n) + EPS
            }
        };
        if temperature.abs() <= SMALL_FLOAT {
            temperature = COST_TEMPERATURE_FLOOR;
        }
        if temperature < EPS {
            return Err(AsaError::InvalidCostFunction {
                phase: EvalPhase::Calibration,
            });
        }
        self.initial_cost_temperature = temperature;
        self.current_cost_temperature = temperature;
        debug!("calibrated initial cost temperature {temperature:.6e}");

        // Calibration clobbered the working states; restore the origin.
        self.current.parameters.copy_from_slice(&self.start);
        self.last.parameters.copy_from_slice(&self.start);
        self.best.parameters.copy_from_slice(&self.start);
        Ok(())
    }

    /// Establishes the starting state, either by evaluating the caller's
    /// point or by generating a valid one, and zeroes the run counters.
    pub(crate) fn seed_initial_state(&mut self, user_initial: bool) -> Result<(), AsaError> {
        if user_initial {
            self.current.cost = match self.evaluate(EvalPhase::InitialState)? {
                Some(cost) => cost,
                None => {
                    return Err(AsaError::InvalidCostFunction {
                        phase: EvalPhase::InitialState,
                    })
                }
            };
        } else {
            self.cursor.reset();
            self.generate_valid_state(EvalPhase::InitialState)?;
        }

        self.last.parameters.copy_from_slice(&self.current.parameters);
        self.last.cost = self.current.cost;
        self.best.parameters.copy_from_slice(&self.current.parameters);
        self.best.cost = self.current.cost;

        self.number_generated = 0;
        self.recent_generated = 0;
        self.number_accepted = 0;
        self.recent_acceptances = 0;
        self.best_number_generated = 0;
        self.best_number_accepted = 0;
        self.cost_acceptance_index = 0.0;
        self.accepted_to_generated_ratio = 1.0;
        for (index, p) in self.parameters.iter().enumerate() {
            if !p.is_fixed() {
                self.generation_index[index] = 1.0;
            }
        }
        self.cost_history.push(self.best.cost);
        debug!("initial state cost {:.6e}", self.best.cost);
        Ok(())
    }

    /// Recomputes every live temperature from its decay index. Returns
    /// the terminal status when a temperature has decayed below machine
    /// epsilon; the schedule cannot continue but the best state stands.
    fn update_temperatures(&mut self) -> Option<ExitStatus> {
        for (index, p) in self.parameters.iter().enumerate() {
            if p.is_fixed() {
                continue;
            }
            let t = annealed_temperature(
                self.initial_parameter_temperatures[index],
                self.scales.parameter,
                self.generation_index[index],
                self.effective_dim,
            );
            if t < EPS {
                return Some(ExitStatus::ParameterTemperatureTooSmall { index });
            }
            self.current_parameter_temperatures[index] = t;
        }

        let t = annealed_temperature(
            self.initial_cost_temperature,
            self.scales.cost,
            self.cost_acceptance_index,
            self.effective_dim,
        );
        if t < EPS {
            return Some(ExitStatus::CostTemperatureTooSmall);
        }
        self.current_cost_temperature = t;
        None
    }

    /// Metropolis test against the last saved state. Counters advance
    /// regardless of the outcome.
    fn accept_new_state(&mut self, generated_index: Option<usize>) {
        self.number_generated += 1;
        self.recent_generated += 1;
        match generated_index {
            Some(index) => self.generation_index[index] += 1.0,
            None => {
                for (index, p) in self.parameters.iter().enumerate() {
                    if !p.is_fixed() {
                        self.generation_index[index] += 1.0;
                    }
                }
            }
        }

        let delta =
            (self.current.cost - self.last.cost) / (self.current_cost_temperature + EPS);
        let probability = exponent_check(-delta).exp().min(1.0);
        let uniform: f64 = self.rng.random();
        self.last_move_accepted = probability >= uniform;

        if self.last_move_accepted {
            self.last.cost = self.current.cost;
            for (index, p) in self.parameters.iter().enumerate() {
                if !p.is_fixed() {
                    self.last.parameters[index] = self.current.parameters[index];
                }
            }
            self.number_accepted += 1;
            self.recent_acceptances += 1;
            self.cost_acceptance_index += 1.0;
        }

        self.accepted_to_generated_ratio =
            (self.recent_acceptances + 1) as f64 / (self.recent_generated + 1) as f64;
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// The main annealing loop.
    pub(crate) fn anneal(&mut self) -> Result<ExitStatus, AsaError> {
        while (self.number_accepted <= self.config.limit_acceptances
            || self.config.limit_acceptances == 0)
            && (self.number_generated <= self.config.limit_generated
                || self.config.limit_generated == 0)
        {
            if let Some(status) = self.update_temperatures() {
                debug!(
                    "temperature schedule degenerated ({status:?}) after {} generated",
                    self.number_generated
                );
                return Ok(status);
            }
            let generated = self.generate_valid_state(EvalPhase::NewState);
            if let Some(status) = self.terminal_on_exhaustion(generated)? {
                return Ok(status);
            }
            self.accept_new_state(self.last_generated_index);

            if self.current.cost < self.best.cost {
                self.best.cost = self.current.cost;
                self.best
                    .parameters
                    .copy_from_slice(&self.current.parameters);
                self.recent_acceptances = 0;
                self.recent_generated = 0;
                self.best_number_generated = self.number_generated;
                self.best_number_accepted = self.number_accepted;
                self.cost_repeat_count = 0;
                trace!(
                    "new minimum {:.6e} after {} generated",
                    self.best.cost,
                    self.number_generated
                );
            }

            if self.number_generated % HISTORY_INTERVAL == 0 {
                self.cost_history.push(self.best.cost);
            }

            if self.cancelled() {
                debug!("cancelled after {} generated", self.number_generated);
                return Ok(ExitStatus::Cancelled);
            }

            let acceptance_hit = self.config.acceptance_frequency_modulus != 0
                && self.last_move_accepted
                && self.number_accepted % self.config.acceptance_frequency_modulus == 0;
            let generated_hit = self.config.generated_frequency_modulus != 0
                && self.number_generated % self.config.generated_frequency_modulus == 0;
            let ratio_low =
                self.accepted_to_generated_ratio < self.config.accepted_to_generated_ratio;
            if !(acceptance_hit || generated_hit || ratio_low) {
                continue;
            }

            if ratio_low {
                self.recent_acceptances = 0;
                self.recent_generated = 0;
            }

            if self.config.maximum_cost_repeat != 0 {
                if (self.last.cost - self.best.cost).abs() < self.config.cost_precision {
                    self.cost_repeat_count += 1;
                    if self.cost_repeat_count == self.config.maximum_cost_repeat {
                        debug!(
                            "cost unchanged for {} checks, stopping",
                            self.cost_repeat_count
                        );
                        return Ok(ExitStatus::CostRepeating);
                    }
                } else {
                    self.cost_repeat_count = 0;
                }
            }

            if self.config.reanneal_parameters {
                let with_curvature =
                    self.config.curvature == CurvatureSchedule::EveryReanneal;
                self.cost_derivatives(with_curvature)?;
            }
            if let ReannealCost::Resample {
                samples,
                reset_current,
            } = self.config.reanneal_cost
            {
                let resampled = self.resample_cost_temperature(samples, reset_current);
                if let Some(status) = self.terminal_on_exhaustion(resampled)? {
                    return Ok(status);
                }
            }
            self.reanneal();
            trace!(
                "reannealed at {} generated / {} accepted, cost temperature {:.6e}",
                self.number_generated,
                self.number_accepted,
                self.current_cost_temperature
            );
        }

        Ok(ExitStatus::Normal)
    }

    /// Maps a mid-run invalid-state exhaustion to a terminal status: a
    /// best state exists by now and is reported, not discarded. Other
    /// errors propagate.
    fn terminal_on_exhaustion<T>(
        &self,
        result: Result<T, AsaError>,
    ) -> Result<Option<ExitStatus>, AsaError> {
        match result {
            Ok(_) => Ok(None),
            Err(AsaError::TooManyInvalidStates { limit }) => {
                debug!(
                    "invalid-state limit ({limit}) exhausted after {} generated",
                    self.number_generated
                );
                Ok(Some(ExitStatus::TooManyInvalidStates))
            }
            Err(err) => Err(err),
        }
    }

    /// Re-estimates the initial cost temperature from the standard
    /// deviation of freshly sampled states.
    fn resample_cost_temperature(
        &mut self,
        samples: usize,
        reset_current: bool,
    ) -> Result<(), AsaError> {
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for _ in 0..samples {
            self.cursor.reset();
            let cost = self.generate_valid_state(EvalPhase::ReannealCost)?;
            sum += cost;
            sum_sq += cost * cost;
        }
        let stddev = sample_stddev(sum, sum_sq, samples as f64) + EPS;
        self.initial_cost_temperature = stddev;
        if reset_current {
            self.current_cost_temperature = stddev;
        }
        Ok(())
    }

    /// Final derivative pass and result assembly. The pass is best-effort:
    /// the best state is already in hand, so a failing cost function only
    /// costs us the tangents.
    pub(crate) fn finish(mut self, status: ExitStatus) -> AsaResult {
        // Cancelled runs want out now; invalid-exhausted runs have a cost
        // function that stopped answering. Everything else gets the pass.
        let derivative_pass = matches!(
            status,
            ExitStatus::Normal
                | ExitStatus::CostRepeating
                | ExitStatus::ParameterTemperatureTooSmall { .. }
                | ExitStatus::CostTemperatureTooSmall
        );
        if derivative_pass {
            let with_curvature = self.config.curvature != CurvatureSchedule::Off;
            if let Err(err) = self.cost_derivatives(with_curvature) {
                debug!("final derivative pass failed: {err}");
            }
        }

        if self
            .cost_history
            .last()
            .is_none_or(|&last| (last - self.best.cost).abs() > 1e-15)
        {
            self.cost_history.push(self.best.cost);
        }

        debug!(
            "finished ({status:?}): best cost {:.6e}, {} generated, {} accepted, {} invalid",
            self.best.cost, self.number_generated, self.number_accepted, self.number_invalid
        );

        AsaResult {
            best_parameters: self.best.parameters,
            best_cost: self.best.cost,
            status,
            number_generated: self.number_generated,
            number_accepted: self.number_accepted,
            best_number_generated: self.best_number_generated,
            best_number_accepted: self.best_number_accepted,
            number_invalid: self.number_invalid,
            tangents: self.tangents,
            curvature: self.curvature,
            final_parameter_temperatures: self.current_parameter_temperatures,
            final_cost_temperature: self.current_cost_temperature,
            cost_history: self.cost_history,
        }
    }

    /// Evaluates the cost function during a derivative pass, where an
    /// invalid or non-finite result is fatal rather than retryable.
    pub(crate) fn eval_derivative_point(&mut self) -> Result<f64, AsaError> {
        match self.problem.cost(&self.current.parameters, EvalPhase::Derivatives) {
            Some(cost) if cost.is_finite() => {
                self.current.cost = cost;
                Ok(cost)
            }
            _ => Err(AsaError::InvalidCostFunctionDerivatives),
        }
    }

    /// Whether parameter `index` contributes a tangent to reannealing.
    pub(crate) fn reanneal_eligible(&self, index: usize) -> bool {
        let p = &self.parameters[index];
        p.reanneal
            && !p.is_fixed()
            && (self.config.include_integer_parameters || !p.is_integer())
    }
}

/// Unbiased sample standard deviation from running sums.
fn sample_stddev(sum: f64, sum_sq: f64, n: f64) -> f64 {
    let mean = sum / n;
    let mean_sq = sum_sq / n;
    ((mean_sq - mean * mean).abs() * (n / (n - 1.0))).sqrt()
}
