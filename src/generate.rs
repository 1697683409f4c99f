//! ASA generating distribution and candidate construction.

use rand::Rng;

use crate::config::GenerationMode;
use crate::schedule::EPS;
use crate::types::Parameter;

/// Position state for candidate construction. Round-robin mode remembers
/// which slot is regenerated next.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Cursor {
    All,
    RoundRobin(usize),
}

impl Cursor {
    pub(crate) fn new(mode: GenerationMode) -> Self {
        match mode {
            GenerationMode::AllAtOnce => Cursor::All,
            GenerationMode::RoundRobin => Cursor::RoundRobin(0),
        }
    }

    /// Restarts the round-robin cycle. Used before sampling phases that
    /// should touch the whole vector from the top.
    pub(crate) fn reset(&mut self) {
        if let Cursor::RoundRobin(next) = self {
            *next = 0;
        }
    }
}

/// One draw from the ASA generating distribution at temperature `t`:
/// `sign(x - 1/2) * t * ((1 + 1/t)^|2x - 1| - 1)` for uniform `x`.
///
/// Heavy-tailed at high temperature, sharply peaked near zero as the
/// temperature drops. The magnitude never exceeds 1, so scaling by the
/// parameter range bounds the step to one range-width.
pub(crate) fn asa_step<R: Rng>(rng: &mut R, temperature: f64) -> f64 {
    let x: f64 = rng.random();
    let sign = if x < 0.5 { -1.0 } else { 1.0 };
    sign * temperature * ((1.0 + temperature.recip()).powf((2.0 * x - 1.0).abs()) - 1.0)
}

/// Builds one candidate from the last saved state, writing into
/// `candidate`. Returns the index that was regenerated in round-robin
/// mode, `None` when every non-fixed parameter moved.
pub(crate) fn generate_new_state<R: Rng>(
    rng: &mut R,
    parameters: &[Parameter],
    temperatures: &[f64],
    cursor: &mut Cursor,
    last: &[f64],
    candidate: &mut [f64],
) -> Option<usize> {
    candidate.copy_from_slice(last);
    match cursor {
        Cursor::All => {
            for (i, p) in parameters.iter().enumerate() {
                if p.is_fixed() {
                    continue;
                }
                candidate[i] = draw_parameter(rng, p, temperatures[i], last[i]);
            }
            None
        }
        Cursor::RoundRobin(next) => {
            for _ in 0..parameters.len() {
                let i = *next;
                *next = (*next + 1) % parameters.len();
                if parameters[i].is_fixed() {
                    continue;
                }
                candidate[i] = draw_parameter(rng, &parameters[i], temperatures[i], last[i]);
                return Some(i);
            }
            None
        }
    }
}

/// Samples one parameter value, redrawing until it lands strictly inside
/// the bounds. Integer parameters sample over bounds widened by 0.5, then
/// round half away from zero and reclamp.
fn draw_parameter<R: Rng>(rng: &mut R, p: &Parameter, temperature: f64, last: f64) -> f64 {
    let (min, max) = if p.is_integer() {
        (p.min - 0.5, p.max + 0.5)
    } else {
        (p.min, p.max)
    };
    let range = max - min;

    let mut value;
    loop {
        value = last + asa_step(rng, temperature) * range;
        if value >= min + EPS && value <= max - EPS {
            break;
        }
    }

    if p.is_integer() {
        if value < min + 0.5 {
            value = min + 0.5 + EPS;
        }
        if value > max - 0.5 {
            value = max - 0.5 - EPS;
        }
        value = value.round().clamp(p.min, p.max);
    }
    value
}
