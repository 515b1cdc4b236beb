//! Brute-force retarded interaction.
//!
//! Every pair of emitters is propagated independently with the same temporal
//! interpolation rule as the AIM kernel: a delay of $R/(c\Delta t) = f + u$
//! steps ($f$ whole, $0 \le u < 1$) reads the source at steps
//! $n - f - p$, $p = 0, \ldots, n_{\text{interp}}$, weighted by $L_p(u)$.
//! The cost is $O(N^2)$ per step, so this evaluator is meant as a reference.

use ndarray::{Array1, Array2};
use num_complex::Complex64;
use rayon::prelude::*;

use super::{check_history, validate_params, Interaction, InteractionError, Normalization, ResultArray};
use crate::history::History;
use crate::interpolation::{split_double, UniformLagrangeSet};
use crate::types::{norm3, sub3, Emitter, SimulationParams};

/// Precomputed propagation data for one ordered pair.
#[derive(Debug, Clone)]
struct PairTerm {
    source: usize,
    /// Whole steps of delay.
    floor: i64,
    /// Lagrange weights divided by the normalization.
    weights: Vec<f64>,
}

/// Pairwise retarded sum over all distinct, non-coincident emitters.
pub struct DirectInteraction {
    num_emitters: usize,
    /// Incoming pair terms, one list per observer.
    terms: Vec<Vec<PairTerm>>,
}

impl DirectInteraction {
    pub fn new(
        emitters: &[Emitter],
        params: &SimulationParams,
        normalization: Normalization,
    ) -> Result<Self, InteractionError> {
        validate_params(params)?;
        let interp = UniformLagrangeSet::new(params.interpolation_order);

        let mut skipped = 0usize;
        let terms = emitters
            .iter()
            .enumerate()
            .map(|(obs, observer)| {
                emitters
                    .iter()
                    .enumerate()
                    .filter(|&(src, _)| src != obs)
                    .filter_map(|(src, source)| {
                        let dr = sub3(&observer.position, &source.position);
                        if norm3(&dr) == 0.0 {
                            skipped += 1;
                            return None;
                        }
                        Some(pair_term(src, &dr, &interp, params, normalization))
                    })
                    .collect()
            })
            .collect();

        if skipped > 0 {
            log::warn!("{} coincident emitter pairs carry no interaction", skipped);
        }

        Ok(Self {
            num_emitters: emitters.len(),
            terms,
        })
    }

    /// Longest delay, in whole steps, including the interpolation stencil.
    pub fn max_delay(&self) -> i64 {
        self.terms
            .iter()
            .flatten()
            .map(|term| term.floor + term.weights.len() as i64 - 1)
            .max()
            .unwrap_or(0)
    }
}

fn pair_term(
    source: usize,
    dr: &[f64; 3],
    interp: &UniformLagrangeSet,
    params: &SimulationParams,
    normalization: Normalization,
) -> PairTerm {
    let (floor, fraction) = split_double(norm3(dr) / (params.c * params.dt));
    let table: Array2<f64> = interp.evaluate_derivative_table_at_x(fraction, params.dt);
    let scale = normalization.apply(dr);

    PairTerm {
        source,
        floor,
        weights: table.row(0).iter().map(|w| w / scale).collect(),
    }
}

impl Interaction for DirectInteraction {
    fn evaluate(&self, history: &History, step: i64) -> ResultArray {
        check_history(history, self.num_emitters, step);

        let results: Vec<Complex64> = self
            .terms
            .par_iter()
            .map(|incoming| {
                let mut total = Complex64::new(0.0, 0.0);
                for term in incoming {
                    for (p, w) in term.weights.iter().enumerate() {
                        let delay = term.floor + p as i64;
                        // Zero delay would be instantaneous
                        if delay < 1 {
                            continue;
                        }
                        if let Some(value) = history.value(term.source, step - delay) {
                            total += value * *w;
                        }
                    }
                }
                total
            })
            .collect();

        Array1::from_vec(results)
    }

    fn method_name(&self) -> &str {
        "Direct"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_on_step_delay_reads_single_sample() {
        // R = 3, c = dt = 1: the observer sees the source exactly 3 steps late
        let emitters = vec![Emitter::new([0.0, 0.0, 0.0]), Emitter::new([0.0, 3.0, 0.0])];
        let params = SimulationParams::default();
        let direct = DirectInteraction::new(&emitters, &params, Normalization::Distance).unwrap();
        assert_eq!(direct.max_delay(), 6);

        let mut history = History::new(2, 0, 16);
        history.fill_with(0, |s| Complex64::new(s as f64, 0.5 * s as f64));

        let result = direct.evaluate(&history, 10);
        assert_relative_eq!(result[1].re, 7.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(result[1].im, 3.5 / 3.0, epsilon = 1e-12);
        assert_eq!(result[0], Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_linear_source_is_interpolated_exactly() {
        // Delay 2.5 steps between a linear-in-time source and its observer
        let emitters = vec![Emitter::new([0.0, 0.0, 0.0]), Emitter::new([1.5, 2.0, 0.0])];
        let params = SimulationParams {
            c: 1.0,
            dt: 1.0,
            interpolation_order: 2,
            ..Default::default()
        };
        let direct = DirectInteraction::new(&emitters, &params, Normalization::Unit).unwrap();

        let mut history = History::new(2, 4, 16);
        history.fill_with(0, |s| Complex64::new(1.0 + 2.0 * s as f64, 0.0));

        let result = direct.evaluate(&history, 10);
        assert_relative_eq!(result[1].re, 1.0 + 2.0 * 7.5, epsilon = 1e-12);
    }

    #[test]
    fn test_coincident_emitters_do_not_interact() {
        let emitters = vec![Emitter::new([1.0, 1.0, 1.0]), Emitter::new([1.0, 1.0, 1.0])];
        let direct =
            DirectInteraction::new(&emitters, &SimulationParams::default(), Normalization::Unit).unwrap();

        let mut history = History::new(2, 0, 4);
        history.fill_with(0, |_| Complex64::new(1.0, 0.0));
        history.fill_with(1, |_| Complex64::new(1.0, 0.0));

        assert!(direct.evaluate(&history, 3).iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    #[should_panic(expected = "History holds")]
    fn test_mismatched_history_panics() {
        let emitters = vec![Emitter::new([0.0, 0.0, 0.0]), Emitter::new([1.0, 0.0, 0.0])];
        let direct =
            DirectInteraction::new(&emitters, &SimulationParams::default(), Normalization::Unit).unwrap();
        direct.evaluate(&History::new(3, 0, 4), 1);
    }
}
