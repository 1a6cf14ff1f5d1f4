//! History-based importance weighting and step-direction estimation.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use ridge_types::{Outcome, ParamVector, ShapeError, Targets, WeightingParams};

/// Turns past outcomes into a sampling distribution that favours outcomes
/// near the activity and speed targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryWeighter {
    targets: Targets,
    params: WeightingParams,
}

impl HistoryWeighter {
    pub fn new(targets: Targets, params: WeightingParams) -> Self {
        Self { targets, params }
    }

    /// Closeness to the activity and speed targets, each in `[0, 1]`.
    pub fn closeness(&self, outcome: &Outcome) -> (f64, f64) {
        let d_activity =
            (-(outcome.activity - self.targets.activity).abs() / self.targets.eta_activity).exp();
        // Undefined speed is infinitely far from any target.
        let d_speed = outcome.normalized().speed.map_or(0.0, |speed| {
            (-(speed - self.targets.speed).abs() / self.targets.eta_speed).exp()
        });
        (d_activity, d_speed)
    }

    /// Blended scalar fitness of one outcome.
    pub fn fitness(&self, outcome: &Outcome) -> f64 {
        let (d_activity, d_speed) = self.closeness(outcome);
        let blend = &self.params.blend;
        (blend.propagation * outcome.propagation
            + blend.activity * d_activity
            + blend.speed * d_speed)
            / blend.sum
    }

    /// Normalized probabilities `∝ exp(temperature · fitness)`.
    ///
    /// Returns all zeros when no finite distribution exists, and an empty
    /// vector for an empty sample set.
    pub fn weights(&self, outcomes: &[Outcome]) -> Vec<f64> {
        let logits: Vec<f64> = outcomes
            .iter()
            .map(|o| self.params.temperature * self.fitness(o))
            .collect();
        let peak = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !peak.is_finite() {
            return vec![0.0; outcomes.len()];
        }

        let raw: Vec<f64> = logits.iter().map(|l| (l - peak).exp()).collect();
        let total: f64 = raw.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            return vec![0.0; outcomes.len()];
        }
        raw.into_iter().map(|w| w / total).collect()
    }

    /// Draw one sample index, or `None` when there is nothing to draw from.
    pub fn sample<R: Rng + ?Sized>(&self, outcomes: &[Outcome], rng: &mut R) -> Option<usize> {
        let weights = self.weights(outcomes);
        WeightedIndex::new(&weights)
            .ok()
            .map(|dist| dist.sample(rng))
    }
}

/// Gradient-free ascent estimate from a worker's own recent trials.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionEstimator {
    weighter: HistoryWeighter,
    length: f64,
}

impl DirectionEstimator {
    pub fn new(weighter: HistoryWeighter, length: f64) -> Self {
        Self { weighter, length }
    }

    /// Weighted sum of displacements from the window centroid, rescaled to
    /// the configured length. Zero when the window carries no direction.
    pub fn estimate(
        &self,
        xs: &[ParamVector],
        outcomes: &[Outcome],
        dim: usize,
    ) -> Result<ParamVector, ShapeError> {
        if xs.len() != outcomes.len() {
            return Err(ShapeError::LengthMismatch {
                expected: xs.len(),
                actual: outcomes.len(),
            });
        }
        if let Some(bad) = xs.iter().find(|x| x.len() != dim) {
            return Err(ShapeError::LengthMismatch {
                expected: dim,
                actual: bad.len(),
            });
        }
        if xs.is_empty() {
            return Ok(vec![0.0; dim]);
        }

        let weights = self.weighter.weights(outcomes);
        let n = xs.len() as f64;
        let centroid: Vec<f64> = (0..dim)
            .map(|i| xs.iter().map(|x| x[i]).sum::<f64>() / n)
            .collect();

        let mut sum = vec![0.0; dim];
        for (x, w) in xs.iter().zip(&weights) {
            for i in 0..dim {
                sum[i] += w * (x[i] - centroid[i]);
            }
        }

        let norm = sum.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Ok(vec![0.0; dim]);
        }
        Ok(sum.into_iter().map(|v| self.length * v / norm).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use ridge_types::BlendWeights;

    fn targets() -> Targets {
        Targets {
            activity: 1.0,
            speed: 1.0,
            eta_activity: 1.0,
            eta_speed: 1.0,
        }
    }

    fn weighter(temperature: f64) -> HistoryWeighter {
        HistoryWeighter::new(
            targets(),
            WeightingParams {
                temperature,
                blend: BlendWeights {
                    propagation: 1.0,
                    activity: 1.0,
                    speed: 1.0,
                    sum: 3.0,
                },
            },
        )
    }

    #[test]
    fn on_target_sample_dominates() {
        let outcomes = [
            Outcome::new(1.0, 1.0, Some(1.0)),
            Outcome::new(0.0, 50.0, Some(-30.0)),
        ];
        let w = weighter(5.0).weights(&outcomes);
        assert!(w[0] > 0.5, "weights: {w:?}");
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weights_are_a_distribution() {
        let outcomes: Vec<Outcome> = (0..40)
            .map(|i| {
                let f = i as f64;
                Outcome::new((i % 5) as f64 / 4.0, f * 0.3, (i % 3 != 0).then_some(f - 20.0))
            })
            .collect();
        for temperature in [0.0, 1.0, 25.0, 900.0] {
            let w = weighter(temperature).weights(&outcomes);
            assert_eq!(w.len(), outcomes.len());
            assert!(w.iter().all(|p| *p >= 0.0));
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn weighting_is_monotone_in_distance() {
        let best = Outcome::new(1.0, 1.0, Some(1.0));
        let h = weighter(3.0);
        for far in [
            Outcome::new(1.0, 2.0, Some(3.0)),
            Outcome::new(0.4, 0.0, Some(-1.0)),
            Outcome::silent(10.0),
        ] {
            let w = h.weights(&[best, far]);
            assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn undefined_speed_scores_zero_closeness() {
        let (_, d_speed) = weighter(1.0).closeness(&Outcome::silent(1.0));
        assert_eq!(d_speed, 0.0);
    }

    #[test]
    fn silent_outcome_scores_the_same_however_speed_is_reported() {
        let h = weighter(1.0);
        let unreported = Outcome::silent(1.0);
        let zero_speed = Outcome::new(0.0, 1.0, Some(0.0));
        assert_eq!(h.closeness(&unreported), h.closeness(&zero_speed));
        assert_eq!(h.fitness(&unreported), h.fitness(&zero_speed));
    }

    #[test]
    fn empty_sample_set() {
        let h = weighter(1.0);
        assert!(h.weights(&[]).is_empty());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(h.sample(&[], &mut rng), None);
    }

    #[test]
    fn sample_prefers_heavy_index() {
        let h = weighter(40.0);
        let outcomes = [
            Outcome::silent(30.0),
            Outcome::new(1.0, 1.0, Some(1.0)),
            Outcome::silent(30.0),
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let hits = (0..200)
            .filter(|_| h.sample(&outcomes, &mut rng) == Some(1))
            .count();
        assert!(hits > 180, "hits: {hits}");
    }

    #[test]
    fn direction_points_toward_good_outcomes() {
        let est = DirectionEstimator::new(weighter(10.0), 2.0);
        let xs = vec![vec![1.0, 0.0], vec![-1.0, 0.0]];
        let outcomes = [Outcome::new(1.0, 1.0, Some(1.0)), Outcome::silent(20.0)];
        let phi = est.estimate(&xs, &outcomes, 2).unwrap();

        assert!(phi[0] > 0.0);
        assert!(phi[1].abs() < 1e-12);
        let norm = (phi[0] * phi[0] + phi[1] * phi[1]).sqrt();
        assert!((norm - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_or_balanced_window_gives_zero_direction() {
        let est = DirectionEstimator::new(weighter(1.0), 1.0);
        assert_eq!(est.estimate(&[], &[], 3).unwrap(), vec![0.0; 3]);

        // Identical outcomes weigh symmetric points equally.
        let xs = vec![vec![0.5, -0.5], vec![-0.5, 0.5]];
        let o = Outcome::new(1.0, 1.0, Some(1.0));
        assert_eq!(est.estimate(&xs, &[o, o], 2).unwrap(), vec![0.0, 0.0]);

        // A single sample sits on its own centroid.
        assert_eq!(est.estimate(&[vec![0.3, 0.1]], &[o], 2).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn direction_rejects_mismatched_shapes() {
        let est = DirectionEstimator::new(weighter(1.0), 1.0);
        let o = Outcome::silent(0.0);
        assert!(est.estimate(&[vec![0.0]], &[o], 2).is_err());
        assert!(est.estimate(&[vec![0.0, 0.0]], &[o, o], 2).is_err());
    }
}
