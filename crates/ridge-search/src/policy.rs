//! The per-iteration move decision.
//!
//! Each iteration the policy picks one of four moves:
//!
//! * `Forced` – the start preset, or the next entry of the searcher's forced
//!   sequence;
//! * `JumpNew` – a fresh random point, independent of history;
//! * `JumpPrev` – resume from a past point of the simulation, drawn by
//!   outcome-weighted importance sampling, and step away from it;
//! * `Step` – a direction-biased random step from the current point.
//!
//! Forced points and jumps are adopted as soon as their trial is recorded.
//! A step is adopted only if its trial propagated; otherwise the walk stays
//! where it was.

use rand::Rng;
use rand_distr::{Exp1, StandardNormal};
use ridge_store::TrialStore;
use ridge_types::{
    internal_error, ForceEntry, Outcome, ParamRange, ParamVector, Preset, RangeSpec, RidgeResult, SearchConfig,
    SearcherId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::codec::{BoundsGuard, ParamCodec};
use crate::weighting::{DirectionEstimator, HistoryWeighter};

/// Rejection-sampling attempts before falling back to a uniform draw.
const MAX_REJECTIONS: usize = 10_000;

/// Which branch produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveKind {
    Forced,
    JumpNew,
    JumpPrev,
    Step,
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Forced => "FORCED",
            Self::JumpNew => "JUMP_NEW",
            Self::JumpPrev => "JUMP_PREV",
            Self::Step => "STEP",
        };
        f.write_str(name)
    }
}

/// A candidate to evaluate plus the point to keep if it does not pan out.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub kind: MoveKind,
    pub candidate: ParamVector,
    pub fallback: ParamVector,
}

/// Cursor into a searcher's forced sequence.
///
/// The sequence restarts whenever the configured list differs from the one
/// last observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForceQueue {
    observed: Option<Vec<ForceEntry>>,
    remaining: usize,
}

impl ForceQueue {
    /// Track the configured sequence without consuming from it.
    pub fn sync(&mut self, entries: Option<&[ForceEntry]>) {
        match entries {
            None => {
                self.observed = None;
                self.remaining = 0;
            }
            Some(list) if self.observed.as_deref() != Some(list) => {
                info!(entries = list.len(), "new forcing sequence detected");
                self.observed = Some(list.to_vec());
                self.remaining = list.len();
            }
            Some(_) => {}
        }
    }

    /// Sync and take the next entry, if any remain.
    pub fn pop(&mut self, entries: Option<&[ForceEntry]>) -> Option<ForceEntry> {
        self.sync(entries);
        let list = self.observed.as_ref()?;
        if self.remaining == 0 {
            return None;
        }
        let entry = list[list.len() - self.remaining].clone();
        self.remaining -= 1;
        Some(entry)
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

/// Decision state carried across iterations by one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPolicy {
    searcher_id: SearcherId,
    current: Option<ParamVector>,
    since_jump: usize,
    forces: ForceQueue,
}

impl SearchPolicy {
    pub fn new(searcher_id: SearcherId) -> Self {
        Self {
            searcher_id,
            current: None,
            since_jump: 0,
            forces: ForceQueue::default(),
        }
    }

    /// The point the walk currently sits at; `None` until the start point
    /// has been evaluated.
    pub fn current(&self) -> Option<&ParamVector> {
        self.current.as_ref()
    }

    pub fn since_jump(&self) -> usize {
        self.since_jump
    }

    pub fn forces(&self) -> &ForceQueue {
        &self.forces
    }

    /// Choose the next move and build its (clipped) candidate.
    pub fn propose<S, R>(
        &mut self,
        cfg: &SearchConfig,
        codec: &ParamCodec,
        history: &S,
        rng: &mut R,
    ) -> RidgeResult<Proposal>
    where
        S: TrialStore + ?Sized,
        R: Rng + ?Sized,
    {
        let forces = cfg.forces_for(self.searcher_id);
        let forced = match &self.current {
            None => {
                self.forces.sync(forces);
                Some(cfg.start.clone())
            }
            Some(_) => self.forces.pop(forces),
        };

        if let Some(entry) = forced {
            let x = match &entry {
                ForceEntry::Preset(Preset::Random) => random_point(&cfg.ranges, cfg.sigma_rand, rng),
                ForceEntry::Preset(Preset::Center) => vec![0.0; codec.dim()],
                ForceEntry::Params(params) => codec.encode(params)?,
            };
            self.since_jump = if entry.is_preset() {
                0
            } else {
                self.since_jump + 1
            };
            let candidate = BoundsGuard::clip(&x, &cfg.ranges)?;
            return Ok(self.settled(MoveKind::Forced, candidate));
        }

        let Some(current) = self.current.clone() else {
            return Err(internal_error!("searcher {} has no current point", self.searcher_id));
        };

        if rng.gen::<f64>() < cfg.q_jump {
            self.since_jump = 0;
            if rng.gen::<f64>() >= cfg.q_new {
                if let Some(resumed) = self.resume_point(cfg, codec, history, rng)? {
                    let fallback = BoundsGuard::clip(&resumed, &cfg.ranges)?;
                    let stepped = self.step_from(&fallback, cfg, codec, history, rng)?;
                    let candidate = BoundsGuard::clip(&stepped, &cfg.ranges)?;
                    return Ok(Proposal {
                        kind: MoveKind::JumpPrev,
                        candidate,
                        fallback,
                    });
                }
                debug!(searcher_id = self.searcher_id, "no history to resume from, jumping to a new point");
            }
            let x = random_point(&cfg.ranges, cfg.sigma_rand, rng);
            let candidate = BoundsGuard::clip(&x, &cfg.ranges)?;
            return Ok(self.settled(MoveKind::JumpNew, candidate));
        }

        self.since_jump += 1;
        let fallback = BoundsGuard::clip(&current, &cfg.ranges)?;
        let stepped = self.step_from(&fallback, cfg, codec, history, rng)?;
        let candidate = BoundsGuard::clip(&stepped, &cfg.ranges)?;
        Ok(Proposal {
            kind: MoveKind::Step,
            candidate,
            fallback,
        })
    }

    /// Apply the move rule once the proposal's trial has been recorded.
    pub fn settle(&mut self, proposal: Proposal, outcome: &Outcome) -> MoveKind {
        self.current = Some(if outcome.propagated() {
            proposal.candidate
        } else {
            proposal.fallback
        });
        proposal.kind
    }

    fn settled(&self, kind: MoveKind, candidate: ParamVector) -> Proposal {
        Proposal {
            kind,
            fallback: candidate.clone(),
            candidate,
        }
    }

    /// Draw a past point of this simulation weighted by how close its
    /// outcome came to the targets.
    fn resume_point<S, R>(
        &self,
        cfg: &SearchConfig,
        codec: &ParamCodec,
        history: &S,
        rng: &mut R,
    ) -> RidgeResult<Option<ParamVector>>
    where
        S: TrialStore + ?Sized,
        R: Rng + ?Sized,
    {
        let trials = history.trials_for_simulation(&cfg.simulation_id)?;
        let outcomes: Vec<Outcome> = trials.iter().map(|t| t.outcome).collect();
        let weighter = HistoryWeighter::new(cfg.targets, cfg.prev);

        match weighter.sample(&outcomes, rng) {
            Some(idx) => Ok(Some(codec.encode(&trials[idx].params)?)),
            None => Ok(None),
        }
    }

    /// Exponential-length step along a noisy version of the estimated
    /// ascent direction.
    fn step_from<S, R>(
        &self,
        base: &[f64],
        cfg: &SearchConfig,
        codec: &ParamCodec,
        history: &S,
        rng: &mut R,
    ) -> RidgeResult<ParamVector>
    where
        S: TrialStore + ?Sized,
        R: Rng + ?Sized,
    {
        let window = cfg.step.window.min(self.since_jump);
        let length = cfg.step.mean_length * rng.sample::<f64, _>(Exp1);

        let bias = if window == 0 {
            vec![0.0; base.len()]
        } else {
            let recent = history.recent_trials(self.searcher_id, window)?;
            let xs = recent
                .iter()
                .map(|t| codec.encode(&t.params))
                .collect::<Result<Vec<_>, _>>()?;
            let outcomes: Vec<Outcome> = recent.iter().map(|t| t.outcome).collect();
            let estimator = DirectionEstimator::new(
                HistoryWeighter::new(cfg.targets, cfg.phi),
                cfg.step.bias_length,
            );
            estimator.estimate(&xs, &outcomes, base.len())?
        };

        let raw: Vec<f64> = bias
            .iter()
            .map(|b| b + rng.sample::<f64, _>(StandardNormal))
            .collect();
        let norm = raw.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Ok(base.to_vec());
        }

        Ok(base
            .iter()
            .zip(&raw)
            .map(|(x, phi)| x + length * phi / norm)
            .collect())
    }
}

/// Sample a point with each variable dimension drawn from a Gaussian of
/// width `scale · sigma` truncated to `[-scale/2, scale/2)`.
pub fn random_point<R: Rng + ?Sized>(spec: &RangeSpec, sigma: f64, rng: &mut R) -> ParamVector {
    spec.parameters
        .iter()
        .map(|def| match def.range {
            ParamRange::Fixed(_) => 0.0,
            ParamRange::Variable { scale, .. } => {
                let half = scale / 2.0;
                // A degenerate scale leaves nothing to sample but the midpoint.
                if !(half > 0.0 && half.is_finite()) {
                    return 0.0;
                }
                for _ in 0..MAX_REJECTIONS {
                    let z: f64 = rng.sample(StandardNormal);
                    let x = z * scale * sigma;
                    if -half <= x && x < half {
                        return x;
                    }
                }
                rng.gen_range(-half..half)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use ridge_store::MemoryStore;
    use ridge_types::{NewSearcher, NewTrial, ParamDict, RawSearchConfig};

    const CONFIG: &str = r#"{
        "simulation_id": "sim",
        "start": "center",
        "ranges": [["A", [0.0, 10.0, 1.0]], ["B", [5.0]], ["C", [-1.0, 1.0, 2.0]]],
        "q_jump": 0.0,
        "q_new": 1.0,
        "sigma_rand": 0.2,
        "prev": {"temperature": 5, "propagation": 1, "activity": 0, "speed": 5, "sum": 6},
        "step": {"mean_length": 0.05, "bias_length": 1, "window": 30},
        "phi": {"temperature": 5, "propagation": 0, "activity": 5, "speed": 5, "sum": 10},
        "targets": {"activity": 1, "speed": 8, "eta_activity": 10, "eta_speed": 1},
        "error_backoff_secs": 0
    }"#;

    fn sample_config(edit: impl FnOnce(&mut RawSearchConfig)) -> SearchConfig {
        let mut raw = RawSearchConfig::from_json(CONFIG).unwrap();
        edit(&mut raw);
        raw.validate().unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        searcher_id: SearcherId,
        rng: ChaCha8Rng,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let searcher = store
            .create_searcher(NewSearcher {
                role: "test".into(),
                simulation_id: "sim".into(),
                version_tag: "t".into(),
            })
            .unwrap();
        Fixture {
            store,
            searcher_id: searcher.id,
            rng: ChaCha8Rng::seed_from_u64(11),
        }
    }

    fn propagated() -> Outcome {
        Outcome::new(1.0, 1.0, Some(8.0))
    }

    #[test]
    fn first_iteration_forces_start() {
        let cfg = sample_config(|_| {});
        let codec = ParamCodec::new(cfg.ranges.clone());
        let mut fx = fixture();
        let mut policy = SearchPolicy::new(fx.searcher_id);

        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::Forced);
        assert_eq!(p.candidate, vec![0.0, 0.0, 0.0]);
        assert_eq!(policy.since_jump(), 0);
        assert!(policy.current().is_none());

        policy.settle(p, &Outcome::silent(0.0));
        assert_eq!(policy.current(), Some(&vec![0.0, 0.0, 0.0]));
    }

    #[test]
    fn zero_jump_probability_always_steps() {
        let cfg = sample_config(|_| {});
        let codec = ParamCodec::new(cfg.ranges.clone());
        let mut fx = fixture();
        let mut policy = SearchPolicy::new(fx.searcher_id);

        let first = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        policy.settle(first, &propagated());

        for i in 1..60 {
            let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
            assert_eq!(p.kind, MoveKind::Step);
            assert_eq!(policy.since_jump(), i);
            assert!(BoundsGuard::contains(&p.candidate, &cfg.ranges));
            assert_eq!(p.candidate[1], 0.0);

            let params = codec.decode(&p.candidate).unwrap();
            let outcome = if i % 2 == 0 { propagated() } else { Outcome::silent(0.2) };
            fx.store
                .append_trial(NewTrial {
                    searcher_id: fx.searcher_id,
                    seed: i as u64,
                    params,
                    outcome,
                })
                .unwrap();
            policy.settle(p, &outcome);
        }
    }

    #[test]
    fn always_jump_new_never_reads_history() {
        let cfg = sample_config(|raw| {
            raw.q_jump = Some(1.0);
            raw.q_new = Some(1.0);
        });
        let codec = ParamCodec::new(cfg.ranges.clone());
        let mut fx = fixture();
        let mut policy = SearchPolicy::new(fx.searcher_id);

        let first = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        policy.settle(first, &Outcome::silent(0.0));

        for _ in 0..200 {
            let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
            assert_eq!(p.kind, MoveKind::JumpNew);
            assert_eq!(p.candidate, p.fallback);
            assert!(BoundsGuard::contains(&p.candidate, &cfg.ranges));
            assert_eq!(policy.since_jump(), 0);
            policy.settle(p, &Outcome::silent(0.0));
        }
        assert_eq!(fx.store.stats().history_reads, 0);
    }

    #[test]
    fn jump_prev_resumes_from_history() {
        let cfg = sample_config(|raw| {
            raw.q_jump = Some(1.0);
            raw.q_new = Some(0.0);
            if let Some(step) = raw.step.as_mut() {
                step.mean_length = Some(0.0);
            }
        });
        let codec = ParamCodec::new(cfg.ranges.clone());
        let mut fx = fixture();
        let mut policy = SearchPolicy::new(fx.searcher_id);

        let first = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        policy.settle(first, &Outcome::silent(0.0));

        // Empty history: resumption degrades to a fresh random point.
        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::JumpNew);
        policy.settle(p, &Outcome::silent(0.0));

        let mut params = ParamDict::new();
        params.insert("A".into(), 7.5);
        params.insert("B".into(), 5.0);
        params.insert("C".into(), -0.5);
        fx.store
            .append_trial(NewTrial {
                searcher_id: fx.searcher_id,
                seed: 0,
                params,
                outcome: propagated(),
            })
            .unwrap();

        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::JumpPrev);
        assert_eq!(p.fallback, vec![0.25, 0.0, -0.5]);
        // Zero-length step lands on the resumed point.
        assert_eq!(p.candidate, p.fallback);
    }

    #[test]
    fn move_rule_reverts_failed_steps() {
        let cfg = sample_config(|_| {});
        let codec = ParamCodec::new(cfg.ranges.clone());
        let mut fx = fixture();
        let mut policy = SearchPolicy::new(fx.searcher_id);

        let first = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        policy.settle(first, &Outcome::silent(0.0));
        let before = policy.current().cloned().unwrap();

        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::Step);
        assert_ne!(p.candidate, before);
        policy.settle(p, &Outcome::silent(0.5));
        assert_eq!(policy.current(), Some(&before));

        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        let stepped = p.candidate.clone();
        policy.settle(p, &Outcome::new(0.2, 1.0, Some(3.0)));
        assert_eq!(policy.current(), Some(&stepped));
    }

    #[test]
    fn forced_sequence_runs_then_restarts_on_edit() {
        let mut literal = ParamDict::new();
        literal.insert("A".into(), 10.0);
        literal.insert("B".into(), 5.0);
        literal.insert("C".into(), 1.0);

        let mut fx = fixture();
        let id = fx.searcher_id;
        let with_force = |entries: Vec<ForceEntry>| {
            let mut cfg = sample_config(|_| {});
            cfg.force.insert(id, entries);
            cfg
        };

        let cfg = with_force(vec![
            ForceEntry::Params(literal.clone()),
            ForceEntry::Preset(Preset::Center),
        ]);
        let codec = ParamCodec::new(cfg.ranges.clone());
        let mut policy = SearchPolicy::new(id);

        // Start preset first; the sequence is only observed.
        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::Forced);
        assert_eq!(policy.forces().remaining(), 2);
        policy.settle(p, &Outcome::silent(0.0));

        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::Forced);
        assert_eq!(p.candidate, vec![0.5, 0.0, 0.5]);
        assert_eq!(policy.since_jump(), 1);
        policy.settle(p, &Outcome::silent(0.0));

        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.candidate, vec![0.0, 0.0, 0.0]);
        assert_eq!(policy.since_jump(), 0);
        policy.settle(p, &Outcome::silent(0.0));

        // Exhausted: back to the probabilistic branches.
        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::Step);
        policy.settle(p, &Outcome::silent(0.0));

        // Unchanged list stays exhausted.
        let p = policy.propose(&cfg, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::Step);
        policy.settle(p, &Outcome::silent(0.0));

        // An edit restarts from the top.
        let edited = with_force(vec![ForceEntry::Params(literal), ForceEntry::Preset(Preset::Random)]);
        let p = policy.propose(&edited, &codec, &fx.store, &mut fx.rng).unwrap();
        assert_eq!(p.kind, MoveKind::Forced);
        assert_eq!(p.candidate, vec![0.5, 0.0, 0.5]);
        assert_eq!(policy.forces().remaining(), 1);
    }

    #[test]
    fn random_point_is_truncated_and_fixed_dims_zero() {
        let spec = RangeSpec::new()
            .add_variable("a", 0.0, 1.0, 1.0)
            .add_fixed("b", 2.0)
            .add_variable("c", 0.0, 1.0, 4.0);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for sigma in [0.0, 0.2, 50.0] {
            for _ in 0..100 {
                let x = random_point(&spec, sigma, &mut rng);
                assert_eq!(x[1], 0.0);
                assert!((-0.5..0.5).contains(&x[0]));
                assert!((-2.0..2.0).contains(&x[2]));
            }
        }
    }

    #[test]
    fn degenerate_scale_samples_the_midpoint() {
        let spec = RangeSpec::new()
            .add_variable("flat", 0.0, 1.0, 0.0)
            .add_variable("inverted", 0.0, 1.0, -2.0)
            .add_variable("ok", 0.0, 1.0, 1.0);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for sigma in [0.2, 1e9] {
            let x = random_point(&spec, sigma, &mut rng);
            assert_eq!(&x[..2], &[0.0, 0.0]);
            assert!((-0.5..0.5).contains(&x[2]));
        }
    }

    #[test]
    fn move_kind_display() {
        assert_eq!(MoveKind::JumpPrev.to_string(), "JUMP_PREV");
        assert_eq!(MoveKind::Step.to_string(), "STEP");
    }
}
