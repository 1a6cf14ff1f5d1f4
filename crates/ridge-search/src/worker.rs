//! Durable search worker.
//!
//! A [`SearchWorker`] owns one searcher identity and runs the
//! reload → propose → evaluate → record loop. Every iteration is a fault
//! containment boundary: whatever goes wrong is recorded on the searcher and
//! the loop carries on.

use crossbeam_channel::{Sender, TrySendError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ridge_store::TrialStore;
use ridge_types::{
    ConfigError, NewSearcher, NewTrial, ParamVector, RidgeError, RidgeResult, SearchConfig,
    Searcher, SearcherId, Trial, TrialId,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::codec::ParamCodec;
use crate::config_source::ConfigProvider;
use crate::objective::{evaluate_contained, Objective};
use crate::policy::{MoveKind, SearchPolicy};

/// Default iteration ceiling; large enough to run for the life of a deployment.
pub const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000_000;

/// Identity and run limits for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub role: String,
    pub version_tag: String,
    /// RNG seed; drawn from entropy when absent.
    pub seed: Option<u64>,
    /// Iteration ceiling after which [`SearchWorker::run`] returns.
    pub max_iterations: u64,
}

impl WorkerSettings {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            version_tag: env!("CARGO_PKG_VERSION").to_string(),
            seed: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = tag.into();
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// Per-iteration notifications for external monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    Evaluated {
        searcher_id: SearcherId,
        iteration: u64,
        kind: MoveKind,
        trial_id: TrialId,
        propagated: bool,
    },
    ConfigRejected {
        searcher_id: SearcherId,
        iteration: u64,
        message: String,
    },
    Failed {
        searcher_id: SearcherId,
        iteration: u64,
        kind: String,
        message: String,
    },
}

/// Result of a single iteration.
#[derive(Debug)]
pub enum IterationReport {
    Evaluated { kind: MoveKind, trial: Trial },
    /// The reloaded configuration did not validate; nothing was evaluated.
    ConfigRejected(ConfigError),
    Failed(RidgeError),
}

impl IterationReport {
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Evaluated { .. })
    }
}

/// One durable searcher running the adaptive search loop.
pub struct SearchWorker<O: Objective, S: TrialStore, C: ConfigProvider> {
    searcher: Searcher,
    policy: SearchPolicy,
    objective: O,
    store: S,
    config: C,
    settings: WorkerSettings,
    rng: ChaCha8Rng,
    backoff: Duration,
    iteration: u64,
    events: Option<Sender<WorkerEvent>>,
}

impl<O: Objective, S: TrialStore, C: ConfigProvider> SearchWorker<O, S, C> {
    /// Validate the configuration and register a new searcher identity.
    pub fn start(settings: WorkerSettings, objective: O, store: S, config: C) -> RidgeResult<Self> {
        let cfg = config.load()?.validate()?;
        let searcher = store.create_searcher(NewSearcher {
            role: settings.role.clone(),
            simulation_id: cfg.simulation_id.clone(),
            version_tag: settings.version_tag.clone(),
        })?;

        let rng = match settings.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        info!(
            searcher_id = searcher.id,
            role = %searcher.role,
            simulation_id = %searcher.simulation_id,
            version = %searcher.version_tag,
            "search worker started"
        );

        Ok(Self {
            policy: SearchPolicy::new(searcher.id),
            searcher,
            objective,
            store,
            config,
            settings,
            rng,
            backoff: cfg.error_backoff,
            iteration: 0,
            events: None,
        })
    }

    /// Publish a [`WorkerEvent`] per iteration on `tx`.
    pub fn with_events(mut self, tx: Sender<WorkerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn searcher_id(&self) -> SearcherId {
        self.searcher.id
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    pub fn current_point(&self) -> Option<&ParamVector> {
        self.policy.current()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Delay applied after a failed iteration.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run one iteration. Never returns an error: failures are recorded on
    /// the searcher and reported.
    pub fn step(&mut self) -> IterationReport {
        self.iteration += 1;

        let report = match self.load_config() {
            Err(e) => {
                warn!(
                    searcher_id = self.searcher.id,
                    iteration = self.iteration,
                    error = %e,
                    "configuration rejected"
                );
                self.record_failure(&RidgeError::Config(e.clone()));
                IterationReport::ConfigRejected(e)
            }
            Ok(cfg) => {
                self.backoff = cfg.error_backoff;
                match self.evaluate_next(&cfg) {
                    Ok((kind, trial)) => {
                        self.searcher.clear_error();
                        IterationReport::Evaluated { kind, trial }
                    }
                    Err(e) => {
                        error!(
                            searcher_id = self.searcher.id,
                            iteration = self.iteration,
                            kind = e.kind(),
                            error = %e,
                            "iteration failed"
                        );
                        self.record_failure(&e);
                        IterationReport::Failed(e)
                    }
                }
            }
        };

        self.searcher.mark_active();
        if let Err(e) = self.store.update_searcher(&self.searcher) {
            error!(searcher_id = self.searcher.id, error = %e, "failed to persist searcher");
        }

        self.publish(&report);
        report
    }

    /// Loop until the iteration ceiling, sleeping `backoff` after failures.
    pub fn run(mut self) -> SearcherId {
        while self.iteration < self.settings.max_iterations {
            if self.step().is_error() && !self.backoff.is_zero() {
                std::thread::sleep(self.backoff);
            }
        }
        info!(
            searcher_id = self.searcher.id,
            iterations = self.iteration,
            "search worker finished"
        );
        self.searcher.id
    }

    fn load_config(&self) -> Result<SearchConfig, ConfigError> {
        let cfg = self.config.load()?.validate()?;
        if cfg.simulation_id != self.searcher.simulation_id {
            return Err(ConfigError::SimulationMismatch {
                expected: self.searcher.simulation_id.clone(),
                found: cfg.simulation_id,
            });
        }
        Ok(cfg)
    }

    fn evaluate_next(&mut self, cfg: &SearchConfig) -> RidgeResult<(MoveKind, Trial)> {
        let codec = ParamCodec::new(cfg.ranges.clone());
        let proposal = self
            .policy
            .propose(cfg, &codec, &self.store, &mut self.rng)?;
        let params = codec.decode(&proposal.candidate)?;
        let seed = self.rng.gen_range(0..cfg.max_seed);

        debug!(
            searcher_id = self.searcher.id,
            iteration = self.iteration,
            kind = %proposal.kind,
            seed,
            "evaluating candidate"
        );

        let outcome = evaluate_contained(&self.objective, &params, seed)?;
        let trial = self.store.append_trial(NewTrial {
            searcher_id: self.searcher.id,
            seed,
            params,
            outcome,
        })?;
        let kind = self.policy.settle(proposal, &outcome);
        Ok((kind, trial))
    }

    fn record_failure(&mut self, e: &RidgeError) {
        let traceback = format!("iteration {}\n{}", self.iteration, e.render_trace());
        self.searcher.record_error(e.kind(), traceback);
    }

    fn publish(&self, report: &IterationReport) {
        let Some(tx) = &self.events else {
            return;
        };
        let searcher_id = self.searcher.id;
        let iteration = self.iteration;
        let event = match report {
            IterationReport::Evaluated { kind, trial } => WorkerEvent::Evaluated {
                searcher_id,
                iteration,
                kind: *kind,
                trial_id: trial.id,
                propagated: trial.outcome.propagated(),
            },
            IterationReport::ConfigRejected(e) => WorkerEvent::ConfigRejected {
                searcher_id,
                iteration,
                message: e.to_string(),
            },
            IterationReport::Failed(e) => WorkerEvent::Failed {
                searcher_id,
                iteration,
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(searcher_id, "event channel full, dropping event");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(searcher_id, "event receiver gone");
            }
        }
    }
}
