use anyhow::Context;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use ridge_search::{
    search_status, JsonFileConfig, Objective, SearchWorker, WorkerEvent, WorkerSettings,
    DEFAULT_MAX_ITERATIONS, DEFAULT_RECENT,
};
use ridge_store::JsonlStore;
use ridge_types::{ObjectiveError, Outcome, ParamDict, SearcherFilter};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Noisy analytic landscape with a narrow band of propagating parameter sets.
struct SyntheticRidge;

impl Objective for SyntheticRidge {
    fn evaluate(&self, params: &ParamDict, seed: u64) -> Result<Outcome, ObjectiveError> {
        if params.values().any(|v| !v.is_finite()) {
            return Err(ObjectiveError::Failed {
                message: "non-finite parameter".into(),
            });
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let noise: f64 = rng.sample(StandardNormal);
        let drive = params.values().map(|v| v.sin()).sum::<f64>() / params.len().max(1) as f64;
        let excitation = drive + 0.05 * noise;
        let activity = (1.0 + excitation).max(0.0);

        if excitation <= 0.5 {
            return Ok(Outcome::silent(activity));
        }
        let propagation = ((excitation - 0.5) * 4.0).min(1.0);
        Ok(Outcome::new(propagation, activity, Some(10.0 * excitation)))
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("RIDGE_CONFIG").context("RIDGE_CONFIG must name a JSON config file")?;
    let store_root = env_or("RIDGE_STORE", "./ridge-data");
    let role = env_or("RIDGE_ROLE", "default");
    let version_tag = env_or("RIDGE_VERSION", env!("CARGO_PKG_VERSION"));
    let workers: usize = env_or("RIDGE_WORKERS", "1")
        .parse()
        .context("RIDGE_WORKERS must be a positive integer")?;
    let max_iterations: u64 = match std::env::var("RIDGE_MAX_ITER") {
        Ok(raw) => raw.parse().context("RIDGE_MAX_ITER must be an unsigned integer")?,
        Err(_) => DEFAULT_MAX_ITERATIONS,
    };
    let base_seed: Option<u64> = std::env::var("RIDGE_SEED")
        .ok()
        .map(|s| s.parse())
        .transpose()
        .context("RIDGE_SEED must be an unsigned integer")?;

    let store = Arc::new(JsonlStore::open(&store_root)?);
    info!(
        store = %store_root,
        config = %config_path,
        workers,
        max_iterations,
        role = %role,
        "launching ridge searchers"
    );

    let (tx, rx) = crossbeam_channel::bounded::<WorkerEvent>(1024);
    let monitor = thread::spawn(move || {
        for event in rx {
            match serde_json::to_string(&event) {
                Ok(line) => info!(event = %line, "worker event"),
                Err(e) => error!(error = %e, "could not encode worker event"),
            }
        }
    });

    let mut handles = Vec::with_capacity(workers);
    for index in 0..workers {
        let mut settings = WorkerSettings::new(role.clone())
            .with_version_tag(version_tag.clone())
            .with_max_iterations(max_iterations);
        if let Some(seed) = base_seed {
            settings = settings.with_seed(seed.wrapping_add(index as u64));
        }
        let worker = SearchWorker::start(
            settings,
            SyntheticRidge,
            store.clone(),
            JsonFileConfig::new(&config_path),
        )?
        .with_events(tx.clone());

        handles.push(
            thread::Builder::new()
                .name(format!("ridge-worker-{index}"))
                .spawn(move || worker.run())?,
        );
    }
    drop(tx);

    for handle in handles {
        match handle.join() {
            Ok(id) => info!(searcher_id = id, "worker exited"),
            Err(_) => error!("worker thread panicked"),
        }
    }
    if monitor.join().is_err() {
        error!("event monitor panicked");
    }

    let status = search_status(&store, &SearcherFilter::default(), DEFAULT_RECENT)?;
    println!("{status}");
    Ok(())
}
