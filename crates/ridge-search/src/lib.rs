//! # ridge-search
//!
//! Adaptive stochastic search for parameter regions where an expensive,
//! randomized simulator reproduces a target phenomenon.
//!
//! Each [`SearchWorker`] runs an independent random walk over a normalized
//! parameter box, alternating between forced points, random jumps,
//! history-weighted resumption and direction-biased steps. Workers share
//! nothing but the [`ridge_store::TrialStore`] they record into.

pub mod codec;
pub mod config_source;
pub mod objective;
pub mod policy;
pub mod status;
pub mod weighting;
pub mod worker;

pub use codec::{BoundsGuard, ParamCodec};
pub use config_source::{ConfigProvider, JsonFileConfig, SharedConfig};
pub use objective::Objective;
pub use policy::{random_point, ForceQueue, MoveKind, Proposal, SearchPolicy};
pub use status::{read_search_error, search_status, SearchStatus, SearcherErrorDetail, DEFAULT_RECENT};
pub use weighting::{DirectionEstimator, HistoryWeighter};
pub use worker::{
    IterationReport, SearchWorker, WorkerEvent, WorkerSettings, DEFAULT_MAX_ITERATIONS,
};
