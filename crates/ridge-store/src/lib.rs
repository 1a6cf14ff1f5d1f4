//! # ridge-store
//!
//! Shared searcher and trial history. Every worker appends its trials here and
//! reads the history back to steer its next move; no other state is shared
//! between workers.

pub mod memory;
pub mod jsonl;

pub use memory::*;
pub use jsonl::*;

use chrono::{DateTime, Utc};
use ridge_types::{
    NewSearcher, NewTrial, Searcher, SearcherFilter, SearcherId, StoreResult, Trial,
};
use std::sync::Arc;

/// Persistence boundary used by search workers.
///
/// Trial writes are append-only and individually atomic; readers may lag
/// behind concurrent writers but never observe a partially written record.
pub trait TrialStore: Send + Sync {
    /// Register a new searcher and assign it an id.
    fn create_searcher(&self, searcher: NewSearcher) -> StoreResult<Searcher>;

    /// Upsert a searcher's liveness and error state.
    fn update_searcher(&self, searcher: &Searcher) -> StoreResult<()>;

    fn searcher(&self, id: SearcherId) -> StoreResult<Option<Searcher>>;

    /// Append a trial and return it with its assigned id.
    fn append_trial(&self, trial: NewTrial) -> StoreResult<Trial>;

    /// All trials written by searchers attached to `simulation_id`.
    fn trials_for_simulation(&self, simulation_id: &str) -> StoreResult<Vec<Trial>>;

    /// The `limit` most recent trials of one searcher, newest first.
    fn recent_trials(&self, searcher_id: SearcherId, limit: usize) -> StoreResult<Vec<Trial>>;

    /// Searchers active at or after `since` that match `filter`.
    fn active_searchers(
        &self,
        since: DateTime<Utc>,
        filter: &SearcherFilter,
    ) -> StoreResult<Vec<Searcher>>;
}

impl<T: TrialStore + ?Sized> TrialStore for Arc<T> {
    fn create_searcher(&self, searcher: NewSearcher) -> StoreResult<Searcher> {
        (**self).create_searcher(searcher)
    }

    fn update_searcher(&self, searcher: &Searcher) -> StoreResult<()> {
        (**self).update_searcher(searcher)
    }

    fn searcher(&self, id: SearcherId) -> StoreResult<Option<Searcher>> {
        (**self).searcher(id)
    }

    fn append_trial(&self, trial: NewTrial) -> StoreResult<Trial> {
        (**self).append_trial(trial)
    }

    fn trials_for_simulation(&self, simulation_id: &str) -> StoreResult<Vec<Trial>> {
        (**self).trials_for_simulation(simulation_id)
    }

    fn recent_trials(&self, searcher_id: SearcherId, limit: usize) -> StoreResult<Vec<Trial>> {
        (**self).recent_trials(searcher_id, limit)
    }

    fn active_searchers(
        &self,
        since: DateTime<Utc>,
        filter: &SearcherFilter,
    ) -> StoreResult<Vec<Searcher>> {
        (**self).active_searchers(since, filter)
    }
}
