//! Operator-facing liveness and error queries.

use chrono::Utc;
use ridge_store::TrialStore;
use ridge_types::{internal_error, RidgeResult, SearcherFilter, SearcherId, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Window used when callers have no preference.
pub const DEFAULT_RECENT: Duration = Duration::from_secs(30);

/// Searchers seen within a recent window, split by health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub window: Duration,
    pub active: Vec<SearcherId>,
    pub healthy: Vec<SearcherId>,
    /// Erroring searchers with their last error kind.
    pub erroring: Vec<(SearcherId, String)>,
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} searchers active in the last {}s",
            self.active.len(),
            self.window.as_secs()
        )?;
        writeln!(f, "{} running successfully: {:?}", self.healthy.len(), self.healthy)?;
        write!(f, "{} with errors", self.erroring.len())?;
        for (id, kind) in &self.erroring {
            write!(f, "\n  searcher {id}: {kind}")?;
        }
        Ok(())
    }
}

/// Liveness report for searchers active within `recent`.
pub fn search_status<S: TrialStore + ?Sized>(
    store: &S,
    filter: &SearcherFilter,
    recent: Duration,
) -> RidgeResult<SearchStatus> {
    let window = chrono::Duration::from_std(recent)
        .map_err(|e| internal_error!("liveness window {recent:?} out of range: {e}"))?;
    let searchers = store.active_searchers(Utc::now() - window, filter)?;

    let mut status = SearchStatus {
        window: recent,
        active: Vec::with_capacity(searchers.len()),
        healthy: Vec::new(),
        erroring: Vec::new(),
    };
    for searcher in searchers {
        status.active.push(searcher.id);
        match searcher.error {
            Some(kind) => status.erroring.push((searcher.id, kind)),
            None => status.healthy.push(searcher.id),
        }
    }
    Ok(status)
}

/// Last recorded error of one searcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearcherErrorDetail {
    pub searcher_id: SearcherId,
    pub kind: String,
    pub traceback: String,
}

impl fmt::Display for SearcherErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "searcher {} error: {}\n{}", self.searcher_id, self.kind, self.traceback)
    }
}

/// Error detail for `searcher_id`, or `None` when it is healthy.
pub fn read_search_error<S: TrialStore + ?Sized>(
    store: &S,
    searcher_id: SearcherId,
) -> RidgeResult<Option<SearcherErrorDetail>> {
    let searcher = store
        .searcher(searcher_id)?
        .ok_or(StoreError::SearcherNotFound { searcher_id })?;

    Ok(searcher.error.map(|kind| SearcherErrorDetail {
        searcher_id,
        kind,
        traceback: searcher.traceback.unwrap_or_default(),
    }))
}
