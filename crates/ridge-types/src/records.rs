//! Persistent searcher and trial records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::Outcome;
use crate::params::ParamDict;

/// Store-assigned searcher identifier.
pub type SearcherId = u64;

/// Store-assigned trial identifier; increases with insertion order.
pub type TrialId = u64;

/// A single recorded evaluation. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    pub searcher_id: SearcherId,
    pub seed: u64,
    pub params: ParamDict,
    pub outcome: Outcome,
    pub created_at: DateTime<Utc>,
}

/// A trial before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrial {
    pub searcher_id: SearcherId,
    pub seed: u64,
    pub params: ParamDict,
    pub outcome: Outcome,
}

impl NewTrial {
    pub fn into_trial(self, id: TrialId) -> Trial {
        Trial {
            id,
            searcher_id: self.searcher_id,
            seed: self.seed,
            params: self.params,
            outcome: self.outcome,
            created_at: Utc::now(),
        }
    }
}

/// Liveness record for one running worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Searcher {
    pub id: SearcherId,
    pub role: String,
    pub simulation_id: String,
    pub last_active: DateTime<Utc>,
    /// Error kind from the most recent failed iteration.
    pub error: Option<String>,
    /// Rendered error chain from the most recent failed iteration.
    pub traceback: Option<String>,
    pub version_tag: String,
    pub created_at: DateTime<Utc>,
}

impl Searcher {
    pub fn mark_active(&mut self) {
        self.last_active = Utc::now();
    }

    pub fn record_error(&mut self, kind: impl Into<String>, traceback: impl Into<String>) {
        self.error = Some(kind.into());
        self.traceback = Some(traceback.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.traceback = None;
    }

    pub fn is_erroring(&self) -> bool {
        self.error.is_some()
    }
}

/// Identity details supplied when a worker registers itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSearcher {
    pub role: String,
    pub simulation_id: String,
    pub version_tag: String,
}

impl NewSearcher {
    pub fn into_searcher(self, id: SearcherId) -> Searcher {
        let now = Utc::now();
        Searcher {
            id,
            role: self.role,
            simulation_id: self.simulation_id,
            last_active: now,
            error: None,
            traceback: None,
            version_tag: self.version_tag,
            created_at: now,
        }
    }
}

/// Optional filters for liveness queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearcherFilter {
    pub simulation_id: Option<String>,
    pub role: Option<String>,
}

impl SearcherFilter {
    pub fn matches(&self, searcher: &Searcher) -> bool {
        self.simulation_id
            .as_deref()
            .map_or(true, |sim| searcher.simulation_id == sim)
            && self.role.as_deref().map_or(true, |role| searcher.role == role)
    }
}
