//! Durable history backed by two append-only JSON-lines logs.
//!
//! `searchers.jsonl` holds searcher snapshots (the last line for an id wins)
//! and `trials.jsonl` holds trials in id order. Both logs are replayed into a
//! [`MemoryStore`] index on open. Each record is written as one line straight
//! to the file before it becomes visible to readers; a write that fails is cut
//! back off the log.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ridge_types::{
    NewSearcher, NewTrial, Searcher, SearcherFilter, SearcherId, StoreError, StoreResult, Trial,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::memory::MemoryStore;
use crate::TrialStore;

const SEARCHER_LOG: &str = "searchers.jsonl";
const TRIAL_LOG: &str = "trials.jsonl";

/// File-backed store shared by the worker threads of one process.
#[derive(Debug)]
pub struct JsonlStore {
    root: PathBuf,
    index: MemoryStore,
    searcher_log: Mutex<File>,
    trial_log: Mutex<File>,
}

impl JsonlStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let index = MemoryStore::new();

        let searcher_path = root.join(SEARCHER_LOG);
        let searchers: Vec<Searcher> = replay(&searcher_path)?;
        let searcher_count = searchers.len();
        for searcher in searchers {
            index.restore_searcher(searcher);
        }

        let trial_path = root.join(TRIAL_LOG);
        let trials: Vec<Trial> = replay(&trial_path)?;
        let trial_count = trials.len();
        let mut last_id = 0;
        for (line, trial) in trials.into_iter().enumerate() {
            if trial.id <= last_id {
                return Err(StoreError::Corruption {
                    line: line + 1,
                    message: format!("trial id {} not after {}", trial.id, last_id),
                });
            }
            last_id = trial.id;
            index.restore_trial(trial);
        }

        info!(
            root = %root.display(),
            searcher_records = searcher_count,
            trials = trial_count,
            "opened trial store"
        );

        Ok(Self {
            searcher_log: Mutex::new(open_append(&searcher_path)?),
            trial_log: Mutex::new(open_append(&trial_path)?),
            root,
            index,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The in-memory view of everything replayed and written so far.
    pub fn index(&self) -> &MemoryStore {
        &self.index
    }

    fn write_searcher(&self, searcher: &Searcher) -> StoreResult<()> {
        let mut log = self.searcher_log.lock();
        append_line(&mut log, searcher)
    }
}

impl TrialStore for JsonlStore {
    fn create_searcher(&self, searcher: NewSearcher) -> StoreResult<Searcher> {
        let searcher = searcher.into_searcher(self.index.allocate_searcher_id());
        self.write_searcher(&searcher)?;
        self.index.restore_searcher(searcher.clone());
        Ok(searcher)
    }

    fn update_searcher(&self, searcher: &Searcher) -> StoreResult<()> {
        self.write_searcher(searcher)?;
        self.index.upsert(searcher);
        Ok(())
    }

    fn searcher(&self, id: SearcherId) -> StoreResult<Option<Searcher>> {
        self.index.searcher(id)
    }

    fn append_trial(&self, trial: NewTrial) -> StoreResult<Trial> {
        self.index.append_with(trial, |trial| {
            let mut log = self.trial_log.lock();
            append_line(&mut log, trial)
        })
    }

    fn trials_for_simulation(&self, simulation_id: &str) -> StoreResult<Vec<Trial>> {
        self.index.trials_for_simulation(simulation_id)
    }

    fn recent_trials(&self, searcher_id: SearcherId, limit: usize) -> StoreResult<Vec<Trial>> {
        self.index.recent_trials(searcher_id, limit)
    }

    fn active_searchers(
        &self,
        since: DateTime<Utc>,
        filter: &SearcherFilter,
    ) -> StoreResult<Vec<Searcher>> {
        self.index.active_searchers(since, filter)
    }
}

fn open_append(path: &Path) -> StoreResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Append one record as a single line. On failure the log is truncated back
/// to its previous length so no partial or orphaned record survives.
fn append_line<T: Serialize>(log: &mut File, record: &T) -> StoreResult<()> {
    let mut line = serde_json::to_string(record).map_err(|e| StoreError::WriteFailed {
        message: e.to_string(),
    })?;
    line.push('\n');

    let len = log.metadata()?.len();
    if let Err(e) = log.write_all(line.as_bytes()).and_then(|()| log.flush()) {
        if let Err(rollback) = log.set_len(len) {
            warn!(error = %rollback, "could not cut failed record off the log");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Parse every record of a log. A torn final line (a write interrupted by a
/// crash) is cut off; any other unparseable line is corruption.
fn replay<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = text.split_inclusive('\n').collect();

    let mut records = Vec::with_capacity(lines.len());
    let mut good_bytes = 0usize;
    for (i, raw) in lines.iter().enumerate() {
        let body = raw.trim();
        if body.is_empty() {
            good_bytes += raw.len();
            continue;
        }
        match serde_json::from_str::<T>(body) {
            Ok(record) if raw.ends_with('\n') => {
                records.push(record);
                good_bytes += raw.len();
            }
            result => {
                if i + 1 < lines.len() {
                    let message = match result {
                        Err(e) => e.to_string(),
                        Ok(_) => "record not newline terminated".to_string(),
                    };
                    return Err(StoreError::Corruption {
                        line: i + 1,
                        message,
                    });
                }
                warn!(
                    path = %path.display(),
                    line = i + 1,
                    "discarding torn final record"
                );
                OpenOptions::new()
                    .write(true)
                    .open(path)?
                    .set_len(good_bytes as u64)?;
            }
        }
    }
    Ok(records)
}
