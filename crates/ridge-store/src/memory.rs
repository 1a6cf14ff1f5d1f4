use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use ridge_types::{
    NewSearcher, NewTrial, Searcher, SearcherFilter, SearcherId, StoreResult, Trial, TrialId,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::TrialStore;

/// Write/read counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub searchers_created: u64,
    pub searcher_updates: u64,
    pub trials_written: u64,
    pub history_reads: u64,
}

/// Concurrent in-process history.
///
/// Searchers live in a sharded map; trials are an append-only log guarded by
/// a reader/writer lock, so ids always follow insertion order.
#[derive(Debug)]
pub struct MemoryStore {
    searchers: DashMap<SearcherId, Searcher>,
    trials: RwLock<Vec<Trial>>,
    next_searcher_id: AtomicU64,
    stats: RwLock<StoreStats>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            searchers: DashMap::new(),
            trials: RwLock::new(Vec::new()),
            next_searcher_id: AtomicU64::new(1),
            stats: RwLock::new(StoreStats::default()),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.read().clone()
    }

    pub fn trial_count(&self) -> usize {
        self.trials.read().len()
    }

    pub fn searcher_count(&self) -> usize {
        self.searchers.len()
    }

    /// Allocate the next searcher id without registering anything.
    pub(crate) fn allocate_searcher_id(&self) -> SearcherId {
        self.next_searcher_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert a searcher snapshot as-is, keeping id allocation ahead of it.
    pub(crate) fn restore_searcher(&self, searcher: Searcher) {
        self.next_searcher_id
            .fetch_max(searcher.id + 1, Ordering::SeqCst);
        self.searchers.insert(searcher.id, searcher);
    }

    /// Insert an already numbered trial. Ids must arrive in increasing order.
    pub(crate) fn restore_trial(&self, trial: Trial) {
        self.trials.write().push(trial);
    }

    /// Append under the log lock; `persist` runs before the trial becomes
    /// visible and aborts the append if it fails.
    pub(crate) fn append_with<F>(&self, trial: NewTrial, persist: F) -> StoreResult<Trial>
    where
        F: FnOnce(&Trial) -> StoreResult<()>,
    {
        let mut log = self.trials.write();
        let id: TrialId = log.last().map_or(1, |t| t.id + 1);
        let trial = trial.into_trial(id);
        persist(&trial)?;
        log.push(trial.clone());
        drop(log);

        self.stats.write().trials_written += 1;
        Ok(trial)
    }

    pub(crate) fn upsert(&self, searcher: &Searcher) {
        self.searchers.insert(searcher.id, searcher.clone());
        self.stats.write().searcher_updates += 1;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrialStore for MemoryStore {
    fn create_searcher(&self, searcher: NewSearcher) -> StoreResult<Searcher> {
        let searcher = searcher.into_searcher(self.allocate_searcher_id());
        self.searchers.insert(searcher.id, searcher.clone());
        self.stats.write().searchers_created += 1;
        Ok(searcher)
    }

    fn update_searcher(&self, searcher: &Searcher) -> StoreResult<()> {
        self.upsert(searcher);
        Ok(())
    }

    fn searcher(&self, id: SearcherId) -> StoreResult<Option<Searcher>> {
        Ok(self.searchers.get(&id).map(|entry| entry.value().clone()))
    }

    fn append_trial(&self, trial: NewTrial) -> StoreResult<Trial> {
        self.append_with(trial, |_| Ok(()))
    }

    fn trials_for_simulation(&self, simulation_id: &str) -> StoreResult<Vec<Trial>> {
        let members: HashSet<SearcherId> = self
            .searchers
            .iter()
            .filter(|entry| entry.value().simulation_id == simulation_id)
            .map(|entry| *entry.key())
            .collect();

        let trials = self
            .trials
            .read()
            .iter()
            .filter(|t| members.contains(&t.searcher_id))
            .cloned()
            .collect();

        self.stats.write().history_reads += 1;
        Ok(trials)
    }

    fn recent_trials(&self, searcher_id: SearcherId, limit: usize) -> StoreResult<Vec<Trial>> {
        let trials = self
            .trials
            .read()
            .iter()
            .rev()
            .filter(|t| t.searcher_id == searcher_id)
            .take(limit)
            .cloned()
            .collect();

        self.stats.write().history_reads += 1;
        Ok(trials)
    }

    fn active_searchers(
        &self,
        since: DateTime<Utc>,
        filter: &SearcherFilter,
    ) -> StoreResult<Vec<Searcher>> {
        let mut active: Vec<Searcher> = self
            .searchers
            .iter()
            .filter(|entry| entry.value().last_active >= since && filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by_key(|s| s.id);
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ridge_types::{Outcome, ParamDict};
    use std::sync::Arc;
    use std::thread;

    fn new_searcher(sim: &str, role: &str) -> NewSearcher {
        NewSearcher {
            role: role.to_string(),
            simulation_id: sim.to_string(),
            version_tag: "test".to_string(),
        }
    }

    fn new_trial(searcher_id: SearcherId, a: f64) -> NewTrial {
        let mut params = ParamDict::new();
        params.insert("A".to_string(), a);
        NewTrial {
            searcher_id,
            seed: 1,
            params,
            outcome: Outcome::silent(0.0),
        }
    }

    #[test]
    fn assigns_increasing_ids() {
        let store = MemoryStore::new();
        let s1 = store.create_searcher(new_searcher("sim", "r")).unwrap();
        let s2 = store.create_searcher(new_searcher("sim", "r")).unwrap();
        assert!(s2.id > s1.id);

        let t1 = store.append_trial(new_trial(s1.id, 1.0)).unwrap();
        let t2 = store.append_trial(new_trial(s2.id, 2.0)).unwrap();
        assert_eq!(t2.id, t1.id + 1);
        assert_eq!(store.trial_count(), 2);
    }

    #[test]
    fn recent_trials_newest_first_and_limited() {
        let store = MemoryStore::new();
        let s = store.create_searcher(new_searcher("sim", "r")).unwrap();
        let other = store.create_searcher(new_searcher("sim", "r")).unwrap();
        for i in 0..5 {
            store.append_trial(new_trial(s.id, i as f64)).unwrap();
            store.append_trial(new_trial(other.id, -1.0)).unwrap();
        }

        let recent = store.recent_trials(s.id, 3).unwrap();
        let values: Vec<f64> = recent.iter().map(|t| t.params["A"]).collect();
        assert_eq!(values, vec![4.0, 3.0, 2.0]);

        assert!(store.recent_trials(s.id, 0).unwrap().is_empty());
    }

    #[test]
    fn simulation_history_spans_searchers() {
        let store = MemoryStore::new();
        let a = store.create_searcher(new_searcher("sim_a", "r")).unwrap();
        let b = store.create_searcher(new_searcher("sim_a", "q")).unwrap();
        let c = store.create_searcher(new_searcher("sim_b", "r")).unwrap();
        store.append_trial(new_trial(a.id, 1.0)).unwrap();
        store.append_trial(new_trial(b.id, 2.0)).unwrap();
        store.append_trial(new_trial(c.id, 3.0)).unwrap();

        assert_eq!(store.trials_for_simulation("sim_a").unwrap().len(), 2);
        assert_eq!(store.trials_for_simulation("sim_b").unwrap().len(), 1);
        assert!(store.trials_for_simulation("sim_c").unwrap().is_empty());
    }

    #[test]
    fn active_searchers_respects_window_and_filter() {
        let store = MemoryStore::new();
        let mut stale = store.create_searcher(new_searcher("sim", "r")).unwrap();
        let fresh = store.create_searcher(new_searcher("sim", "q")).unwrap();
        stale.last_active = Utc::now() - Duration::seconds(120);
        store.update_searcher(&stale).unwrap();

        let since = Utc::now() - Duration::seconds(30);
        let all = store.active_searchers(since, &SearcherFilter::default()).unwrap();
        assert_eq!(all.iter().map(|s| s.id).collect::<Vec<_>>(), vec![fresh.id]);

        let filter = SearcherFilter {
            simulation_id: None,
            role: Some("r".into()),
        };
        assert!(store.active_searchers(since, &filter).unwrap().is_empty());
    }

    #[test]
    fn concurrent_appends_keep_every_trial() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let s = store.create_searcher(new_searcher("sim", "r")).unwrap();
                    for i in 0..25 {
                        store.append_trial(new_trial(s.id, i as f64)).unwrap();
                        store.trials_for_simulation("sim").unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.trial_count(), 100);
        let ids: Vec<TrialId> = store
            .trials_for_simulation("sim")
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.stats().trials_written, 100);
    }
}
