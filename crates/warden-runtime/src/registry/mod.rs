//! Run registry and lineage queries.
//!
//! The registry maps session keys to run records. Runs hosted in this process
//! also carry an [`AbortHandle`] so they can be stopped without a round trip
//! through the gateway.
//!
//! Lineage is never stored: ancestor and subtree queries are answered from
//! session key structure alone.

mod abort;
mod run;

pub use abort::AbortHandle;
pub use run::{RunOutcome, RunRecord};

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};
use warden_core::{Clock, RunId, SessionKey};

use crate::errors::RuntimeError;

struct RunEntry {
    record: RunRecord,
    abort: Option<AbortHandle>,
}

/// Process-wide map of active and recently ended runs.
pub struct RunRegistry {
    runs: DashMap<SessionKey, RunEntry>,
    clock: Arc<dyn Clock>,
}

impl RunRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            runs: DashMap::new(),
            clock,
        }
    }

    /// Register a run hosted elsewhere (no in-process abort).
    ///
    /// Replaces an ended record under the same key; refuses to replace a live
    /// one.
    pub fn register(&self, record: RunRecord) -> Result<(), RuntimeError> {
        self.insert(RunEntry {
            record,
            abort: None,
        })
    }

    /// Register a run hosted in this process and return its abort handle.
    pub fn register_hosted(
        &self,
        session_key: SessionKey,
    ) -> Result<(RunRecord, AbortHandle), RuntimeError> {
        let record = RunRecord::started(session_key, self.clock.now_ms());
        let abort = AbortHandle::new();
        self.insert(RunEntry {
            record: record.clone(),
            abort: Some(abort.clone()),
        })?;
        Ok((record, abort))
    }

    fn insert(&self, entry: RunEntry) -> Result<(), RuntimeError> {
        let key = entry.record.session_key.clone();
        let run_id = entry.record.run_id.clone();
        match self.runs.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().record.is_active() {
                    return Err(RuntimeError::DuplicateRun(key.to_string()));
                }
                let _ = occupied.insert(entry);
            }
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(entry);
            }
        }
        info!(session_key = %key, run_id = %run_id, "run registered");
        self.publish_gauge();
        Ok(())
    }

    /// Snapshot of one record.
    pub fn get(&self, session_key: &SessionKey) -> Option<RunRecord> {
        self.runs.get(session_key).map(|e| e.record.clone())
    }

    /// Snapshot of one record if the run has not ended.
    pub fn get_active(&self, session_key: &SessionKey) -> Option<RunRecord> {
        self.get(session_key).filter(RunRecord::is_active)
    }

    /// Key of the run with the given run ID.
    pub fn find_by_run_id(&self, run_id: &RunId) -> Option<SessionKey> {
        self.runs
            .iter()
            .find(|e| e.record.run_id == *run_id)
            .map(|e| e.key().clone())
    }

    /// Whether `a` is a strict ancestor of `b`.
    pub fn is_ancestor(a: &SessionKey, b: &SessionKey) -> bool {
        a.is_ancestor_of(b)
    }

    /// Registered descendants of `root`, deepest first, `root` excluded.
    ///
    /// Every descendant appears before any of its own ancestors. Ties at the
    /// same depth are ordered by key for determinism. Ended runs are included
    /// so callers can report them.
    pub fn subtree_leaf_first(&self, root: &SessionKey) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self
            .runs
            .iter()
            .filter(|e| root.is_ancestor_of(e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
        keys
    }

    /// Number of live direct children of `parent`.
    pub fn active_children(&self, parent: &SessionKey) -> usize {
        self.runs
            .iter()
            .filter(|e| {
                e.record.is_active() && e.record.parent_session_key.as_ref() == Some(parent)
            })
            .count()
    }

    /// Refresh `lastActivityAt` of a live run.
    pub fn touch(&self, session_key: &SessionKey) -> bool {
        let now = self.clock.now_ms();
        match self.runs.get_mut(session_key) {
            Some(mut e) if e.record.is_active() => {
                e.record.last_activity_at_ms = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Mark a run ended. Only the first call has an effect.
    pub fn mark_ended(
        &self,
        session_key: &SessionKey,
        outcome: RunOutcome,
        note: Option<String>,
    ) -> bool {
        let now = self.clock.now_ms();
        let changed = match self.runs.get_mut(session_key) {
            Some(mut e) if e.record.is_active() => {
                e.record.ended_at_ms = Some(now);
                e.record.outcome = Some(outcome);
                e.record.end_note = note;
                true
            }
            _ => false,
        };
        if changed {
            info!(session_key = %session_key, %outcome, "run ended");
            self.publish_gauge();
        }
        changed
    }

    /// Drop a record only if `still_due` holds for the entry currently stored
    /// under the key. Returns the removed record and, for hosted runs, its
    /// abort handle.
    pub fn remove_if<F>(
        &self,
        session_key: &SessionKey,
        still_due: F,
    ) -> Option<(RunRecord, Option<AbortHandle>)>
    where
        F: FnOnce(&RunRecord) -> bool,
    {
        let (_, entry) = self.runs.remove_if(session_key, |_, e| still_due(&e.record))?;
        debug!(session_key = %session_key, "run removed from registry");
        self.publish_gauge();
        Some((entry.record, entry.abort))
    }

    /// In-process abort. Returns `true` when the run is live and hosted here.
    ///
    /// Idempotent: aborting an already-aborted hosted run still reports
    /// `true`, and a non-hosted or ended run reports `false`.
    pub fn abort_local(&self, session_key: &SessionKey, reason: &str) -> bool {
        let handle = self
            .runs
            .get(session_key)
            .filter(|e| e.record.is_active())
            .and_then(|e| e.abort.clone());
        match handle {
            Some(handle) => {
                if handle.abort(reason) {
                    info!(session_key = %session_key, reason, "run aborted in-process");
                }
                true
            }
            None => false,
        }
    }

    /// The abort handle of a hosted run.
    pub fn abort_handle(&self, session_key: &SessionKey) -> Option<AbortHandle> {
        self.runs.get(session_key).and_then(|e| e.abort.clone())
    }

    /// All records, sorted by key.
    pub fn snapshot(&self) -> Vec<RunRecord> {
        let mut records: Vec<RunRecord> = self.runs.iter().map(|e| e.record.clone()).collect();
        records.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        records
    }

    /// Number of live runs.
    pub fn active_count(&self) -> usize {
        self.runs.iter().filter(|e| e.record.is_active()).count()
    }

    /// Number of records, ended ones included.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    #[allow(clippy::cast_precision_loss)]
    fn publish_gauge(&self) {
        metrics::gauge!("warden_runs_active").set(self.active_count() as f64);
    }
}

impl std::fmt::Debug for RunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunRegistry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use warden_core::ManualClock;

    use super::*;

    fn key(s: &str) -> SessionKey {
        SessionKey::parse(s).unwrap()
    }

    fn registry() -> (RunRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (RunRegistry::new(clock.clone()), clock)
    }

    #[test]
    fn register_and_get() {
        let (reg, _) = registry();
        let record = RunRecord::started(key("agent:main:main"), 1_000);
        reg.register(record.clone()).unwrap();
        assert_eq!(reg.get(&key("agent:main:main")), Some(record));
        assert!(reg.get(&key("agent:main:other")).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn duplicate_live_run_rejected() {
        let (reg, _) = registry();
        let _ = reg.register_hosted(key("agent:main:main")).unwrap();
        assert_matches!(
            reg.register_hosted(key("agent:main:main")),
            Err(RuntimeError::DuplicateRun(_))
        );
    }

    #[test]
    fn ended_run_can_be_replaced() {
        let (reg, _) = registry();
        let (first, _) = reg.register_hosted(key("agent:main:main")).unwrap();
        assert!(reg.mark_ended(&first.session_key, RunOutcome::Completed, None));
        let (second, _) = reg.register_hosted(key("agent:main:main")).unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert!(reg.get_active(&key("agent:main:main")).is_some());
    }

    #[test]
    fn mark_ended_once() {
        let (reg, clock) = registry();
        let (record, _) = reg.register_hosted(key("agent:main:main")).unwrap();
        clock.advance(Duration::from_secs(5));
        assert!(reg.mark_ended(&record.session_key, RunOutcome::Failed, Some("boom".into())));
        clock.advance(Duration::from_secs(5));
        assert!(!reg.mark_ended(&record.session_key, RunOutcome::Completed, None));

        let ended = reg.get(&record.session_key).unwrap();
        assert_eq!(ended.ended_at_ms, Some(6_000));
        assert_eq!(ended.outcome, Some(RunOutcome::Failed));
        assert_eq!(ended.end_note.as_deref(), Some("boom"));
        assert_eq!(reg.active_count(), 0);
    }

    #[test]
    fn touch_updates_live_runs_only() {
        let (reg, clock) = registry();
        let (record, _) = reg.register_hosted(key("agent:main:main")).unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(reg.touch(&record.session_key));
        assert_eq!(reg.get(&record.session_key).unwrap().last_activity_at_ms, Some(2_000));

        let _ = reg.mark_ended(&record.session_key, RunOutcome::Completed, None);
        assert!(!reg.touch(&record.session_key));
        assert!(!reg.touch(&key("agent:x:y")));
    }

    #[test]
    fn ancestor_helper() {
        assert!(RunRegistry::is_ancestor(
            &key("agent:main:main"),
            &key("agent:main:main:subagent:a")
        ));
        assert!(!RunRegistry::is_ancestor(
            &key("agent:main:main"),
            &key("agent:main:mainline:subagent:a")
        ));
    }

    #[test]
    fn subtree_is_leaf_first_and_excludes_root() {
        let (reg, _) = registry();
        for k in [
            "agent:main:main",
            "agent:main:main:subagent:a",
            "agent:main:main:subagent:a:subagent:b",
            "agent:main:main:subagent:a:subagent:b:subagent:c",
            "agent:main:main:subagent:d",
            "agent:main:mainline:subagent:x",
        ] {
            let _ = reg.register_hosted(key(k)).unwrap();
        }
        let subtree = reg.subtree_leaf_first(&key("agent:main:main"));
        let strs: Vec<&str> = subtree.iter().map(SessionKey::as_str).collect();
        assert_eq!(
            strs,
            vec![
                "agent:main:main:subagent:a:subagent:b:subagent:c",
                "agent:main:main:subagent:a:subagent:b",
                "agent:main:main:subagent:a",
                "agent:main:main:subagent:d",
            ]
        );
    }

    #[test]
    fn subtree_includes_ended_runs() {
        let (reg, _) = registry();
        let _ = reg.register_hosted(key("agent:main:main")).unwrap();
        let (child, _) = reg.register_hosted(key("agent:main:main:subagent:a")).unwrap();
        let _ = reg.mark_ended(&child.session_key, RunOutcome::Completed, None);
        assert_eq!(reg.subtree_leaf_first(&key("agent:main:main")).len(), 1);
    }

    #[test]
    fn active_children_counts_direct_live_children() {
        let (reg, _) = registry();
        let root = key("agent:main:main");
        let _ = reg.register_hosted(root.clone()).unwrap();
        let _ = reg.register_hosted(root.child("a").unwrap()).unwrap();
        let (b, _) = reg.register_hosted(root.child("b").unwrap()).unwrap();
        let _ = reg
            .register_hosted(root.child("a").unwrap().child("c").unwrap())
            .unwrap();
        let _ = reg.mark_ended(&b.session_key, RunOutcome::Completed, None);
        assert_eq!(reg.active_children(&root), 1);
    }

    #[test]
    fn abort_local_only_for_live_hosted_runs() {
        let (reg, _) = registry();
        let (hosted, handle) = reg.register_hosted(key("agent:main:main")).unwrap();
        reg.register(RunRecord::started(key("agent:remote:main"), 1_000))
            .unwrap();

        assert!(reg.abort_local(&hosted.session_key, "stop"));
        assert!(handle.is_aborted());
        assert_eq!(handle.reason().as_deref(), Some("stop"));
        // Idempotent.
        assert!(reg.abort_local(&hosted.session_key, "again"));
        assert_eq!(handle.reason().as_deref(), Some("stop"));

        assert!(!reg.abort_local(&key("agent:remote:main"), "stop"));
        assert!(!reg.abort_local(&key("agent:missing:main"), "stop"));

        let _ = reg.mark_ended(&hosted.session_key, RunOutcome::Aborted, None);
        assert!(!reg.abort_local(&hosted.session_key, "late"));
    }

    #[test]
    fn find_by_run_id() {
        let (reg, _) = registry();
        let (record, _) = reg.register_hosted(key("agent:main:main")).unwrap();
        assert_eq!(reg.find_by_run_id(&record.run_id), Some(record.session_key));
        assert!(reg.find_by_run_id(&RunId::new()).is_none());
    }

    #[test]
    fn remove_and_snapshot() {
        let (reg, _) = registry();
        let _ = reg.register_hosted(key("agent:b:main")).unwrap();
        let _ = reg.register_hosted(key("agent:a:main")).unwrap();
        let snapshot = reg.snapshot();
        assert_eq!(snapshot[0].session_key.as_str(), "agent:a:main");
        assert!(reg.remove_if(&key("agent:a:main"), |_| false).is_none());
        let (removed, abort) = reg.remove_if(&key("agent:a:main"), RunRecord::is_active).unwrap();
        assert_eq!(removed.session_key.as_str(), "agent:a:main");
        assert!(abort.is_some());
        assert!(reg.remove_if(&key("agent:a:main"), |_| true).is_none());
        assert_eq!(reg.len(), 1);
        assert!(!reg.is_empty());
    }

    #[test]
    fn remove_if_checks_the_current_record() {
        let (reg, _) = registry();
        let (first, _) = reg.register_hosted(key("agent:x:main")).unwrap();
        assert!(reg.mark_ended(&first.session_key, RunOutcome::Completed, None));
        let (second, _) = reg.register_hosted(key("agent:x:main")).unwrap();

        let ended = |run: &RunRecord| run.ended_at_ms.is_some();
        assert!(reg.remove_if(&first.session_key, ended).is_none());
        assert_eq!(reg.get(&first.session_key).unwrap().run_id, second.run_id);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        // Random trees: each new node picks an existing node as its parent.
        fn tree() -> impl Strategy<Value = Vec<usize>> {
            prop::collection::vec(any::<prop::sample::Index>(), 1..30).prop_map(|picks| {
                picks
                    .iter()
                    .enumerate()
                    .map(|(i, pick)| pick.index(i + 1))
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn descendants_precede_their_ancestors(parents in tree()) {
                let (reg, _) = registry();
                let mut keys = vec![key("agent:main:main")];
                for (i, parent) in parents.iter().enumerate() {
                    let child = keys[*parent].child(&format!("n{i}")).unwrap();
                    keys.push(child);
                }
                for k in &keys {
                    let _ = reg.register_hosted(k.clone()).unwrap();
                }

                let order = reg.subtree_leaf_first(&keys[0]);
                prop_assert_eq!(order.len(), keys.len() - 1);
                prop_assert!(!order.contains(&keys[0]));
                for (i, a) in order.iter().enumerate() {
                    for b in &order[i + 1..] {
                        prop_assert!(
                            !a.is_ancestor_of(b),
                            "{} listed before its descendant {}",
                            a,
                            b
                        );
                    }
                }
            }
        }
    }
}
