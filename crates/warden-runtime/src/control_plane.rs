//! The control plane: owns every run-governance component and wires them.
//!
//! State that would otherwise be process-global (runs, limiter counters,
//! grants) lives in one [`ControlPlane`] that callers hold behind an `Arc`
//! and inject wherever it is needed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};
use warden_auth::{AuthorizationGrant, ConsumeOutcome, ConsumeRequest, GrantStore, IssueRequest};
use warden_core::{Clock, RunEvent, RunId, SessionKey, SystemClock};
use warden_settings::WardenSettings;

use crate::errors::RuntimeError;
use crate::limiter::{LimitError, LimiterConfig, LimiterHealth, ProcessLimiter};
use crate::pipeline::{
    ActivityHook, BackgroundTracker, DispatchPath, EventDispatchPipeline, EventHandler,
    SafeguardConfig,
};
use crate::reaper::{CleanupTargets, ReaperPolicy, SessionReaper};
use crate::registry::{AbortHandle, RunOutcome, RunRecord, RunRegistry};
use crate::terminator::{CascadingTerminator, GatewayClient, KillReport};

/// Abort reason recorded on zombies removed by a sweep.
pub const ZOMBIE_REASON: &str = "reaped as zombie";

/// Suffix of the key created by [`ControlPlane::start_root_run`].
pub const ROOT_RUN_SUFFIX: &str = "main";

/// Everything a hosted run needs while it executes.
#[derive(Debug)]
pub struct RunHandle {
    /// Key of the run.
    pub session_key: SessionKey,
    /// ID of this execution.
    pub run_id: RunId,
    /// Observed by the run at safe points.
    pub abort: AbortHandle,
    /// Where the run reports its events.
    pub pipeline: EventDispatchPipeline,
}

impl RunHandle {
    /// Report one event.
    pub fn dispatch(&self, event: RunEvent) -> DispatchPath {
        self.pipeline.dispatch(event)
    }

    /// Whether the run has been asked to stop.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }
}

/// Owner of the registry, limiter, grant store, terminator and reaper.
pub struct ControlPlane {
    settings: WardenSettings,
    clock: Arc<dyn Clock>,
    registry: Arc<RunRegistry>,
    limiter: ProcessLimiter,
    grants: GrantStore,
    terminator: CascadingTerminator,
    reaper: SessionReaper,
    policy: ReaperPolicy,
    safeguards: SafeguardConfig,
    background: Arc<BackgroundTracker>,
}

impl ControlPlane {
    /// Control plane on the system clock.
    #[must_use]
    pub fn new(settings: WardenSettings) -> Arc<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Control plane reading time from `clock`.
    #[must_use]
    pub fn with_clock(settings: WardenSettings, clock: Arc<dyn Clock>) -> Arc<Self> {
        let registry = Arc::new(RunRegistry::new(Arc::clone(&clock)));
        let limiter_config = LimiterConfig::from(&settings.limiter);
        Arc::new(Self {
            limiter: ProcessLimiter::new(limiter_config, Arc::clone(&clock)),
            grants: GrantStore::new(settings.grants.default_ttl_seconds, Arc::clone(&clock)),
            terminator: CascadingTerminator::new(Arc::clone(&registry)),
            reaper: SessionReaper::from_settings(&settings.reaper),
            policy: ReaperPolicy::from(&settings.reaper),
            safeguards: SafeguardConfig::from(&settings.safeguards),
            background: Arc::new(BackgroundTracker::new(settings.pipeline.background_workers)),
            registry,
            clock,
            settings,
        })
    }

    /// Effective settings.
    pub fn settings(&self) -> &WardenSettings {
        &self.settings
    }

    /// The run registry.
    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    /// The process limiter.
    pub fn limiter(&self) -> &ProcessLimiter {
        &self.limiter
    }

    /// Attach the out-of-process abort fallback. Only the first call has an
    /// effect.
    pub fn set_gateway(&self, gateway: Arc<dyn GatewayClient>) -> bool {
        self.terminator.set_gateway(gateway)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Run lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Start the root run `agent:<agent_id>:main`.
    pub fn start_root_run(
        &self,
        agent_id: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<RunHandle, RuntimeError> {
        let key = SessionKey::root(agent_id, ROOT_RUN_SUFFIX)?;
        self.start_run(key, handler)
    }

    /// Register a hosted run under `session_key` and build its pipeline.
    pub fn start_run(
        &self,
        session_key: SessionKey,
        handler: Arc<dyn EventHandler>,
    ) -> Result<RunHandle, RuntimeError> {
        let (record, abort) = self.registry.register_hosted(session_key)?;
        let registry = Arc::clone(&self.registry);
        let hook: ActivityHook = Arc::new(move |key: &SessionKey| {
            let _ = registry.touch(key);
        });
        let pipeline =
            EventDispatchPipeline::new(record.session_key.clone(), handler, abort.clone())
                .with_background(Arc::clone(&self.background))
                .with_safeguards(self.safeguards.clone())
                .with_activity_hook(hook);
        Ok(RunHandle {
            session_key: record.session_key,
            run_id: record.run_id,
            abort,
            pipeline,
        })
    }

    /// Check whether `parent` may spawn another child right now.
    pub fn check_spawn(&self, parent: &SessionKey) -> Result<(), RuntimeError> {
        let max_depth = self.settings.subagents.max_spawn_depth;
        if parent.depth() >= max_depth {
            return Err(RuntimeError::SpawnForbidden(format!(
                "not allowed at this depth (current depth: {}, max: {max_depth})",
                parent.depth()
            )));
        }
        let max_children = self.settings.subagents.max_children_per_session;
        let children = self.registry.active_children(parent);
        if children >= max_children {
            return Err(RuntimeError::SpawnForbidden(format!(
                "reached max active children for this session ({children}/{max_children})"
            )));
        }
        Ok(())
    }

    /// Admit and register a child of `parent`.
    #[instrument(skip_all, fields(parent = %parent))]
    pub fn spawn_subagent(
        &self,
        parent: &SessionKey,
        handler: Arc<dyn EventHandler>,
    ) -> Result<RunHandle, RuntimeError> {
        self.check_spawn(parent)?;
        let child = parent.spawn_child().ok_or_else(|| {
            RuntimeError::SpawnForbidden(
                "child session key would exceed the maximum key length".into(),
            )
        })?;
        let handle = self.start_run(child, handler)?;
        info!(child = %handle.session_key, run_id = %handle.run_id, "subagent spawned");
        Ok(handle)
    }

    /// Spawn a child through the process limiter and run `task` with its
    /// handle. The run is marked ended exactly once when the task returns.
    ///
    /// Admission is checked before queueing. `prior_failures` is the caller's
    /// own retry count and drives the limiter's backoff.
    pub async fn run_subagent<T, F, Fut>(
        &self,
        parent: &SessionKey,
        prior_failures: u32,
        handler: Arc<dyn EventHandler>,
        task: F,
    ) -> Result<T, RuntimeError>
    where
        F: FnOnce(RunHandle) -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        self.check_spawn(parent)?;
        let result = self
            .limiter
            .execute_with_limits(prior_failures, || async move {
                let handle = self.spawn_subagent(parent, handler)?;
                let session_key = handle.session_key.clone();
                let abort = handle.abort.clone();
                let result = task(handle).await;
                let (outcome, note) = if abort.is_aborted() {
                    (RunOutcome::Aborted, abort.reason())
                } else {
                    match &result {
                        Ok(_) => (RunOutcome::Completed, None),
                        Err(e) => (RunOutcome::Failed, Some(e.to_string())),
                    }
                };
                let _ = self.registry.mark_ended(&session_key, outcome, note);
                result
            })
            .await;
        result.map_err(|e| match e {
            LimitError::CascadeThrottled { failures, threshold } => {
                RuntimeError::CascadeThrottled { failures, threshold }
            }
            LimitError::Closed => RuntimeError::Internal("process limiter is closed".into()),
            LimitError::Task(e) => e,
        })
    }

    /// Mark a run ended. Returns `false` if it already was or is unknown.
    pub fn end_run(
        &self,
        session_key: &SessionKey,
        outcome: RunOutcome,
        note: Option<String>,
    ) -> bool {
        self.registry.mark_ended(session_key, outcome, note)
    }

    /// Snapshot of one run.
    pub fn get_run(&self, session_key: &SessionKey) -> Option<RunRecord> {
        self.registry.get(session_key)
    }

    /// Snapshot of every run, sorted by key.
    pub fn list_runs(&self) -> Vec<RunRecord> {
        self.registry.snapshot()
    }

    /// In-process abort by run ID. `false` for unknown, ended, or remote runs.
    pub fn abort_run_id(&self, run_id: &RunId, reason: &str) -> bool {
        self.registry
            .find_by_run_id(run_id)
            .is_some_and(|key| self.registry.abort_local(&key, reason))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Termination and reaping
    // ─────────────────────────────────────────────────────────────────────

    /// Kill `target`, and its subtree when `cascade` is set.
    pub async fn kill(
        &self,
        target: &SessionKey,
        requester: Option<&SessionKey>,
        cascade: bool,
    ) -> KillReport {
        self.terminator.kill(target, requester, cascade).await
    }

    /// One reaper pass: abort hosted zombies, drop zombies and expired ended
    /// runs, log the counts.
    #[instrument(skip_all)]
    pub fn sweep(&self) -> CleanupTargets {
        let now = self.clock.now_ms();
        let targets = self
            .policy
            .identify_cleanup_targets(&self.registry.snapshot(), now);

        let removed = self.reap(&targets, now);
        if removed > 0 {
            metrics::counter!("warden_reaper_removed_total").increment(removed as u64);
        }

        info!("{}", targets.metrics);
        targets
    }

    /// Remove the targets that still qualify at `now_ms`, aborting hosted
    /// zombies on the way out. Records replaced or touched since the snapshot
    /// are left alone.
    fn reap(&self, targets: &CleanupTargets, now_ms: u64) -> usize {
        let mut removed = 0;
        for key in &targets.zombies {
            let Some((_, abort)) = self
                .registry
                .remove_if(key, |run| self.policy.is_zombie(run, now_ms))
            else {
                debug!(session_key = %key, "zombie revived before removal");
                continue;
            };
            removed += 1;
            if abort.is_some_and(|handle| handle.abort(ZOMBIE_REASON)) {
                info!(session_key = %key, "zombie run aborted");
            }
        }
        for key in &targets.expired_completed {
            let still_expired = self
                .registry
                .remove_if(key, |run| self.policy.is_completed_expired(run, now_ms));
            if still_expired.is_some() {
                removed += 1;
            } else {
                debug!(session_key = %key, "expired key reused before removal");
            }
        }
        removed
    }

    /// Start periodic sweeps. Returns `false` if already running.
    pub fn start_reaper(self: &Arc<Self>) -> bool {
        let weak = Arc::downgrade(self);
        self.reaper.start(move || {
            if let Some(control_plane) = weak.upgrade() {
                let _ = control_plane.sweep();
            }
        })
    }

    /// Stop periodic sweeps. Returns `true` if they were running.
    pub fn stop_reaper(&self) -> bool {
        self.reaper.stop()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Limiter and grants
    // ─────────────────────────────────────────────────────────────────────

    /// Limiter counters.
    pub fn limiter_health(&self) -> LimiterHealth {
        self.limiter.health()
    }

    /// Close the limiter's breaker and clear its totals.
    pub fn reset_limiter(&self) {
        self.limiter.reset();
    }

    /// Mint a grant.
    pub fn issue_grant(&self, request: IssueRequest) -> AuthorizationGrant {
        self.grants.issue(request)
    }

    /// Validate and consume a grant.
    #[instrument(skip_all, fields(required_action = ?request.required_action))]
    pub fn consume_grant(&self, request: &ConsumeRequest) -> ConsumeOutcome {
        self.grants.consume(request)
    }

    /// Look up a grant for audit.
    pub fn get_grant(&self, token: &str) -> Option<AuthorizationGrant> {
        self.grants.get(token)
    }

    /// Stop the reaper, refuse new limited work, and wait (bounded) for
    /// background handlers.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let _ = self.stop_reaper();
        self.limiter.close();
        let drained = self.background.drain_with_timeout(timeout).await;
        debug!(drained, "control plane shut down");
        drained
    }
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("registry", &self.registry)
            .field("limiter", &self.limiter)
            .field("reaper", &self.reaper)
            .finish_non_exhaustive()
    }
}
