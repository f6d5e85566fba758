#![allow(missing_docs, unused_results)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use warden_core::{ManualClock, SessionKey};
use warden_runtime::{
    AbortVia, ControlPlane, GatewayClient, GatewayError, KillOverall, KillStatus, NoopHandler,
    RunOutcome, RunRecord,
};
use warden_settings::WardenSettings;

/// Gateway that records the run IDs it was asked to abort, in call order.
#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl GatewayClient for RecordingGateway {
    async fn call(&self, method: &str, params: Value) -> Result<Value, GatewayError> {
        assert_eq!(method, "agent.abort");
        let run_id = params["runId"].as_str().unwrap_or_default().to_string();
        self.calls.lock().push(run_id);
        Ok(json!({ "aborted": true }))
    }
}

fn key(s: &str) -> SessionKey {
    SessionKey::parse(s).unwrap()
}

fn plane() -> Arc<ControlPlane> {
    ControlPlane::with_clock(WardenSettings::default(), Arc::new(ManualClock::new(0)))
}

fn register_remote(cp: &ControlPlane, k: &SessionKey) -> String {
    let record = RunRecord::started(k.clone(), 0);
    let run_id = record.run_id.to_string();
    cp.registry().register(record).unwrap();
    run_id
}

#[tokio::test]
async fn three_level_chain_is_killed_leaf_first() {
    let cp = plane();
    let gateway = Arc::new(RecordingGateway::default());
    cp.set_gateway(gateway.clone());

    let root = key("agent:main:main");
    let mid = root.child("mid").unwrap();
    let leaf = mid.child("leaf").unwrap();
    let root_id = register_remote(&cp, &root);
    let mid_id = register_remote(&cp, &mid);
    let leaf_id = register_remote(&cp, &leaf);

    let report = cp.kill(&root, None, true).await;
    assert_eq!(report.status, KillOverall::Ok);
    assert_eq!(report.aborted, 3);
    assert_eq!(*gateway.calls.lock(), vec![leaf_id, mid_id, root_id]);

    let order: Vec<&SessionKey> = report.results.iter().map(|r| &r.session_key).collect();
    assert_eq!(order, vec![&leaf, &mid, &root]);
    assert!(report.results.iter().all(|r| r.via == AbortVia::Gateway));
}

#[tokio::test]
async fn mid_may_kill_leaf_but_not_its_sibling() {
    let cp = plane();
    let root = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
    let mid = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();
    let sibling = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();
    let leaf = cp.spawn_subagent(&mid.session_key, Arc::new(NoopHandler)).unwrap();

    let report = cp
        .kill(&leaf.session_key, Some(&mid.session_key), false)
        .await;
    assert_eq!(report.status, KillOverall::Ok);
    assert!(leaf.is_aborted());

    let report = cp
        .kill(&sibling.session_key, Some(&mid.session_key), true)
        .await;
    assert_eq!(report.status, KillOverall::Forbidden);
    assert!(report.results.is_empty());
    assert!(!sibling.is_aborted());
    assert!(!root.is_aborted());
}

#[tokio::test]
async fn two_live_children_and_one_ended() {
    let cp = plane();
    let root = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
    let a = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();
    let b = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();
    let c = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();
    assert!(cp.end_run(&c.session_key, RunOutcome::Completed, None));
    // The root itself has already finished; only its subtree is still live.
    assert!(cp.end_run(&root.session_key, RunOutcome::Completed, None));

    let report = cp.kill(&root.session_key, None, true).await;
    assert_eq!(report.status, KillOverall::Ok);
    assert!(report.cascade);
    assert_eq!(report.results.len(), 4);
    assert_eq!(report.aborted, 2);
    assert_eq!(report.not_found, 2);
    assert_eq!(report.failed, 0);

    let subtree = &report.results[..3];
    assert_eq!(subtree.iter().filter(|r| r.status == KillStatus::Aborted).count(), 2);
    assert_eq!(subtree.iter().filter(|r| r.status == KillStatus::NotFound).count(), 1);
    assert!(subtree.iter().all(|r| r.session_key != root.session_key));

    let target = &report.results[3];
    assert_eq!(target.session_key, root.session_key);
    assert_eq!(target.status, KillStatus::NotFound);
    assert!(a.is_aborted());
    assert!(b.is_aborted());
    assert!(!c.is_aborted());
}

#[tokio::test]
async fn cascade_false_touches_only_the_target() {
    let cp = plane();
    let root = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
    let child = cp.spawn_subagent(&root.session_key, Arc::new(NoopHandler)).unwrap();

    let report = cp.kill(&root.session_key, None, false).await;
    assert_eq!(report.results.len(), 1);
    assert!(root.is_aborted());
    assert!(!child.is_aborted());
}

#[tokio::test]
async fn embedded_and_gateway_paths_mix() {
    let cp = plane();
    let gateway = Arc::new(RecordingGateway::default());
    cp.set_gateway(gateway.clone());

    let root = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
    let remote = root.session_key.child("remote").unwrap();
    let remote_id = register_remote(&cp, &remote);

    let report = cp.kill(&root.session_key, None, true).await;
    assert_eq!(report.status, KillOverall::Ok);
    assert_eq!(report.results[0].via, AbortVia::Gateway);
    assert_eq!(report.results[1].via, AbortVia::Embedded);
    assert_eq!(*gateway.calls.lock(), vec![remote_id]);
}

#[tokio::test]
async fn prefix_lookalike_roots_are_untouched() {
    let cp = plane();
    let main = cp.start_root_run("main", Arc::new(NoopHandler)).unwrap();
    let lookalike = cp
        .start_run(key("agent:main:mainline"), Arc::new(NoopHandler))
        .unwrap();

    let report = cp.kill(&main.session_key, None, true).await;
    assert_eq!(report.results.len(), 1);
    assert!(!lookalike.is_aborted());
}
