#![allow(missing_docs, unused_results)]

use std::sync::Arc;

use serde_json::{Value, json};
use warden_core::ManualClock;
use warden_rpc::{LocalGateway, MethodRegistry, RpcContext, RpcRequest, register_all};
use warden_runtime::{ControlPlane, NoopHandler, RunRecord};
use warden_settings::WardenSettings;

/// One control plane plus the registry serving it.
struct Plane {
    ctx: Arc<RpcContext>,
    registry: Arc<MethodRegistry>,
}

impl Plane {
    fn new() -> Self {
        let cp = ControlPlane::with_clock(WardenSettings::default(), Arc::new(ManualClock::new(0)));
        let mut registry = MethodRegistry::new();
        register_all(&mut registry);
        Self {
            ctx: Arc::new(RpcContext::new(cp)),
            registry: Arc::new(registry),
        }
    }

    fn cp(&self) -> &Arc<ControlPlane> {
        &self.ctx.control_plane
    }

    fn gateway(&self) -> Arc<LocalGateway> {
        Arc::new(LocalGateway::new(self.registry.clone(), self.ctx.clone()))
    }

    async fn call(&self, method: &str, params: Value) -> Value {
        let resp = self
            .registry
            .dispatch(RpcRequest::new("t", method, Some(params)), &self.ctx)
            .await;
        serde_json::to_value(resp).unwrap()
    }
}

#[tokio::test]
async fn cascade_kill_crosses_the_gateway() {
    let local = Plane::new();
    let remote = Plane::new();
    assert!(local.cp().set_gateway(remote.gateway()));

    // Runs live on the remote plane; the local plane only tracks them.
    let root = remote.cp().start_root_run("main", Arc::new(NoopHandler)).unwrap();
    let child = remote
        .cp()
        .spawn_subagent(&root.session_key, Arc::new(NoopHandler))
        .unwrap();
    for handle in [&root, &child] {
        let mut record = RunRecord::started(handle.session_key.clone(), 0);
        record.run_id = handle.run_id.clone();
        local.cp().registry().register(record).unwrap();
    }

    let resp = local
        .call("sessions.kill", json!({ "sessionKey": root.session_key.as_str() }))
        .await;
    assert_eq!(resp["success"], true);
    let report = &resp["result"];
    assert_eq!(report["status"], "ok");
    assert_eq!(report["aborted"], 2);
    assert_eq!(report["results"][0]["sessionKey"], child.session_key.as_str());
    assert_eq!(report["results"][0]["via"], "gateway");
    assert_eq!(report["results"][1]["runId"], root.run_id.as_str());

    assert!(root.is_aborted());
    assert!(child.is_aborted());
}

#[tokio::test]
async fn remote_record_without_gateway_is_an_error_entry() {
    let local = Plane::new();
    let hosted = local.cp().start_root_run("main", Arc::new(NoopHandler)).unwrap();
    let orphan = hosted.session_key.child("elsewhere").unwrap();
    local
        .cp()
        .registry()
        .register(RunRecord::started(orphan.clone(), 0))
        .unwrap();

    let resp = local
        .call("sessions.kill", json!({ "sessionKey": hosted.session_key.as_str() }))
        .await;
    let report = &resp["result"];
    assert_eq!(report["status"], "partial");
    assert_eq!(report["failed"], 1);
    assert_eq!(report["results"][0]["status"], "error");
    assert_eq!(report["results"][0]["via"], "none");
    assert_eq!(report["results"][1]["status"], "aborted");
    assert!(hosted.is_aborted());
}

#[tokio::test]
async fn grant_flow_over_the_wire() {
    let plane = Plane::new();
    let run = plane.cp().start_root_run("main", Arc::new(NoopHandler)).unwrap();

    let issued = plane
        .call(
            "grants.issue",
            json!({
                "action": "sessions_kill",
                "issuerProvenanceKind": "operator",
                "targetSessionKey": run.session_key.as_str(),
            }),
        )
        .await;
    let token = issued["result"]["token"].as_str().unwrap().to_string();

    let mismatch = plane
        .call(
            "grants.consume",
            json!({ "token": token, "requiredProvenanceKind": "agent" }),
        )
        .await;
    assert_eq!(mismatch["success"], true);
    assert_eq!(mismatch["result"]["ok"], false);
    assert_eq!(mismatch["result"]["status"], "provenance_mismatch");

    let killed = plane
        .call(
            "sessions.kill",
            json!({ "sessionKey": run.session_key.as_str(), "grantToken": token }),
        )
        .await;
    assert_eq!(killed["success"], true);
    assert!(run.is_aborted());

    let replay = plane
        .call(
            "sessions.kill",
            json!({ "sessionKey": run.session_key.as_str(), "grantToken": token }),
        )
        .await;
    assert_eq!(replay["success"], false);
    assert_eq!(replay["error"]["code"], "GRANT_REJECTED");
    assert_eq!(replay["error"]["details"]["status"], "consumed");
}

#[tokio::test]
async fn admin_surface_round_trip() {
    let plane = Plane::new();

    let ping = plane.call("system.ping", json!({})).await;
    assert_eq!(ping["result"]["pong"], true);

    let health = plane.call("limiter.health", json!({})).await;
    assert_eq!(health["result"]["activeCount"], 0);
    assert_eq!(health["result"]["circuitOpen"], false);

    let reset = plane.call("limiter.reset", json!({})).await;
    assert_eq!(reset["result"]["reset"], true);

    let sweep = plane.call("reaper.sweep", json!({})).await;
    assert_eq!(sweep["result"]["metrics"]["total"], 0);

    let abort = plane.call("agent.abort", json!({ "runId": "missing" })).await;
    assert_eq!(abort["result"]["aborted"], false);

    let unknown = plane.call("sessions.explode", json!({})).await;
    assert_eq!(unknown["error"]["code"], "METHOD_NOT_FOUND");
}
