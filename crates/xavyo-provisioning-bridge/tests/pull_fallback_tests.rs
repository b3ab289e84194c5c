//! Pull Fallback Tests
//!
//! A failed update during pull records the failure on the report and pulls
//! the user's status with exactly one more request.

mod common;

use serde_json::json;

use common::{fail_with, route, route_for, Harness, RecordingProcessor};
use xavyo_provisioning_bridge::config::DEFAULT_PULL_FAILURE_PREFIX;
use xavyo_provisioning_bridge::{
    BridgeConfig, CallContext, EntityKind, LocalPipelineEngine, OperationKind, ProvisioningReport,
    ReportStatus, USER_IN_PULL,
};

fn report() -> ProvisioningReport {
    ProvisioningReport::new("u-1", EntityKind::User, OperationKind::Update)
}

fn pull_routes() -> Vec<xavyo_provisioning_bridge::Route> {
    vec![
        route_for(OperationKind::UpdateInPull, EntityKind::User, "updateInPull"),
        route("userInPull", USER_IN_PULL, "direct:updateInPullPort", "userInPull"),
    ]
}

#[tokio::test]
async fn test_failure_falls_back_to_status_pull() {
    let fallback = RecordingProcessor::new(json!({
        "result": {"key": "u-1", "status": "active"},
        "propagation": [{"resource": "ldap", "success": true}],
    }));
    let engine = LocalPipelineEngine::new()
        .with_processor("updateInPull", fail_with("Workflow", "resource ldap rejected the patch"))
        .with_processor("userInPull", fallback.clone());
    let harness = Harness::new(engine, pull_routes());

    let mut report = report();
    let patch = json!({"key": "u-1", "email": "alice@example.com"});
    let (result, propagation) = harness
        .managers
        .users()
        .update_in_pull(patch.clone(), &mut report, Some(true), &CallContext::new("pull", "task-1"))
        .await
        .unwrap();

    assert_eq!(result["status"], json!("active"));
    assert_eq!(propagation.len(), 1);

    assert_eq!(report.status, ReportStatus::Failure);
    let message = report.message.unwrap();
    assert!(message.starts_with(DEFAULT_PULL_FAILURE_PREFIX));
    assert!(message.contains("resource ldap rejected the patch"));

    assert_eq!(harness.engine.sent_count("direct:updateInPullUser"), 1);
    assert_eq!(harness.engine.sent_count(USER_IN_PULL), 1);

    let secondary = fallback.last();
    assert_eq!(secondary.body["result"], json!([patch, false]));
    assert_eq!(secondary.body["prop_by_res"], json!({}));
    assert_eq!(secondary.body["performed_tasks"], json!([]));
    assert_eq!(secondary.metadata["enabled"], json!(true));
    assert_eq!(secondary.metadata["updater"], json!("pull"));

    // The fallback succeeded, so the boundary commits both exchanges.
    assert_eq!(harness.transactions.commits(), 1);
    assert_eq!(harness.transactions.rollbacks(), 0);
    let inputs: Vec<String> = harness
        .transactions
        .records()
        .into_iter()
        .map(|record| record.input)
        .collect();
    assert_eq!(inputs, vec!["direct:updateInPullUser".to_string(), USER_IN_PULL.to_string()]);
}

#[tokio::test]
async fn test_success_skips_fallback() {
    let first = RecordingProcessor::new(json!({"result": {"key": "u-1"}, "propagation": []}));
    let fallback = RecordingProcessor::new(json!(null));
    let engine = LocalPipelineEngine::new()
        .with_processor("updateInPull", first.clone())
        .with_processor("userInPull", fallback.clone());
    let harness = Harness::new(engine, pull_routes());

    let mut report = report();
    let (result, _) = harness
        .managers
        .users()
        .update_in_pull(json!({"key": "u-1"}), &mut report, None, &CallContext::new("pull", "task-1"))
        .await
        .unwrap();

    assert_eq!(result, json!({"key": "u-1"}));
    assert_eq!(report.status, ReportStatus::Success);
    assert!(report.message.is_none());
    assert!(fallback.requests().is_empty());
    assert_eq!(harness.engine.sent_count(USER_IN_PULL), 0);
    assert_eq!(first.last().metadata["report"]["key"], json!("u-1"));
}

#[tokio::test]
async fn test_second_failure_is_raised() {
    let engine = LocalPipelineEngine::new()
        .with_processor("updateInPull", fail_with("Workflow", "first"))
        .with_processor("userInPull", fail_with("Workflow", "second"));
    let harness = Harness::new(engine, pull_routes());

    let mut report = report();
    let err = harness
        .managers
        .users()
        .update_in_pull(json!({"key": "u-1"}), &mut report, None, &CallContext::new("pull", "task-1"))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "second");
    assert_eq!(report.status, ReportStatus::Failure);
    assert!(report.message.unwrap().ends_with("first"));
    assert_eq!(harness.engine.sent_count(USER_IN_PULL), 1);
    assert_eq!(harness.transactions.rollbacks(), 1);
    assert!(harness.transactions.records().is_empty());
}

#[tokio::test]
async fn test_custom_failure_prefix() {
    let engine = LocalPipelineEngine::new()
        .with_processor("updateInPull", fail_with("Workflow", "boom"))
        .with_processor(
            "userInPull",
            common::reply_with(json!({"result": {"key": "u-1"}, "propagation": []})),
        );
    let config = BridgeConfig::builder()
        .pull_failure_prefix("pull: ")
        .build()
        .unwrap();
    let harness = Harness::with_config(engine, pull_routes(), config);

    let mut report = report();
    harness
        .managers
        .users()
        .update_in_pull(json!({"key": "u-1"}), &mut report, None, &CallContext::new("pull", "task-1"))
        .await
        .unwrap();

    assert_eq!(report.message.as_deref(), Some("pull: boom"));
}
