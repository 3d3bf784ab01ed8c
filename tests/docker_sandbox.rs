//! End-to-end sandbox tests against a live Docker daemon.
//!
//! These are ignored by default; run with `cargo test -- --ignored` on a
//! host with Docker and a local `ai-sandbox:py312` image (any image with
//! bash and python works, override via IRONBOX_TEST_IMAGE).

use std::collections::HashSet;
use std::time::Duration;

use ironbox::{AuditEvent, DockerSandbox, DockerSandboxBuilder, ExecutionResult, SequenceOutcome};

fn test_image() -> String {
    std::env::var("IRONBOX_TEST_IMAGE").unwrap_or_else(|_| "ai-sandbox:py312".to_string())
}

fn sandbox(dir: &std::path::Path) -> DockerSandbox {
    DockerSandboxBuilder::new(test_image(), dir.join("ws"))
        .log_dir(dir.join("logs"))
        .build()
        .expect("docker daemon required for this test")
}

fn read_audit(sandbox: &DockerSandbox) -> Vec<AuditEvent> {
    let content = std::fs::read_to_string(sandbox.audit_log().path()).unwrap();
    content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn successful_command_is_audited_once() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = sandbox(dir.path());

    let result = sandbox
        .run("echo hello", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(result.ok(), "unexpected result: {result:?}");
    assert_eq!(result.output().unwrap().stdout.trim(), "hello");

    let events = read_audit(&sandbox);
    assert_eq!(events.len(), 1);
    assert!(events[0].ok);
    assert_eq!(events[0].code, Some(0));
    assert!(events[0].limits_fallback.is_none() || events[0].ok);
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn nonzero_exit_is_command_failure_not_infrastructure() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = sandbox(dir.path());

    let result = sandbox
        .run("sh -c 'exit 3'", Duration::from_secs(30))
        .await
        .unwrap();
    match result {
        ExecutionResult::CommandFailed(out) => assert_eq!(out.exit_code, 3),
        other => panic!("expected CommandFailed, got {other:?}"),
    }

    let events = read_audit(&sandbox);
    assert_eq!(events.len(), 1);
    assert!(!events[0].ok);
    assert_eq!(events[0].code, Some(3));
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn sequence_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = sandbox(dir.path());

    let commands = vec![
        "echo first".to_string(),
        "sh -c 'exit 1'".to_string(),
        "echo never".to_string(),
    ];
    let outcome = sandbox
        .run_sequence(&commands, Duration::from_secs(30))
        .await
        .unwrap();

    match outcome {
        SequenceOutcome::Stopped { command, .. } => assert_eq!(command, "sh -c 'exit 1'"),
        other => panic!("expected Stopped, got {other:?}"),
    }

    // Two attempts reached the container layer; the third never ran.
    let events = read_audit(&sandbox);
    assert_eq!(events.len(), 2);
    assert!(events[0].ok);
    assert!(!events[1].ok);
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn workspace_writes_survive_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = sandbox(dir.path());

    let result = sandbox
        .run("sh -c 'echo data > out.txt'", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(result.ok(), "unexpected result: {result:?}");

    let written = std::fs::read_to_string(sandbox.workspace().join("out.txt")).unwrap();
    assert_eq!(written.trim(), "data");
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn repeated_runs_get_distinct_audit_ids() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = sandbox(dir.path());

    for _ in 0..3 {
        sandbox.run("echo hi", Duration::from_secs(30)).await.unwrap();
    }

    let events = read_audit(&sandbox);
    assert_eq!(events.len(), 3);
    let ids: HashSet<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn wait_timeout_is_infrastructure_failure() {
    let dir = tempfile::tempdir().unwrap();
    let sandbox = sandbox(dir.path());

    let result = sandbox
        .run("sh -c 'sleep 30'", Duration::from_secs(2))
        .await
        .unwrap();
    match result {
        ExecutionResult::Infrastructure { detail } => {
            assert!(detail.contains("timed out"), "detail: {detail}")
        }
        other => panic!("expected Infrastructure, got {other:?}"),
    }

    let events = read_audit(&sandbox);
    assert_eq!(events.len(), 1);
    assert!(!events[0].ok);
    assert!(events[0].error.as_deref().unwrap().contains("wait_error"));
}
