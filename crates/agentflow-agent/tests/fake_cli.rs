//! Drives `ClaudeCliExecutor` against shell scripts standing in for the CLI.
#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use agentflow_agent::{ClaudeCliExecutor, ExecutionRequest, ExecutorConfig, RoleRegistry, TaskExecutor};
use agentflow_core::{AgentflowError, ModelTier};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-claude");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn executor(cli_path: &Path, timeout_secs: u64) -> ClaudeCliExecutor {
    let config = ExecutorConfig {
        cli_path: cli_path.display().to_string(),
        timeout_secs,
        ..Default::default()
    };
    ClaudeCliExecutor::new(config, Arc::new(RoleRegistry::builtin()))
}

fn request() -> ExecutionRequest {
    ExecutionRequest {
        task_id: Uuid::new_v4(),
        role: "ARCH".into(),
        run_id: Uuid::new_v4(),
        context: "<task_input><title>Design</title></task_input>".into(),
        model_tier: Some(ModelTier::Opus),
    }
}

// ---------------------------------------------------------------------------
// 1. A well-formed reply is parsed into the result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_reply_is_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let reply = r#"{"type":"result","result":"<task_output><success>true</success><summary>Designed it</summary><next_tasks><task agent=\"DEV_PYTHON\" priority=\"high\"><title>Build it</title></task></next_tasks></task_output>","total_cost_usd":0.05,"usage":{"input_tokens":2000,"output_tokens":400}}"#;
    let script = write_script(dir.path(), &format!("cat <<'EOF'\n{reply}\nEOF"));

    let result = executor(&script, 30).execute(request()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.summary, "Designed it");
    assert_eq!(result.model, "opus");
    assert_eq!(result.input_tokens, 2000);
    assert_eq!(result.output_tokens, 400);
    assert_eq!(result.follow_ups.len(), 1);
    assert_eq!(result.follow_ups[0].title, "Build it");
}

// ---------------------------------------------------------------------------
// 2. Malformed output is an unsuccessful result, not an error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_reply_is_unsuccessful() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo 'I am not sure what to do.'");

    let result = executor(&script, 30).execute(request()).await.unwrap();
    assert!(!result.success);
    assert!(result.summary.contains("no task_output"));
    assert_eq!(result.total_tokens(), 0);
}

// ---------------------------------------------------------------------------
// 3. Non-zero exit is an execution error carrying stderr
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nonzero_exit_is_execution_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echo 'not logged in' >&2\nexit 3");

    let err = executor(&script, 30).execute(request()).await.unwrap_err();
    assert!(matches!(err, AgentflowError::Execution(_)));
    assert!(err.to_string().contains("exit 3"));
    assert!(err.to_string().contains("not logged in"));
}

// ---------------------------------------------------------------------------
// 4. A call exceeding the timeout fails
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_cli_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "sleep 5");

    let err = executor(&script, 1).execute(request()).await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
}
