use crate::config::ExecutorConfig;
use crate::executor::{ExecutionRequest, ExecutionResult, TaskExecutor};
use crate::parser::parse_task_output;
use crate::roles::RoleRegistry;
use agentflow_core::{AgentflowError, AgentflowResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executor backed by the Claude Code CLI.
///
/// Runs `claude --print --output-format json` once per task, with the role's
/// system prompt appended and the context document as the prompt. Uses the
/// user's existing Claude Code login; no API key is handled here.
pub struct ClaudeCliExecutor {
    config: ExecutorConfig,
    roles: Arc<RoleRegistry>,
}

impl ClaudeCliExecutor {
    /// Build an executor; prompts are resolved through `roles` on every call.
    pub fn new(config: ExecutorConfig, roles: Arc<RoleRegistry>) -> Self {
        Self { config, roles }
    }

    fn build_prompt(context: &str) -> String {
        format!(
            "Please complete the following task.\n\n{context}\n\n\
             Respond with your output in the XML format specified in your system prompt."
        )
    }
}

#[async_trait]
impl TaskExecutor for ClaudeCliExecutor {
    async fn execute(&self, request: ExecutionRequest) -> AgentflowResult<ExecutionResult> {
        let system_prompt = self.roles.system_prompt(&request.role).await?;
        let model = match request.model_tier {
            Some(tier) => tier.alias().to_string(),
            None => self.config.default_model.clone(),
        };
        let prompt = Self::build_prompt(&request.context);

        let mut cmd = tokio::process::Command::new(&self.config.cli_path);
        cmd.arg("--print");
        cmd.arg("--output-format").arg("json");
        cmd.arg("--model").arg(&model);
        cmd.arg("--max-turns").arg(self.config.max_turns.to_string());
        cmd.arg("--append-system-prompt").arg(&system_prompt);
        cmd.arg("--no-session-persistence");
        cmd.arg(&prompt);
        cmd.kill_on_drop(true);

        tracing::info!(
            task_id = %request.task_id,
            role = %request.role,
            model = %model,
            prompt_len = prompt.len(),
            "spawning claude CLI"
        );

        let started = Instant::now();
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                AgentflowError::Execution(format!(
                    "claude CLI timed out after {}s",
                    self.config.timeout_secs
                ))
            })?
            .map_err(|e| {
                AgentflowError::Execution(format!(
                    "Failed to run '{}'. Is Claude Code installed? Error: {e}",
                    self.config.cli_path
                ))
            })?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentflowError::Execution(format!(
                "claude CLI failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let reply = extract_cli_reply(&stdout);
        if reply.is_error {
            return Err(AgentflowError::Execution(format!(
                "claude CLI reported an error: {}",
                reply.result
            )));
        }

        let parsed = parse_task_output(&reply.result);
        tracing::info!(
            task_id = %request.task_id,
            success = parsed.success,
            input_tokens = reply.input_tokens,
            output_tokens = reply.output_tokens,
            cost_usd = reply.cost_usd,
            "claude CLI response received"
        );

        Ok(ExecutionResult {
            success: parsed.success,
            summary: parsed.summary,
            key_decisions: parsed.key_decisions,
            artifacts: parsed.artifacts,
            follow_ups: parsed.follow_ups,
            warnings: parsed.warnings,
            input_tokens: reply.input_tokens,
            output_tokens: reply.output_tokens,
            reported_cost_usd: reply.cost_usd,
            model,
            duration_ms: reply.duration_ms.unwrap_or(elapsed_ms),
            raw_output: reply.result,
        })
    }
}

/// Result fields pulled out of the CLI's JSON output.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct CliReply {
    pub result: String,
    pub is_error: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: Option<u64>,
}

/// Locate the result object in CLI stdout.
///
/// Prefers the last line whose JSON has `"type": "result"`, then the whole
/// output as one JSON value, and finally treats stdout as a plain-text reply
/// with no usage figures.
pub(crate) fn extract_cli_reply(stdout: &str) -> CliReply {
    let from_lines = stdout
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|value| value["type"].as_str() == Some("result"));

    let value = match from_lines {
        Some(value) => value,
        None => match serde_json::from_str::<serde_json::Value>(stdout.trim()) {
            Ok(value) if value.is_object() => value,
            // some CLI versions print the whole message list as one array
            Ok(serde_json::Value::Array(items))
                if items.iter().any(|v| v["type"].as_str() == Some("result")) =>
            {
                items
                    .into_iter()
                    .rev()
                    .find(|v| v["type"].as_str() == Some("result"))
                    .unwrap_or_default()
            }
            _ => {
                return CliReply {
                    result: stdout.to_string(),
                    ..Default::default()
                }
            }
        },
    };

    // Token counts appear under `usage` in current CLI versions, top level in older ones.
    let tokens = |key: &str| {
        value["usage"][key]
            .as_u64()
            .or_else(|| value[key].as_u64())
            .unwrap_or(0)
    };

    CliReply {
        result: value["result"].as_str().unwrap_or_default().to_string(),
        is_error: value["is_error"].as_bool().unwrap_or(false),
        input_tokens: tokens("input_tokens"),
        output_tokens: tokens("output_tokens"),
        cost_usd: value["total_cost_usd"].as_f64().unwrap_or(0.0),
        duration_ms: value["duration_ms"].as_u64(),
    }
}
