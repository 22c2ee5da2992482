//! `agentflow logs`: one task's detail, attempt history, context and output.

use agentflow_core::{AgentflowError, AgentflowResult, TaskAttempt, TaskContext, TaskOutput};
use agentflow_store::WorkflowStore;
use std::fmt::Write;
use uuid::Uuid;

/// Which stored documents to include besides the task summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub context: bool,
    pub output: bool,
}

/// Render a task for `agentflow logs`; `NotFound` if the id is unknown.
pub async fn task_log(
    store: &dyn WorkflowStore,
    task_id: Uuid,
    options: LogOptions,
) -> AgentflowResult<String> {
    let task = store
        .get_task(task_id)
        .await?
        .ok_or_else(|| AgentflowError::NotFound(format!("task {task_id}")))?;
    let context = match options.context {
        true => store.get_context(task_id).await?,
        false => None,
    };
    let output = match options.output {
        true => store.get_output(task_id).await?,
        false => None,
    };
    let attempts = store.list_attempts(task_id).await?;

    let mut out = String::new();
    let _ = writeln!(out, "Task:        {}", task.id);
    let _ = writeln!(out, "Role:        {}", task.role);
    let _ = writeln!(out, "Status:      {}", task.status);
    let _ = writeln!(out, "Title:       {}", task.title);
    if !task.description.is_empty() {
        let _ = writeln!(out, "Description: {}", task.description);
    }
    let _ = writeln!(out, "Tokens:      {}", task.tokens_used);
    if let Some(error) = &task.error_message {
        let _ = writeln!(out, "Error:       {error}");
    }
    render_attempts(&mut out, &attempts);

    if options.context {
        render_context(&mut out, context.as_ref());
    }
    if options.output {
        render_output(&mut out, output.as_ref());
    }
    Ok(out)
}

fn render_attempts(out: &mut String, attempts: &[TaskAttempt]) {
    if attempts.is_empty() {
        return;
    }
    let _ = writeln!(out, "Previous attempts:");
    for attempt in attempts {
        let _ = writeln!(
            out,
            "  #{} {:<9} {}  {}",
            attempt.attempt,
            attempt.status.as_str(),
            attempt.archived_at.format("%Y-%m-%d %H:%M:%S"),
            attempt.error_message.as_deref().unwrap_or("-")
        );
    }
}

fn render_context(out: &mut String, context: Option<&TaskContext>) {
    match context {
        Some(context) => {
            let _ = writeln!(out, "\nContext (~{} tokens):", context.estimated_tokens);
            let _ = writeln!(out, "{}", context.document);
        }
        None => {
            let _ = writeln!(out, "\nNo context recorded.");
        }
    }
}

fn render_output(out: &mut String, output: Option<&TaskOutput>) {
    let Some(output) = output else {
        let _ = writeln!(out, "\nNo output recorded.");
        return;
    };
    let outcome = if output.success { "success" } else { "failure" };
    let _ = writeln!(out, "\nOutput ({}, {outcome}):", output.model_used);
    let _ = writeln!(out, "Summary: {}", output.summary);
    if !output.key_decisions.is_empty() {
        let _ = writeln!(out, "Key decisions:");
        for decision in &output.key_decisions {
            let _ = writeln!(out, "  - {decision}");
        }
    }
    let _ = writeln!(out, "Raw output:");
    let _ = writeln!(out, "{}", output.raw_output);
}
