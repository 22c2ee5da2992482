use crate::schema::SCHEMA_DDL;
use crate::store::WorkflowStore;
use agentflow_core::{
    AgentflowError, AgentflowResult, DependencyKind, RunStatus, Stage, StageStatus, Task,
    TaskAttempt, TaskContext, TaskDependency, TaskOutput, TaskStatus, TokenUsageRecord,
    UsageTotals, WorkerRole, WorkflowRun,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, workflow_type, description, status, total_tokens, \
     estimated_cost_usd, error_message, created_at, started_at, completed_at";

const STAGE_COLUMNS: &str =
    "id, workflow_run_id, stage_name, stage_order, parallel, roles, status, started_at, completed_at";

const TASK_COLUMNS: &str = "id, workflow_run_id, stage_id, title, description, status, \
     priority, role, created_by, parent_task_id, depth, acceptance_criteria, tokens_used, \
     duration_ms, error_message, created_at, completed_at";

/// SQLite-backed [`WorkflowStore`].
///
/// Statements run on the connection's own thread through
/// [`tokio_rusqlite::Connection::call`], so no store call blocks a runtime
/// worker while sibling tasks of a parallel stage are in flight.
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> AgentflowResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(|e| AgentflowError::Storage(e.to_string()))?;
        tracing::debug!(path = %path.display(), "opened workflow database");
        Self::with_connection(conn).await
    }

    /// In-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> AgentflowResult<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| AgentflowError::Storage(e.to_string()))?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: tokio_rusqlite::Connection) -> AgentflowResult<Self> {
        let store = Self { conn };
        store
            .call(|conn| conn.execute_batch(SCHEMA_DDL).map_err(db_err))
            .await?;
        Ok(store)
    }

    /// Run `f` on the connection thread and hand its result back.
    async fn call<T, F>(&self, f: F) -> AgentflowResult<T>
    where
        F: FnOnce(&mut Connection) -> AgentflowResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)))
            .await
            .map_err(|e| AgentflowError::Storage(e.to_string()))?
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn create_run(&self, run: &WorkflowRun) -> AgentflowResult<()> {
        let run = run.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO workflow_runs (id, workflow_type, description, status, total_tokens, \
                 estimated_cost_usd, error_message, created_at, started_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run.id.to_string(),
                    run.workflow_type,
                    run.description,
                    run.status.as_str(),
                    run.total_tokens as i64,
                    run.estimated_cost_usd,
                    run.error_message,
                    ts(&run.created_at),
                    run.started_at.as_ref().map(ts),
                    run.completed_at.as_ref().map(ts),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_run(&self, id: Uuid) -> AgentflowResult<Option<WorkflowRun>> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id = ?1"),
                params![id.to_string()],
                run_from_row,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
    ) -> AgentflowResult<Vec<WorkflowRun>> {
        let limit = limit as i64;
        self.call(move |conn| match status {
            Some(status) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE status = ?1 \
                         ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                    ))
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit], run_from_row)
                    .map_err(db_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {RUN_COLUMNS} FROM workflow_runs \
                         ORDER BY created_at DESC, rowid DESC LIMIT ?1"
                    ))
                    .map_err(db_err)?;
                let rows = stmt.query_map(params![limit], run_from_row).map_err(db_err)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
            }
        })
        .await
    }

    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> AgentflowResult<()> {
        let error_message = error_message.map(str::to_string);
        self.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE workflow_runs SET status = ?1, \
                     started_at = CASE WHEN ?1 = 'running' THEN COALESCE(started_at, ?2) ELSE started_at END, \
                     completed_at = CASE \
                         WHEN ?1 IN ('completed', 'failed', 'cancelled') THEN ?2 \
                         WHEN ?1 = 'running' THEN NULL \
                         ELSE completed_at END, \
                     error_message = CASE \
                         WHEN ?1 = 'running' THEN NULL \
                         WHEN ?3 IS NOT NULL THEN ?3 \
                         ELSE error_message END \
                     WHERE id = ?4",
                    params![status.as_str(), ts(&Utc::now()), error_message, id.to_string()],
                )
                .map_err(db_err)?;
            expect_one(changed, "workflow run", id)
        })
        .await
    }

    async fn delete_run(&self, id: Uuid) -> AgentflowResult<()> {
        self.call(move |conn| {
            let changed = conn
                .execute(
                    "DELETE FROM workflow_runs WHERE id = ?1",
                    params![id.to_string()],
                )
                .map_err(db_err)?;
            expect_one(changed, "workflow run", id)
        })
        .await
    }

    async fn create_stage(&self, stage: &Stage) -> AgentflowResult<()> {
        let roles = serde_json::to_string(&stage.roles)?;
        let stage = stage.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO workflow_stages (id, workflow_run_id, stage_name, stage_order, parallel, \
                 roles, status, started_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    stage.id.to_string(),
                    stage.run_id.to_string(),
                    stage.name,
                    stage.order,
                    stage.parallel,
                    roles,
                    stage.status.as_str(),
                    stage.started_at.as_ref().map(ts),
                    stage.completed_at.as_ref().map(ts),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_stages(&self, run_id: Uuid) -> AgentflowResult<Vec<Stage>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {STAGE_COLUMNS} FROM workflow_stages WHERE workflow_run_id = ?1 \
                     ORDER BY stage_order"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id.to_string()], stage_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn update_stage_status(&self, id: Uuid, status: StageStatus) -> AgentflowResult<()> {
        self.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE workflow_stages SET status = ?1, \
                     started_at = CASE WHEN ?1 = 'running' THEN ?2 ELSE started_at END, \
                     completed_at = CASE \
                         WHEN ?1 IN ('completed', 'failed', 'skipped') THEN ?2 \
                         ELSE NULL END \
                     WHERE id = ?3",
                    params![status.as_str(), ts(&Utc::now()), id.to_string()],
                )
                .map_err(db_err)?;
            expect_one(changed, "stage", id)
        })
        .await
    }

    async fn create_task(&self, task: &Task) -> AgentflowResult<()> {
        let criteria = serde_json::to_string(&task.acceptance_criteria)?;
        let task = task.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, workflow_run_id, stage_id, title, description, status, \
                 priority, role, created_by, parent_task_id, depth, acceptance_criteria, tokens_used, \
                 duration_ms, error_message, created_at, completed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    task.id.to_string(),
                    task.run_id.to_string(),
                    task.stage_id.map(|id| id.to_string()),
                    task.title,
                    task.description,
                    task.status.as_str(),
                    task.priority.as_str(),
                    task.role.as_str(),
                    task.created_by,
                    task.parent_task.map(|id| id.to_string()),
                    task.depth,
                    criteria,
                    task.tokens_used as i64,
                    task.duration_ms.map(|ms| ms as i64),
                    task.error_message,
                    ts(&task.created_at),
                    task.completed_at.as_ref().map(ts),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: Uuid) -> AgentflowResult<Option<Task>> {
        self.call(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
                task_from_row,
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn get_run_tasks(&self, run_id: Uuid) -> AgentflowResult<Vec<Task>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE workflow_run_id = ?1 ORDER BY rowid"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id.to_string()], task_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn get_stage_tasks(&self, stage_id: Uuid) -> AgentflowResult<Vec<Task>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE stage_id = ?1 ORDER BY rowid"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![stage_id.to_string()], task_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> AgentflowResult<()> {
        let error_message = error_message.map(str::to_string);
        self.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET status = ?1, \
                     completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END, \
                     error_message = COALESCE(?3, error_message) \
                     WHERE id = ?4",
                    params![status.as_str(), ts(&Utc::now()), error_message, id.to_string()],
                )
                .map_err(db_err)?;
            expect_one(changed, "task", id)
        })
        .await
    }

    async fn record_task_execution(
        &self,
        id: Uuid,
        tokens_used: u64,
        duration_ms: u64,
    ) -> AgentflowResult<()> {
        self.call(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE tasks SET tokens_used = tokens_used + ?1, duration_ms = ?2 WHERE id = ?3",
                    params![tokens_used as i64, duration_ms as i64, id.to_string()],
                )
                .map_err(db_err)?;
            expect_one(changed, "task", id)
        })
        .await
    }

    async fn reset_task(&self, id: Uuid) -> AgentflowResult<Option<TaskAttempt>> {
        let archived = self
            .call(move |conn| {
                let tx = conn.transaction().map_err(db_err)?;
                let key = id.to_string();
                let current: Option<(String, Option<String>)> = tx
                    .query_row(
                        "SELECT status, error_message FROM tasks WHERE id = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(db_err)?;
                let Some((status, error_message)) = current else {
                    return Err(AgentflowError::NotFound(format!("task {id}")));
                };

                let context_document: Option<String> = tx
                    .query_row(
                        "SELECT context_document FROM task_context WHERE task_id = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(db_err)?;
                let output: Option<(String, String)> = tx
                    .query_row(
                        "SELECT summary, raw_output FROM task_outputs WHERE task_id = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(db_err)?;

                // A task reset before it ever ran leaves nothing worth archiving.
                let attempted =
                    context_document.is_some() || output.is_some() || error_message.is_some();
                let attempt = if attempted {
                    let number: u32 = tx
                        .query_row(
                            "SELECT COALESCE(MAX(attempt), 0) + 1 FROM task_attempts WHERE task_id = ?1",
                            params![key],
                            |row| row.get(0),
                        )
                        .map_err(db_err)?;
                    let (summary, raw_output) = output.unzip();
                    let attempt = TaskAttempt {
                        task_id: id,
                        attempt: number,
                        status: status.parse()?,
                        error_message,
                        context_document,
                        summary,
                        raw_output,
                        archived_at: Utc::now(),
                    };
                    tx.execute(
                        "INSERT INTO task_attempts (task_id, attempt, status, error_message, \
                         context_document, summary, raw_output, archived_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            key,
                            attempt.attempt,
                            attempt.status.as_str(),
                            attempt.error_message,
                            attempt.context_document,
                            attempt.summary,
                            attempt.raw_output,
                            ts(&attempt.archived_at),
                        ],
                    )
                    .map_err(db_err)?;
                    Some(attempt)
                } else {
                    None
                };

                tx.execute("DELETE FROM task_context WHERE task_id = ?1", params![key])
                    .map_err(db_err)?;
                tx.execute("DELETE FROM task_outputs WHERE task_id = ?1", params![key])
                    .map_err(db_err)?;
                tx.execute(
                    "UPDATE tasks SET status = 'pending', error_message = NULL, completed_at = NULL, \
                     duration_ms = NULL WHERE id = ?1",
                    params![key],
                )
                .map_err(db_err)?;
                tx.commit().map_err(db_err)?;
                Ok(attempt)
            })
            .await?;

        if let Some(attempt) = &archived {
            tracing::info!(
                task_id = %id,
                attempt = attempt.attempt,
                error = attempt.error_message.as_deref().unwrap_or(""),
                "archived previous attempt before reset"
            );
        }
        Ok(archived)
    }

    async fn list_attempts(&self, task_id: Uuid) -> AgentflowResult<Vec<TaskAttempt>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT task_id, attempt, status, error_message, context_document, summary, \
                     raw_output, archived_at FROM task_attempts WHERE task_id = ?1 ORDER BY attempt",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![task_id.to_string()], |row| {
                    Ok(TaskAttempt {
                        task_id: uuid_col(row, 0)?,
                        attempt: row.get(1)?,
                        status: parsed_col(row, 2)?,
                        error_message: row.get(3)?,
                        context_document: row.get(4)?,
                        summary: row.get(5)?,
                        raw_output: row.get(6)?,
                        archived_at: ts_col(row, 7)?,
                    })
                })
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn add_dependency(&self, dependency: &TaskDependency) -> AgentflowResult<()> {
        let dependency = dependency.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id, dependency_type) \
                 VALUES (?1, ?2, ?3)",
                params![
                    dependency.task_id.to_string(),
                    dependency.depends_on.to_string(),
                    dependency.kind.as_str(),
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_dependencies(&self, task_id: Uuid) -> AgentflowResult<Vec<TaskDependency>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT task_id, depends_on_task_id, dependency_type FROM task_dependencies \
                     WHERE task_id = ?1 ORDER BY rowid",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![task_id.to_string()], dependency_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn get_run_dependencies(&self, run_id: Uuid) -> AgentflowResult<Vec<TaskDependency>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT td.task_id, td.depends_on_task_id, td.dependency_type \
                     FROM task_dependencies td JOIN tasks t ON td.task_id = t.id \
                     WHERE t.workflow_run_id = ?1 ORDER BY td.rowid",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id.to_string()], dependency_from_row)
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }

    async fn save_context(&self, context: &TaskContext) -> AgentflowResult<()> {
        let context = context.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO task_context (task_id, context_document, context_tokens, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    context.task_id.to_string(),
                    context.document,
                    context.estimated_tokens as i64,
                    ts(&context.created_at),
                ],
            )
            .map_err(|e| write_once_err(e, "context", context.task_id))?;
            Ok(())
        })
        .await
    }

    async fn get_context(&self, task_id: Uuid) -> AgentflowResult<Option<TaskContext>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT task_id, context_document, context_tokens, created_at FROM task_context \
                 WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| {
                    Ok(TaskContext {
                        task_id: uuid_col(row, 0)?,
                        document: row.get(1)?,
                        estimated_tokens: row.get::<_, i64>(2)? as u64,
                        created_at: ts_col(row, 3)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn save_output(&self, output: &TaskOutput) -> AgentflowResult<()> {
        let decisions = serde_json::to_string(&output.key_decisions)?;
        let artifacts = serde_json::to_string(&output.artifacts)?;
        let output = output.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO task_outputs (task_id, success, summary, key_decisions, artifacts, \
                 raw_output, tokens_used, model_used, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    output.task_id.to_string(),
                    output.success,
                    output.summary,
                    decisions,
                    artifacts,
                    output.raw_output,
                    output.tokens_used as i64,
                    output.model_used,
                    ts(&output.created_at),
                ],
            )
            .map_err(|e| write_once_err(e, "output", output.task_id))?;
            Ok(())
        })
        .await
    }

    async fn get_output(&self, task_id: Uuid) -> AgentflowResult<Option<TaskOutput>> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT task_id, success, summary, key_decisions, artifacts, raw_output, tokens_used, \
                 model_used, created_at FROM task_outputs WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| {
                    Ok(TaskOutput {
                        task_id: uuid_col(row, 0)?,
                        success: row.get(1)?,
                        summary: row.get(2)?,
                        key_decisions: json_col(row, 3)?,
                        artifacts: json_col(row, 4)?,
                        raw_output: row.get(5)?,
                        tokens_used: row.get::<_, i64>(6)? as u64,
                        model_used: row.get(7)?,
                        created_at: ts_col(row, 8)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn append_usage(&self, record: &TokenUsageRecord) -> AgentflowResult<()> {
        let record = record.clone();
        self.call(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let run_key = record.run_id.to_string();
            tx.execute(
                "INSERT INTO token_usage (workflow_run_id, task_id, role, model, input_tokens, \
                 output_tokens, cost_usd, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run_key,
                    record.task_id.map(|id| id.to_string()),
                    record.role.as_str(),
                    record.model,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                    record.cost_usd,
                    ts(&record.recorded_at),
                ],
            )
            .map_err(db_err)?;
            // The run totals are a cache of the ledger; recompute rather than increment.
            tx.execute(
                "UPDATE workflow_runs SET \
                 total_tokens = (SELECT COALESCE(SUM(input_tokens + output_tokens), 0) \
                                 FROM token_usage WHERE workflow_run_id = ?1), \
                 estimated_cost_usd = (SELECT COALESCE(SUM(cost_usd), 0.0) \
                                       FROM token_usage WHERE workflow_run_id = ?1) \
                 WHERE id = ?1",
                params![run_key],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn usage_totals(&self, run_id: Uuid) -> AgentflowResult<UsageTotals> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(input_tokens), 0), COALESCE(SUM(output_tokens), 0), \
                 COALESCE(SUM(cost_usd), 0.0) FROM token_usage WHERE workflow_run_id = ?1",
                params![run_id.to_string()],
                |row| {
                    Ok(UsageTotals {
                        input_tokens: row.get::<_, i64>(0)? as u64,
                        output_tokens: row.get::<_, i64>(1)? as u64,
                        cost_usd: row.get(2)?,
                    })
                },
            )
            .map_err(db_err)
        })
        .await
    }

    async fn list_usage(&self, run_id: Uuid) -> AgentflowResult<Vec<TokenUsageRecord>> {
        self.call(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT workflow_run_id, task_id, role, model, input_tokens, output_tokens, \
                     cost_usd, recorded_at FROM token_usage WHERE workflow_run_id = ?1 ORDER BY id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![run_id.to_string()], |row| {
                    Ok(TokenUsageRecord {
                        run_id: uuid_col(row, 0)?,
                        task_id: opt_uuid_col(row, 1)?,
                        role: WorkerRole::new(row.get::<_, String>(2)?),
                        model: row.get(3)?,
                        input_tokens: row.get::<_, i64>(4)? as u64,
                        output_tokens: row.get::<_, i64>(5)? as u64,
                        cost_usd: row.get(6)?,
                        recorded_at: ts_col(row, 7)?,
                    })
                })
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
        .await
    }
}

// --- row mapping ---

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowRun> {
    Ok(WorkflowRun {
        id: uuid_col(row, 0)?,
        workflow_type: row.get(1)?,
        description: row.get(2)?,
        status: parsed_col(row, 3)?,
        total_tokens: row.get::<_, i64>(4)? as u64,
        estimated_cost_usd: row.get(5)?,
        error_message: row.get(6)?,
        created_at: ts_col(row, 7)?,
        started_at: opt_ts_col(row, 8)?,
        completed_at: opt_ts_col(row, 9)?,
    })
}

fn stage_from_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: uuid_col(row, 0)?,
        run_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        order: row.get(3)?,
        parallel: row.get(4)?,
        roles: json_col(row, 5)?,
        status: parsed_col(row, 6)?,
        started_at: opt_ts_col(row, 7)?,
        completed_at: opt_ts_col(row, 8)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let priority: String = row.get(6)?;
    Ok(Task {
        id: uuid_col(row, 0)?,
        run_id: uuid_col(row, 1)?,
        stage_id: opt_uuid_col(row, 2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: parsed_col(row, 5)?,
        priority: agentflow_core::Priority::parse_lenient(&priority),
        role: WorkerRole::new(row.get::<_, String>(7)?),
        created_by: row.get(8)?,
        parent_task: opt_uuid_col(row, 9)?,
        depth: row.get(10)?,
        acceptance_criteria: json_col(row, 11)?,
        tokens_used: row.get::<_, i64>(12)? as u64,
        duration_ms: row.get::<_, Option<i64>>(13)?.map(|ms| ms as u64),
        error_message: row.get(14)?,
        created_at: ts_col(row, 15)?,
        completed_at: opt_ts_col(row, 16)?,
    })
}

fn dependency_from_row(row: &Row<'_>) -> rusqlite::Result<TaskDependency> {
    Ok(TaskDependency {
        task_id: uuid_col(row, 0)?,
        depends_on: uuid_col(row, 1)?,
        kind: parsed_col::<DependencyKind>(row, 2)?,
    })
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| Uuid::parse_str(&raw).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_err(idx, e))
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<String>>(idx)?
        .map(|raw| parse_ts(&raw).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = AgentflowError>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_err(idx, e))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|at| at.with_timezone(&Utc))
}

fn db_err(e: rusqlite::Error) -> AgentflowError {
    AgentflowError::Storage(e.to_string())
}

fn write_once_err(e: rusqlite::Error, what: &str, task_id: Uuid) -> AgentflowError {
    match e {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AgentflowError::Storage(format!("{what} already recorded for task {task_id}"))
        }
        other => db_err(other),
    }
}

fn expect_one(changed: usize, entity: &str, id: Uuid) -> AgentflowResult<()> {
    if changed == 0 {
        return Err(AgentflowError::NotFound(format!("{entity} {id}")));
    }
    Ok(())
}
