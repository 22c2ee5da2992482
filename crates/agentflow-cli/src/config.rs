//! `agentflow.toml` loading and environment overrides.

use agentflow_agent::ExecutorConfig;
use agentflow_core::{AgentflowError, AgentflowResult, CostTable};
use agentflow_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Full application configuration. Every section is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub costs: CostTable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".agentflow")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_format: LogFormat::default(),
            orchestrator: OrchestratorConfig::default(),
            executor: ExecutorConfig::default(),
            costs: CostTable::default(),
        }
    }
}

impl AppConfig {
    /// Read `path`; a missing file yields the defaults.
    pub async fn load(path: &Path) -> AgentflowResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(AgentflowError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))),
        }
    }

    pub fn from_toml(text: &str) -> AgentflowResult<Self> {
        toml::from_str(text).map_err(|e| AgentflowError::Config(e.to_string()))
    }

    /// Apply `AGENTFLOW_*` overrides. `lookup` is normally `std::env::var`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> AgentflowResult<()> {
        if let Some(value) = lookup("AGENTFLOW_TOKEN_BUDGET") {
            self.orchestrator.token_budget = parse_env("AGENTFLOW_TOKEN_BUDGET", &value)?;
        }
        if let Some(value) = lookup("AGENTFLOW_MAX_CONCURRENT_TASKS") {
            self.orchestrator.max_concurrent_tasks =
                parse_env("AGENTFLOW_MAX_CONCURRENT_TASKS", &value)?;
        }
        if let Some(value) = lookup("AGENTFLOW_CLAUDE_CLI_PATH") {
            self.executor.cli_path = value;
        }
        if let Some(value) = lookup("AGENTFLOW_DEFAULT_MODEL") {
            self.executor.default_model = value;
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("agentflow.db")
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> AgentflowResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AgentflowError::Config(format!("{name} is not a valid number: '{value}'")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_full_file() {
        let config = AppConfig::from_toml(
            r#"
            data_dir = "/var/lib/agentflow"
            log_format = "json"

            [orchestrator]
            max_concurrent_tasks = 5
            token_budget = 0

            [orchestrator.windowing]
            max_total_chars = 16000

            [executor]
            cli_path = "/opt/claude"
            timeout_secs = 120

            [costs.opus]
            input_per_million = 10.0
            output_per_million = 50.0
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/agentflow"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.orchestrator.max_concurrent_tasks, 5);
        assert_eq!(config.orchestrator.token_budget, 0);
        assert!(config.orchestrator.enforce_budget);
        assert_eq!(config.orchestrator.windowing.max_total_chars, 16_000);
        assert_eq!(config.orchestrator.windowing.max_chars_per_dependency, 8000);
        assert_eq!(config.executor.cli_path, "/opt/claude");
        assert_eq!(config.executor.timeout_secs, 120);
        assert_eq!(config.costs.opus.input_per_million, 10.0);
        assert_eq!(config.costs.sonnet.input_per_million, 3.0);
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/agentflow/agentflow.db")
        );
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from(".agentflow"));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.orchestrator.token_budget, 500_000);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let err = AppConfig::from_toml("log_format = \"xml\"").unwrap_err();
        assert!(matches!(err, AgentflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).await.unwrap();
        assert_eq!(config.executor.cli_path, "claude");
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentflow.toml");
        tokio::fs::write(&path, "[orchestrator]\nmax_task_depth = 1\n")
            .await
            .unwrap();
        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.orchestrator.max_task_depth, 1);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AGENTFLOW_TOKEN_BUDGET", "1000"),
            ("AGENTFLOW_MAX_CONCURRENT_TASKS", " 8 "),
            ("AGENTFLOW_CLAUDE_CLI_PATH", "/usr/local/bin/claude"),
            ("AGENTFLOW_DEFAULT_MODEL", "opus"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.orchestrator.token_budget, 1000);
        assert_eq!(config.orchestrator.max_concurrent_tasks, 8);
        assert_eq!(config.executor.cli_path, "/usr/local/bin/claude");
        assert_eq!(config.executor.default_model, "opus");
    }

    #[test]
    fn test_bad_env_number_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "AGENTFLOW_TOKEN_BUDGET").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("AGENTFLOW_TOKEN_BUDGET"));
    }
}
