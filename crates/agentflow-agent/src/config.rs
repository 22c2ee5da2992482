use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the `claude` CLI executor (`[executor]` in `agentflow.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Program to spawn; a bare name is looked up on `PATH`.
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
    /// Passed as `--max-turns`.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Per-call timeout. A call that exceeds it is an ordinary task failure.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Model used when neither the dispatcher nor the role picks one.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Directory of `<prompt_file>` overrides for the built-in role prompts.
    #[serde(default)]
    pub prompts_dir: Option<PathBuf>,
}

fn default_cli_path() -> String {
    "claude".to_string()
}

fn default_max_turns() -> u32 {
    1
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_model() -> String {
    "sonnet".to_string()
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            max_turns: default_max_turns(),
            timeout_secs: default_timeout_secs(),
            default_model: default_model(),
            prompts_dir: None,
        }
    }
}
