use agentflow_core::{AgentflowError, AgentflowResult, WorkerRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One stage of a workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    /// Stage name, unique within a template.
    pub name: String,
    /// One seeded task per role.
    pub roles: Vec<WorkerRole>,
    /// Dispatch the stage's tasks concurrently.
    #[serde(default)]
    pub parallel: bool,
}

impl StageTemplate {
    /// Stage whose tasks run one at a time.
    pub fn sequential(name: &str, roles: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            roles: roles.iter().map(WorkerRole::new).collect(),
            parallel: false,
        }
    }

    /// Stage whose tasks are dispatched together.
    pub fn parallel(name: &str, roles: &[&str]) -> Self {
        Self {
            parallel: true,
            ..Self::sequential(name, roles)
        }
    }
}

/// A named, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Workflow-type tag, e.g. `full_project`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// What the workflow is for.
    pub description: String,
    /// Stages in execution order.
    pub stages: Vec<StageTemplate>,
}

/// Workflow-type tag → template. Read-only to the engine.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalogue {
    templates: BTreeMap<String, WorkflowTemplate>,
}

impl TemplateCatalogue {
    /// Catalogue with the built-in workflows.
    pub fn builtin() -> Self {
        let mut catalogue = Self::default();
        for template in builtin_templates() {
            catalogue.templates.insert(template.id.clone(), template);
        }
        catalogue
    }

    /// Add or replace a template.
    ///
    /// Rejects templates without stages and stages without roles, since
    /// stages are seeded with one task per role.
    pub fn register(&mut self, template: WorkflowTemplate) -> AgentflowResult<()> {
        if template.stages.is_empty() {
            return Err(AgentflowError::Workflow(format!(
                "template '{}' has no stages",
                template.id
            )));
        }
        if let Some(stage) = template.stages.iter().find(|s| s.roles.is_empty()) {
            return Err(AgentflowError::Workflow(format!(
                "stage '{}' of template '{}' has no roles",
                stage.name, template.id
            )));
        }
        self.templates.insert(template.id.clone(), template);
        Ok(())
    }

    /// Template registered under `id`.
    pub fn get(&self, id: &str) -> Option<&WorkflowTemplate> {
        self.templates.get(id)
    }

    /// All templates, sorted by id.
    pub fn list(&self) -> Vec<&WorkflowTemplate> {
        self.templates.values().collect()
    }
}

fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate {
            id: "full_project".into(),
            name: "Full Project".into(),
            description: "Complete project from idea to implementation".into(),
            stages: vec![
                StageTemplate::sequential("requirements", &["PM"]),
                StageTemplate::sequential("research", &["RESEARCH"]),
                StageTemplate::sequential("architecture", &["ARCH"]),
                StageTemplate::parallel("design", &["GD", "UIUX"]),
                StageTemplate::sequential("task_review", &["TQR"]),
                StageTemplate::parallel("implementation", &["DEV_PYTHON"]),
                StageTemplate::parallel("quality", &["CQR", "SR", "QE"]),
                StageTemplate::sequential("e2e_testing", &["E2E"]),
            ],
        },
        WorkflowTemplate {
            id: "add_feature".into(),
            name: "Add Feature".into(),
            description: "Add a feature to existing project".into(),
            stages: vec![
                StageTemplate::sequential("requirements", &["PM"]),
                StageTemplate::sequential("architecture", &["ARCH"]),
                StageTemplate::sequential("task_review", &["TQR"]),
                StageTemplate::parallel("implementation", &["DEV_PYTHON"]),
                StageTemplate::parallel("quality", &["CQR", "QE"]),
            ],
        },
        WorkflowTemplate {
            id: "fix_bug".into(),
            name: "Fix Bug".into(),
            description: "Diagnose and fix a bug".into(),
            stages: vec![
                StageTemplate::sequential("analysis", &["RESEARCH"]),
                StageTemplate::sequential("solution", &["ARCH"]),
                StageTemplate::sequential("implementation", &["DEV_PYTHON"]),
                StageTemplate::parallel("verification", &["QE", "E2E"]),
            ],
        },
        WorkflowTemplate {
            id: "security_audit".into(),
            name: "Security Audit".into(),
            description: "Comprehensive security review of codebase".into(),
            stages: vec![
                StageTemplate::sequential("analysis", &["RESEARCH"]),
                StageTemplate::sequential("security_review", &["SR"]),
                StageTemplate::sequential("quality_review", &["CQR"]),
            ],
        },
    ]
}
