use crate::windowing::{estimate_tokens, ContextWindower, DependencySummary};
use agentflow_core::{Artifact, Task, TaskContext, WorkerRole};
use chrono::Utc;
use std::fmt::Write as _;
use uuid::Uuid;

/// Inputs for one task's context document.
#[derive(Debug, Clone)]
pub struct ContextSpec {
    /// Task the document is built for.
    pub task_id: Uuid,
    /// Role the worker runs as.
    pub role: WorkerRole,
    /// Run the task belongs to.
    pub run_id: Uuid,
    /// One-line statement of the work; the task title for seeded tasks.
    pub summary: String,
    /// Requirements, one `<requirement>` each.
    pub requirements: Vec<String>,
    /// Constraints, one `<constraint>` each.
    pub constraints: Vec<String>,
    /// Raw dependency summaries; windowed by the builder.
    pub dependencies: Vec<DependencySummary>,
    /// References only; artifact bodies are never embedded.
    pub artifacts: Vec<Artifact>,
    /// Criteria the worker is told its output must meet.
    pub acceptance_criteria: Vec<String>,
}

impl ContextSpec {
    /// Spec seeded from a task: title as summary, description as the single
    /// requirement, the task's acceptance criteria.
    pub fn for_task(task: &Task) -> Self {
        let requirements = if task.description.trim().is_empty() {
            Vec::new()
        } else {
            vec![task.description.clone()]
        };
        Self {
            task_id: task.id,
            role: task.role.clone(),
            run_id: task.run_id,
            summary: task.title.clone(),
            requirements,
            constraints: Vec::new(),
            dependencies: Vec::new(),
            artifacts: Vec::new(),
            acceptance_criteria: task.acceptance_criteria.clone(),
        }
    }

    /// Replace the dependency summaries.
    pub fn with_dependencies(mut self, dependencies: Vec<DependencySummary>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Replace the artifact references.
    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Replace the constraints.
    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }
}

/// Assembles the `<task_input>` document handed to a worker.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder {
    windower: ContextWindower,
}

impl ContextBuilder {
    /// Builder that windows dependencies with `windower`.
    pub fn new(windower: ContextWindower) -> Self {
        Self { windower }
    }

    /// Render the document. Dependencies are windowed first; the token estimate
    /// covers the final text.
    pub fn build(&self, spec: ContextSpec) -> TaskContext {
        let dependencies = self.windower.apply(spec.dependencies);
        let mut doc = String::new();

        doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        doc.push_str("<task_input>\n");
        doc.push_str("  <meta>\n");
        element(&mut doc, 4, "task_id", &spec.task_id.to_string());
        element(&mut doc, 4, "role", spec.role.as_str());
        element(&mut doc, 4, "run_id", &spec.run_id.to_string());
        doc.push_str("  </meta>\n");
        element(&mut doc, 2, "summary", &spec.summary);

        list(&mut doc, "requirements", "requirement", &spec.requirements);
        list(&mut doc, "constraints", "constraint", &spec.constraints);

        if !dependencies.is_empty() {
            doc.push_str("  <dependencies>\n");
            for dep in &dependencies {
                let _ = writeln!(
                    doc,
                    "    <dependency task_id=\"{}\" role=\"{}\">",
                    dep.task_id,
                    escape_xml(dep.role.as_str())
                );
                element(&mut doc, 6, "summary", &dep.summary);
                if !dep.key_decisions.is_empty() {
                    doc.push_str("      <key_decisions>\n");
                    for decision in &dep.key_decisions {
                        element(&mut doc, 8, "decision", decision);
                    }
                    doc.push_str("      </key_decisions>\n");
                }
                doc.push_str("    </dependency>\n");
            }
            doc.push_str("  </dependencies>\n");
        }

        if !spec.artifacts.is_empty() {
            doc.push_str("  <existing_artifacts>\n");
            for artifact in &spec.artifacts {
                let _ = writeln!(
                    doc,
                    "    <artifact type=\"{}\" name=\"{}\">{}</artifact>",
                    escape_xml(&artifact.kind),
                    escape_xml(&artifact.name),
                    escape_xml(&artifact.description)
                );
            }
            doc.push_str("  </existing_artifacts>\n");
        }

        list(
            &mut doc,
            "acceptance_criteria",
            "criterion",
            &spec.acceptance_criteria,
        );
        doc.push_str("</task_input>");

        TaskContext {
            task_id: spec.task_id,
            estimated_tokens: estimate_tokens(&doc),
            document: doc,
            created_at: Utc::now(),
        }
    }
}

fn element(doc: &mut String, indent: usize, tag: &str, text: &str) {
    let _ = writeln!(
        doc,
        "{:indent$}<{tag}>{}</{tag}>",
        "",
        escape_xml(text),
        indent = indent
    );
}

fn list(doc: &mut String, container: &str, item: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(doc, "  <{container}>");
    for value in items {
        element(doc, 4, item, value);
    }
    let _ = writeln!(doc, "  </{container}>");
}

/// Escape the five reserved XML characters.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowingConfig;

    fn builder(per_dep: usize) -> ContextBuilder {
        ContextBuilder::new(ContextWindower::new(WindowingConfig {
            max_chars_per_dependency: per_dep,
            ..Default::default()
        }))
    }

    #[test]
    fn test_escape_all_reserved() {
        assert_eq!(
            escape_xml(r#"a & b < c > d "e" 'f'"#),
            "a &amp; b &lt; c &gt; d &quot;e&quot; &apos;f&apos;"
        );
    }

    #[test]
    fn test_document_sections() {
        let run_id = Uuid::new_v4();
        let task = Task::new(run_id, "Design <API>", WorkerRole::new("ARCH"))
            .with_description("Support 10k users & more")
            .with_acceptance_criteria(vec!["OpenAPI spec".into()]);
        let dep_id = Uuid::new_v4();
        let spec = ContextSpec::for_task(&task)
            .with_constraints(vec!["No new services".into()])
            .with_dependencies(vec![DependencySummary {
                task_id: dep_id,
                role: WorkerRole::new("PM"),
                summary: "Users want a todo app.".into(),
                key_decisions: vec!["Web first".into()],
            }])
            .with_artifacts(vec![Artifact::new("document", "requirements.md")
                .with_description("Scope")]);

        let ctx = builder(8000).build(spec);
        let doc = &ctx.document;
        assert!(doc.contains("<summary>Design &lt;API&gt;</summary>"));
        assert!(doc.contains("<requirement>Support 10k users &amp; more</requirement>"));
        assert!(doc.contains("<constraint>No new services</constraint>"));
        assert!(doc.contains(&format!("<dependency task_id=\"{dep_id}\" role=\"PM\">")));
        assert!(doc.contains("<decision>Web first</decision>"));
        assert!(doc.contains("name=\"requirements.md\">Scope</artifact>"));
        assert!(doc.contains("<criterion>OpenAPI spec</criterion>"));
        assert!(doc.contains(&format!("<run_id>{run_id}</run_id>")));
        assert_eq!(ctx.estimated_tokens, (doc.chars().count() / 4) as u64);
    }

    #[test]
    fn test_empty_sections_omitted() {
        let task = Task::new(Uuid::new_v4(), "Plan", WorkerRole::new("PM"));
        let doc = builder(8000).build(ContextSpec::for_task(&task)).document;
        assert!(!doc.contains("<requirements>"));
        assert!(!doc.contains("<dependencies>"));
        assert!(!doc.contains("<existing_artifacts>"));
    }

    #[test]
    fn test_dependency_text_is_windowed() {
        let task = Task::new(Uuid::new_v4(), "Build", WorkerRole::new("DEV_PYTHON"));
        let spec = ContextSpec::for_task(&task).with_dependencies(vec![DependencySummary {
            task_id: Uuid::new_v4(),
            role: WorkerRole::new("ARCH"),
            summary: "y".repeat(500),
            key_decisions: Vec::new(),
        }]);
        let doc = builder(100).build(spec).document;
        assert!(!doc.contains(&"y".repeat(101)));
        assert!(doc.contains(&format!("{}...", "y".repeat(97))));
    }
}
