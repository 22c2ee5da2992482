use agentflow_core::{AgentflowError, AgentflowResult, ModelTier, WorkerRole};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// What a worker role is, which tier it runs on and how it is prompted.
#[derive(Debug, Clone, Serialize)]
pub struct RoleProfile {
    /// Tag the profile is registered under.
    pub role: WorkerRole,
    /// Display name.
    pub name: String,
    /// One-line description shown by `agentflow roles`.
    pub description: String,
    /// Tier used unless the model selector adjusts it.
    pub tier: ModelTier,
    /// Free-form capability labels.
    pub capabilities: Vec<String>,
    /// File name looked up in the prompts override directory.
    pub prompt_file: String,
    /// Built-in prompt used when no override file exists.
    #[serde(skip)]
    pub system_prompt: String,
}

/// Runtime-extensible mapping from [`WorkerRole`] to [`RoleProfile`].
///
/// Lookups never fail: a role that is not registered resolves through its
/// family prefix (`DEV_RUST` → developer, `TL_GO` → team lead) and otherwise
/// to a generic worker profile.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    profiles: HashMap<WorkerRole, RoleProfile>,
    prompts_dir: Option<PathBuf>,
}

impl RoleRegistry {
    /// Registry holding the built-in roles.
    pub fn builtin() -> Self {
        let mut registry = Self {
            profiles: HashMap::new(),
            prompts_dir: None,
        };
        for profile in default_profiles() {
            registry.register(profile);
        }
        registry
    }

    /// Read `<prompt_file>` from `dir` in preference to the built-in prompts.
    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = Some(dir.into());
        self
    }

    /// Add or replace a profile.
    pub fn register(&mut self, profile: RoleProfile) {
        self.profiles.insert(profile.role.clone(), profile);
    }

    /// Registered profile for `role`, without dynamic derivation.
    pub fn get(&self, role: &WorkerRole) -> Option<&RoleProfile> {
        self.profiles.get(role)
    }

    /// Registered profiles sorted by role tag.
    pub fn list(&self) -> Vec<&RoleProfile> {
        let mut profiles: Vec<_> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.role.cmp(&b.role));
        profiles
    }

    /// Profile for `role`, deriving one for unregistered dynamic roles.
    pub fn resolve(&self, role: &WorkerRole) -> RoleProfile {
        if let Some(profile) = self.profiles.get(role) {
            return profile.clone();
        }
        let variant = role
            .as_str()
            .split_once('_')
            .map(|(_, rest)| title_case(rest))
            .unwrap_or_default();
        match role.family() {
            Some("DEV") => derived(role, &variant, developer_profile),
            Some("TL") => derived(role, &variant, team_lead_profile),
            _ => generic_profile(role),
        }
    }

    /// Tier of the resolved profile.
    pub fn default_tier(&self, role: &WorkerRole) -> ModelTier {
        self.resolve(role).tier
    }

    /// The system prompt for `role`: the override file if one exists,
    /// otherwise the built-in text.
    pub async fn system_prompt(&self, role: &WorkerRole) -> AgentflowResult<String> {
        let profile = self.resolve(role);
        if let Some(dir) = &self.prompts_dir {
            let path = dir.join(&profile.prompt_file);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return read_prompt(&path).await;
            }
        }
        Ok(format!("{}\n\n{OUTPUT_FORMAT}", profile.system_prompt))
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

async fn read_prompt(path: &Path) -> AgentflowResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        AgentflowError::Config(format!("cannot read prompt {}: {e}", path.display()))
    })
}

fn title_case(tag: &str) -> String {
    let lower = tag.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn derived(role: &WorkerRole, variant: &str, base: fn(&str, &str) -> RoleProfile) -> RoleProfile {
    let mut profile = base(role.as_str(), variant);
    profile.role = role.clone();
    profile
}

fn profile(
    role: &str,
    name: &str,
    description: &str,
    tier: ModelTier,
    capabilities: &[&str],
    prompt_file: &str,
    system_prompt: &str,
) -> RoleProfile {
    RoleProfile {
        role: WorkerRole::new(role),
        name: name.to_string(),
        description: description.to_string(),
        tier,
        capabilities: capabilities.iter().map(|c| (*c).to_string()).collect(),
        prompt_file: prompt_file.to_string(),
        system_prompt: system_prompt.to_string(),
    }
}

fn developer_profile(role: &str, language: &str) -> RoleProfile {
    let lang = language.to_ascii_lowercase();
    profile(
        role,
        &format!("Developer ({language})"),
        &format!("{language} implementation, coding, debugging"),
        ModelTier::Sonnet,
        &["development", lang.as_str(), "implementation"],
        "developer.md",
        DEVELOPER_PROMPT,
    )
}

fn team_lead_profile(role: &str, language: &str) -> RoleProfile {
    let lang = language.to_ascii_lowercase();
    profile(
        role,
        &format!("Team Lead ({language})"),
        &format!("{language} team coordination, code standards, architecture decisions"),
        ModelTier::Sonnet,
        &["team_lead", lang.as_str(), "coordination"],
        "team-lead.md",
        TEAM_LEAD_PROMPT,
    )
}

fn generic_profile(role: &WorkerRole) -> RoleProfile {
    let mut generic = profile(
        role.as_str(),
        role.as_str(),
        "General-purpose worker",
        ModelTier::Sonnet,
        &[],
        "generic.md",
        GENERIC_PROMPT,
    );
    generic.role = role.clone();
    generic
}

/// The built-in role set.
pub fn default_profiles() -> Vec<RoleProfile> {
    vec![
        profile(
            "PM",
            "Product Manager",
            "Requirements gathering, task creation, prioritization",
            ModelTier::Sonnet,
            &["requirements", "task_creation", "prioritization"],
            "product-manager.md",
            PRODUCT_MANAGER_PROMPT,
        ),
        profile(
            "ARCH",
            "Architect",
            "System design, technology selection, API contracts",
            ModelTier::Opus,
            &["system_design", "tech_selection", "api_design"],
            "architect.md",
            ARCHITECT_PROMPT,
        ),
        profile(
            "RESEARCH",
            "Researcher",
            "Investigation, analysis, best practices research",
            ModelTier::Sonnet,
            &["research", "analysis", "evaluation"],
            "researcher.md",
            RESEARCHER_PROMPT,
        ),
        profile(
            "GD",
            "Graphical Designer",
            "Visual design, color schemes, typography, iconography",
            ModelTier::Sonnet,
            &["visual_design", "branding", "graphics"],
            "graphical-designer.md",
            GRAPHICAL_DESIGNER_PROMPT,
        ),
        profile(
            "UIUX",
            "UI/UX Specialist",
            "User flows, wireframes, interaction design, accessibility",
            ModelTier::Sonnet,
            &["ux_design", "wireframes", "accessibility"],
            "uiux-specialist.md",
            UIUX_PROMPT,
        ),
        profile(
            "CQR",
            "Code Quality Reviewer",
            "Code review, best practices, style compliance",
            ModelTier::Sonnet,
            &["code_review", "best_practices", "style"],
            "code-quality-reviewer.md",
            CODE_REVIEWER_PROMPT,
        ),
        profile(
            "SR",
            "Security Reviewer",
            "Security analysis, vulnerability detection, secure coding",
            ModelTier::Opus,
            &["security_audit", "vulnerability_detection"],
            "security-reviewer.md",
            SECURITY_REVIEWER_PROMPT,
        ),
        profile(
            "QE",
            "Quality Engineer",
            "Test planning, requirement validation, coverage analysis",
            ModelTier::Sonnet,
            &["test_planning", "validation", "coverage"],
            "quality-engineer.md",
            QUALITY_ENGINEER_PROMPT,
        ),
        profile(
            "E2E",
            "E2E Tester",
            "End-to-end testing, integration testing, user journeys",
            ModelTier::Sonnet,
            &["e2e_testing", "integration_testing"],
            "e2e-tester.md",
            E2E_TESTER_PROMPT,
        ),
        profile(
            "TQR",
            "Task Quality Reviewer",
            "Task clarity validation, specification completeness",
            ModelTier::Haiku,
            &["task_validation", "clarity_check"],
            "task-quality-reviewer.md",
            TASK_REVIEWER_PROMPT,
        ),
        profile(
            "DOE",
            "DevOps Engineer",
            "CI/CD, infrastructure, deployment",
            ModelTier::Sonnet,
            &["devops", "ci_cd", "infrastructure"],
            "devops-engineer.md",
            DEVOPS_PROMPT,
        ),
        team_lead_profile("TL_PYTHON", "Python"),
        team_lead_profile("TL_JAVASCRIPT", "JavaScript"),
        developer_profile("DEV_PYTHON", "Python"),
        developer_profile("DEV_JAVASCRIPT", "JavaScript"),
    ]
}

const OUTPUT_FORMAT: &str = "\
Reply with exactly one <task_output> block:

<task_output>
  <success>true|false</success>
  <summary>What you did, in a few sentences.</summary>
  <key_decisions>
    <decision>One decision per element.</decision>
  </key_decisions>
  <artifacts>
    <artifact type=\"document|code|diagram\" name=\"file-name\">
      <description>What the artifact is.</description>
      <content><![CDATA[...]]></content>
    </artifact>
  </artifacts>
  <next_tasks>
    <task agent=\"ROLE\" priority=\"low|medium|high\">
      <title>Short title</title>
      <description>What needs doing.</description>
      <acceptance_criteria>
        <criterion>Verifiable condition.</criterion>
      </acceptance_criteria>
    </task>
  </next_tasks>
  <warnings>
    <warning>Risks or open questions.</warning>
  </warnings>
</task_output>

Only propose next_tasks that are necessary. Set success to false if you could not complete the task.
";

const PRODUCT_MANAGER_PROMPT: &str = "\
You are the Product Manager in a multi-agent software team. \
Turn the request in <task_input> into clear requirements: user stories, \
scope boundaries and measurable acceptance criteria. Prioritize ruthlessly \
and flag ambiguities as warnings instead of guessing.";

const ARCHITECT_PROMPT: &str = "\
You are the Architect in a multi-agent software team. \
Design the system described by the requirements and prior work in <task_input>: \
components, data model, API contracts and technology choices. \
Record every significant trade-off as a key decision.";

const RESEARCHER_PROMPT: &str = "\
You are the Researcher in a multi-agent software team. \
Investigate the problem space: existing solutions, relevant libraries, \
known pitfalls and best practices. Report findings concisely and cite \
what each recommendation is based on.";

const GRAPHICAL_DESIGNER_PROMPT: &str = "\
You are the Graphical Designer in a multi-agent software team. \
Define the visual language: color palette, typography, iconography and \
spacing. Produce design tokens other agents can implement directly.";

const UIUX_PROMPT: &str = "\
You are the UI/UX Specialist in a multi-agent software team. \
Design user flows, screen layouts and interaction patterns. \
Accessibility is a requirement, not an afterthought.";

const CODE_REVIEWER_PROMPT: &str = "\
You are the Code Quality Reviewer in a multi-agent software team. \
Review the implementation referenced in <task_input> for correctness, \
readability, consistency and maintainability. Report concrete issues with \
locations; propose follow-up tasks for anything that must be fixed.";

const SECURITY_REVIEWER_PROMPT: &str = "\
You are the Security Reviewer in a multi-agent software team. \
Audit the design and implementation for vulnerabilities: injection, \
authentication and authorization flaws, secrets handling, unsafe \
dependencies. Rate each finding by severity.";

const QUALITY_ENGINEER_PROMPT: &str = "\
You are the Quality Engineer in a multi-agent software team. \
Validate the work against its acceptance criteria, plan tests and \
identify coverage gaps. Fail the task if requirements are not met.";

const E2E_TESTER_PROMPT: &str = "\
You are the E2E Tester in a multi-agent software team. \
Design end-to-end scenarios that exercise complete user journeys across \
components, including failure paths.";

const TASK_REVIEWER_PROMPT: &str = "\
You are the Task Quality Reviewer in a multi-agent software team. \
Check that every planned task is specific, self-contained and has \
verifiable acceptance criteria. Flag vague tasks as warnings.";

const DEVOPS_PROMPT: &str = "\
You are the DevOps Engineer in a multi-agent software team. \
Define build, CI/CD, deployment and infrastructure configuration for the \
system described in <task_input>.";

const TEAM_LEAD_PROMPT: &str = "\
You are a Team Lead in a multi-agent software team. \
Break the design into implementation tasks for developers, set code \
standards and make the architecture decisions that belong to your language \
ecosystem.";

const DEVELOPER_PROMPT: &str = "\
You are a Developer in a multi-agent software team. \
Implement the task in <task_input> following the architecture and \
decisions of your dependencies. Deliver complete, working code as artifacts.";

const GENERIC_PROMPT: &str = "\
You are a specialist worker in a multi-agent software team. \
Complete the task in <task_input> within your role's responsibility.";

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tiers() {
        let registry = RoleRegistry::builtin();
        assert_eq!(registry.list().len(), 15);
        assert_eq!(registry.default_tier(&"ARCH".into()), ModelTier::Opus);
        assert_eq!(registry.default_tier(&"SR".into()), ModelTier::Opus);
        assert_eq!(registry.default_tier(&"TQR".into()), ModelTier::Haiku);
        assert_eq!(registry.default_tier(&"PM".into()), ModelTier::Sonnet);
    }

    #[test]
    fn test_dynamic_roles_resolve_by_family() {
        let registry = RoleRegistry::builtin();

        let dev = registry.resolve(&"DEV_RUST".into());
        assert_eq!(dev.role.as_str(), "DEV_RUST");
        assert_eq!(dev.name, "Developer (Rust)");
        assert_eq!(dev.prompt_file, "developer.md");

        let lead = registry.resolve(&"tl_go".into());
        assert_eq!(lead.name, "Team Lead (Go)");

        let other = registry.resolve(&"DATA_SCIENTIST".into());
        assert_eq!(other.tier, ModelTier::Sonnet);
        assert_eq!(other.prompt_file, "generic.md");
        assert!(registry.get(&"DEV_RUST".into()).is_none());
    }

    #[test]
    fn test_register_replaces_profile() {
        let mut registry = RoleRegistry::builtin();
        let mut pm = registry.resolve(&"PM".into());
        pm.tier = ModelTier::Haiku;
        registry.register(pm);
        assert_eq!(registry.default_tier(&"PM".into()), ModelTier::Haiku);
        assert_eq!(registry.list().len(), 15);
    }

    #[tokio::test]
    async fn test_builtin_prompt_includes_output_format() {
        let prompt = RoleRegistry::builtin()
            .system_prompt(&"ARCH".into())
            .await
            .unwrap();
        assert!(prompt.starts_with("You are the Architect"));
        assert!(prompt.contains("<task_output>"));
    }

    #[tokio::test]
    async fn test_prompt_override_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("developer.md"), "Custom developer prompt").unwrap();
        let registry = RoleRegistry::builtin().with_prompts_dir(dir.path());

        let prompt = registry.system_prompt(&"DEV_RUST".into()).await.unwrap();
        assert_eq!(prompt, "Custom developer prompt");

        // Roles without an override file keep the built-in prompt.
        let pm = registry.system_prompt(&"PM".into()).await.unwrap();
        assert!(pm.contains("Product Manager"));
    }
}
