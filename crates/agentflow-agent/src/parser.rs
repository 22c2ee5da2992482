//! Parser for the `<task_output>` block workers are asked to reply with.
//!
//! The format is loose XML produced by a language model, so parsing is
//! regex-based and forgiving. Anything missing becomes an empty value; a reply
//! with no `<task_output>` block at all is reported as unsuccessful.

use crate::executor::FollowUpProposal;
use agentflow_core::{Artifact, Priority, WorkerRole};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Structured content of a worker reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    /// `<success>` read case-insensitively as `true`; false when absent.
    pub success: bool,
    /// `<summary>` text, CDATA unwrapped.
    pub summary: String,
    /// `<decision>` items of `<key_decisions>`.
    pub key_decisions: Vec<String>,
    /// `<artifact type=".." name="..">` items of `<artifacts>`.
    pub artifacts: Vec<Artifact>,
    /// `<task>` items of `<next_tasks>`.
    pub follow_ups: Vec<FollowUpProposal>,
    /// `<warning>` items of `<warnings>`.
    pub warnings: Vec<String>,
}

const NO_OUTPUT_SUMMARY: &str = "Failed to parse response - no task_output found";

/// Every element name the reply format uses.
const ELEMENT_TAGS: &[&str] = &[
    "task_output",
    "success",
    "summary",
    "key_decisions",
    "decision",
    "artifacts",
    "description",
    "content",
    "next_tasks",
    "title",
    "acceptance_criteria",
    "criterion",
    "warnings",
    "warning",
];

#[allow(clippy::expect_used)]
static ELEMENTS: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
    ELEMENT_TAGS
        .iter()
        .map(|tag| {
            let re = Regex::new(&element_pattern(tag)).expect("element pattern is valid");
            (*tag, re)
        })
        .collect()
});

#[allow(clippy::expect_used)]
static ARTIFACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<artifact\s+type="([^"]+)"\s+name="([^"]+)"[^>]*>(.*?)</artifact>"#)
        .expect("artifact pattern is valid")
});

#[allow(clippy::expect_used)]
static NEXT_TASK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<task\s+agent="([^"]+)"\s+priority="([^"]+)"[^>]*>(.*?)</task>"#)
        .expect("next task pattern is valid")
});

/// `<tag ...>inner</tag>`, shortest match, spanning lines.
fn element_pattern(tag: &str) -> String {
    let tag = regex::escape(tag);
    format!(r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>")
}

/// Parse a worker reply. Never fails.
pub fn parse_task_output(reply: &str) -> ParsedOutput {
    let Some(block) = tag_content(reply, "task_output") else {
        return ParsedOutput {
            success: false,
            summary: NO_OUTPUT_SUMMARY.to_string(),
            ..Default::default()
        };
    };

    let success = tag_content(&block, "success")
        .map(|s| s.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    ParsedOutput {
        success,
        summary: tag_content(&block, "summary").unwrap_or_default(),
        key_decisions: list_items(&block, "key_decisions", "decision"),
        artifacts: parse_artifacts(&block),
        follow_ups: parse_follow_ups(&block),
        warnings: list_items(&block, "warnings", "warning"),
    }
}

/// Trimmed inner text of the first `<tag ...>...</tag>`, with CDATA unwrapped.
/// `tag` must be one of [`ELEMENT_TAGS`].
fn tag_content(xml: &str, tag: &str) -> Option<String> {
    let re = ELEMENTS.get(tag)?;
    let inner = re.captures(xml)?.get(1)?.as_str().trim();
    Some(unwrap_cdata(inner).to_string())
}

fn unwrap_cdata(text: &str) -> &str {
    text.strip_prefix("<![CDATA[")
        .and_then(|rest| rest.strip_suffix("]]>"))
        .unwrap_or(text)
}

fn list_items(xml: &str, container: &str, item: &str) -> Vec<String> {
    let Some(body) = tag_content(xml, container) else {
        return Vec::new();
    };
    let Some(re) = ELEMENTS.get(item) else {
        return Vec::new();
    };
    re.captures_iter(&body)
        .filter_map(|c| c.get(1))
        .map(|m| unwrap_cdata(m.as_str().trim()).to_string())
        .collect()
}

fn parse_artifacts(block: &str) -> Vec<Artifact> {
    let Some(body) = tag_content(block, "artifacts") else {
        return Vec::new();
    };
    ARTIFACT
        .captures_iter(&body)
        .map(|c| {
            let inner = c.get(3).map_or("", |m| m.as_str());
            Artifact {
                kind: c[1].to_string(),
                name: c[2].to_string(),
                description: tag_content(inner, "description").unwrap_or_default(),
                content: tag_content(inner, "content").unwrap_or_default(),
            }
        })
        .collect()
}

fn parse_follow_ups(block: &str) -> Vec<FollowUpProposal> {
    let Some(body) = tag_content(block, "next_tasks") else {
        return Vec::new();
    };
    NEXT_TASK
        .captures_iter(&body)
        .map(|c| {
            let inner = c.get(3).map_or("", |m| m.as_str());
            FollowUpProposal {
                role: WorkerRole::new(&c[1]),
                priority: Priority::parse_lenient(&c[2]),
                title: tag_content(inner, "title").unwrap_or_default(),
                description: tag_content(inner, "description").unwrap_or_default(),
                acceptance_criteria: list_items(inner, "acceptance_criteria", "criterion"),
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const FULL_REPLY: &str = r#"Here is my work.
<task_output>
  <success>true</success>
  <summary><![CDATA[Designed the <storage> layer.]]></summary>
  <key_decisions>
    <decision>Use SQLite</decision>
    <decision>WAL mode</decision>
  </key_decisions>
  <artifacts>
    <artifact type="document" name="architecture.md">
      <description>System overview</description>
      <content>## Overview</content>
    </artifact>
  </artifacts>
  <next_tasks>
    <task agent="dev_python" priority="high">
      <title>Implement storage</title>
      <description>Build the repository layer</description>
      <acceptance_criteria>
        <criterion>All CRUD operations covered</criterion>
      </acceptance_criteria>
    </task>
    <task agent="QE" priority="critical">
      <title>Plan tests</title>
    </task>
  </next_tasks>
  <warnings>
    <warning>Schema not final</warning>
  </warnings>
</task_output>"#;

    #[test]
    fn test_parse_full_reply() {
        let parsed = parse_task_output(FULL_REPLY);
        assert!(parsed.success);
        assert_eq!(parsed.summary, "Designed the <storage> layer.");
        assert_eq!(parsed.key_decisions, vec!["Use SQLite", "WAL mode"]);
        assert_eq!(parsed.warnings, vec!["Schema not final"]);

        assert_eq!(parsed.artifacts.len(), 1);
        assert_eq!(parsed.artifacts[0].kind, "document");
        assert_eq!(parsed.artifacts[0].name, "architecture.md");
        assert_eq!(parsed.artifacts[0].description, "System overview");
        assert_eq!(parsed.artifacts[0].content, "## Overview");

        assert_eq!(parsed.follow_ups.len(), 2);
        let first = &parsed.follow_ups[0];
        assert_eq!(first.role.as_str(), "DEV_PYTHON");
        assert_eq!(first.priority, Priority::High);
        assert_eq!(first.acceptance_criteria, vec!["All CRUD operations covered"]);
        assert_eq!(parsed.follow_ups[1].priority, Priority::High);
        assert!(parsed.follow_ups[1].description.is_empty());
    }

    #[test]
    fn test_missing_block_is_unsuccessful() {
        let parsed = parse_task_output("I could not finish the task.");
        assert!(!parsed.success);
        assert_eq!(parsed.summary, NO_OUTPUT_SUMMARY);
    }

    #[test]
    fn test_missing_success_defaults_false() {
        let parsed = parse_task_output("<task_output><summary>Partial</summary></task_output>");
        assert!(!parsed.success);
        assert_eq!(parsed.summary, "Partial");
        assert!(parsed.key_decisions.is_empty());
    }

    #[test]
    fn test_success_case_insensitive() {
        let parsed = parse_task_output("<task_output><success> TRUE </success></task_output>");
        assert!(parsed.success);
    }

    #[test]
    fn test_unclosed_block_is_unsuccessful() {
        let parsed = parse_task_output("<task_output><success>true</success>");
        assert!(!parsed.success);
    }

    #[test]
    fn test_every_element_tag_has_a_pattern() {
        for tag in ELEMENT_TAGS {
            let xml = format!("<{tag} kind=\"x\">\n  inner\n</{tag}>");
            assert_eq!(tag_content(&xml, tag).as_deref(), Some("inner"), "{tag}");
        }
        assert!(tag_content("<other>x</other>", "other").is_none());
    }

    #[test]
    fn test_reparse_is_identical() {
        let first = parse_task_output(FULL_REPLY);
        let second = parse_task_output(FULL_REPLY);
        assert_eq!(first, second);
        assert_eq!(second.follow_ups[0].title, "Implement storage");
    }
}
