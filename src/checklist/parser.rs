//! Checklist document parsing.
//!
//! A checklist is a Markdown file. Fenced ```yaml blocks may define
//! `pre-conditions`, `post-conditions` and `acceptance-criteria` lists whose
//! entries are either plain strings or maps. Checkbox lines (`- [ ] ...`)
//! outside code blocks become manual items.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use storyline_common::{ChecklistItem, ChecklistItemType};

use crate::errors::ChecklistError;

static CHECKBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[[ xX]\]\s+(.+?)\s*$").unwrap());

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Text(String),
    Detailed(RawItem),
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default, alias = "item")]
    description: Option<String>,
    #[serde(default)]
    blocker: Option<bool>,
    #[serde(default)]
    validation: Option<String>,
    #[serde(default, alias = "error-message", alias = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChecklist {
    #[serde(default, rename = "pre-conditions", alias = "pre_conditions")]
    pre_conditions: Vec<RawEntry>,
    #[serde(default, rename = "post-conditions", alias = "post_conditions")]
    post_conditions: Vec<RawEntry>,
    #[serde(default, rename = "acceptance-criteria", alias = "acceptance_criteria")]
    acceptance_criteria: Vec<RawEntry>,
}

fn normalize(entry: RawEntry, item_type: ChecklistItemType) -> ChecklistItem {
    match entry {
        // Plain strings double as their own rule text.
        RawEntry::Text(text) => {
            let mut item = ChecklistItem::new(text.clone(), item_type);
            item.validation = Some(text);
            item
        }
        RawEntry::Detailed(raw) => {
            let description = raw
                .description
                .or_else(|| raw.validation.clone())
                .unwrap_or_else(|| format!("unnamed {}", item_type));
            let mut item = ChecklistItem::new(description, item_type);
            if let Some(blocker) = raw.blocker {
                item.blocker = blocker;
            }
            item.validation = raw.validation;
            item.error_message = raw.error_message;
            item
        }
    }
}

/// Contents of every fenced yaml/yml block, in document order.
fn yaml_blocks(content: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in content.lines() {
        let trimmed = line.trim();
        match current.take() {
            Some(lines) if trimmed.starts_with("```") => blocks.push(lines.join("\n")),
            Some(mut lines) => {
                lines.push(line);
                current = Some(lines);
            }
            None if trimmed == "```yaml" || trimmed == "```yml" => current = Some(Vec::new()),
            None => {}
        }
    }
    blocks
}

/// Parse a checklist document into items, YAML items first.
pub fn parse_checklist(name: &str, content: &str) -> Result<Vec<ChecklistItem>, ChecklistError> {
    let mut items = Vec::new();

    for block in yaml_blocks(content) {
        let value: serde_yaml::Value =
            serde_yaml::from_str(&block).map_err(|source| ChecklistError::InvalidYaml {
                name: name.to_string(),
                source,
            })?;
        if !value.is_mapping() {
            continue;
        }
        let raw: RawChecklist =
            serde_yaml::from_value(value).map_err(|source| ChecklistError::InvalidYaml {
                name: name.to_string(),
                source,
            })?;
        let sections = [
            (raw.pre_conditions, ChecklistItemType::PreCondition),
            (raw.post_conditions, ChecklistItemType::PostCondition),
            (raw.acceptance_criteria, ChecklistItemType::AcceptanceCriterion),
        ];
        for (entries, item_type) in sections {
            items.extend(entries.into_iter().map(|e| normalize(e, item_type)));
        }
    }

    let mut in_fence = false;
    for line in content.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = CHECKBOX.captures(line) {
            items.push(ChecklistItem::manual(&caps[1]));
        }
    }

    Ok(items)
}
