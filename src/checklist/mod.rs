//! Deterministic checklist evaluation.
//!
//! `ChecklistRunner::run(name, targets)` loads `<checklists_dir>/<name>.md`,
//! parses it into items and evaluates every recognizable rule against each
//! target path. Overall success only depends on blocker items; failing
//! non-blockers are reported as warnings.

pub mod parser;
pub mod rules;

use serde::Serialize;
use std::path::PathBuf;
use storyline_common::{ChecklistItem, ChecklistItemType};
use tracing::{debug, info};

use crate::errors::ChecklistError;

pub use parser::parse_checklist;
pub use rules::{Rule, parse_rule};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    #[serde(flatten)]
    pub item: ChecklistItem,
    pub passed: bool,
    /// True when no rule could be checked automatically.
    pub manual: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistResult {
    pub name: String,
    pub passed: bool,
    pub items: Vec<ItemResult>,
    pub warnings: Vec<String>,
}

impl ChecklistResult {
    pub fn failed_blockers(&self) -> impl Iterator<Item = &ItemResult> {
        self.items.iter().filter(|r| r.item.blocker && !r.passed)
    }
}

pub struct ChecklistRunner {
    dir: PathBuf,
}

impl ChecklistRunner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        let file = if name.ends_with(".md") {
            name.to_string()
        } else {
            format!("{}.md", name)
        };
        self.dir.join(file)
    }

    /// Parse a checklist by name without evaluating it.
    pub async fn load(&self, name: &str) -> Result<Vec<ChecklistItem>, ChecklistError> {
        let path = self.path_for(name);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChecklistError::NotFound {
                    name: name.to_string(),
                    dir: self.dir.clone(),
                });
            }
            Err(source) => return Err(ChecklistError::Io { path, source }),
        };
        parse_checklist(name, &content)
    }

    pub async fn run(&self, name: &str, targets: &[PathBuf]) -> Result<ChecklistResult, ChecklistError> {
        let items = self.load(name).await?;
        let result = evaluate(name, items, targets).await;
        info!(
            checklist = name,
            passed = result.passed,
            items = result.items.len(),
            warnings = result.warnings.len(),
            "Checklist evaluated"
        );
        Ok(result)
    }
}

async fn evaluate_item(item: &ChecklistItem, targets: &[PathBuf]) -> (bool, bool, Option<String>) {
    if item.item_type == ChecklistItemType::Manual {
        return (true, true, None);
    }
    let Some(rule) = item.validation.as_deref().and_then(parse_rule) else {
        debug!(item = %item.description, "No checkable rule, manual verification");
        return (true, true, None);
    };
    for target in targets {
        if let Err(reason) = rule.check(target).await {
            let message = item.error_message.clone().unwrap_or(reason);
            return (false, false, Some(message));
        }
    }
    (true, false, None)
}

/// Evaluate parsed items against the target paths.
///
/// A rule must hold for every target; with no targets it holds vacuously.
pub async fn evaluate(name: &str, items: Vec<ChecklistItem>, targets: &[PathBuf]) -> ChecklistResult {
    let mut results = Vec::with_capacity(items.len());
    let mut warnings = Vec::new();
    let mut passed = true;

    for item in items {
        let (ok, manual, message) = evaluate_item(&item, targets).await;
        if !ok {
            let detail = message.as_deref().unwrap_or("failed");
            if item.blocker {
                passed = false;
            } else {
                warnings.push(format!("{} ({}): {}", item.description, item.item_type, detail));
            }
        }
        results.push(ItemResult {
            item,
            passed: ok,
            manual,
            message,
        });
    }

    ChecklistResult {
        name: name.to_string(),
        passed,
        items: results,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn item(description: &str, blocker: bool, validation: &str) -> ChecklistItem {
        let mut item = ChecklistItem::new(description, ChecklistItemType::PostCondition);
        item.blocker = blocker;
        item.validation = Some(validation.to_string());
        item
    }

    #[tokio::test]
    async fn test_one_failing_blocker_fails_overall() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, "hello").unwrap();

        let mut items = vec![item("must be big", true, "minimum-size 1000")];
        for i in 0..5 {
            items.push(item(&format!("passes {}", i), false, "file-exists"));
        }
        let result = evaluate("gate", items, &[target]).await;
        assert!(!result.passed);
        assert_eq!(result.failed_blockers().count(), 1);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_failing_non_blockers_only_warn() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.txt");
        std::fs::write(&target, "hello").unwrap();

        let mut failing = item("has heading", false, "contains \"# Title\"");
        failing.error_message = Some("Add a title".into());
        let items = vec![item("exists", true, "file-exists"), failing, item("big", false, "minimum-size 99")];
        let result = evaluate("gate", items, &[target]).await;
        assert!(result.passed);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.warnings[0], "has heading (post-condition): Add a title");
    }

    #[tokio::test]
    async fn test_rule_must_hold_for_every_target() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "x").unwrap();
        let b = dir.path().join("b.txt");

        let result = evaluate("gate", vec![item("exists", true, "file-exists")], &[a, b]).await;
        assert!(!result.passed);

        let vacuous = evaluate("gate", vec![item("exists", true, "file-exists")], &[]).await;
        assert!(vacuous.passed);
    }

    #[tokio::test]
    async fn test_unrecognized_and_manual_items_pass() {
        let items = vec![
            item("reviewed", true, "Reviewed by the team lead"),
            ChecklistItem::manual("Demo recorded"),
        ];
        let result = evaluate("gate", items, &[PathBuf::from("/nonexistent")]).await;
        assert!(result.passed);
        assert!(result.items.iter().all(|r| r.passed && r.manual));
    }

    #[tokio::test]
    async fn test_runner_loads_by_name() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("definition-of-done.md"),
            "```yaml\npre-conditions:\n  - file-exists\n```\n- [ ] Demo to stakeholders\n",
        )
        .unwrap();
        let target = dir.path().join("definition-of-done.md");
        let runner = ChecklistRunner::new(dir.path());

        let result = runner.run("definition-of-done", &[target.clone()]).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.items.len(), 2);

        let same = runner.run("definition-of-done.md", &[target]).await.unwrap();
        assert_eq!(same.items.len(), 2);

        let err = runner.run("missing", &[]).await.unwrap_err();
        assert!(matches!(err, ChecklistError::NotFound { .. }));
    }
}
