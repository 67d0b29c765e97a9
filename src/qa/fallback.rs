//! Deterministic checks used when no review capability is configured.
//!
//! These can only report `major` or `critical` findings.

use serde_json::Value;
use storyline_common::{ArtifactKind, Issue, Severity};

use crate::context::ExecutionContext;
use crate::execution;

pub fn fallback_checks(ctx: &ExecutionContext, test_dirs: &[String]) -> Vec<Issue> {
    let mut issues = Vec::new();

    if ctx.latest_artifact(ArtifactKind::Spec).is_none() {
        issues.push(Issue::new(
            "missing-spec",
            Severity::Critical,
            "No specification artifact was produced for this story",
        ));
    }

    let has_tests_dir = test_dirs.iter().any(|d| ctx.project_dir().join(d).is_dir());
    if !has_tests_dir {
        issues.push(Issue::new(
            "missing-tests",
            Severity::Major,
            format!("No tests directory found (looked for {})", test_dirs.join(", ")),
        ));
    }

    let execution = ctx
        .latest_result(execution::PHASE_NAME)
        .filter(|r| r.success)
        .map(|r| &r.fields);
    if let Some(fields) = execution {
        let failed = fields
            .get("progress")
            .and_then(|p| p.get("failed"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if failed > 0 {
            issues.push(Issue::new(
                "failed-subtasks",
                Severity::Major,
                format!("{} subtask(s) failed during execution", failed),
            ));
        }

        let tests_failed = fields
            .get("testResults")
            .and_then(|t| t.get("passed"))
            .and_then(Value::as_bool)
            == Some(false);
        if tests_failed {
            issues.push(Issue::new("failed-tests", Severity::Major, "Test suite failed"));
        }
    }

    issues
}
