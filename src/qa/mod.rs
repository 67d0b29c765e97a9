//! QA phase: a bounded review → classify → fix loop.
//!
//! Each iteration runs one review (the review capability, or the
//! deterministic fallback checks when none is configured) and classifies the
//! findings into a verdict. Only `needs_revision` continues the loop, and only
//! while iterations remain. A report covering every iteration is written on
//! every exit path.

mod fallback;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use storyline_common::{Artifact, ArtifactKind, Issue, ReviewCycle, Severity, Verdict};
use tracing::{info, warn};

use crate::capability::ReviewCapability;
use crate::context::ExecutionContext;
use crate::executor::{PhaseExecutor, PhaseOutcome, PhaseRun};
use crate::util::{file_stamp, write_file};

pub use fallback::fallback_checks;

pub const PHASE_NAME: &str = "qa";

/// Verdict for one set of findings.
///
/// Any critical issue blocks. Any major issue, or more than `issue_threshold`
/// issues of any severity, needs revision. Everything else is approved.
pub fn classify(issues: &[Issue], issue_threshold: usize) -> Verdict {
    if issues.iter().any(|i| i.severity == Severity::Critical) {
        Verdict::Blocked
    } else if issues.len() > issue_threshold || issues.iter().any(|i| i.severity == Severity::Major) {
        Verdict::NeedsRevision
    } else {
        Verdict::Approved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QaReport {
    pub story_id: String,
    pub verdict: Verdict,
    pub iterations: u32,
    pub max_iterations: u32,
    /// True when the deterministic checks stood in for a reviewer.
    pub fallback: bool,
    pub cycles: Vec<ReviewCycle>,
    pub generated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QaOutput {
    pub verdict: Verdict,
    pub iterations: u32,
    pub cycles: Vec<ReviewCycle>,
    pub report_path: PathBuf,
}

pub struct QALoopExecutor {
    reviewer: Arc<dyn ReviewCapability>,
    max_iterations: u32,
    issue_threshold: usize,
    test_dirs: Vec<String>,
    state_dir: PathBuf,
}

impl QALoopExecutor {
    pub fn new(
        reviewer: Arc<dyn ReviewCapability>,
        max_iterations: u32,
        issue_threshold: usize,
        test_dirs: Vec<String>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            reviewer,
            max_iterations,
            issue_threshold,
            test_dirs,
            state_dir: state_dir.into(),
        }
    }

    async fn review(&self, ctx: &ExecutionContext, iteration: u32) -> (Vec<Issue>, Option<Verdict>) {
        if !self.reviewer.is_available() {
            return (fallback_checks(ctx, &self.test_dirs), None);
        }
        let slice = review_slice(ctx, iteration);
        match self.reviewer.run_review(&slice).await {
            Ok(response) => (response.issues, response.verdict),
            Err(e) => {
                warn!(story_id = %ctx.story_id(), iteration, error = %e, "Review failed");
                (
                    vec![Issue::new("review-error", Severity::Major, e.to_string())],
                    None,
                )
            }
        }
    }

    async fn apply_fixes(&self, ctx: &ExecutionContext, iteration: u32, issues: &[Issue]) {
        if !self.reviewer.is_available() {
            info!(
                story_id = %ctx.story_id(),
                iteration,
                issues = issues.len(),
                "No fix capability configured, issues left for the next review"
            );
            return;
        }
        let slice = review_slice(ctx, iteration);
        match self.reviewer.apply_fixes(issues, &slice).await {
            Ok(()) => info!(story_id = %ctx.story_id(), iteration, issues = issues.len(), "Fixes applied"),
            Err(e) => warn!(story_id = %ctx.story_id(), iteration, error = %e, "Applying fixes failed"),
        }
    }

    async fn write_report(&self, ctx: &ExecutionContext, report: &QaReport) -> Result<PathBuf> {
        let path = self
            .state_dir
            .join("qa")
            .join(ctx.story_key())
            .join(format!("qa-report-{}.json", file_stamp()));
        write_file(&path, serde_json::to_string_pretty(report)?).await?;
        Ok(path)
    }
}

fn review_slice(ctx: &ExecutionContext, iteration: u32) -> serde_json::Value {
    json!({
        "storyId": ctx.story_id(),
        "iteration": iteration,
        "specPath": ctx.latest_artifact(ArtifactKind::Spec).map(|a| a.path()),
        "execution": ctx.latest_result(crate::execution::PHASE_NAME).map(|r| &r.fields),
    })
}

#[async_trait]
impl PhaseExecutor for QALoopExecutor {
    type Output = QaOutput;

    fn name(&self) -> &'static str {
        PHASE_NAME
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<PhaseOutcome<QaOutput>> {
        let mut run = PhaseRun::start(PHASE_NAME, ctx);

        if ctx.story_id().is_empty() {
            return Ok(run.fail(ctx, "storyId is required"));
        }

        let mut verdict = Verdict::NeedsRevision;
        let mut iteration = 0;
        let mut cycles = Vec::new();

        while iteration < self.max_iterations && verdict == Verdict::NeedsRevision {
            iteration += 1;
            let (issues, reported) = self.review(ctx, iteration).await;

            verdict = classify(&issues, self.issue_threshold);
            if let Some(reported) = reported {
                verdict = verdict.stricter(reported);
            }
            info!(
                story_id = %ctx.story_id(),
                iteration,
                verdict = %verdict,
                issues = issues.len(),
                "Review iteration finished"
            );

            if verdict == Verdict::NeedsRevision && iteration < self.max_iterations {
                self.apply_fixes(ctx, iteration, &issues).await;
            }
            cycles.push(ReviewCycle {
                iteration,
                verdict,
                issues,
            });
        }

        let report = QaReport {
            story_id: ctx.story_id().to_string(),
            verdict,
            iterations: iteration,
            max_iterations: self.max_iterations,
            fallback: !self.reviewer.is_available(),
            cycles,
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        let report_path = self.write_report(ctx, &report).await?;
        run.record_artifact(
            ctx,
            Artifact::new(ArtifactKind::QaReport, &report_path)
                .with_metadata("verdict", verdict.to_string())
                .with_metadata("iterations", iteration),
        );

        match verdict {
            Verdict::Approved => Ok(run.complete(
                ctx,
                QaOutput {
                    verdict,
                    iterations: iteration,
                    cycles: report.cycles,
                    report_path,
                },
            )),
            Verdict::Blocked => Ok(run.fail(
                ctx,
                format!("QA blocked in iteration {}: {}", iteration, summarize(&report)),
            )),
            Verdict::NeedsRevision => Ok(run.fail(
                ctx,
                format!(
                    "QA still needs revision after {} iteration(s): {}",
                    iteration,
                    summarize(&report)
                ),
            )),
        }
    }
}

/// Messages of the last cycle's most severe issues, for failure envelopes.
fn summarize(report: &QaReport) -> String {
    let Some(last) = report.cycles.last() else {
        return "no review ran".to_string();
    };
    let Some(worst) = last.issues.iter().map(|i| i.severity).min() else {
        return "no issues reported".to_string();
    };
    last.issues
        .iter()
        .filter(|i| i.severity == worst)
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Verdict recorded on the most recent QA report artifact, if any.
pub fn last_verdict(ctx: &ExecutionContext) -> Option<Verdict> {
    let artifact = ctx.latest_artifact(ArtifactKind::QaReport)?;
    serde_json::from_value(artifact.metadata().get("verdict")?.clone()).ok()
}
