//! Execution phase: drive a story's implementation plan to completion.
//!
//! The executor resolves (or creates) the plan, runs every subtask that is
//! not already `done` through the subtask capability, writes status changes
//! back to the plan file as it goes, and finally runs the test suite when the
//! project has a tests directory.
//!
//! Subtask failures never abort the phase: they show up in the progress
//! summary for the QA loop and the recovery system to reason about. Only plan
//! I/O failures end the phase with a failure envelope.

pub mod plan;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use storyline_common::{Artifact, ArtifactKind, Plan, SubtaskStatus};
use tracing::{debug, info, warn};

use crate::capability::{CodeChange, SubtaskOutcome, SubtaskRunner, TestRun, TestRunner};
use crate::context::ExecutionContext;
use crate::executor::{PhaseExecutor, PhaseOutcome, PhaseRun};
use crate::spec_pipeline::{self, DEFAULT_COMPLEXITY};
use crate::util::write_file;

pub use plan::{ResolvedPlan, find_plan, plan_candidates, reset_plan, resolve_plan, save_plan};

pub const PHASE_NAME: &str = "execution";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Progress {
    pub fn of(plan: &Plan) -> Self {
        Self {
            total: plan.subtasks().count(),
            completed: plan.count_with_status(SubtaskStatus::Done),
            failed: plan.count_with_status(SubtaskStatus::Failed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskResult {
    pub id: String,
    pub name: String,
    pub success: bool,
    pub noop: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
}

impl TestResults {
    pub fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn ran(run: TestRun) -> Self {
        Self {
            skipped: false,
            reason: None,
            passed: Some(run.passed),
            exit_code: Some(run.exit_code),
            output_tail: Some(run.output_tail),
        }
    }

    pub fn errored(reason: String) -> Self {
        Self {
            skipped: false,
            reason: Some(reason),
            passed: Some(false),
            ..Self::default()
        }
    }

    /// True only when the suite ran and failed.
    pub fn failed(&self) -> bool {
        self.passed == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub plan_path: PathBuf,
    pub plan_created: bool,
    pub complexity: String,
    pub progress: Progress,
    pub subtask_results: Vec<SubtaskResult>,
    pub code_changes: Vec<CodeChange>,
    pub test_results: TestResults,
}

pub struct ExecutionEngineExecutor {
    subtasks: Arc<dyn SubtaskRunner>,
    tests: Arc<dyn TestRunner>,
    test_dirs: Vec<String>,
    state_dir: PathBuf,
}

impl ExecutionEngineExecutor {
    pub fn new(
        subtasks: Arc<dyn SubtaskRunner>,
        tests: Arc<dyn TestRunner>,
        test_dirs: Vec<String>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            subtasks,
            tests,
            test_dirs,
            state_dir: state_dir.into(),
        }
    }

    /// First configured tests directory that exists in the project.
    fn tests_dir(&self, ctx: &ExecutionContext) -> Option<PathBuf> {
        self.test_dirs
            .iter()
            .map(|d| ctx.project_dir().join(d))
            .find(|p| p.is_dir())
    }

    async fn run_tests(&self, ctx: &ExecutionContext) -> TestResults {
        if self.tests_dir(ctx).is_none() {
            return TestResults::skipped("no_tests_dir");
        }
        if !self.tests.is_available() {
            return TestResults::skipped("no_test_command");
        }
        match self.tests.run(ctx.project_dir()).await {
            Ok(run) => {
                info!(story_id = %ctx.story_id(), passed = run.passed, "Test suite finished");
                TestResults::ran(run)
            }
            Err(e) => {
                warn!(story_id = %ctx.story_id(), error = %e, "Test suite could not run");
                TestResults::errored(e.to_string())
            }
        }
    }
}

/// Spec path and complexity handed forward by the spec phase, if it ran.
fn spec_inputs(ctx: &ExecutionContext) -> (Option<PathBuf>, String) {
    let spec_path = ctx
        .latest_artifact(ArtifactKind::Spec)
        .map(|a| a.path().to_path_buf());
    let complexity = ctx
        .latest_result(spec_pipeline::PHASE_NAME)
        .and_then(|r| r.str_field("complexity"))
        .unwrap_or(DEFAULT_COMPLEXITY)
        .to_string();
    (spec_path, complexity)
}

#[async_trait]
impl PhaseExecutor for ExecutionEngineExecutor {
    type Output = ExecutionOutput;

    fn name(&self) -> &'static str {
        PHASE_NAME
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<PhaseOutcome<ExecutionOutput>> {
        let mut run = PhaseRun::start(PHASE_NAME, ctx);

        if ctx.story_id().is_empty() {
            return Ok(run.fail(ctx, "storyId is required"));
        }

        let ResolvedPlan {
            path: plan_path,
            mut plan,
            created,
        } = match resolve_plan(ctx).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(run.fail(ctx, format!("plan unavailable: {}", e))),
        };

        let (spec_path, complexity) = spec_inputs(ctx);
        let mut subtask_results = Vec::new();
        let mut code_changes = Vec::new();

        let pending: Vec<(String, String)> = plan
            .phases
            .iter()
            .flat_map(|phase| {
                phase
                    .subtasks
                    .iter()
                    .filter(|s| !s.status.is_done())
                    .map(move |s| (phase.name.clone(), s.id.clone()))
            })
            .collect();

        for (phase_name, subtask_id) in pending {
            let Some(subtask) = plan.subtask_mut(&subtask_id) else {
                continue;
            };
            subtask.status = SubtaskStatus::InProgress;
            let subtask = subtask.clone();
            if let Err(e) = save_plan(&plan_path, &plan).await {
                return Ok(run.fail(ctx, format!("failed to update plan: {}", e)));
            }

            let slice = json!({
                "storyId": ctx.story_id(),
                "specPath": spec_path,
                "complexity": complexity,
                "planPhase": phase_name,
            });
            let outcome = match self.subtasks.run_subtask(&subtask, &slice).await {
                Ok(outcome) => outcome,
                Err(e) => SubtaskOutcome::failed(e.to_string()),
            };

            if outcome.noop {
                debug!(subtask = %subtask.id, "No subtask capability, recorded as no-op");
            } else if !outcome.success {
                warn!(
                    story_id = %ctx.story_id(),
                    subtask = %subtask.id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Subtask failed"
                );
            }

            if let Some(entry) = plan.subtask_mut(&subtask_id) {
                entry.status = if outcome.success {
                    SubtaskStatus::Done
                } else {
                    SubtaskStatus::Failed
                };
            }
            if let Err(e) = save_plan(&plan_path, &plan).await {
                return Ok(run.fail(ctx, format!("failed to update plan: {}", e)));
            }

            code_changes.extend(outcome.changes.into_iter().map(|mut change| {
                change.subtask_id = Some(subtask.id.clone());
                change
            }));
            subtask_results.push(SubtaskResult {
                id: subtask.id,
                name: subtask.name,
                success: outcome.success,
                noop: outcome.noop,
                error: outcome.error,
            });
        }

        let progress = Progress::of(&plan);
        run.record_artifact(
            ctx,
            Artifact::new(ArtifactKind::Plan, &plan_path).with_metadata("created", created),
        );

        let progress_path = self
            .state_dir
            .join("progress")
            .join(ctx.story_key())
            .join("progress.json");
        let progress_doc = json!({
            "storyId": ctx.story_id(),
            "planPath": plan_path,
            "progress": progress,
            "subtaskResults": subtask_results,
        });
        write_file(&progress_path, serde_json::to_string_pretty(&progress_doc)?).await?;
        run.record_artifact(
            ctx,
            Artifact::new(ArtifactKind::Progress, &progress_path)
                .with_metadata("completed", progress.completed)
                .with_metadata("failed", progress.failed),
        );

        let test_results = self.run_tests(ctx).await;

        info!(
            story_id = %ctx.story_id(),
            total = progress.total,
            completed = progress.completed,
            failed = progress.failed,
            "Plan execution finished"
        );

        let output = ExecutionOutput {
            plan_path,
            plan_created: created,
            complexity,
            progress,
            subtask_results,
            code_changes,
            test_results,
        };
        Ok(run.complete(ctx, output))
    }
}
