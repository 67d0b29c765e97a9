//! Outer driver: spec → execution → QA, with failures routed to recovery.
//!
//! Phases run strictly one after another against a single context. When a
//! phase fails, the driver fills the context's failure slot and runs the
//! recovery executor, then acts on its decision:
//!
//! - retry: run the failed phase again, or for a QA failure that asks for a
//!   new approach, reset the plan and go back to execution first
//! - skip: move on to the next phase
//! - escalate: stop
//!
//! A `blocked` QA verdict stops the run without recovery.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use storyline_common::Verdict;
use tracing::{error, info, warn};

use crate::capability::Capabilities;
use crate::config::Config;
use crate::context::{ExecutionContext, FailureReport, StoryLock};
use crate::execution::{self, ExecutionEngineExecutor};
use crate::executor::PhaseExecutor;
use crate::qa::{self, QALoopExecutor};
use crate::recovery::{RecoveryPolicy, RecoverySystemExecutor};
use crate::spec_pipeline::SpecPipelineExecutor;
use crate::util::{file_stamp, write_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Spec,
    Execution,
    Qa,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Spec => crate::spec_pipeline::PHASE_NAME,
            Stage::Execution => crate::execution::PHASE_NAME,
            Stage::Qa => qa::PHASE_NAME,
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Spec => Some(Stage::Execution),
            Stage::Execution => Some(Stage::Qa),
            Stage::Qa => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Every phase completed or was skipped.
    Completed,
    /// Recovery handed the story to a human.
    Escalated,
    /// QA found a critical issue.
    Blocked,
    /// Recovery itself could not decide.
    Stopped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Escalated => "escalated",
            RunStatus::Blocked => "blocked",
            RunStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub story_id: String,
    pub status: RunStatus,
    pub completed_phases: Vec<String>,
    pub skipped_phases: Vec<String>,
    /// Recovery attempts per phase name.
    pub attempts: BTreeMap<String, u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary_path: PathBuf,
}

pub fn recovery_executor(config: &Config, caps: &Capabilities) -> RecoverySystemExecutor {
    RecoverySystemExecutor::new(
        caps.stuck_detector.clone(),
        caps.rollback.clone(),
        RecoveryPolicy {
            max_attempts: config.recovery().max_attempts,
            skippable_phases: config.recovery().skippable_phases.clone(),
        },
        &config.state_dir,
    )
}

pub struct Pipeline {
    spec: SpecPipelineExecutor,
    execution: ExecutionEngineExecutor,
    qa: QALoopExecutor,
    recovery: RecoverySystemExecutor,
    lock_dir: PathBuf,
    runs_dir: PathBuf,
}

impl Pipeline {
    pub fn new(config: &Config, caps: Capabilities) -> Self {
        let test_dirs = config.tests().dirs.clone();
        Self {
            spec: SpecPipelineExecutor::new(caps.agent.clone()),
            execution: ExecutionEngineExecutor::new(
                caps.subtasks.clone(),
                caps.tests.clone(),
                test_dirs.clone(),
                &config.state_dir,
            ),
            qa: QALoopExecutor::new(
                caps.reviewer.clone(),
                config.qa().max_iterations,
                config.qa().issue_threshold,
                test_dirs,
                &config.state_dir,
            ),
            recovery: recovery_executor(config, &caps),
            lock_dir: config.lock_dir(),
            runs_dir: config.state_dir.join("runs"),
        }
    }

    /// Run one stage. `Ok(None)` on success, `Ok(Some(error))` on a failure envelope.
    async fn run_stage(&self, stage: Stage, ctx: &mut ExecutionContext) -> Result<Option<String>> {
        let error = match stage {
            Stage::Spec => self.spec.execute(ctx).await?.error().map(str::to_string),
            Stage::Execution => self.execution.execute(ctx).await?.error().map(str::to_string),
            Stage::Qa => self.qa.execute(ctx).await?.error().map(str::to_string),
        };
        Ok(error)
    }

    /// Drive the story through every phase. `Err` means an I/O fault or that
    /// the story is already being run elsewhere.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> Result<RunSummary> {
        let _lock = StoryLock::acquire(&self.lock_dir, ctx.story_id())?;
        info!(story_id = %ctx.story_id(), "Pipeline started");

        let mut stage = Some(Stage::Spec);
        let mut attempts: BTreeMap<Stage, u32> = BTreeMap::new();
        let mut completed = Vec::new();
        let mut skipped = Vec::new();
        let mut last_error = None;

        let status = loop {
            let Some(current) = stage else {
                break RunStatus::Completed;
            };
            let Some(failure) = self.run_stage(current, ctx).await? else {
                completed.push(current.name().to_string());
                stage = current.next();
                continue;
            };
            last_error = Some(failure.clone());

            if current == Stage::Qa && qa::last_verdict(ctx) == Some(Verdict::Blocked) {
                warn!(story_id = %ctx.story_id(), "QA blocked, stopping without recovery");
                break RunStatus::Blocked;
            }

            let used = attempts.get(&current).copied().unwrap_or(0);
            ctx.set_failure(FailureReport {
                failed_phase: current.name().to_string(),
                error: failure,
                attempts: used,
            });
            let outcome = self.recovery.execute(ctx).await?;
            ctx.clear_failure();
            attempts.insert(current, used + 1);

            let Some(recovery) = outcome.into_output() else {
                error!(story_id = %ctx.story_id(), phase = current.name(), "Recovery could not run");
                break RunStatus::Stopped;
            };
            let decision = recovery.decision;
            if decision.escalated {
                break RunStatus::Escalated;
            }
            if decision.skipped {
                skipped.push(current.name().to_string());
                stage = current.next();
                continue;
            }
            if !decision.should_retry {
                break RunStatus::Stopped;
            }
            stage = if current == Stage::Qa && decision.new_approach {
                Some(Stage::Execution)
            } else {
                Some(current)
            };
            if decision.new_approach
                && stage == Some(Stage::Execution)
                && let Err(e) = execution::reset_plan(ctx).await
            {
                warn!(story_id = %ctx.story_id(), error = %e, "Failed to reset plan for new approach");
            }
            info!(
                story_id = %ctx.story_id(),
                failed = current.name(),
                next = stage.map(|s| s.name()).unwrap_or("none"),
                strategy = %decision.strategy,
                "Retrying after recovery"
            );
        };

        if status == RunStatus::Completed {
            last_error = None;
        }
        let summary_path = self
            .runs_dir
            .join(ctx.story_key())
            .join(format!("run-{}.json", file_stamp()));
        let summary = RunSummary {
            story_id: ctx.story_id().to_string(),
            status,
            completed_phases: completed,
            skipped_phases: skipped,
            attempts: attempts
                .into_iter()
                .map(|(stage, n)| (stage.name().to_string(), n))
                .collect(),
            error: last_error,
            summary_path: summary_path.clone(),
        };
        let document = serde_json::json!({
            "summary": summary,
            "context": ctx,
        });
        write_file(&summary_path, serde_json::to_string_pretty(&document)?).await?;

        info!(story_id = %ctx.story_id(), status = %status, "Pipeline finished");
        Ok(summary)
    }
}
