//! Recovery phase: decide what to do about a failed phase.
//!
//! The failure to handle travels in the context's failure slot
//! ([`ExecutionContext::set_failure`]). The executor asks the stuck detector
//! about the story, selects a strategy from the ordered rules in
//! [`strategy`], carries it out, and logs the decision. The decision itself
//! is the phase output; the outer driver acts on it.

pub mod escalation;
pub mod log;
pub mod strategy;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use storyline_common::{Artifact, ArtifactKind, RecoveryDecision, RecoveryStrategy};
use tracing::{info, warn};

use crate::capability::{RollbackManager, StuckDetector};
use crate::context::ExecutionContext;
use crate::executor::{PhaseExecutor, PhaseOutcome, PhaseRun};

pub use escalation::EscalationReport;
pub use log::{HistoryStuckDetector, RecoveryLog, RecoveryLogEntry, error_signature};
pub use strategy::{RecoveryPolicy, Selection, classify_error, select_strategy};

pub const PHASE_NAME: &str = "recovery";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOutput {
    #[serde(flatten)]
    pub decision: RecoveryDecision,
    pub failed_phase: String,
    pub attempts: u32,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_report: Option<PathBuf>,
    pub log_path: PathBuf,
}

pub struct RecoverySystemExecutor {
    stuck_detector: Arc<dyn StuckDetector>,
    rollback: Arc<dyn RollbackManager>,
    policy: RecoveryPolicy,
    state_dir: PathBuf,
}

impl RecoverySystemExecutor {
    pub fn new(
        stuck_detector: Arc<dyn StuckDetector>,
        rollback: Arc<dyn RollbackManager>,
        policy: RecoveryPolicy,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            stuck_detector,
            rollback,
            policy,
            state_dir: state_dir.into(),
        }
    }

    pub fn recovery_dir(&self) -> PathBuf {
        self.state_dir.join("recovery")
    }

    pub fn escalations_dir(&self) -> PathBuf {
        self.state_dir.join("escalations")
    }
}

#[async_trait]
impl PhaseExecutor for RecoverySystemExecutor {
    type Output = RecoveryOutput;

    fn name(&self) -> &'static str {
        PHASE_NAME
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<PhaseOutcome<RecoveryOutput>> {
        let mut run = PhaseRun::start(PHASE_NAME, ctx);

        if ctx.story_id().is_empty() {
            return Ok(run.fail(ctx, "storyId is required"));
        }
        let Some(failure) = ctx.failure().cloned() else {
            return Ok(run.fail(ctx, "no failure to recover from (failedPhase and error are required)"));
        };
        if failure.failed_phase.trim().is_empty() {
            return Ok(run.fail(ctx, "failedPhase is required"));
        }

        let stuck = match self
            .stuck_detector
            .check_status(ctx.story_id(), &failure.failed_phase)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!(story_id = %ctx.story_id(), error = %e, "Stuck detection failed, assuming not stuck");
                Default::default()
            }
        };
        let stuck_reason = stuck
            .is_stuck
            .then(|| stuck.reason.clone().unwrap_or_else(|| "repeating failure".to_string()));

        let selection = select_strategy(
            &self.policy,
            stuck_reason.as_deref(),
            &failure.failed_phase,
            &failure.error,
            failure.attempts,
        );
        info!(
            story_id = %ctx.story_id(),
            phase = %failure.failed_phase,
            attempts = failure.attempts,
            strategy = %selection.strategy,
            reason = %selection.reason,
            "Recovery strategy selected"
        );

        let mut escalation_report = None;
        let decision = match selection.strategy {
            RecoveryStrategy::RetrySameApproach => RecoveryDecision::retry(selection.strategy, false),
            RecoveryStrategy::RollbackAndRetry => {
                if let Err(e) = self.rollback.rollback_last_change().await {
                    warn!(story_id = %ctx.story_id(), error = %e, "Rollback failed, retrying anyway");
                }
                RecoveryDecision::retry(selection.strategy, true)
            }
            RecoveryStrategy::SkipPhase => RecoveryDecision::skip(),
            RecoveryStrategy::EscalateToHuman | RecoveryStrategy::StuckRecovery => {
                let report = EscalationReport {
                    story_id: ctx.story_id().to_string(),
                    failed_phase: failure.failed_phase.clone(),
                    error: failure.error.clone(),
                    attempts: failure.attempts,
                    strategy: selection.strategy,
                    reason: selection.reason.clone(),
                    timestamp: Utc::now(),
                };
                let path = report.write(&self.escalations_dir()).await?;
                warn!(story_id = %ctx.story_id(), path = %path.display(), "Escalated to human");
                run.record_artifact(
                    ctx,
                    Artifact::new(ArtifactKind::EscalationReport, &path)
                        .with_metadata("failedPhase", failure.failed_phase.clone())
                        .with_metadata("attempts", failure.attempts),
                );
                escalation_report = Some(path);
                RecoveryDecision::escalate(selection.strategy)
            }
        };

        let log = RecoveryLog::new(&self.recovery_dir(), ctx.story_id());
        let entry = RecoveryLogEntry {
            story_id: ctx.story_id().to_string(),
            phase: failure.failed_phase.clone(),
            error: failure.error.clone(),
            signature: error_signature(&failure.error),
            attempts: failure.attempts,
            strategy: decision.strategy,
            outcome: decision.outcome().to_string(),
            timestamp: Utc::now(),
        };
        let appended = match log.append(&entry).await {
            Ok(()) => true,
            Err(e) => {
                warn!(story_id = %ctx.story_id(), error = %e, "Could not append to recovery log");
                false
            }
        };
        run.record_artifact(
            ctx,
            Artifact::new(ArtifactKind::RecoveryLog, log.path())
                .with_metadata("strategy", decision.strategy.to_string())
                .with_metadata("outcome", decision.outcome())
                .with_metadata("appended", appended),
        );

        let output = RecoveryOutput {
            decision,
            failed_phase: failure.failed_phase,
            attempts: failure.attempts,
            reason: selection.reason,
            escalation_report,
            log_path: log.path().to_path_buf(),
        };
        Ok(run.complete(ctx, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{NeverStuck, NoRollback, StuckStatus};
    use crate::context::{FailureReport, RequirementSource};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRollback {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RollbackManager for CountingRollback {
        async fn rollback_last_change(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("working tree is locked");
            }
            Ok(())
        }
    }

    struct AlwaysStuck;

    #[async_trait]
    impl StuckDetector for AlwaysStuck {
        async fn check_status(&self, _story_id: &str, _failed_phase: &str) -> Result<StuckStatus> {
            Ok(StuckStatus {
                is_stuck: true,
                reason: Some("same failure three times".into()),
            })
        }
    }

    fn executor(dir: &Path) -> RecoverySystemExecutor {
        RecoverySystemExecutor::new(
            Arc::new(NeverStuck),
            Arc::new(NoRollback),
            RecoveryPolicy::default(),
            dir.join(".storyline"),
        )
    }

    fn failed_ctx(dir: &Path, phase: &str, error: &str, attempts: u32) -> ExecutionContext {
        let mut ctx = ExecutionContext::new("STORY-9", RequirementSource::Story, dir);
        ctx.set_failure(FailureReport {
            failed_phase: phase.into(),
            error: error.into(),
            attempts,
        });
        ctx
    }

    #[tokio::test]
    async fn test_syntax_error_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let rollback = Arc::new(CountingRollback {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let exec = RecoverySystemExecutor::new(
            Arc::new(NeverStuck),
            rollback.clone(),
            RecoveryPolicy::default(),
            dir.path().join(".storyline"),
        );
        let mut ctx = failed_ctx(dir.path(), "execution", "SyntaxError: Unexpected token", 1);

        let outcome = exec.execute(&mut ctx).await.unwrap();
        let envelope = outcome.to_envelope();
        assert_eq!(envelope["shouldRetry"], true);
        assert_eq!(envelope["newApproach"], true);
        assert_eq!(envelope["strategy"], "rollback-and-retry");
        assert_eq!(rollback.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.artifacts_of(ArtifactKind::RecoveryLog).count(), 1);
        assert_eq!(ctx.artifacts_of(ArtifactKind::EscalationReport).count(), 0);
    }

    #[tokio::test]
    async fn test_rollback_failure_does_not_block_retry() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecoverySystemExecutor::new(
            Arc::new(NeverStuck),
            Arc::new(CountingRollback {
                calls: AtomicUsize::new(0),
                fail: true,
            }),
            RecoveryPolicy::default(),
            dir.path().join(".storyline"),
        );
        let mut ctx = failed_ctx(dir.path(), "execution", "Cannot find module 'x'", 0);

        let output = exec.execute(&mut ctx).await.unwrap().into_output().unwrap();
        assert!(output.decision.should_retry);
        assert!(output.decision.new_approach);
    }

    #[tokio::test]
    async fn test_first_failure_retries_same_approach() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = failed_ctx(dir.path(), "spec", "agent timed out", 0);
        let output = executor(dir.path()).execute(&mut ctx).await.unwrap().into_output().unwrap();
        assert_eq!(output.decision, RecoveryDecision::retry(RecoveryStrategy::RetrySameApproach, false));
        assert_eq!(output.reason, "first failure");
    }

    #[tokio::test]
    async fn test_unwritable_log_is_flagged_on_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join(".storyline");
        std::fs::create_dir_all(&state).unwrap();
        std::fs::write(state.join("recovery"), "not a directory").unwrap();
        let mut ctx = failed_ctx(dir.path(), "spec", "agent timed out", 0);

        let output = executor(dir.path()).execute(&mut ctx).await.unwrap().into_output().unwrap();
        assert!(output.decision.should_retry);
        let artifact = ctx.artifacts_of(ArtifactKind::RecoveryLog).next().unwrap();
        assert_eq!(artifact.metadata()["appended"], false);
        assert!(!artifact.path().exists());
    }

    #[tokio::test]
    async fn test_exhausted_attempts_escalate_with_one_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = failed_ctx(dir.path(), "qa", "Cannot find module 'x'", 3);

        let output = executor(dir.path()).execute(&mut ctx).await.unwrap().into_output().unwrap();
        assert!(output.decision.escalated);
        assert!(!output.decision.should_retry);
        assert_eq!(output.decision.strategy, RecoveryStrategy::EscalateToHuman);

        let reports: Vec<_> = ctx.artifacts_of(ArtifactKind::EscalationReport).collect();
        assert_eq!(reports.len(), 1);
        let md = std::fs::read_to_string(reports[0].path()).unwrap();
        assert!(md.contains("STORY-9"));
        assert!(md.contains("| Failed phase | qa |"));
        assert!(md.contains("| Attempts | 3 |"));
        assert_eq!(ctx.artifacts_of(ArtifactKind::RecoveryLog).count(), 1);
    }

    #[tokio::test]
    async fn test_stuck_always_escalates() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecoverySystemExecutor::new(
            Arc::new(AlwaysStuck),
            Arc::new(NoRollback),
            RecoveryPolicy::default(),
            dir.path().join(".storyline"),
        );
        let mut ctx = failed_ctx(dir.path(), "execution", "AssertionError", 0);

        let output = exec.execute(&mut ctx).await.unwrap().into_output().unwrap();
        assert_eq!(output.decision.strategy, RecoveryStrategy::StuckRecovery);
        assert!(output.decision.escalated);
        assert!(output.escalation_report.unwrap().exists());
    }

    #[tokio::test]
    async fn test_skippable_phase() {
        let dir = tempfile::tempdir().unwrap();
        let exec = RecoverySystemExecutor::new(
            Arc::new(NeverStuck),
            Arc::new(NoRollback),
            RecoveryPolicy {
                max_attempts: 3,
                skippable_phases: vec!["qa".into()],
            },
            dir.path().join(".storyline"),
        );
        let mut ctx = failed_ctx(dir.path(), "qa", "review failed", 0);
        let envelope = exec.execute(&mut ctx).await.unwrap().to_envelope();
        assert_eq!(envelope["skipped"], true);
        assert_eq!(envelope["shouldRetry"], false);
    }

    #[tokio::test]
    async fn test_every_invocation_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(dir.path());
        for attempts in 0..3 {
            let mut ctx = failed_ctx(dir.path(), "execution", "boom", attempts);
            exec.execute(&mut ctx).await.unwrap();
        }
        let entries = RecoveryLog::new(&exec.recovery_dir(), "STORY-9").entries().await.unwrap();
        let outcomes: Vec<_> = entries.iter().map(|e| e.strategy).collect();
        assert_eq!(
            outcomes,
            [
                RecoveryStrategy::RetrySameApproach,
                RecoveryStrategy::RollbackAndRetry,
                RecoveryStrategy::RollbackAndRetry,
            ]
        );
    }

    #[tokio::test]
    async fn test_history_detector_escalates_repeated_failure() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join(".storyline");
        let exec = RecoverySystemExecutor::new(
            Arc::new(HistoryStuckDetector::new(state_dir.join("recovery"), 2)),
            Arc::new(NoRollback),
            RecoveryPolicy {
                max_attempts: 10,
                skippable_phases: Vec::new(),
            },
            &state_dir,
        );
        let mut last = None;
        for attempts in 0..3 {
            let mut ctx = failed_ctx(dir.path(), "execution", "link error at 0x1f", attempts);
            last = exec.execute(&mut ctx).await.unwrap().into_output();
        }
        assert_eq!(last.unwrap().decision.strategy, RecoveryStrategy::StuckRecovery);
    }

    #[tokio::test]
    async fn test_missing_failure_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ExecutionContext::new("STORY-9", RequirementSource::Story, dir.path());
        let outcome = executor(dir.path()).execute(&mut ctx).await.unwrap();
        assert!(outcome.error().unwrap().contains("failedPhase"));
        assert!(ctx.artifacts().is_empty());
    }
}
