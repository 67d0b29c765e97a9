//! External collaborators the executors delegate real work to.
//!
//! Every capability is an async trait with a null-object implementation, so an
//! executor never has to ask "is there an agent?" before calling one. The null
//! objects preserve skip-don't-crash behaviour: sub-phases are skipped,
//! subtasks become no-op successes, reviews fall back to deterministic checks.
//!
//! | Trait              | Real implementation     | Null object            |
//! |--------------------|-------------------------|------------------------|
//! | `AgentInvoker`     | `CommandAgent`          | `Unavailable`          |
//! | `SubtaskRunner`    | `AgentSubtaskRunner`    | `NoopSubtaskRunner`    |
//! | `ReviewCapability` | `AgentReviewer`         | `Unavailable`          |
//! | `StuckDetector`    | `HistoryStuckDetector`  | `NeverStuck`           |
//! | `RollbackManager`  | `GitRollback`           | `NoRollback`           |
//! | `TestRunner`       | `CommandTestRunner`     | `Unavailable`          |

pub mod agent;
pub mod command;
pub mod git;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use storyline_common::{Issue, Subtask, Verdict};

use crate::config::{Config, RollbackMode};
use crate::errors::CapabilityError;
use crate::recovery::log::HistoryStuckDetector;

pub use agent::{AgentReviewer, AgentSubtaskRunner};
pub use command::{CommandAgent, CommandTestRunner};
pub use git::GitRollback;

/// Reply from an agent for one sub-phase: `{success, error?, ...extractedFields}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AgentResponse {
    pub fn ok(fields: Map<String, Value>) -> Self {
        Self {
            success: true,
            error: None,
            fields,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            fields: Map::new(),
        }
    }
}

/// Invokes an AI agent for a named sub-phase.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Whether this invoker can handle `sub_phase` at all.
    fn is_available(&self, sub_phase: &str) -> bool;

    async fn invoke(&self, sub_phase: &str, slice: &Value)
    -> Result<AgentResponse, CapabilityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

/// One file touched while executing a subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChange {
    pub path: String,
    pub kind: ChangeKind,
    /// Subtask that produced the change, filled in by the execution engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskOutcome {
    pub success: bool,
    #[serde(default)]
    pub changes: Vec<CodeChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when nothing actually ran (no subtask capability).
    #[serde(default)]
    pub noop: bool,
}

impl SubtaskOutcome {
    pub fn noop() -> Self {
        Self {
            success: true,
            changes: Vec::new(),
            error: None,
            noop: true,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            changes: Vec::new(),
            error: Some(error.into()),
            noop: false,
        }
    }
}

/// Executes one plan subtask.
#[async_trait]
pub trait SubtaskRunner: Send + Sync {
    async fn run_subtask(
        &self,
        subtask: &Subtask,
        slice: &Value,
    ) -> Result<SubtaskOutcome, CapabilityError>;
}

/// Records every subtask as a successful no-op so plan bookkeeping stays consistent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSubtaskRunner;

#[async_trait]
impl SubtaskRunner for NoopSubtaskRunner {
    async fn run_subtask(
        &self,
        _subtask: &Subtask,
        _slice: &Value,
    ) -> Result<SubtaskOutcome, CapabilityError> {
        Ok(SubtaskOutcome::noop())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewResponse {
    /// Verdict reported by the reviewer, if it gave one.
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

/// Reviews the current state of a story and applies fixes for its findings.
#[async_trait]
pub trait ReviewCapability: Send + Sync {
    fn is_available(&self) -> bool;

    async fn run_review(&self, slice: &Value) -> Result<ReviewResponse, CapabilityError>;

    async fn apply_fixes(&self, issues: &[Issue], slice: &Value) -> Result<(), CapabilityError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StuckStatus {
    pub is_stuck: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Detects circular failure patterns for a story/phase.
#[async_trait]
pub trait StuckDetector: Send + Sync {
    async fn check_status(&self, story_id: &str, failed_phase: &str) -> Result<StuckStatus>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverStuck;

#[async_trait]
impl StuckDetector for NeverStuck {
    async fn check_status(&self, _story_id: &str, _failed_phase: &str) -> Result<StuckStatus> {
        Ok(StuckStatus::default())
    }
}

/// Undoes the most recent change to the working tree. Best-effort.
#[async_trait]
pub trait RollbackManager: Send + Sync {
    async fn rollback_last_change(&self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRollback;

#[async_trait]
impl RollbackManager for NoRollback {
    async fn rollback_last_change(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub passed: bool,
    pub exit_code: i32,
    /// Last lines of combined output, for reports.
    pub output_tail: String,
}

/// Runs the project's test suite.
#[async_trait]
pub trait TestRunner: Send + Sync {
    fn is_available(&self) -> bool;

    async fn run(&self, project_dir: &Path) -> Result<TestRun, CapabilityError>;
}

/// Null object for capabilities that are not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

#[async_trait]
impl AgentInvoker for Unavailable {
    fn is_available(&self, _sub_phase: &str) -> bool {
        false
    }

    async fn invoke(
        &self,
        sub_phase: &str,
        _slice: &Value,
    ) -> Result<AgentResponse, CapabilityError> {
        Ok(AgentResponse::failed(format!(
            "no agent available for {}",
            sub_phase
        )))
    }
}

#[async_trait]
impl ReviewCapability for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    async fn run_review(&self, _slice: &Value) -> Result<ReviewResponse, CapabilityError> {
        Ok(ReviewResponse::default())
    }

    async fn apply_fixes(&self, _issues: &[Issue], _slice: &Value) -> Result<(), CapabilityError> {
        Ok(())
    }
}

#[async_trait]
impl TestRunner for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    async fn run(&self, _project_dir: &Path) -> Result<TestRun, CapabilityError> {
        Ok(TestRun {
            passed: true,
            exit_code: 0,
            output_tail: String::new(),
        })
    }
}

/// The full set of collaborators handed to the executors.
#[derive(Clone)]
pub struct Capabilities {
    pub agent: Arc<dyn AgentInvoker>,
    pub subtasks: Arc<dyn SubtaskRunner>,
    pub reviewer: Arc<dyn ReviewCapability>,
    pub stuck_detector: Arc<dyn StuckDetector>,
    pub rollback: Arc<dyn RollbackManager>,
    pub tests: Arc<dyn TestRunner>,
}

impl Capabilities {
    /// Every capability absent.
    pub fn unavailable() -> Self {
        Self {
            agent: Arc::new(Unavailable),
            subtasks: Arc::new(NoopSubtaskRunner),
            reviewer: Arc::new(Unavailable),
            stuck_detector: Arc::new(NeverStuck),
            rollback: Arc::new(NoRollback),
            tests: Arc::new(Unavailable),
        }
    }

    /// Wire up real implementations for whatever the config enables.
    pub fn from_config(config: &Config) -> Self {
        let mut caps = Self::unavailable();

        if let Some(command) = &config.agent().command {
            let agent: Arc<dyn AgentInvoker> = Arc::new(CommandAgent::new(
                command,
                config.agent().args.clone(),
                &config.project_dir,
                config.agent().timeout_secs,
            ));
            caps.subtasks = Arc::new(AgentSubtaskRunner::new(agent.clone()));
            caps.reviewer = Arc::new(AgentReviewer::new(agent.clone()));
            caps.agent = agent;
        }

        caps.stuck_detector = Arc::new(HistoryStuckDetector::new(
            config.state_dir.join("recovery"),
            config.recovery().stuck_threshold,
        ));

        if config.recovery().rollback == RollbackMode::Git {
            caps.rollback = Arc::new(GitRollback::new(&config.project_dir));
        }

        if let Some(command) = &config.tests().command {
            caps.tests = Arc::new(CommandTestRunner::new(command, config.agent().timeout_secs));
        }

        caps
    }

    pub fn with_agent(mut self, agent: Arc<dyn AgentInvoker>) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_subtasks(mut self, runner: Arc<dyn SubtaskRunner>) -> Self {
        self.subtasks = runner;
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn ReviewCapability>) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn with_stuck_detector(mut self, detector: Arc<dyn StuckDetector>) -> Self {
        self.stuck_detector = detector;
        self
    }

    pub fn with_rollback(mut self, rollback: Arc<dyn RollbackManager>) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn with_tests(mut self, tests: Arc<dyn TestRunner>) -> Self {
        self.tests = tests;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_response_flattens_extra_fields() {
        let response: AgentResponse = serde_json::from_str(
            r#"{"success": true, "complexity": "COMPLEX", "requirements": ["a", "b"]}"#,
        )
        .unwrap();
        assert!(response.success);
        assert!(response.error.is_none());
        assert_eq!(response.fields["complexity"], "COMPLEX");
        assert_eq!(response.fields["requirements"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_null_objects() {
        assert!(!AgentInvoker::is_available(&Unavailable, "write-spec"));
        let outcome = NoopSubtaskRunner
            .run_subtask(&Subtask::new("1", "x"), &Value::Null)
            .await
            .unwrap();
        assert!(outcome.success && outcome.noop);
        assert!(!NeverStuck.check_status("S", "qa").await.unwrap().is_stuck);
        assert!(NoRollback.rollback_last_change().await.is_ok());
    }

    #[test]
    fn test_from_config_without_agent_keeps_null_agent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_settings(
            dir.path().to_path_buf(),
            crate::config::StorylineToml::default(),
            false,
        );
        let caps = Capabilities::from_config(&config);
        assert!(!caps.agent.is_available("write-spec"));
        assert!(!caps.reviewer.is_available());
        assert!(!caps.tests.is_available());
    }
}
