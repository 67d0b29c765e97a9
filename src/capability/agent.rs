//! Subtask and review capabilities layered on top of an `AgentInvoker`.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use storyline_common::{Issue, Subtask};

use super::{AgentInvoker, ReviewCapability, ReviewResponse, SubtaskOutcome, SubtaskRunner};
use crate::errors::CapabilityError;

pub const IMPLEMENT_SUBTASK: &str = "implement-subtask";
pub const QA_REVIEW: &str = "qa-review";
pub const QA_FIX: &str = "qa-fix";

pub struct AgentSubtaskRunner {
    agent: Arc<dyn AgentInvoker>,
}

impl AgentSubtaskRunner {
    pub fn new(agent: Arc<dyn AgentInvoker>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl SubtaskRunner for AgentSubtaskRunner {
    async fn run_subtask(
        &self,
        subtask: &Subtask,
        slice: &Value,
    ) -> Result<SubtaskOutcome, CapabilityError> {
        if !self.agent.is_available(IMPLEMENT_SUBTASK) {
            return Ok(SubtaskOutcome::noop());
        }

        let request = json!({ "subtask": subtask, "context": slice });
        let response = self.agent.invoke(IMPLEMENT_SUBTASK, &request).await?;

        let changes = response
            .fields
            .get("changes")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        Ok(SubtaskOutcome {
            success: response.success,
            changes,
            error: response.error,
            noop: false,
        })
    }
}

pub struct AgentReviewer {
    agent: Arc<dyn AgentInvoker>,
}

impl AgentReviewer {
    pub fn new(agent: Arc<dyn AgentInvoker>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ReviewCapability for AgentReviewer {
    fn is_available(&self) -> bool {
        self.agent.is_available(QA_REVIEW)
    }

    async fn run_review(&self, slice: &Value) -> Result<ReviewResponse, CapabilityError> {
        let response = self.agent.invoke(QA_REVIEW, slice).await?;
        let fields = Value::Object(response.fields);
        // A reply without a recognizable verdict or issue list counts as no findings.
        Ok(serde_json::from_value(fields).unwrap_or_default())
    }

    async fn apply_fixes(&self, issues: &[Issue], slice: &Value) -> Result<(), CapabilityError> {
        if !self.agent.is_available(QA_FIX) {
            return Ok(());
        }
        let request = json!({ "issues": issues, "context": slice });
        self.agent.invoke(QA_FIX, &request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AgentResponse, ChangeKind};
    use serde_json::Map;
    use std::sync::Mutex;
    use storyline_common::{Severity, Verdict};

    struct ScriptedAgent {
        reply: Value,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentInvoker for ScriptedAgent {
        fn is_available(&self, _sub_phase: &str) -> bool {
            true
        }

        async fn invoke(
            &self,
            sub_phase: &str,
            _slice: &Value,
        ) -> Result<AgentResponse, CapabilityError> {
            self.calls.lock().unwrap().push(sub_phase.to_string());
            Ok(serde_json::from_value(self.reply.clone()).unwrap())
        }
    }

    fn scripted(reply: Value) -> Arc<ScriptedAgent> {
        Arc::new(ScriptedAgent {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_subtask_runner_extracts_changes() {
        let agent = scripted(json!({
            "success": true,
            "changes": [{"path": "src/lib.rs", "kind": "modified"}]
        }));
        let runner = AgentSubtaskRunner::new(agent.clone());
        let outcome = runner
            .run_subtask(&Subtask::new("2.1", "do it"), &json!({}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(!outcome.noop);
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].kind, ChangeKind::Modified);
        assert_eq!(agent.calls.lock().unwrap().as_slice(), [IMPLEMENT_SUBTASK]);
    }

    #[tokio::test]
    async fn test_reviewer_parses_verdict_and_issues() {
        let agent = scripted(json!({
            "success": true,
            "verdict": "needs_revision",
            "issues": [{"type": "test", "severity": "major", "message": "missing test"}]
        }));
        let reviewer = AgentReviewer::new(agent);
        let review = reviewer.run_review(&json!({})).await.unwrap();
        assert_eq!(review.verdict, Some(Verdict::NeedsRevision));
        assert_eq!(review.issues[0].severity, Severity::Major);
    }

    #[tokio::test]
    async fn test_reviewer_tolerates_unstructured_reply() {
        let agent = scripted(Value::Object({
            let mut m = Map::new();
            m.insert("success".into(), json!(true));
            m.insert("verdict".into(), json!("looks fine to me"));
            m
        }));
        let reviewer = AgentReviewer::new(agent);
        let review = reviewer.run_review(&json!({})).await.unwrap();
        assert!(review.verdict.is_none());
        assert!(review.issues.is_empty());
    }
}
