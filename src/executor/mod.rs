//! The lifecycle every phase executor shares.
//!
//! An executor's `execute` returns one of exactly two envelopes:
//! `PhaseOutcome::Completed(output)` (serialized as `{success: true, ...output}`)
//! or `PhaseOutcome::Failed { error }` (serialized as `{success: false, error}`).
//! The `Err` side of the surrounding `Result` is reserved for I/O-layer faults
//! such as a full disk; the pipeline driver treats those as fatal.
//!
//! `PhaseRun` implements the start → produce artifacts → complete/fail
//! sequence so executors record their `PhaseResult` and artifacts the same way.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};
use std::time::Instant;
use storyline_common::{Artifact, PhaseResult};
use tracing::{info, warn};

use crate::context::ExecutionContext;

/// Result envelope of one executor run.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome<T> {
    Completed(T),
    Failed { error: String },
}

impl<T> PhaseOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn output(&self) -> Option<&T> {
        match self {
            Self::Completed(output) => Some(output),
            Self::Failed { .. } => None,
        }
    }

    pub fn into_output(self) -> Option<T> {
        match self {
            Self::Completed(output) => Some(output),
            Self::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { error } => Some(error),
        }
    }
}

impl<T: Serialize> PhaseOutcome<T> {
    /// `{success: true, ...payload}` or `{success: false, error}`.
    pub fn to_envelope(&self) -> Value {
        match self {
            Self::Completed(output) => {
                let mut envelope = Map::new();
                envelope.insert("success".into(), Value::Bool(true));
                match serde_json::to_value(output) {
                    Ok(Value::Object(fields)) => envelope.extend(fields),
                    Ok(Value::Null) => {}
                    Ok(other) => {
                        envelope.insert("result".into(), other);
                    }
                    Err(e) => {
                        envelope.insert("serializationError".into(), json!(e.to_string()));
                    }
                }
                Value::Object(envelope)
            }
            Self::Failed { error } => json!({ "success": false, "error": error }),
        }
    }
}

impl<T: Serialize> Serialize for PhaseOutcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_envelope().serialize(serializer)
    }
}

/// A pipeline phase that reads and extends the execution context.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    type Output: Serialize + Send;

    /// Phase name used for phase results and recovery routing.
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<PhaseOutcome<Self::Output>>;
}

/// Book-keeping for one execution of a phase.
pub struct PhaseRun {
    phase: &'static str,
    started_at: Instant,
    artifacts_recorded: usize,
}

impl PhaseRun {
    /// Mark execution begun. Counters start at zero for every run.
    pub fn start(phase: &'static str, ctx: &ExecutionContext) -> Self {
        info!(story_id = %ctx.story_id(), phase, "Phase started");
        Self {
            phase,
            started_at: Instant::now(),
            artifacts_recorded: 0,
        }
    }

    pub fn phase(&self) -> &'static str {
        self.phase
    }

    pub fn artifacts_recorded(&self) -> usize {
        self.artifacts_recorded
    }

    /// Append an artifact produced by this phase to the context.
    pub fn record_artifact(&mut self, ctx: &mut ExecutionContext, artifact: Artifact) {
        self.artifacts_recorded += 1;
        ctx.push_artifact(artifact);
    }

    /// Finish successfully: the serialized output becomes the phase result's fields.
    pub fn complete<T: Serialize>(self, ctx: &mut ExecutionContext, output: T) -> PhaseOutcome<T> {
        let fields = match serde_json::to_value(&output) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        ctx.record_result(PhaseResult::new(self.phase, true).with_fields(fields));
        info!(
            story_id = %ctx.story_id(),
            phase = self.phase,
            artifacts = self.artifacts_recorded,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Phase completed"
        );
        PhaseOutcome::Completed(output)
    }

    /// Finish with an expected failure.
    pub fn fail<T>(self, ctx: &mut ExecutionContext, reason: impl Into<String>) -> PhaseOutcome<T> {
        let error = reason.into();
        ctx.record_result(PhaseResult::new(self.phase, false).with_field("error", error.clone()));
        warn!(
            story_id = %ctx.story_id(),
            phase = self.phase,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            error = %error,
            "Phase failed"
        );
        PhaseOutcome::Failed { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequirementSource;
    use serde::Serialize;
    use storyline_common::ArtifactKind;

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Payload {
        spec_path: String,
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("STORY-1", RequirementSource::Story, "/tmp")
    }

    #[test]
    fn test_complete_envelope_flattens_payload() {
        let mut ctx = ctx();
        let run = PhaseRun::start("spec", &ctx);
        let outcome = run.complete(
            &mut ctx,
            Payload {
                spec_path: "spec.md".into(),
            },
        );
        let envelope = outcome.to_envelope();
        assert_eq!(envelope, json!({"success": true, "specPath": "spec.md"}));
        assert_eq!(ctx.latest_result("spec").unwrap().str_field("specPath"), Some("spec.md"));
    }

    #[test]
    fn test_fail_envelope_and_result() {
        let mut ctx = ctx();
        let run = PhaseRun::start("spec", &ctx);
        let outcome: PhaseOutcome<Payload> = run.fail(&mut ctx, "storyId is required");
        assert!(!outcome.is_success());
        assert_eq!(
            outcome.to_envelope(),
            json!({"success": false, "error": "storyId is required"})
        );
        let result = ctx.latest_result("spec").unwrap();
        assert!(!result.success);
        assert_eq!(result.str_field("error"), Some("storyId is required"));
    }

    #[test]
    fn test_record_artifact_counts_per_run() {
        let mut ctx = ctx();
        let mut run = PhaseRun::start("qa", &ctx);
        run.record_artifact(&mut ctx, Artifact::new(ArtifactKind::QaReport, "r.json"));
        assert_eq!(run.artifacts_recorded(), 1);

        let second = PhaseRun::start("qa", &ctx);
        assert_eq!(second.artifacts_recorded(), 0);
        assert_eq!(ctx.artifacts().len(), 1);
    }
}
