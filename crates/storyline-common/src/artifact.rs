//! Artifacts and per-phase results recorded on an execution context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of durable file a phase produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Spec,
    Plan,
    Progress,
    QaReport,
    EscalationReport,
    RecoveryLog,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spec => "spec",
            Self::Plan => "plan",
            Self::Progress => "progress",
            Self::QaReport => "qa-report",
            Self::EscalationReport => "escalation-report",
            Self::RecoveryLog => "recovery-log",
        };
        write!(f, "{}", s)
    }
}

/// A typed file produced by a phase and referenced by later phases.
///
/// Artifacts are immutable once built: the builder methods consume `self`,
/// and nothing hands out a mutable reference after the artifact is pushed
/// onto a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    kind: ArtifactKind,
    path: PathBuf,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a metadata entry (e.g. `reused: true`).
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Outcome of one executed phase or sub-phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    /// Phase-specific extracted fields (`complexity`, `requirements`, `specPath`, ...).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
}

impl PhaseResult {
    pub fn new(phase: &str, success: bool) -> Self {
        Self {
            phase: phase.to_string(),
            success,
            timestamp: Utc::now(),
            fields: Map::new(),
        }
    }

    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Look up a string field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ArtifactKind::EscalationReport).unwrap();
        assert_eq!(json, "\"escalation-report\"");
        assert_eq!(ArtifactKind::QaReport.to_string(), "qa-report");
    }

    #[test]
    fn test_artifact_metadata() {
        let artifact = Artifact::new(ArtifactKind::Spec, "docs/stories/S-1/spec.md")
            .with_metadata("reused", true);
        assert_eq!(artifact.kind(), ArtifactKind::Spec);
        assert_eq!(artifact.metadata().get("reused"), Some(&Value::Bool(true)));
        assert_eq!(artifact.path(), Path::new("docs/stories/S-1/spec.md"));
    }

    #[test]
    fn test_phase_result_str_field() {
        let result = PhaseResult::new("assess-complexity", true).with_field("complexity", "COMPLEX");
        assert_eq!(result.str_field("complexity"), Some("COMPLEX"));
        assert_eq!(result.str_field("missing"), None);
    }
}
