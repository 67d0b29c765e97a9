//! Shared domain types for the storyline pipeline.
//!
//! Everything an executor hands to the next phase (artifacts, phase results,
//! plans, recovery decisions, review cycles, checklist items) lives here so the
//! executors and any future front-end agree on one serialized shape.

pub mod artifact;
pub mod checklist;
pub mod plan;
pub mod recovery;
pub mod review;

pub use artifact::{Artifact, ArtifactKind, PhaseResult};
pub use checklist::{ChecklistItem, ChecklistItemType};
pub use plan::{Plan, PlanPhase, Subtask, SubtaskStatus};
pub use recovery::{RecoveryDecision, RecoveryStrategy};
pub use review::{Issue, ReviewCycle, Severity, Verdict};
