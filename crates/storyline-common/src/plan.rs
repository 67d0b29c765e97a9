//! Implementation plans: ordered phases of ordered subtasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a single subtask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Failed,
}

impl SubtaskStatus {
    /// Terminal statuses are not re-run on resumption unless they failed.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: SubtaskStatus,
}

impl Subtask {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: SubtaskStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub name: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

impl PlanPhase {
    pub fn new(name: &str, subtasks: Vec<Subtask>) -> Self {
        Self {
            name: name.to_string(),
            subtasks,
        }
    }
}

/// An ordered list of named phases, each holding ordered subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub story_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub phases: Vec<PlanPhase>,
}

impl Plan {
    /// Default four-phase plan used when a story has no plan yet.
    ///
    /// Only the implementation phase carries a subtask; the others are
    /// placeholders a human or agent fills in later.
    pub fn stub(story_id: &str) -> Self {
        Self {
            story_id: story_id.to_string(),
            created_at: Some(Utc::now()),
            phases: vec![
                PlanPhase::new("setup", Vec::new()),
                PlanPhase::new(
                    "implementation",
                    vec![Subtask::new("2.1", &format!("Implement {}", story_id))],
                ),
                PlanPhase::new("testing", Vec::new()),
                PlanPhase::new("documentation", Vec::new()),
            ],
        }
    }

    pub fn subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.phases.iter().flat_map(|p| p.subtasks.iter())
    }

    /// Find a subtask by id across all phases.
    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.subtasks.iter_mut())
            .find(|s| s.id == id)
    }

    pub fn count_with_status(&self, status: SubtaskStatus) -> usize {
        self.subtasks().filter(|s| s.status == status).count()
    }
}
