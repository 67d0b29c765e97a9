//! Review findings and verdicts for the QA loop.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a review finding, most severe first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    #[default]
    Minor,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Info => "info",
        };
        write!(f, "{}", s)
    }
}

/// QA verdict for one review iteration.
///
/// Only `NeedsRevision` may lead to another iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approved,
    NeedsRevision,
    Blocked,
}

impl Verdict {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NeedsRevision)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Approved => 0,
            Self::NeedsRevision => 1,
            Self::Blocked => 2,
        }
    }

    /// The more restrictive of two verdicts.
    pub fn stricter(self, other: Verdict) -> Verdict {
        if other.rank() > self.rank() { other } else { self }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::NeedsRevision => "needs_revision",
            Self::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    #[serde(default)]
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(issue_type: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            issue_type: issue_type.to_string(),
            severity,
            message: message.into(),
        }
    }
}

/// One iteration of the QA loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCycle {
    pub iteration: u32,
    pub verdict: Verdict,
    pub issues: Vec<Issue>,
}
