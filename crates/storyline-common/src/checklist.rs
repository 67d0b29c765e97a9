//! Checklist items parsed from checklist documents.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChecklistItemType {
    PreCondition,
    PostCondition,
    AcceptanceCriterion,
    Manual,
}

impl ChecklistItemType {
    /// Blocker default for items that don't say otherwise.
    pub fn default_blocker(&self) -> bool {
        matches!(self, Self::PreCondition)
    }
}

impl fmt::Display for ChecklistItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PreCondition => "pre-condition",
            Self::PostCondition => "post-condition",
            Self::AcceptanceCriterion => "acceptance-criterion",
            Self::Manual => "manual",
        };
        write!(f, "{}", s)
    }
}

/// A single gating rule. Parsed fresh on every run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub description: String,
    #[serde(rename = "type")]
    pub item_type: ChecklistItemType,
    pub blocker: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ChecklistItem {
    pub fn new(description: impl Into<String>, item_type: ChecklistItemType) -> Self {
        Self {
            description: description.into(),
            item_type,
            blocker: item_type.default_blocker(),
            validation: None,
            error_message: None,
        }
    }

    pub fn manual(description: impl Into<String>) -> Self {
        Self::new(description, ChecklistItemType::Manual)
    }
}
