//! Append-only recovery audit trail and the stuck detector that reads it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use storyline_common::RecoveryStrategy;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::capability::{StuckDetector, StuckStatus};
use crate::errors::PipelineError;
use crate::util::story_slug;

pub const LOG_FILE: &str = "recovery-log.jsonl";

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Error text with volatile parts (numbers, spacing, case) normalized away,
/// so the same failure at a different line or timestamp compares equal.
pub fn error_signature(error: &str) -> String {
    let lowered = error.trim().to_lowercase();
    let without_digits = DIGITS.replace_all(&lowered, "#");
    let collapsed = WHITESPACE.replace_all(&without_digits, " ");
    collapsed.chars().take(200).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryLogEntry {
    pub story_id: String,
    pub phase: String,
    pub error: String,
    pub signature: String,
    pub attempts: u32,
    pub strategy: RecoveryStrategy,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
}

/// JSON-lines log at `<recovery_dir>/<story>/recovery-log.jsonl`.
#[derive(Debug, Clone)]
pub struct RecoveryLog {
    path: PathBuf,
}

impl RecoveryLog {
    pub fn new(recovery_dir: &Path, story_id: &str) -> Self {
        Self {
            path: recovery_dir.join(story_slug(story_id)).join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &RecoveryLogEntry) -> Result<(), PipelineError> {
        let write_err = |source: std::io::Error| PipelineError::WriteFailed {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let mut line = serde_json::to_string(entry).map_err(|e| PipelineError::Other(e.into()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(write_err)?;
        file.write_all(line.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)
    }

    /// All entries in order. A missing log is empty; unreadable lines are skipped.
    pub async fn entries(&self) -> Result<Vec<RecoveryLogEntry>, PipelineError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PipelineError::ReadFailed {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %self.path.display(), line = n + 1, error = %e, "Skipping malformed recovery log line"),
            }
        }
        Ok(entries)
    }
}

/// Reports a story/phase as stuck when its last `threshold` recovery log
/// entries all carry the same error signature.
pub struct HistoryStuckDetector {
    recovery_dir: PathBuf,
    threshold: usize,
}

impl HistoryStuckDetector {
    pub fn new(recovery_dir: impl Into<PathBuf>, threshold: usize) -> Self {
        Self {
            recovery_dir: recovery_dir.into(),
            threshold,
        }
    }
}

#[async_trait]
impl StuckDetector for HistoryStuckDetector {
    async fn check_status(&self, story_id: &str, failed_phase: &str) -> Result<StuckStatus> {
        if self.threshold == 0 {
            return Ok(StuckStatus::default());
        }
        let entries = RecoveryLog::new(&self.recovery_dir, story_id).entries().await?;
        let recent: Vec<_> = entries
            .iter()
            .rev()
            .filter(|e| e.phase == failed_phase)
            .take(self.threshold)
            .collect();

        let Some(first) = recent.first() else {
            return Ok(StuckStatus::default());
        };
        if recent.len() < self.threshold || recent.iter().any(|e| e.signature != first.signature) {
            return Ok(StuckStatus::default());
        }

        Ok(StuckStatus {
            is_stuck: true,
            reason: Some(format!(
                "'{}' failed {} times in a row with the same error: {}",
                failed_phase, self.threshold, first.error
            )),
        })
    }
}
