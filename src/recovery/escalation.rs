//! Human-readable escalation reports.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use storyline_common::RecoveryStrategy;

use crate::errors::PipelineError;
use crate::util::{file_stamp, story_slug, write_file};

#[derive(Debug, Clone)]
pub struct EscalationReport {
    pub story_id: String,
    pub failed_phase: String,
    pub error: String,
    pub attempts: u32,
    pub strategy: RecoveryStrategy,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl EscalationReport {
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("# Escalation: {}\n\n", self.story_id));
        md.push_str("Automated recovery stopped. A human needs to look at this story before it is retried.\n\n");
        md.push_str("| Field | Value |\n|---|---|\n");
        md.push_str(&format!("| Story | {} |\n", self.story_id));
        md.push_str(&format!("| Failed phase | {} |\n", self.failed_phase));
        md.push_str(&format!("| Attempts | {} |\n", self.attempts));
        md.push_str(&format!("| Strategy | {} |\n", self.strategy));
        md.push_str(&format!("| Reason | {} |\n", self.reason));
        md.push_str(&format!("| Timestamp | {} |\n\n", self.timestamp.to_rfc3339()));
        md.push_str("## Error\n\n```\n");
        md.push_str(self.error.trim_end());
        md.push_str("\n```\n\n");
        md.push_str("## Next steps\n\n");
        md.push_str("- Review the recovery log for this story\n");
        md.push_str(&format!(
            "- Fix the underlying problem, then re-run `storyline run {}`\n",
            self.story_id
        ));
        md
    }

    /// Write to `<escalations_dir>/<story>/escalation-<stamp>.md`.
    pub async fn write(&self, escalations_dir: &Path) -> Result<PathBuf, PipelineError> {
        let path = escalations_dir
            .join(story_slug(&self.story_id))
            .join(format!("escalation-{}.md", file_stamp()));
        write_file(&path, self.to_markdown()).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> EscalationReport {
        EscalationReport {
            story_id: "STORY-9".into(),
            failed_phase: "qa".into(),
            error: "QA still needs revision".into(),
            attempts: 3,
            strategy: RecoveryStrategy::EscalateToHuman,
            reason: "3 of 3 attempts used".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_markdown_contains_key_fields() {
        let md = report().to_markdown();
        assert!(md.starts_with("# Escalation: STORY-9"));
        assert!(md.contains("| Failed phase | qa |"));
        assert!(md.contains("| Attempts | 3 |"));
        assert!(md.contains("| Strategy | escalate-to-human |"));
        assert!(md.contains("QA still needs revision"));
    }

    #[tokio::test]
    async fn test_write_uses_story_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = report().write(dir.path()).await.unwrap();
        assert!(path.starts_with(dir.path().join("STORY-9")));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("escalation-"));
        assert!(std::fs::read_to_string(path).unwrap().contains("STORY-9"));
    }
}
