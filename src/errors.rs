//! Typed error hierarchy for storyline.
//!
//! Three enums cover the places where callers need to match on a failure:
//! - `PipelineError`: I/O-layer faults and run ownership, fatal to the driver
//! - `ChecklistError`: checklist lookup and parsing
//! - `CapabilityError`: external agent/test processes
//!
//! Expected phase failures are *not* errors; they travel as
//! `PhaseOutcome::Failed` envelopes.

use std::path::PathBuf;
use thiserror::Error;

/// Faults that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Story {story_id} already has a pipeline run in flight")]
    StoryInFlight { story_id: String },

    #[error("Invalid story id {story_id:?}")]
    InvalidStoryId { story_id: String },

    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan at {path}: {source}")]
    PlanParseFailed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from loading a checklist definition.
#[derive(Debug, Error)]
pub enum ChecklistError {
    #[error("Checklist '{name}' not found in {dir}")]
    NotFound { name: String, dir: PathBuf },

    #[error("Invalid YAML block in checklist '{name}': {source}")]
    InvalidYaml {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to read checklist {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from invoking an external capability process.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },

    #[error("'{command}' exited with code {exit_code}")]
    NonZeroExit { command: String, exit_code: i32 },

    #[error("No JSON object in output of '{command}'")]
    MalformedResponse { command: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_in_flight_mentions_story() {
        let err = PipelineError::StoryInFlight {
            story_id: "STORY-9".into(),
        };
        assert!(err.to_string().contains("STORY-9"));
    }

    #[test]
    fn write_failed_carries_path_and_kind() {
        let path = PathBuf::from("/tmp/plan.yaml");
        let err = PipelineError::WriteFailed {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"),
        };
        match &err {
            PipelineError::WriteFailed { path: p, source } => {
                assert_eq!(p, &path);
                assert_eq!(source.kind(), std::io::ErrorKind::StorageFull);
            }
            _ => panic!("Expected WriteFailed"),
        }
    }

    #[test]
    fn checklist_not_found_names_directory() {
        let err = ChecklistError::NotFound {
            name: "story-dod".into(),
            dir: PathBuf::from(".storyline/checklists"),
        };
        let msg = err.to_string();
        assert!(msg.contains("story-dod"));
        assert!(msg.contains(".storyline/checklists"));
    }

    #[test]
    fn capability_errors_are_std_errors() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CapabilityError::TimedOut {
            command: "agent".into(),
            secs: 5,
        });
        assert_std_error(&PipelineError::Other(anyhow::anyhow!("x")));
    }
}
