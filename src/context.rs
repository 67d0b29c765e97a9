//! The execution context threaded through one pipeline run.
//!
//! A context is created once per run and owned by that run alone. Executors
//! borrow it mutably in turn; artifacts and phase results can only be
//! appended, never replaced or reordered.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use storyline_common::{Artifact, ArtifactKind, PhaseResult};
use tracing::debug;

use crate::errors::PipelineError;
use crate::util::story_slug;

/// Where the requirements for a story come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementSource {
    #[default]
    Story,
    Prd,
    Prompt,
}

impl std::fmt::Display for RequirementSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequirementSource::Story => write!(f, "story"),
            RequirementSource::Prd => write!(f, "prd"),
            RequirementSource::Prompt => write!(f, "prompt"),
        }
    }
}

impl std::str::FromStr for RequirementSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "story" => Ok(RequirementSource::Story),
            "prd" => Ok(RequirementSource::Prd),
            "prompt" => Ok(RequirementSource::Prompt),
            _ => anyhow::bail!(
                "Invalid requirement source '{}'. Valid values: story, prd, prompt",
                s
            ),
        }
    }
}

/// Detected project technology, e.g. `rust` from a `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechStack {
    pub language: String,
    /// Marker file the detection was based on (empty when given explicitly).
    #[serde(default)]
    pub marker: String,
}

impl TechStack {
    pub fn named(language: &str) -> Self {
        Self {
            language: language.to_string(),
            marker: String::new(),
        }
    }
}

const TECH_MARKERS: &[(&str, &str)] = &[
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("pyproject.toml", "python"),
    ("requirements.txt", "python"),
    ("go.mod", "go"),
    ("pom.xml", "java"),
];

/// Detect the tech stack from well-known marker files in the project root.
pub fn detect_tech_stack(project_dir: &Path) -> Option<TechStack> {
    TECH_MARKERS
        .iter()
        .find(|(marker, _)| project_dir.join(marker).is_file())
        .map(|(marker, language)| TechStack {
            language: language.to_string(),
            marker: marker.to_string(),
        })
}

/// The failure a recovery run is asked to handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub failed_phase: String,
    pub error: String,
    /// Recovery attempts already made for this phase.
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    story_id: String,
    source: RequirementSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prd_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tech_stack: Option<TechStack>,
    project_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<FailureReport>,
    results: Vec<PhaseResult>,
    artifacts: Vec<Artifact>,
}

impl ExecutionContext {
    pub fn new(story_id: &str, source: RequirementSource, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            story_id: story_id.trim().to_string(),
            source,
            prd_path: None,
            tech_stack: None,
            project_dir: project_dir.into(),
            failure: None,
            results: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn with_prd_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.prd_path = Some(path.into());
        self
    }

    pub fn with_tech_stack(mut self, tech_stack: Option<TechStack>) -> Self {
        self.tech_stack = tech_stack;
        self
    }

    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    /// Directory-safe form of the story id.
    pub fn story_key(&self) -> String {
        story_slug(&self.story_id)
    }

    pub fn source(&self) -> RequirementSource {
        self.source
    }

    pub fn prd_path(&self) -> Option<&Path> {
        self.prd_path.as_deref()
    }

    pub fn tech_stack(&self) -> Option<&TechStack> {
        self.tech_stack.as_ref()
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// `docs/stories/<id>` under the project root.
    pub fn story_docs_dir(&self) -> PathBuf {
        self.project_dir.join("docs/stories").join(self.story_key())
    }

    pub fn failure(&self) -> Option<&FailureReport> {
        self.failure.as_ref()
    }

    /// Set the failure the next recovery run should handle.
    pub fn set_failure(&mut self, report: FailureReport) {
        self.failure = Some(report);
    }

    pub fn clear_failure(&mut self) {
        self.failure = None;
    }

    pub fn results(&self) -> &[PhaseResult] {
        &self.results
    }

    /// Most recent result recorded under `phase`.
    pub fn latest_result(&self, phase: &str) -> Option<&PhaseResult> {
        self.results.iter().rev().find(|r| r.phase == phase)
    }

    pub fn record_result(&mut self, result: PhaseResult) {
        debug!(phase = %result.phase, success = result.success, "Recorded phase result");
        self.results.push(result);
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn latest_artifact(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.artifacts.iter().rev().find(|a| a.kind() == kind)
    }

    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind() == kind)
    }

    pub fn push_artifact(&mut self, artifact: Artifact) {
        debug!(kind = %artifact.kind(), path = %artifact.path().display(), "Recorded artifact");
        self.artifacts.push(artifact);
    }
}

/// Exclusive claim on a story id for the lifetime of one pipeline run.
///
/// Backed by an advisory file lock, so a second run for the same story fails
/// fast whether it lives in this process or another one. Released on drop.
#[derive(Debug)]
pub struct StoryLock {
    file: File,
    path: PathBuf,
}

impl StoryLock {
    pub fn acquire(lock_dir: &Path, story_id: &str) -> Result<Self, PipelineError> {
        if story_id.trim().is_empty() {
            return Err(PipelineError::InvalidStoryId {
                story_id: story_id.to_string(),
            });
        }
        std::fs::create_dir_all(lock_dir).map_err(|source| PipelineError::WriteFailed {
            path: lock_dir.to_path_buf(),
            source,
        })?;
        let path = lock_dir.join(format!("{}.lock", story_slug(story_id)));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| PipelineError::WriteFailed {
                path: path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(PipelineError::StoryInFlight {
                    story_id: story_id.to_string(),
                })
            }
            Err(source) => Err(PipelineError::WriteFailed { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
