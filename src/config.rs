//! Configuration for storyline.
//!
//! Settings are read from `.storyline/storyline.toml`, then overridden by
//! environment variables, then by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! state_dir = ".storyline"
//! checklists_dir = ".storyline/checklists"
//!
//! [agent]
//! command = "claude-agent"
//! args = ["--json"]
//! timeout_secs = 600
//!
//! [recovery]
//! max_attempts = 3
//! stuck_threshold = 3
//! skippable_phases = ["documentation"]
//! rollback = "git"
//!
//! [qa]
//! max_iterations = 3
//! issue_threshold = 3
//!
//! [tests]
//! command = "cargo test"
//! dirs = ["tests", "test", "__tests__"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default state directory, relative to the project root.
pub const STATE_DIR: &str = ".storyline";

/// Config file name inside the state directory.
pub const CONFIG_FILE: &str = "storyline.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_checklists_dir")]
    pub checklists_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(STATE_DIR)
}

fn default_checklists_dir() -> PathBuf {
    PathBuf::from(STATE_DIR).join("checklists")
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            checklists_dir: default_checklists_dir(),
        }
    }
}

/// External agent process settings. No command means no agent capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// How `rollback-and-retry` undoes the last change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackMode {
    #[default]
    Git,
    None,
}

impl std::fmt::Display for RollbackMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackMode::Git => write!(f, "git"),
            RollbackMode::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Identical consecutive failures before a story/phase counts as stuck.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: usize,
    #[serde(default)]
    pub skippable_phases: Vec<String>,
    #[serde(default)]
    pub rollback: RollbackMode,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_stuck_threshold() -> usize {
    3
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            stuck_threshold: default_stuck_threshold(),
            skippable_phases: Vec::new(),
            rollback: RollbackMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// More issues than this forces `needs_revision` even when none is major.
    #[serde(default = "default_issue_threshold")]
    pub issue_threshold: usize,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_issue_threshold() -> usize {
    3
}

impl Default for QaSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            issue_threshold: default_issue_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_test_dirs")]
    pub dirs: Vec<String>,
}

fn default_test_dirs() -> Vec<String> {
    vec!["tests".into(), "test".into(), "__tests__".into()]
}

impl Default for TestsSection {
    fn default() -> Self {
        Self {
            command: None,
            dirs: default_test_dirs(),
        }
    }
}

/// The complete storyline.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorylineToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub recovery: RecoverySection,
    #[serde(default)]
    pub qa: QaSection,
    #[serde(default)]
    pub tests: TestsSection,
}

impl StorylineToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse storyline.toml")
    }

    /// Load from `<state_dir>/storyline.toml`, or defaults if the file is absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize storyline.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `STORYLINE_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(cmd) = std::env::var("STORYLINE_AGENT_CMD") {
            self.agent.command = Some(cmd);
        }
        if let Ok(cmd) = std::env::var("STORYLINE_TEST_CMD") {
            self.tests.command = Some(cmd);
        }
        if let Some(n) = env_number("STORYLINE_MAX_ATTEMPTS") {
            self.recovery.max_attempts = n;
        }
        if let Some(n) = env_number("STORYLINE_QA_MAX_ITERATIONS") {
            self.qa.max_iterations = n;
        }
    }

    /// Human-readable warnings about settings that will behave oddly.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.recovery.max_attempts == 0 {
            warnings.push(
                "recovery.max_attempts is 0: every failure escalates immediately".to_string(),
            );
        }
        if self.qa.max_iterations == 0 {
            warnings.push("qa.max_iterations is 0: the QA loop never reviews".to_string());
        }
        if self.recovery.stuck_threshold < 2 {
            warnings.push(
                "recovery.stuck_threshold below 2 marks every repeated failure as stuck"
                    .to_string(),
            );
        }
        if self.agent.command.is_none() {
            warnings.push(
                "agent.command not set: sub-phases are skipped and stubs are generated"
                    .to_string(),
            );
        }
        if self.tests.dirs.is_empty() {
            warnings.push("tests.dirs is empty: the test suite is never run".to_string());
        }
        warnings
    }
}

fn env_number(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Runtime configuration: the parsed file plus resolved absolute paths.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub checklists_dir: PathBuf,
    pub verbose: bool,
    settings: StorylineToml,
}

impl Config {
    /// Load configuration for a project directory (file, then environment).
    pub fn load(project_dir: &Path, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let mut settings = StorylineToml::load_or_default(&project_dir.join(STATE_DIR))?;
        settings.apply_env();
        Ok(Self::from_settings(project_dir, settings, verbose))
    }

    /// Build from already-parsed settings without touching the environment.
    pub fn from_settings(project_dir: PathBuf, settings: StorylineToml, verbose: bool) -> Self {
        let state_dir = project_dir.join(&settings.project.state_dir);
        let checklists_dir = project_dir.join(&settings.project.checklists_dir);
        Self {
            project_dir,
            state_dir,
            checklists_dir,
            verbose,
            settings,
        }
    }

    pub fn settings(&self) -> &StorylineToml {
        &self.settings
    }

    pub fn agent(&self) -> &AgentSection {
        &self.settings.agent
    }

    pub fn recovery(&self) -> &RecoverySection {
        &self.settings.recovery
    }

    pub fn qa(&self) -> &QaSection {
        &self.settings.qa
    }

    pub fn tests(&self) -> &TestsSection {
        &self.settings.tests
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    /// Per-story directory for one artifact family (`qa`, `recovery`, ...).
    pub fn story_dir(&self, family: &str, story_id: &str) -> PathBuf {
        self.state_dir.join(family).join(crate::util::story_slug(story_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = StorylineToml::default();
        assert_eq!(settings.recovery.max_attempts, 3);
        assert_eq!(settings.qa.max_iterations, 3);
        assert_eq!(settings.recovery.rollback, RollbackMode::Git);
        assert_eq!(settings.tests.dirs, ["tests", "test", "__tests__"]);
        assert!(settings.agent.command.is_none());
    }

    #[test]
    fn test_parse_partial_file() {
        let settings = StorylineToml::parse(
            r#"
[recovery]
max_attempts = 5
skippable_phases = ["documentation"]
rollback = "none"

[qa]
issue_threshold = 10
"#,
        )
        .unwrap();
        assert_eq!(settings.recovery.max_attempts, 5);
        assert_eq!(settings.recovery.skippable_phases, ["documentation"]);
        assert_eq!(settings.recovery.rollback, RollbackMode::None);
        assert_eq!(settings.qa.issue_threshold, 10);
        assert_eq!(settings.qa.max_iterations, 3);
        assert_eq!(settings.agent.timeout_secs, 600);
    }

    #[test]
    fn test_parse_rejects_unknown_rollback_mode() {
        assert!(StorylineToml::parse("[recovery]\nrollback = \"svn\"\n").is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut settings = StorylineToml::default();
        settings.agent.command = Some("agent".into());
        let path = dir.path().join(CONFIG_FILE);
        settings.save(&path).unwrap();

        let loaded = StorylineToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.agent.command.as_deref(), Some("agent"));
    }

    #[test]
    fn test_validate_warns_on_zero_budgets() {
        let mut settings = StorylineToml::default();
        settings.recovery.max_attempts = 0;
        settings.qa.max_iterations = 0;
        let warnings = settings.validate();
        assert!(warnings.iter().any(|w| w.contains("max_attempts")));
        assert!(warnings.iter().any(|w| w.contains("max_iterations")));
    }

    #[test]
    fn test_config_resolves_state_paths() {
        let dir = tempdir().unwrap();
        let config = Config::from_settings(dir.path().to_path_buf(), StorylineToml::default(), false);
        assert_eq!(config.state_dir, dir.path().join(".storyline"));
        assert_eq!(config.checklists_dir, dir.path().join(".storyline/checklists"));
        assert_eq!(
            config.story_dir("qa", "STORY-9"),
            dir.path().join(".storyline/qa/STORY-9")
        );
    }
}
