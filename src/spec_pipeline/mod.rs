//! Specification phase: turns a requirement source into a spec document.
//!
//! The executor first looks for a spec the story already has and reuses it.
//! Otherwise it runs a fixed list of sub-phases through the agent capability:
//!
//! | Sub-phase               | Critical | Extracted fields          |
//! |-------------------------|----------|---------------------------|
//! | `gather-requirements`   | no       | `requirements`            |
//! | `assess-complexity`     | no       | `complexity`              |
//! | `research-dependencies` | no       |                           |
//! | `write-spec`            | **yes**  | `specPath`                |
//! | `critique`              | no       |                           |
//!
//! Sub-phases the agent can't handle are skipped. A failed `write-spec`
//! aborts the phase; any other failure is logged and the loop carries on.
//! When no spec file exists afterwards a stub is written so later phases
//! always have something to read.

pub mod stub;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storyline_common::{Artifact, ArtifactKind, PhaseResult};
use tracing::{debug, info, warn};

use crate::capability::AgentInvoker;
use crate::context::{ExecutionContext, RequirementSource};
use crate::executor::{PhaseExecutor, PhaseOutcome, PhaseRun};
use crate::util::write_file;

pub const PHASE_NAME: &str = "spec";

pub const SUB_PHASES: [&str; 5] = [
    "gather-requirements",
    "assess-complexity",
    "research-dependencies",
    "write-spec",
    "critique",
];

/// The only sub-phase whose failure aborts the pipeline.
pub const CRITICAL_SUB_PHASE: &str = "write-spec";

pub const DEFAULT_COMPLEXITY: &str = "STANDARD";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecOutput {
    pub spec_path: PathBuf,
    pub reused: bool,
    /// True when the spec is the generated placeholder.
    pub stub: bool,
    pub complexity: String,
    pub requirements: Vec<String>,
    pub phases_run: Vec<String>,
}

pub struct SpecPipelineExecutor {
    agent: Arc<dyn AgentInvoker>,
}

impl SpecPipelineExecutor {
    pub fn new(agent: Arc<dyn AgentInvoker>) -> Self {
        Self { agent }
    }
}

/// Conventional spec locations, most preferred first.
pub fn spec_candidates(ctx: &ExecutionContext) -> Vec<PathBuf> {
    let story_dir = ctx.story_docs_dir();
    vec![
        story_dir.join("spec.md"),
        story_dir.join("specification.md"),
        ctx.project_dir()
            .join(crate::config::STATE_DIR)
            .join("specs")
            .join(ctx.story_key())
            .join("spec.md"),
    ]
}

/// Find an existing spec for the story.
///
/// The fixed candidates are probed concurrently; the first one in preference
/// order wins regardless of which probe finished first. Failing that, any
/// `*spec*.md` sibling in the story directory is used, newest first.
pub async fn find_existing_spec(ctx: &ExecutionContext) -> Option<PathBuf> {
    let candidates = spec_candidates(ctx);
    let probes = join_all(candidates.iter().map(|p| tokio::fs::try_exists(p))).await;
    if let Some((path, _)) = candidates
        .into_iter()
        .zip(probes)
        .find(|(_, exists)| matches!(exists, Ok(true)))
    {
        return Some(path);
    }

    let pattern = format!(
        "{}/*spec*.md",
        glob::Pattern::escape(&ctx.story_docs_dir().to_string_lossy())
    );

    let mut siblings: Vec<PathBuf> = glob::glob(&pattern)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();

    siblings.sort_by(|a, b| {
        let a_time = a.metadata().and_then(|m| m.modified()).ok();
        let b_time = b.metadata().and_then(|m| m.modified()).ok();
        b_time.cmp(&a_time)
    });
    siblings.into_iter().next()
}

fn normalize_complexity(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
}

fn extract_requirements(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn resolve_path(project_dir: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        path
    } else {
        project_dir.join(path)
    }
}

/// Fields accumulated across sub-phases.
#[derive(Default)]
struct Gathered {
    complexity: Option<String>,
    requirements: Vec<String>,
    spec_path: Option<PathBuf>,
}

impl Gathered {
    fn absorb(&mut self, project_dir: &Path, fields: &Map<String, Value>) {
        if let Some(complexity) = fields.get("complexity").and_then(normalize_complexity) {
            self.complexity = Some(complexity);
        }
        if let Some(requirements) = fields.get("requirements") {
            for requirement in extract_requirements(requirements) {
                if !self.requirements.contains(&requirement) {
                    self.requirements.push(requirement);
                }
            }
        }
        if let Some(path) = fields
            .get("specPath")
            .or_else(|| fields.get("spec_path"))
            .and_then(Value::as_str)
        {
            self.spec_path = Some(resolve_path(project_dir, path));
        }
    }
}

impl SpecPipelineExecutor {
    async fn context_slice(&self, ctx: &ExecutionContext, sub_phase: &str, gathered: &Gathered) -> Value {
        let prd = match (ctx.source(), ctx.prd_path()) {
            (RequirementSource::Prd, Some(path)) => {
                let path = resolve_path(ctx.project_dir(), &path.to_string_lossy());
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => Some(content),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Could not read PRD");
                        None
                    }
                }
            }
            _ => None,
        };

        json!({
            "storyId": ctx.story_id(),
            "source": ctx.source(),
            "prdPath": ctx.prd_path(),
            "prd": prd,
            "techStack": ctx.tech_stack(),
            "subPhase": sub_phase,
            "complexity": gathered.complexity,
            "requirements": gathered.requirements,
            "specPath": gathered.spec_path,
            "targetSpecPath": spec_candidates(ctx)[0],
        })
    }
}

#[async_trait]
impl PhaseExecutor for SpecPipelineExecutor {
    type Output = SpecOutput;

    fn name(&self) -> &'static str {
        PHASE_NAME
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> Result<PhaseOutcome<SpecOutput>> {
        let mut run = PhaseRun::start(PHASE_NAME, ctx);

        if ctx.story_id().is_empty() {
            return Ok(run.fail(ctx, "storyId is required"));
        }

        if let Some(path) = find_existing_spec(ctx).await {
            info!(story_id = %ctx.story_id(), path = %path.display(), "Reusing existing spec");
            run.record_artifact(
                ctx,
                Artifact::new(ArtifactKind::Spec, &path).with_metadata("reused", true),
            );
            let output = SpecOutput {
                spec_path: path,
                reused: true,
                stub: false,
                complexity: DEFAULT_COMPLEXITY.to_string(),
                requirements: Vec::new(),
                phases_run: Vec::new(),
            };
            return Ok(run.complete(ctx, output));
        }

        let mut gathered = Gathered::default();
        let mut phases_run = Vec::new();

        for sub_phase in SUB_PHASES {
            if !self.agent.is_available(sub_phase) {
                debug!(sub_phase, "No capability for sub-phase, skipping");
                ctx.record_result(
                    PhaseResult::new(sub_phase, false).with_field("status", "skipped"),
                );
                continue;
            }

            let slice = self.context_slice(ctx, sub_phase, &gathered).await;
            phases_run.push(sub_phase.to_string());

            let error = match self.agent.invoke(sub_phase, &slice).await {
                Ok(response) if response.success => {
                    gathered.absorb(ctx.project_dir(), &response.fields);
                    ctx.record_result(
                        PhaseResult::new(sub_phase, true)
                            .with_fields(response.fields)
                            .with_field("status", "completed"),
                    );
                    continue;
                }
                Ok(response) => response
                    .error
                    .unwrap_or_else(|| format!("{} reported failure", sub_phase)),
                Err(e) => e.to_string(),
            };

            ctx.record_result(
                PhaseResult::new(sub_phase, false)
                    .with_field("status", "failed")
                    .with_field("error", error.clone()),
            );

            if sub_phase == CRITICAL_SUB_PHASE {
                return Ok(run.fail(ctx, format!("{} failed: {}", sub_phase, error)));
            }
            warn!(story_id = %ctx.story_id(), sub_phase, error = %error, "Sub-phase failed, continuing");
        }

        let complexity = gathered
            .complexity
            .clone()
            .unwrap_or_else(|| DEFAULT_COMPLEXITY.to_string());

        let written = match gathered.spec_path.take() {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => Some(path),
            Some(path) => {
                warn!(path = %path.display(), "Agent reported a spec path that does not exist");
                None
            }
            None => None,
        };
        let existing = match written {
            Some(path) => Some(path),
            None => find_existing_spec(ctx).await,
        };

        let (spec_path, stub) = match existing {
            Some(path) => (path, false),
            None => {
                let path = spec_candidates(ctx).swap_remove(0);
                let content = stub::generate_stub_markdown(ctx, &complexity, &gathered.requirements);
                write_file(&path, content).await?;
                info!(story_id = %ctx.story_id(), path = %path.display(), "Wrote stub spec");
                (path, true)
            }
        };

        run.record_artifact(
            ctx,
            Artifact::new(ArtifactKind::Spec, &spec_path)
                .with_metadata("reused", false)
                .with_metadata("stub", stub),
        );

        let output = SpecOutput {
            spec_path,
            reused: false,
            stub,
            complexity,
            requirements: gathered.requirements,
            phases_run,
        };
        Ok(run.complete(ctx, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AgentResponse, Unavailable};
    use crate::errors::CapabilityError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Agent that answers only the sub-phases it has a scripted reply for.
    #[derive(Default)]
    struct ScriptedAgent {
        replies: HashMap<&'static str, AgentResponse>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedAgent {
        fn reply(mut self, sub_phase: &'static str, response: AgentResponse) -> Self {
            self.replies.insert(sub_phase, response);
            self
        }
    }

    #[async_trait]
    impl AgentInvoker for ScriptedAgent {
        fn is_available(&self, sub_phase: &str) -> bool {
            self.replies.contains_key(sub_phase)
        }

        async fn invoke(&self, sub_phase: &str, _slice: &Value) -> Result<AgentResponse, CapabilityError> {
            self.calls.lock().unwrap().push(sub_phase.to_string());
            Ok(self.replies[sub_phase].clone())
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn context(dir: &Path) -> ExecutionContext {
        ExecutionContext::new("STORY-9", RequirementSource::Story, dir)
    }

    #[tokio::test]
    async fn test_missing_story_id_fails_fast() {
        let dir = tempdir().unwrap();
        let mut ctx = ExecutionContext::new("  ", RequirementSource::Story, dir.path());
        let executor = SpecPipelineExecutor::new(Arc::new(Unavailable));
        let outcome = executor.execute(&mut ctx).await.unwrap();
        assert_eq!(outcome.error(), Some("storyId is required"));
        assert!(ctx.artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_existing_spec_is_reused() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let spec = ctx.story_docs_dir().join("spec.md");
        std::fs::create_dir_all(spec.parent().unwrap()).unwrap();
        std::fs::write(&spec, "# Real spec").unwrap();

        let agent = Arc::new(ScriptedAgent::default().reply("write-spec", AgentResponse::ok(Map::new())));
        let executor = SpecPipelineExecutor::new(agent.clone());
        let output = executor.execute(&mut ctx).await.unwrap().into_output().unwrap();

        assert!(output.reused);
        assert_eq!(output.spec_path, spec);
        assert!(agent.calls.lock().unwrap().is_empty());
        let artifact = ctx.latest_artifact(ArtifactKind::Spec).unwrap();
        assert_eq!(artifact.metadata()["reused"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_sibling_spec_file_is_found() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        std::fs::create_dir_all(ctx.story_docs_dir()).unwrap();
        std::fs::write(ctx.story_docs_dir().join("auth-spec-v2.md"), "# v2").unwrap();
        let found = find_existing_spec(&ctx).await.unwrap();
        assert!(found.ends_with("auth-spec-v2.md"));
    }

    #[tokio::test]
    async fn test_no_agent_writes_stub_with_standard_complexity() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let executor = SpecPipelineExecutor::new(Arc::new(Unavailable));
        let output = executor.execute(&mut ctx).await.unwrap().into_output().unwrap();

        assert!(output.stub);
        assert!(!output.reused);
        assert_eq!(output.complexity, "STANDARD");
        assert!(output.phases_run.is_empty());
        let content = std::fs::read_to_string(&output.spec_path).unwrap();
        assert!(content.contains("STORY-9"));

        let skipped = ctx
            .results()
            .iter()
            .filter(|r| r.str_field("status") == Some("skipped"))
            .count();
        assert_eq!(skipped, SUB_PHASES.len());
    }

    #[tokio::test]
    async fn test_critical_sub_phase_failure_aborts() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let agent = ScriptedAgent::default()
            .reply("gather-requirements", AgentResponse::ok(Map::new()))
            .reply("write-spec", AgentResponse::failed("model refused"))
            .reply("critique", AgentResponse::ok(Map::new()));
        let agent = Arc::new(agent);
        let executor = SpecPipelineExecutor::new(agent.clone());
        let outcome = executor.execute(&mut ctx).await.unwrap();

        assert!(outcome.error().unwrap().contains("model refused"));
        // critique never ran
        assert_eq!(
            agent.calls.lock().unwrap().as_slice(),
            ["gather-requirements", "write-spec"]
        );
        assert!(ctx.latest_artifact(ArtifactKind::Spec).is_none());
    }

    #[tokio::test]
    async fn test_non_critical_failures_continue_and_fields_aggregate() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let spec_rel = "docs/stories/STORY-9/spec.md";
        std::fs::create_dir_all(dir.path().join("docs/stories/STORY-9")).unwrap();

        let agent = ScriptedAgent::default()
            .reply(
                "gather-requirements",
                AgentResponse::ok(fields(json!({"requirements": ["Login", "Logout"]}))),
            )
            .reply("assess-complexity", AgentResponse::ok(fields(json!({"complexity": "complex"}))))
            .reply("research-dependencies", AgentResponse::failed("network down"))
            .reply("write-spec", AgentResponse::ok(fields(json!({"specPath": spec_rel}))));
        std::fs::write(dir.path().join(spec_rel), "# written by agent").unwrap();

        let executor = SpecPipelineExecutor::new(Arc::new(agent));
        let output = executor.execute(&mut ctx).await.unwrap().into_output().unwrap();

        assert!(!output.stub);
        assert_eq!(output.complexity, "COMPLEX");
        assert_eq!(output.requirements, ["Login", "Logout"]);
        assert_eq!(
            output.phases_run,
            ["gather-requirements", "assess-complexity", "research-dependencies", "write-spec"]
        );
        assert_eq!(output.spec_path, dir.path().join(spec_rel));
        let failed = ctx.latest_result("research-dependencies").unwrap();
        assert!(!failed.success);
    }

    #[test]
    fn test_extract_requirements_from_text() {
        let reqs = extract_requirements(&json!("- one\n* two\n\n three "));
        assert_eq!(reqs, ["one", "two", "three"]);
    }
}
