//! Locating, creating and saving implementation plans.

use std::path::{Path, PathBuf};
use storyline_common::{Plan, SubtaskStatus};
use tracing::info;

use crate::config::STATE_DIR;
use crate::context::ExecutionContext;
use crate::errors::PipelineError;
use crate::util::{read_file, write_file};

/// Conventional plan locations, most preferred first. New plans go to the first.
pub fn plan_candidates(ctx: &ExecutionContext) -> Vec<PathBuf> {
    let story_dir = ctx.story_docs_dir();
    vec![
        story_dir.join("plan").join("implementation.yaml"),
        story_dir.join("plan.yaml"),
        ctx.project_dir()
            .join(STATE_DIR)
            .join("plans")
            .join(ctx.story_key())
            .join("implementation.yaml"),
    ]
}

/// A plan together with where it lives.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlan {
    pub path: PathBuf,
    pub plan: Plan,
    /// True when no plan existed and a stub was written.
    pub created: bool,
}

pub async fn load_plan(path: &Path) -> Result<Plan, PipelineError> {
    let content = read_file(path).await?;
    serde_yaml::from_str(&content).map_err(|source| PipelineError::PlanParseFailed {
        path: path.to_path_buf(),
        source,
    })
}

pub async fn save_plan(path: &Path, plan: &Plan) -> Result<(), PipelineError> {
    let content = serde_yaml::to_string(plan).map_err(|e| PipelineError::Other(e.into()))?;
    write_file(path, content).await
}

/// The story's existing plan, if any candidate location holds one.
pub async fn find_plan(ctx: &ExecutionContext) -> Result<Option<ResolvedPlan>, PipelineError> {
    for path in plan_candidates(ctx) {
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let plan = load_plan(&path).await?;
            return Ok(Some(ResolvedPlan {
                path,
                plan,
                created: false,
            }));
        }
    }
    Ok(None)
}

/// Find the story's plan, or create and persist the default stub plan.
///
/// Lookup always happens before creation, so running twice for the same story
/// yields the same plan path.
pub async fn resolve_plan(ctx: &ExecutionContext) -> Result<ResolvedPlan, PipelineError> {
    if let Some(found) = find_plan(ctx).await? {
        return Ok(found);
    }

    let path = plan_candidates(ctx)
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::Other(anyhow::anyhow!("no plan location")))?;
    let plan = Plan::stub(ctx.story_id());
    save_plan(&path, &plan).await?;
    info!(story_id = %ctx.story_id(), path = %path.display(), "Created stub plan");
    Ok(ResolvedPlan {
        path,
        plan,
        created: true,
    })
}

/// Put every subtask of the story's plan back to pending, so the next
/// execution pass redoes the whole plan. Returns how many subtasks were reset.
pub async fn reset_plan(ctx: &ExecutionContext) -> Result<usize, PipelineError> {
    let Some(ResolvedPlan { path, mut plan, .. }) = find_plan(ctx).await? else {
        return Ok(0);
    };
    let mut reset = 0;
    for subtask in plan.phases.iter_mut().flat_map(|p| p.subtasks.iter_mut()) {
        if subtask.status != SubtaskStatus::Pending {
            subtask.status = SubtaskStatus::Pending;
            reset += 1;
        }
    }
    if reset > 0 {
        save_plan(&path, &plan).await?;
        info!(story_id = %ctx.story_id(), reset, "Reset plan for a new approach");
    }
    Ok(reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequirementSource;
    use storyline_common::Subtask;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new("STORY-9", RequirementSource::Story, dir.path());

        let first = resolve_plan(&ctx).await.unwrap();
        assert!(first.created);
        assert!(first.path.ends_with("docs/stories/STORY-9/plan/implementation.yaml"));

        let second = resolve_plan(&ctx).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.path, second.path);
        assert_eq!(first.plan.phases, second.plan.phases);
    }

    #[tokio::test]
    async fn test_resolve_prefers_existing_secondary_location() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new("S-1", RequirementSource::Story, dir.path());
        let path = ctx.story_docs_dir().join("plan.yaml");
        let mut plan = Plan::stub("S-1");
        plan.subtask_mut("2.1").unwrap().status = SubtaskStatus::Done;
        save_plan(&path, &plan).await.unwrap();

        let resolved = resolve_plan(&ctx).await.unwrap();
        assert_eq!(resolved.path, path);
        assert_eq!(resolved.plan.count_with_status(SubtaskStatus::Done), 1);
    }

    #[tokio::test]
    async fn test_unparseable_plan_is_an_error() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new("S-1", RequirementSource::Story, dir.path());
        let path = plan_candidates(&ctx).remove(0);
        write_file(&path, "phases: [unclosed").await.unwrap();

        let err = resolve_plan(&ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::PlanParseFailed { .. }));
    }

    #[tokio::test]
    async fn test_reset_plan_returns_subtasks_to_pending() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new("S-1", RequirementSource::Story, dir.path());
        let mut plan = resolve_plan(&ctx).await.unwrap();
        plan.plan.subtask_mut("2.1").unwrap().status = SubtaskStatus::Done;
        let mut tests = Subtask::new("3.1", "Add tests");
        tests.status = SubtaskStatus::Failed;
        plan.plan.phases[2].subtasks.push(tests);
        save_plan(&plan.path, &plan.plan).await.unwrap();

        assert_eq!(reset_plan(&ctx).await.unwrap(), 2);
        let reloaded = load_plan(&plan.path).await.unwrap();
        assert_eq!(reloaded.count_with_status(SubtaskStatus::Pending), reloaded.subtasks().count());
    }

    #[tokio::test]
    async fn test_reset_without_plan_creates_nothing() {
        let dir = tempdir().unwrap();
        let ctx = ExecutionContext::new("S-1", RequirementSource::Story, dir.path());
        assert_eq!(reset_plan(&ctx).await.unwrap(), 0);
        assert!(find_plan(&ctx).await.unwrap().is_none());
    }
}
