use anyhow::{Context, Result};
use async_trait::async_trait;
use git2::{Repository, ResetType, build::CheckoutBuilder};
use std::path::{Path, PathBuf};
use tracing::info;

use super::RollbackManager;

/// Rolls the working tree back to HEAD with `git2`.
///
/// Untracked files are left alone so the state directory (recovery logs,
/// escalation reports) survives a rollback.
pub struct GitRollback {
    project_dir: PathBuf,
}

impl GitRollback {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
        }
    }

    fn reset_to_head(project_dir: &Path) -> Result<String> {
        let repo = Repository::open(project_dir).context("Failed to open git repository")?;
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .context("Repository has no HEAD commit to roll back to")?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repo.reset(head.as_object(), ResetType::Hard, Some(&mut checkout))
            .context("Failed to reset working tree")?;

        Ok(head.id().to_string())
    }
}

#[async_trait]
impl RollbackManager for GitRollback {
    async fn rollback_last_change(&self) -> Result<()> {
        let dir = self.project_dir.clone();
        let sha = tokio::task::spawn_blocking(move || Self::reset_to_head(&dir))
            .await
            .context("Rollback task panicked")??;
        info!(head = %sha, "Rolled working tree back to HEAD");
        Ok(())
    }
}
