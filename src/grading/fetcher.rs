use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::workspace::WorkspacePath;
use crate::errors::{GradeError, Stage};

/// Materializes a pushed commit into a workspace.
/// Real implementation: `GitFetcher`. Test doubles live next to the pipeline tests.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Replace whatever is at `workspace` with the tree of `commit` from
    /// `clone_url`.
    async fn fetch(&self, clone_url: &str, commit: &str, workspace: &WorkspacePath) -> Result<(), GradeError>;
}

/// Shallow fetch of a single commit through the `git` CLI.
pub struct GitFetcher {
    git_cmd: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl GitFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self::with_command("git", timeout)
    }

    pub fn with_command(git_cmd: &str, timeout: Duration) -> Self {
        Self {
            git_cmd: git_cmd.to_string(),
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort an in-progress fetch when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> Result<(), String> {
        let output = Command::new(&self.git_cmd)
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", self.git_cmd, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "git {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            ));
        }
        Ok(())
    }

    /// `init` + depth-1 `fetch` of the exact commit + detached checkout, so
    /// the tree is the pushed commit even when it is not on the default branch.
    async fn fetch_commit(&self, clone_url: &str, commit: &str, dir: &Path) -> Result<(), String> {
        self.git(dir, &["init", "--quiet"]).await?;
        self.git(dir, &["fetch", "--depth", "1", "--quiet", "--", clone_url, commit])
            .await?;
        self.git(dir, &["checkout", "--quiet", "--detach", "FETCH_HEAD"])
            .await
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch(&self, clone_url: &str, commit: &str, workspace: &WorkspacePath) -> Result<(), GradeError> {
        let workspace_err = |source| GradeError::Workspace {
            path: workspace.path().to_path_buf(),
            source,
        };

        workspace.remove().await.map_err(workspace_err)?;
        tokio::fs::create_dir_all(workspace.path())
            .await
            .map_err(workspace_err)?;

        let result = tokio::select! {
            fetched = tokio::time::timeout(self.timeout, self.fetch_commit(clone_url, commit, workspace.path())) => {
                match fetched {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(reason)) => Err(GradeError::Fetch {
                        url: clone_url.to_string(),
                        reason,
                    }),
                    Err(_) => Err(GradeError::FetchTimedOut {
                        url: clone_url.to_string(),
                        seconds: self.timeout.as_secs(),
                    }),
                }
            }
            _ = self.cancel.cancelled() => Err(GradeError::Cancelled { stage: Stage::Fetched }),
        };

        if result.is_err()
            && let Err(e) = workspace.remove().await
        {
            tracing::warn!(workspace = %workspace, error = %e, "failed to remove partial workspace");
        }
        result
    }
}
