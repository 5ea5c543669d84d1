//! Git workspace manager
//!
//! Owns every history-mutating git operation: branch and worktree creation,
//! commits, merges, and cleanup. All public operations serialize through one
//! internal mutex, regardless of how many agent runs are active, because
//! concurrent merges into the same branch are unsafe.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Error types for git operations
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to create worktree: {0}")]
    CreateFailed(String),

    #[error("failed to remove worktree: {0}")]
    RemoveFailed(String),

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("merge failed: {0}")]
    MergeFailed(String),

    #[error("git command failed: {0}")]
    CommandFailed(String),
}

/// Configuration for the git manager
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Path to the main repository
    pub repo_root: PathBuf,

    /// Base directory for per-item worktrees
    pub worktree_dir: PathBuf,

    /// Prefix for item branches (`{prefix}/{item-id}`)
    pub branch_prefix: String,

    /// Trunk branch items merge toward when they have no parent branch
    pub trunk_branch: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            worktree_dir: PathBuf::from("/tmp/beansd/worktrees"),
            branch_prefix: "beans".to_string(),
            trunk_branch: "main".to_string(),
        }
    }
}

/// A created (or reused) per-item workspace
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    pub item_id: String,
    pub path: PathBuf,
    pub branch: String,
}

/// Serialized front door for git history mutation
pub struct GitManager {
    pub(super) config: GitConfig,
    pub(super) lock: Mutex<()>,
}

impl GitManager {
    pub fn new(config: GitConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }

    /// Deterministic branch name for an item
    pub fn branch_name(&self, item_id: &str) -> String {
        format!("{}/{}", self.config.branch_prefix, item_id)
    }

    /// Worktree path for an item
    pub fn workspace_path(&self, item_id: &str) -> PathBuf {
        self.config.worktree_dir.join(item_id)
    }

    pub(super) async fn run_git(&self, dir: &Path, args: &[&str]) -> Result<Output, GitError> {
        debug!(?dir, ?args, "GitManager::run_git");
        Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| GitError::CommandFailed(e.to_string()))
    }

    /// Create a worktree + branch for an item, branched off `base_branch`
    ///
    /// A worktree retained from an earlier failed run is reused as-is, and
    /// an existing item branch is checked out rather than recreated, so a
    /// retried item picks up where its last agent left off.
    pub async fn create_workspace(&self, item_id: &str, base_branch: &str) -> Result<WorkspaceInfo, GitError> {
        let _guard = self.lock.lock().await;

        let path = self.workspace_path(item_id);
        let branch = self.branch_name(item_id);

        if path.exists() {
            debug!(%item_id, ?path, "Reusing retained worktree");
            return Ok(WorkspaceInfo {
                item_id: item_id.to_string(),
                path,
                branch,
            });
        }

        tokio::fs::create_dir_all(&self.config.worktree_dir)
            .await
            .map_err(|e| GitError::CreateFailed(format!("failed to create worktree dir: {}", e)))?;

        let path_str = path.to_string_lossy().into_owned();
        let output = if self.branch_exists_locked(&branch).await? {
            // Branch survived a previous run; attach a fresh worktree to it
            self.run_git(&self.config.repo_root, &["worktree", "add", &path_str, &branch])
                .await?
        } else {
            self.run_git(
                &self.config.repo_root,
                &["worktree", "add", &path_str, "-b", &branch, base_branch],
            )
            .await?
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CreateFailed(stderr.trim().to_string()));
        }

        info!(%item_id, %branch, base = %base_branch, "Created worktree");

        Ok(WorkspaceInfo {
            item_id: item_id.to_string(),
            path,
            branch,
        })
    }

    /// Remove an item's worktree and delete its branch
    pub async fn remove_workspace(&self, item_id: &str) -> Result<(), GitError> {
        let _guard = self.lock.lock().await;

        let path = self.workspace_path(item_id);
        if path.exists() {
            let path_str = path.to_string_lossy().into_owned();
            let output = self
                .run_git(&self.config.repo_root, &["worktree", "remove", &path_str, "--force"])
                .await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.contains("is not a working tree") {
                    return Err(GitError::RemoveFailed(stderr.trim().to_string()));
                }
            }
        } else {
            warn!(%item_id, ?path, "Worktree does not exist, skipping removal");
        }

        let branch = self.branch_name(item_id);
        let _ = self
            .run_git(&self.config.repo_root, &["branch", "-D", &branch])
            .await;

        info!(%item_id, "Removed worktree and branch");
        Ok(())
    }

    /// Stage and commit everything pending in `dir`
    ///
    /// Returns false when the tree was already clean.
    pub async fn commit_all(&self, dir: &Path, message: &str) -> Result<bool, GitError> {
        let _guard = self.lock.lock().await;

        let status = self.run_git(dir, &["status", "--porcelain"]).await?;
        if status.stdout.is_empty() {
            debug!(?dir, "Nothing to commit");
            return Ok(false);
        }

        let add = self.run_git(dir, &["add", "-A"]).await?;
        if !add.status.success() {
            let stderr = String::from_utf8_lossy(&add.stderr);
            return Err(GitError::CommitFailed(stderr.trim().to_string()));
        }

        let commit = self.run_git(dir, &["commit", "-m", message]).await?;
        if !commit.status.success() {
            let stderr = String::from_utf8_lossy(&commit.stderr);
            return Err(GitError::CommitFailed(stderr.trim().to_string()));
        }

        info!(?dir, "Committed pending changes");
        Ok(true)
    }

    /// Check whether a local branch exists
    pub async fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let _guard = self.lock.lock().await;
        self.branch_exists_locked(branch).await
    }

    pub(super) async fn branch_exists_locked(&self, branch: &str) -> Result<bool, GitError> {
        let output = self
            .run_git(
                &self.config.repo_root,
                &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)],
            )
            .await?;
        Ok(output.status.success())
    }

    /// Name of the branch currently checked out in the repo root
    pub async fn current_branch(&self) -> Result<String, GitError> {
        let output = self
            .run_git(&self.config.repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CommandFailed(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Find the checkout (repo root or a worktree) that has `branch` out,
    /// via `git worktree list --porcelain`
    pub(super) async fn find_checkout_locked(&self, branch: &str) -> Result<Option<PathBuf>, GitError> {
        let output = self
            .run_git(&self.config.repo_root, &["worktree", "list", "--porcelain"])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitError::CommandFailed(stderr.trim().to_string()));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let wanted = format!("refs/heads/{}", branch);

        let mut current_path: Option<PathBuf> = None;
        for line in text.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(path));
            } else if let Some(r) = line.strip_prefix("branch ")
                && r == wanted
            {
                return Ok(current_path);
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) async fn setup_git_repo(dir: &Path) {
        for args in [
            vec!["init"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
            vec!["commit", "--allow-empty", "-m", "initial"],
            vec!["branch", "-M", "main"],
        ] {
            let out = Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
            assert!(out.status.success(), "git {:?} failed: {:?}", args, out);
        }
    }

    pub(crate) fn test_config(repo: &Path, worktrees: &Path) -> GitConfig {
        GitConfig {
            repo_root: repo.to_path_buf(),
            worktree_dir: worktrees.to_path_buf(),
            branch_prefix: "beans".to_string(),
            trunk_branch: "main".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_and_remove_workspace() {
        let repo = tempdir().unwrap();
        let worktrees = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), worktrees.path().join("wt").as_path()));

        let ws = git.create_workspace("i-1", "main").await.unwrap();
        assert!(ws.path.exists());
        assert_eq!(ws.branch, "beans/i-1");
        assert!(git.branch_exists("beans/i-1").await.unwrap());

        git.remove_workspace("i-1").await.unwrap();
        assert!(!ws.path.exists());
        assert!(!git.branch_exists("beans/i-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_workspace_reuses_retained_worktree() {
        let repo = tempdir().unwrap();
        let worktrees = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), worktrees.path().join("wt").as_path()));

        let first = git.create_workspace("i-1", "main").await.unwrap();
        let second = git.create_workspace("i-1", "main").await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(first.branch, second.branch);
    }

    #[tokio::test]
    async fn test_commit_all() {
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), repo.path().join("wt").as_path()));

        // Clean tree: nothing to commit
        assert!(!git.commit_all(repo.path(), "noop").await.unwrap());

        std::fs::write(repo.path().join("file.txt"), "content").unwrap();
        assert!(git.commit_all(repo.path(), "chore: add file").await.unwrap());

        // Clean again
        assert!(!git.commit_all(repo.path(), "noop").await.unwrap());
    }

    #[tokio::test]
    async fn test_current_branch() {
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), repo.path().join("wt").as_path()));
        assert_eq!(git.current_branch().await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_branch_exists() {
        let repo = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), repo.path().join("wt").as_path()));
        assert!(git.branch_exists("main").await.unwrap());
        assert!(!git.branch_exists("beans/nope").await.unwrap());
    }
}
