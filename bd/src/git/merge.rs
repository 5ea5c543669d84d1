//! Merging item branches back into their base branch
//!
//! Tasks and bugs squash-merge; features and epics merge with `--no-ff`.
//! The merge runs wherever the base branch is already checked out (the repo
//! root, or a live worktree of a parent item), so it never fights git over a
//! branch that is busy elsewhere.

use std::path::Path;

use tracing::{info, warn};

use crate::domain::MergeStrategy;

use super::manager::{GitError, GitManager};

/// Result of a merge attempt
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    /// Branch landed in the base branch
    Merged,
    /// Conflicts; the merge was aborted and the branch retained
    Conflict { message: String },
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged)
    }
}

impl GitManager {
    /// Merge `branch` into `into` with the given strategy
    ///
    /// On conflict the merge is rolled back and `Conflict` returned; the
    /// source branch is left alone for inspection.
    pub async fn merge(
        &self,
        branch: &str,
        into: &str,
        strategy: MergeStrategy,
        message: &str,
    ) -> Result<MergeOutcome, GitError> {
        let _guard = self.lock.lock().await;

        info!(%branch, %into, ?strategy, "Merging branch");

        // Run the merge where `into` is checked out; check it out in the
        // repo root only if nothing has it.
        let merge_dir = match self.find_checkout_locked(into).await? {
            Some(dir) => dir,
            None => {
                let checkout = self.run_git(&self.config.repo_root, &["checkout", into]).await?;
                if !checkout.status.success() {
                    let stderr = String::from_utf8_lossy(&checkout.stderr);
                    return Err(GitError::MergeFailed(format!(
                        "failed to checkout {}: {}",
                        into,
                        stderr.trim()
                    )));
                }
                self.config.repo_root.clone()
            }
        };

        match strategy {
            MergeStrategy::Squash => self.squash_merge(&merge_dir, branch, message).await,
            MergeStrategy::MergeCommit => self.no_ff_merge(&merge_dir, branch, message).await,
        }
    }

    async fn squash_merge(&self, dir: &Path, branch: &str, message: &str) -> Result<MergeOutcome, GitError> {
        let merge = self.run_git(dir, &["merge", "--squash", branch]).await?;

        if !merge.status.success() {
            let text = merge_failure_text(&merge);
            warn!(%branch, "Squash merge failed, rolling back");
            // A conflicted squash has no MERGE_HEAD; reset --merge undoes it
            let _ = self.run_git(dir, &["reset", "--merge"]).await;
            return Ok(MergeOutcome::Conflict { message: text });
        }

        let commit = self
            .run_git(dir, &["commit", "--allow-empty", "-m", message])
            .await?;
        if !commit.status.success() {
            let stderr = String::from_utf8_lossy(&commit.stderr);
            return Err(GitError::MergeFailed(stderr.trim().to_string()));
        }

        info!(%branch, "Squash merge complete");
        Ok(MergeOutcome::Merged)
    }

    async fn no_ff_merge(&self, dir: &Path, branch: &str, message: &str) -> Result<MergeOutcome, GitError> {
        let merge = self.run_git(dir, &["merge", "--no-ff", branch, "-m", message]).await?;

        if !merge.status.success() {
            let text = merge_failure_text(&merge);
            warn!(%branch, "Merge failed, aborting");
            let _ = self.run_git(dir, &["merge", "--abort"]).await;
            return Ok(MergeOutcome::Conflict { message: text });
        }

        info!(%branch, "Merge complete");
        Ok(MergeOutcome::Merged)
    }
}

/// Conflict text from a failed merge: git reports conflicts on stdout and
/// other failures on stderr
fn merge_failure_text(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stdout.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        format!("{}\n{}", stdout.trim(), stderr.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::manager::tests::{setup_git_repo, test_config};
    use tempfile::tempdir;

    async fn write_and_commit(git: &GitManager, dir: &Path, file: &str, content: &str, message: &str) {
        std::fs::write(dir.join(file), content).unwrap();
        git.commit_all(dir, message).await.unwrap();
    }

    #[tokio::test]
    async fn test_squash_merge_collapses_to_one_commit() {
        let repo = tempdir().unwrap();
        let worktrees = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), worktrees.path().join("wt").as_path()));
        let ws = git.create_workspace("i-1", "main").await.unwrap();

        write_and_commit(&git, &ws.path, "a.txt", "a", "wip a").await;
        write_and_commit(&git, &ws.path, "b.txt", "b", "wip b").await;

        let outcome = git
            .merge("beans/i-1", "main", MergeStrategy::Squash, "chore: land i-1")
            .await
            .unwrap();
        assert!(outcome.is_merged());

        // Both files present on main, as a single commit
        assert!(repo.path().join("a.txt").exists());
        assert!(repo.path().join("b.txt").exists());

        let log = tokio::process::Command::new("git")
            .args(["log", "--oneline", "main"])
            .current_dir(repo.path())
            .output()
            .await
            .unwrap();
        let lines = String::from_utf8_lossy(&log.stdout).lines().count();
        assert_eq!(lines, 2); // initial + squash commit
    }

    #[tokio::test]
    async fn test_no_ff_merge_keeps_merge_commit() {
        let repo = tempdir().unwrap();
        let worktrees = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), worktrees.path().join("wt").as_path()));
        let ws = git.create_workspace("i-2", "main").await.unwrap();

        write_and_commit(&git, &ws.path, "f.txt", "f", "feat work").await;

        let outcome = git
            .merge("beans/i-2", "main", MergeStrategy::MergeCommit, "feat: land i-2")
            .await
            .unwrap();
        assert!(outcome.is_merged());

        // HEAD on main is a merge commit (two parents)
        let parents = tokio::process::Command::new("git")
            .args(["rev-list", "--parents", "-n", "1", "main"])
            .current_dir(repo.path())
            .output()
            .await
            .unwrap();
        let fields = String::from_utf8_lossy(&parents.stdout).split_whitespace().count();
        assert_eq!(fields, 3);
    }

    #[tokio::test]
    async fn test_merge_conflict_reports_and_rolls_back() {
        let repo = tempdir().unwrap();
        let worktrees = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), worktrees.path().join("wt").as_path()));

        // Diverge: same file changed on main and on the item branch
        write_and_commit(&git, repo.path(), "x.txt", "base", "seed").await;
        let ws = git.create_workspace("i-3", "main").await.unwrap();
        write_and_commit(&git, &ws.path, "x.txt", "branch version", "branch change").await;
        write_and_commit(&git, repo.path(), "x.txt", "main version", "main change").await;

        let outcome = git
            .merge("beans/i-3", "main", MergeStrategy::Squash, "chore: land i-3")
            .await
            .unwrap();

        match outcome {
            MergeOutcome::Conflict { message } => assert!(!message.is_empty()),
            other => panic!("Expected conflict, got {:?}", other),
        }

        // Rolled back: main still has its own version, branch retained
        let content = std::fs::read_to_string(repo.path().join("x.txt")).unwrap();
        assert_eq!(content, "main version");
        assert!(git.branch_exists("beans/i-3").await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_into_branch_checked_out_in_worktree() {
        let repo = tempdir().unwrap();
        let worktrees = tempdir().unwrap();
        setup_git_repo(repo.path()).await;

        let git = GitManager::new(test_config(repo.path(), worktrees.path().join("wt").as_path()));

        // Parent feature branch lives in its own worktree; child merges into it
        let parent = git.create_workspace("feat-1", "main").await.unwrap();
        let child = git.create_workspace("task-1", "beans/feat-1").await.unwrap();

        write_and_commit(&git, &child.path, "t.txt", "t", "task work").await;

        let outcome = git
            .merge("beans/task-1", "beans/feat-1", MergeStrategy::Squash, "chore: land task-1")
            .await
            .unwrap();
        assert!(outcome.is_merged());

        // The squashed change landed in the parent's worktree
        assert!(parent.path.join("t.txt").exists());
    }
}
