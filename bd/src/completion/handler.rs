//! Completion handler
//!
//! The single writer that turns a terminal `RunResult` into backlog state
//! and git history: commit + merge + cleanup on success, crash/blocked item
//! filing on failure, status revert on cancellation, and startup
//! reconciliation for runs orphaned by a dead daemon.

use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backlog::{BacklogApi, BacklogError, CreateItem, ListFilter};
use crate::domain::{
    EXIT_SPAWN_FAILED, ExecutionContext, Item, ItemType, RunResult, Status, StuckKind, TAG_BLOCKED, TAG_FAILED,
    generate_id, merge_strategy, slugify,
};
use crate::git::GitManager;

use super::commit::build_commit_message;

/// Configuration for completion handling
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Title of the well-known container auxiliary items are filed under
    pub errors_container_title: String,

    /// How many trailing output lines a crash/blocked item carries
    pub crash_tail_lines: usize,

    /// Per-item log directory (startup reconciliation rebuilds contexts)
    pub log_dir: PathBuf,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            errors_container_title: "Errors".to_string(),
            crash_tail_lines: 40,
            log_dir: crate::scheduler::SchedulerConfig::default().log_dir,
        }
    }
}

/// What completion handling decided for one result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Item completed; branch merged and cleaned up
    Completed,
    /// Run crashed; item tagged `failed` and a crash item filed
    Crashed { crash_item_id: String },
    /// Agent signalled blocked; item tagged `blocked` and documented
    Blocked { aux_item_id: String },
    /// Run was cancelled; item reverted to todo, no auxiliary item
    Cancelled,
    /// Item vanished from the store mid-run; nothing to reconcile
    ItemMissing,
}

/// Turns run results into backlog mutations and git history
pub struct CompletionHandler {
    backlog: Arc<dyn BacklogApi>,
    git: Arc<GitManager>,
    config: CompletionConfig,
    /// Resolved errors-container id, found-or-created once
    errors_container: Mutex<Option<String>>,
}

impl CompletionHandler {
    pub fn new(backlog: Arc<dyn BacklogApi>, git: Arc<GitManager>, config: CompletionConfig) -> Self {
        Self {
            backlog,
            git,
            config,
            errors_container: Mutex::new(None),
        }
    }

    /// Process one terminal result
    ///
    /// The caller removes the item from the in-flight table before (or
    /// atomically with) this call, and each `RunResult` is delivered
    /// exactly once, so a duplicate notification cannot double-process.
    pub async fn handle(
        &self,
        result: &RunResult,
        ctx: &ExecutionContext,
        clean_shutdown: bool,
    ) -> Result<CompletionOutcome> {
        debug!(
            item_id = %result.item_id,
            exit_code = result.exit_code,
            cancelled = result.cancelled,
            clean_shutdown,
            "Handling run result"
        );

        let Some(item) = self.backlog.get(&result.item_id).await? else {
            warn!(item_id = %result.item_id, "Item disappeared mid-run, nothing to reconcile");
            return Ok(CompletionOutcome::ItemMissing);
        };

        if result.cancelled {
            return self.handle_cancelled(&item, clean_shutdown).await;
        }

        // Tag state observed before exit wins: an agent that declared
        // itself blocked is blocked even if the process then exited
        // non-zero.
        if item.has_tag(TAG_BLOCKED) {
            let detail = self.tail_of_log(ctx).await;
            return self.handle_stuck(&item, StuckKind::Blocked, &detail).await;
        }

        if result.is_success() {
            match self.handle_success(&item, ctx).await {
                Ok(None) => return Ok(CompletionOutcome::Completed),
                Ok(Some(conflict)) => {
                    let detail = format!("merge conflict while landing {}:\n{}", ctx.branch, conflict);
                    return self.handle_stuck(&item, StuckKind::Failed, &detail).await;
                }
                Err(e) => {
                    warn!(item_id = %item.id, error = %e, "Success path failed, routing to crash path");
                    let detail = format!("failed to reconcile successful run: {:#}", e);
                    return self.handle_stuck(&item, StuckKind::Failed, &detail).await;
                }
            }
        }

        let detail = self.tail_of_log(ctx).await;
        self.handle_stuck(&item, StuckKind::Failed, &detail).await
    }

    /// Cancellation: revert to todo, never create auxiliary items
    ///
    /// A clean shutdown must be indistinguishable from idle; the worktree
    /// is retained either way so agent work survives.
    async fn handle_cancelled(&self, item: &Item, clean_shutdown: bool) -> Result<CompletionOutcome> {
        info!(item_id = %item.id, clean_shutdown, "Run cancelled");

        // Only revert if we still own the status; an external edit that
        // moved the item elsewhere stands.
        if item.status == Status::InProgress {
            self.backlog
                .update_status(&item.id, Status::Todo)
                .await
                .wrap_err("failed to revert cancelled item to todo")?;
        }

        Ok(CompletionOutcome::Cancelled)
    }

    /// Success: commit, merge per policy, clean up, mark completed
    ///
    /// Returns `Ok(Some(conflict))` when the merge hit conflicts; the
    /// caller routes that through the crash path with the branch retained.
    async fn handle_success(&self, item: &Item, ctx: &ExecutionContext) -> Result<Option<String>> {
        let scope = self.resolve_scope(item).await;
        let message = build_commit_message(item, scope.as_deref());

        let work_dir = ctx
            .worktree
            .clone()
            .unwrap_or_else(|| self.git.config().repo_root.clone());
        self.git.commit_all(&work_dir, &message).await?;

        if ctx.is_isolated() && ctx.branch != ctx.base_branch {
            if let Some(strategy) = merge_strategy(item.item_type) {
                let outcome = self.git.merge(&ctx.branch, &ctx.base_branch, strategy, &message).await?;
                if let crate::git::MergeOutcome::Conflict { message } = outcome {
                    return Ok(Some(message));
                }
            }
            // Branch lifecycle ends on a successful merge
            self.git.remove_workspace(&item.id).await?;
        }

        self.backlog.update_status(&item.id, Status::Completed).await?;
        info!(item_id = %item.id, "Item completed");

        Ok(None)
    }

    /// Crash/blocked: tag the item and file an auxiliary child under the
    /// errors container, blocking the original for operator visibility
    async fn handle_stuck(&self, item: &Item, kind: StuckKind, detail: &str) -> Result<CompletionOutcome> {
        let (tag, title_prefix) = match kind {
            StuckKind::Failed => (TAG_FAILED, "Crash"),
            StuckKind::Blocked => (TAG_BLOCKED, "Blocked"),
        };

        warn!(item_id = %item.id, %kind, "Run stuck, filing auxiliary item");

        let container = self.errors_container().await?;
        let title = format!("{}: {}", title_prefix, item.title);
        let body = format!("Item {} is stuck ({}).\n\n{}", item.id, kind, detail);

        // Draft status keeps the scheduler from ever dispatching an agent
        // onto a crash report
        let aux = self
            .backlog
            .create(
                CreateItem::new(&title, ItemType::Bug)
                    .with_id(generate_id("bug", &title))
                    .with_body(body)
                    .with_status(Status::Draft)
                    .with_parent(container),
            )
            .await?;

        self.backlog.add_blocking(&item.id, &aux.id).await?;
        self.backlog.update_tags(&item.id, &[tag], &[]).await?;

        match kind {
            StuckKind::Failed => Ok(CompletionOutcome::Crashed { crash_item_id: aux.id }),
            StuckKind::Blocked => Ok(CompletionOutcome::Blocked { aux_item_id: aux.id }),
        }
    }

    /// Find-or-create the errors container: a draft milestone that can
    /// never be scheduled
    pub async fn errors_container(&self) -> Result<String, BacklogError> {
        let mut cached = self.errors_container.lock().await;
        if let Some(id) = cached.as_ref() {
            return Ok(id.clone());
        }

        let items = self.backlog.list(&ListFilter::all()).await?;
        let found = items
            .into_iter()
            .find(|i| i.item_type == ItemType::Milestone && i.title == self.config.errors_container_title);

        let id = match found {
            Some(item) => item.id,
            None => {
                info!(title = %self.config.errors_container_title, "Creating errors container");
                self.backlog
                    .create(
                        CreateItem::new(&self.config.errors_container_title, ItemType::Milestone)
                            .with_status(Status::Draft),
                    )
                    .await?
                    .id
            }
        };

        *cached = Some(id.clone());
        Ok(id)
    }

    /// Startup reconciliation: in-progress items with no live runner are
    /// crash outcomes from a dead daemon instance
    ///
    /// Already-stuck items were processed before that instance died and
    /// are skipped, so a restart never duplicates crash items.
    pub async fn reconcile_startup(&self) -> Result<usize> {
        let in_progress = self.backlog.list(&ListFilter::with_status(Status::InProgress)).await?;
        let mut count = 0;

        for item in in_progress {
            if item.is_stuck() {
                debug!(item_id = %item.id, "Skipping already-stuck item during reconciliation");
                continue;
            }

            warn!(item_id = %item.id, "Found orphaned in-progress item, treating as crash");

            let ctx = self.rebuild_context(&item.id);
            let result = RunResult {
                item_id: item.id.clone(),
                exit_code: EXIT_SPAWN_FAILED,
                cancelled: false,
                duration_ms: 0,
            };
            self.handle(&result, &ctx, false).await?;
            count += 1;
        }

        if count > 0 {
            info!(count, "Startup reconciliation processed orphaned items");
        }
        Ok(count)
    }

    /// Reconstruct a best-effort context for an item from a prior daemon run
    fn rebuild_context(&self, item_id: &str) -> ExecutionContext {
        let worktree = self.git.workspace_path(item_id);
        ExecutionContext {
            item_id: item_id.to_string(),
            branch: self.git.branch_name(item_id),
            base_branch: self.git.config().trunk_branch.clone(),
            worktree: worktree.exists().then_some(worktree),
            log_path: self.config.log_dir.join(format!("{}.log", item_id)),
        }
    }

    /// Slug of the nearest ancestor epic's title, for the commit scope
    async fn resolve_scope(&self, item: &Item) -> Option<String> {
        let mut current = item.parent_id.clone();

        // Bounded walk; parent chains are shallow and may be malformed
        for _ in 0..16 {
            let id = current?;
            let parent = self.backlog.get(&id).await.ok().flatten()?;
            if parent.item_type == ItemType::Epic {
                return Some(slugify(&parent.title));
            }
            current = parent.parent_id;
        }

        None
    }

    /// Last lines of the item's output log
    async fn tail_of_log(&self, ctx: &ExecutionContext) -> String {
        match tokio::fs::read_to_string(&ctx.log_path).await {
            Ok(content) => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(self.config.crash_tail_lines);
                lines[start..].join("\n")
            }
            Err(_) => "(no output captured)".to_string(),
        }
    }
}
