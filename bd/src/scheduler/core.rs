//! Scheduler: eligibility, ordering, and dispatch
//!
//! Owns the in-flight table. All mutation happens inside the orchestrator's
//! single control loop; other components only ever receive copies of the
//! `ExecutionContext` they need.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use eyre::{Result, eyre};
use tracing::{debug, info};

use crate::domain::{ExecutionContext, Item, ItemType, Status, TAG_BLOCKED, TAG_FAILED};
use crate::git::GitManager;

use super::config::SchedulerConfig;

/// The scheduler decides which item runs next and enforces the
/// concurrency limit
pub struct Scheduler {
    config: SchedulerConfig,

    /// Items currently dispatched, keyed by item id
    in_flight: HashMap<String, ExecutionContext>,

    /// Items excluded from scheduling with the reason (dependency cycles);
    /// recomputed each evaluation pass so operator edits lift exclusions
    excluded: HashMap<String, String>,

    /// Items cancelled this daemon run; not auto-requeued until an
    /// operator edit releases them (or the daemon restarts)
    held: HashSet<String>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            in_flight: HashMap::new(),
            excluded: HashMap::new(),
            held: HashSet::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Room for another dispatch
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.config.max_parallel
    }

    pub fn is_in_flight(&self, item_id: &str) -> bool {
        self.in_flight.contains_key(item_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Copies of every in-flight context
    pub fn in_flight(&self) -> Vec<ExecutionContext> {
        self.in_flight.values().cloned().collect()
    }

    /// Dispatch eligibility predicate
    ///
    /// Unresolvable blocking ids are treated as still-blocking, never as
    /// satisfied.
    pub fn eligible(&self, item: &Item, mirror: &HashMap<String, Item>) -> bool {
        item.status == Status::Todo
            && !item.has_tag(TAG_BLOCKED)
            && !item.has_tag(TAG_FAILED)
            && !self.in_flight.contains_key(&item.id)
            && !self.excluded.contains_key(&item.id)
            && !self.held.contains(&item.id)
            && item
                .blocking_ids
                .iter()
                .all(|id| mirror.get(id).is_some_and(|dep| dep.status == Status::Completed))
    }

    /// All todo items in dispatch order: priority rank, then age, then id
    pub fn queue(&self, mirror: &HashMap<String, Item>) -> Vec<Item> {
        let mut items: Vec<Item> = mirror.values().filter(|i| i.status == Status::Todo).cloned().collect();
        items.sort_by_key(|i| (Reverse(i.priority), i.created_at, i.id.clone()));
        items
    }

    /// Highest-ranked eligible item, if any
    pub fn next_eligible(&self, mirror: &HashMap<String, Item>) -> Option<Item> {
        self.queue(mirror).into_iter().find(|i| self.eligible(i, mirror))
    }

    /// Recompute cycle exclusions over the whole mirror
    ///
    /// Returns the items newly excluded this pass, for reporting. An item
    /// whose `blocking_ids` transitively include itself is a configuration
    /// error: it is never scheduled but does not block the rest of the
    /// queue.
    pub fn detect_cycles(&mut self, mirror: &HashMap<String, Item>) -> Vec<(String, String)> {
        let mut fresh: HashMap<String, String> = HashMap::new();

        for item in mirror.values() {
            if item.status == Status::Todo && in_blocking_cycle(&item.id, mirror) {
                fresh.insert(
                    item.id.clone(),
                    format!("dependency cycle through {}", item.id),
                );
            }
        }

        let newly: Vec<(String, String)> = fresh
            .iter()
            .filter(|(id, _)| !self.excluded.contains_key(*id))
            .map(|(id, reason)| (id.clone(), reason.clone()))
            .collect();

        self.excluded = fresh;
        newly
    }

    /// Build the execution context for an item and mark it in-flight
    ///
    /// In parallel mode this allocates a branch + worktree off the parent's
    /// branch (trunk when the parent has no branch); sequential mode reuses
    /// the active branch directly.
    pub async fn dispatch(
        &mut self,
        item: &Item,
        mirror: &HashMap<String, Item>,
        git: &GitManager,
    ) -> Result<ExecutionContext> {
        if self.in_flight.contains_key(&item.id) {
            return Err(eyre!("item {} is already in flight", item.id));
        }
        if !self.has_capacity() {
            return Err(eyre!("dispatch requested at capacity ({})", self.config.max_parallel));
        }

        let log_path = self.config.log_dir.join(format!("{}.log", item.id));

        // Milestones are trunk-level and never get a branch of their own
        let ctx = if self.config.parallel_mode() && item.item_type != ItemType::Milestone {
            let base = self.resolve_base_branch(item, mirror, git).await?;
            let ws = git.create_workspace(&item.id, &base).await?;
            ExecutionContext {
                item_id: item.id.clone(),
                branch: ws.branch,
                base_branch: base,
                worktree: Some(ws.path),
                log_path,
            }
        } else {
            let branch = git.current_branch().await?;
            ExecutionContext {
                item_id: item.id.clone(),
                branch: branch.clone(),
                base_branch: branch,
                worktree: None,
                log_path,
            }
        };

        info!(
            item_id = %item.id,
            branch = %ctx.branch,
            base = %ctx.base_branch,
            isolated = ctx.is_isolated(),
            "Dispatching item"
        );

        self.in_flight.insert(item.id.clone(), ctx.clone());
        Ok(ctx)
    }

    /// Base branch for a new item branch: the parent's branch when it
    /// exists in git; otherwise the trunk. Milestones never have branches.
    async fn resolve_base_branch(
        &self,
        item: &Item,
        mirror: &HashMap<String, Item>,
        git: &GitManager,
    ) -> Result<String> {
        if let Some(parent_id) = &item.parent_id
            && let Some(parent) = mirror.get(parent_id)
            && parent.item_type != ItemType::Milestone
        {
            let candidate = git.branch_name(parent_id);
            if git.branch_exists(&candidate).await? {
                return Ok(candidate);
            }
            debug!(item_id = %item.id, parent = %parent_id, "Parent branch absent, using trunk");
        }

        Ok(git.config().trunk_branch.clone())
    }

    /// Remove an item from the in-flight table immediately
    ///
    /// Called before the underlying process is confirmed stopped, so the
    /// item can never be double-dispatched. The item is also held out of
    /// future passes this daemon run until an operator edit releases it.
    /// Backlog status is not touched here; that is the completion
    /// handler's job.
    pub fn cancel(&mut self, item_id: &str) -> bool {
        let was_in_flight = self.in_flight.remove(item_id).is_some();
        if was_in_flight {
            self.held.insert(item_id.to_string());
        }
        was_in_flight
    }

    /// Lift the post-cancellation hold (an operator edited the item)
    pub fn release_hold(&mut self, item_id: &str) -> bool {
        self.held.remove(item_id)
    }

    pub fn is_held(&self, item_id: &str) -> bool {
        self.held.contains(item_id)
    }

    /// Take an in-flight context out of the table (completion path)
    pub fn remove_in_flight(&mut self, item_id: &str) -> Option<ExecutionContext> {
        self.in_flight.remove(item_id)
    }
}

/// DFS over `blocking_ids`: does `start`'s blocking closure contain itself?
fn in_blocking_cycle(start: &str, mirror: &HashMap<String, Item>) -> bool {
    let mut stack: Vec<&str> = mirror
        .get(start)
        .map(|i| i.blocking_ids.iter().map(String::as_str).collect())
        .unwrap_or_default();
    let mut seen: HashSet<&str> = HashSet::new();

    while let Some(id) = stack.pop() {
        if id == start {
            return true;
        }
        if !seen.insert(id) {
            continue;
        }
        if let Some(item) = mirror.get(id) {
            stack.extend(item.blocking_ids.iter().map(String::as_str));
        }
    }

    false
}
