//! Orchestrator control loop
//!
//! Thin coordinator wiring watcher, scheduler, runners, and completion
//! handler into one event-driven loop. All scheduler and runner-table
//! mutation happens here, on a single task; everything else receives
//! copies of the contexts it needs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::backlog::BacklogApi;
use crate::completion::{CompletionConfig, CompletionHandler, CompletionOutcome};
use crate::domain::{EXIT_SPAWN_FAILED, ExecutionContext, Item, RunResult, Status, StuckKind};
use crate::events::{DaemonEvent, EventBus};
use crate::git::{GitConfig, GitManager};
use crate::runner::{AgentRunner, RunnerConfig};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::watcher::{BacklogWatcher, ChangeEvent, WatcherConfig, WatcherHandle};

use super::handle::DaemonHandle;
use super::messages::ControlRequest;

/// Orchestrator-level configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Periodic re-evaluation interval, in seconds; backs up event-driven
    /// scheduling so transient dispatch failures are retried
    pub reevaluate_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reevaluate_interval_secs: 10,
        }
    }
}

struct RunnerEntry {
    runner: Arc<AgentRunner>,
    ctx: ExecutionContext,
}

/// The daemon's one control loop
pub struct Orchestrator {
    config: OrchestratorConfig,
    backlog: Arc<dyn BacklogApi>,
    git: Arc<GitManager>,
    bus: Arc<EventBus>,
    scheduler: Scheduler,
    completion: CompletionHandler,
    runner_config: RunnerConfig,

    watcher: Option<BacklogWatcher>,
    watcher_handle: WatcherHandle,
    changes_rx: Option<mpsc::Receiver<ChangeEvent>>,

    control_tx: mpsc::Sender<ControlRequest>,
    control_rx: mpsc::Receiver<ControlRequest>,

    /// Live runner per dispatched item; entries outlive a cancel until the
    /// terminal result arrives
    runners: HashMap<String, RunnerEntry>,
    shutting_down: bool,
    stop_reply: Option<oneshot::Sender<()>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        scheduler_config: SchedulerConfig,
        watcher_config: WatcherConfig,
        runner_config: RunnerConfig,
        completion_config: CompletionConfig,
        git_config: GitConfig,
        backlog: Arc<dyn BacklogApi>,
        bus: Arc<EventBus>,
    ) -> Self {
        let git = Arc::new(GitManager::new(git_config));
        let completion = CompletionHandler::new(backlog.clone(), git.clone(), completion_config);
        let (watcher, watcher_handle, changes_rx) = BacklogWatcher::new(watcher_config, backlog.clone());
        let (control_tx, control_rx) = mpsc::channel(64);

        Self {
            config,
            backlog,
            git,
            bus,
            scheduler: Scheduler::new(scheduler_config),
            completion,
            runner_config,
            watcher: Some(watcher),
            watcher_handle,
            changes_rx: Some(changes_rx),
            control_tx,
            control_rx,
            runners: HashMap::new(),
            shutting_down: false,
            stop_reply: None,
        }
    }

    /// Handle for control and event subscription
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle::new(self.control_tx.clone(), self.bus.clone())
    }

    /// Spawn the control loop, returning the handle and join handle
    pub fn start(self) -> (DaemonHandle, tokio::task::JoinHandle<Result<()>>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// Run until a graceful stop drains every in-flight item
    pub async fn run(mut self) -> Result<()> {
        info!("Orchestrator starting");

        // The errors container and orphaned-run reconciliation come before
        // anything is dispatched
        if let Err(e) = self.completion.errors_container().await {
            warn!(error = %e, "Could not resolve errors container at startup");
        }
        match self.completion.reconcile_startup().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Reconciled orphaned in-progress items"),
            Err(e) => {
                warn!(error = %e, "Startup reconciliation failed");
                self.emit_error("startup", &format!("reconciliation failed: {:#}", e));
            }
        }

        let mut watcher = self.watcher.take().expect("orchestrator run twice");
        let mut changes_rx = self.changes_rx.take().expect("orchestrator run twice");

        // Populate the mirror before the first dispatch pass
        if let Err(e) = watcher.prime().await {
            warn!(error = %e, "Initial backlog load failed, watcher will retry");
        }

        let (watcher_shutdown_tx, watcher_shutdown_rx) = watch::channel(false);
        let watcher_task = tokio::spawn(watcher.run(watcher_shutdown_rx));

        let (completions_tx, mut completions_rx) = mpsc::channel::<RunResult>(64);
        self.dispatch_ready(&completions_tx).await;

        let mut tick = tokio::time::interval(Duration::from_secs(self.config.reevaluate_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(change) = changes_rx.recv() => {
                    self.on_change(change, &completions_tx).await;
                }
                Some(result) = completions_rx.recv() => {
                    self.on_completion(result, &completions_tx).await;
                    if self.shutting_down && self.runners.is_empty() {
                        break;
                    }
                }
                Some(req) = self.control_rx.recv() => {
                    let stopping = self.on_control(req).await;
                    if stopping && self.runners.is_empty() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    if !self.shutting_down {
                        self.dispatch_ready(&completions_tx).await;
                    }
                }
            }
        }

        let _ = watcher_shutdown_tx.send(true);
        let _ = watcher_task.await;

        if let Some(reply) = self.stop_reply.take() {
            let _ = reply.send(());
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    /// React to one backlog change
    async fn on_change(&mut self, change: ChangeEvent, completions_tx: &mpsc::Sender<RunResult>) {
        match &change {
            ChangeEvent::Degraded { consecutive_failures } => {
                self.emit_error(
                    "watcher",
                    &format!(
                        "backlog store unreachable for {} consecutive polls, serving last-known state",
                        consecutive_failures
                    ),
                );
            }
            ChangeEvent::StatusChanged { item, from, to } => {
                // An in-flight item externally edited out of in-progress is
                // retracted; the cancellation outcome will respect the edit
                if *to != Status::InProgress {
                    self.retract(&item.id, "status changed externally");
                }
                // A status edit lifts a post-cancellation hold, except the
                // daemon's own transitions (dispatch and cancel-revert)
                let own_edit =
                    *to == Status::InProgress || (*from == Status::InProgress && *to == Status::Todo);
                if !own_edit {
                    self.scheduler.release_hold(&item.id);
                }
            }
            ChangeEvent::Deleted { item_id } => {
                self.retract(item_id, "deleted externally");
            }
            // Operator edits requeue a previously cancelled item
            ChangeEvent::Created(item) | ChangeEvent::Updated(item) => {
                self.scheduler.release_hold(&item.id);
            }
            ChangeEvent::TagsChanged { item, .. } => {
                self.scheduler.release_hold(&item.id);
            }
        }

        // Any change can flip eligibility somewhere in the queue
        if !self.shutting_down {
            self.dispatch_ready(completions_tx).await;
        }
    }

    fn retract(&mut self, item_id: &str, reason: &str) {
        if let Some(entry) = self.runners.get(item_id) {
            warn!(%item_id, reason, "Retracting in-flight item");
            self.scheduler.cancel(item_id);
            entry.runner.cancel();
        }
    }

    /// Evaluate the whole queue and dispatch while capacity remains
    async fn dispatch_ready(&mut self, completions_tx: &mpsc::Sender<RunResult>) {
        let mirror = self.mirror();

        for (item_id, reason) in self.scheduler.detect_cycles(&mirror) {
            warn!(%item_id, %reason, "Item excluded from scheduling");
            self.emit_error("scheduler", &format!("{} excluded: {}", item_id, reason));
        }

        while self.scheduler.has_capacity() {
            let Some(item) = self.scheduler.next_eligible(&mirror) else {
                break;
            };

            if let Err(e) = self.dispatch_one(&item, &mirror, completions_tx).await {
                warn!(item_id = %item.id, error = %e, "Dispatch failed, will retry");
                self.emit_error("dispatch", &format!("{}: {:#}", item.id, e));
                break;
            }
        }
    }

    async fn dispatch_one(
        &mut self,
        item: &Item,
        mirror: &HashMap<String, Item>,
        completions_tx: &mpsc::Sender<RunResult>,
    ) -> Result<()> {
        let ctx = self.scheduler.dispatch(item, mirror, &self.git).await?;

        if let Err(e) = self.backlog.update_status(&item.id, Status::InProgress).await {
            // Roll the dispatch back so the item is not stranded in-flight
            self.scheduler.remove_in_flight(&item.id);
            return Err(e.into());
        }

        self.bus.emit(DaemonEvent::ItemReady {
            item_id: item.id.clone(),
            branch: ctx.branch.clone(),
        });

        let runner = Arc::new(AgentRunner::new(self.runner_config.clone()));
        self.runners.insert(
            item.id.clone(),
            RunnerEntry {
                runner: runner.clone(),
                ctx: ctx.clone(),
            },
        );

        let emitter = self.bus.emitter_for(&item.id);
        let completions_tx = completions_tx.clone();
        let item_id = item.id.clone();
        tokio::spawn(async move {
            emitter.started();
            let result = match runner.run(ctx, emitter).await {
                Ok(result) => result,
                // A fresh runner cannot be mid-run; resolve rather than hang
                Err(e) => {
                    warn!(%item_id, error = %e, "Runner refused to start");
                    RunResult {
                        item_id: item_id.clone(),
                        exit_code: EXIT_SPAWN_FAILED,
                        cancelled: false,
                        duration_ms: 0,
                    }
                }
            };
            let _ = completions_tx.send(result).await;
        });

        Ok(())
    }

    /// Process one terminal result: exactly once per dispatched item
    async fn on_completion(&mut self, result: RunResult, completions_tx: &mpsc::Sender<RunResult>) {
        debug!(item_id = %result.item_id, "Run result received");

        // In-flight removal happens before the handler mutates anything
        let entry = self.runners.remove(&result.item_id);
        self.scheduler.remove_in_flight(&result.item_id);

        let Some(entry) = entry else {
            warn!(item_id = %result.item_id, "Result for unknown run, ignoring");
            return;
        };

        match self.completion.handle(&result, &entry.ctx, self.shutting_down).await {
            Ok(CompletionOutcome::Completed) => {
                self.bus.emit(DaemonEvent::ItemCompleted {
                    item_id: result.item_id.clone(),
                });
            }
            Ok(CompletionOutcome::Crashed { .. }) => {
                self.bus.emit(DaemonEvent::ItemStuck {
                    item_id: result.item_id.clone(),
                    kind: StuckKind::Failed,
                });
            }
            Ok(CompletionOutcome::Blocked { .. }) => {
                self.bus.emit(DaemonEvent::ItemStuck {
                    item_id: result.item_id.clone(),
                    kind: StuckKind::Blocked,
                });
            }
            Ok(CompletionOutcome::Cancelled | CompletionOutcome::ItemMissing) => {}
            Err(e) => {
                warn!(item_id = %result.item_id, error = %e, "Completion handling failed");
                self.emit_error("completion", &format!("{}: {:#}", result.item_id, e));
            }
        }

        if !self.shutting_down {
            self.dispatch_ready(completions_tx).await;
        }
    }

    /// Handle a control request; returns true once a stop is underway
    async fn on_control(&mut self, req: ControlRequest) -> bool {
        match req {
            ControlRequest::Cancel { item_id, reply } => {
                let in_table = self.scheduler.cancel(&item_id);
                let running = if let Some(entry) = self.runners.get(&item_id) {
                    entry.runner.cancel();
                    true
                } else {
                    false
                };
                let _ = reply.send(in_table || running);
                false
            }
            ControlRequest::GetQueue { reply } => {
                let mirror = self.mirror();
                let _ = reply.send(self.scheduler.queue(&mirror));
                false
            }
            ControlRequest::GetInFlight { reply } => {
                let _ = reply.send(self.scheduler.in_flight());
                false
            }
            ControlRequest::GetStuck { reply } => {
                let stuck = self
                    .watcher_handle
                    .get_all()
                    .into_iter()
                    .filter(Item::is_stuck)
                    .collect();
                let _ = reply.send(stuck);
                false
            }
            ControlRequest::Stop { reply } => {
                info!(in_flight = self.runners.len(), "Graceful stop requested");
                self.shutting_down = true;
                self.stop_reply = Some(reply);

                let ids: Vec<String> = self.runners.keys().cloned().collect();
                for id in ids {
                    self.scheduler.cancel(&id);
                    if let Some(entry) = self.runners.get(&id) {
                        entry.runner.cancel();
                    }
                }
                true
            }
        }
    }

    fn mirror(&self) -> HashMap<String, Item> {
        self.watcher_handle
            .get_all()
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect()
    }

    fn emit_error(&self, context: &str, message: &str) {
        self.bus.emit(DaemonEvent::Error {
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}
