//! Agent process runner
//!
//! Runs exactly one external agent process per dispatched item and reduces
//! every possible process outcome to one `RunResult`. Output is streamed
//! incrementally to the per-item log file and to event subscribers.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::{EXIT_CANCELLED, EXIT_SPAWN_FAILED, ExecutionContext, RunResult};
use crate::events::EventEmitter;

use super::config::RunnerConfig;

/// Error types for the runner's own misuse; process failures never surface
/// here, they become `RunResult`s
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner already has an active or finished run")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunnerState {
    Idle,
    Running,
    Finished,
}

/// One-shot runner bound to a single item execution
pub struct AgentRunner {
    config: RunnerConfig,
    state: Mutex<RunnerState>,
    cancel_tx: watch::Sender<bool>,
}

impl AgentRunner {
    pub fn new(config: RunnerConfig) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            config,
            state: Mutex::new(RunnerState::Idle),
            cancel_tx,
        }
    }

    /// Request termination of the active process
    ///
    /// Graceful signal first, forced kill after the grace period. A run
    /// cancelled here resolves with `cancelled: true` and can never also
    /// report as a crash: the cancellation branch wins the race and the
    /// exit path is simply never observed.
    pub fn cancel(&self) {
        debug!("AgentRunner::cancel requested");
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().expect("runner state poisoned") == RunnerState::Running
    }

    /// Run the agent for this context and resolve to a terminal result
    ///
    /// Fails fast if a run was already started on this instance; every
    /// process-level failure (including spawn failure) is a `RunResult`.
    pub async fn run(&self, ctx: ExecutionContext, emitter: EventEmitter) -> Result<RunResult, RunnerError> {
        {
            let mut state = self.state.lock().expect("runner state poisoned");
            if *state != RunnerState::Idle {
                return Err(RunnerError::AlreadyRunning);
            }
            *state = RunnerState::Running;
        }

        let result = self.run_inner(&ctx, emitter).await;

        *self.state.lock().expect("runner state poisoned") = RunnerState::Finished;
        Ok(result)
    }

    async fn run_inner(&self, ctx: &ExecutionContext, emitter: EventEmitter) -> RunResult {
        let started = Instant::now();
        let mut cancel_rx = self.cancel_tx.subscribe();

        // Cancelled before the process ever spawned
        if *cancel_rx.borrow() {
            return RunResult {
                item_id: ctx.item_id.clone(),
                exit_code: EXIT_CANCELLED,
                cancelled: true,
                duration_ms: 0,
            };
        }

        let cwd = ctx.worktree.clone().unwrap_or_else(|| self.config.repo_root.clone());
        let args: Vec<String> = self.config.args.iter().map(|a| substitute(a, ctx)).collect();

        info!(
            item_id = %ctx.item_id,
            command = %self.config.command,
            cwd = %cwd.display(),
            "Spawning agent"
        );

        if let Some(parent) = ctx.log_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&args)
            .current_dir(&cwd)
            .env("BEANS_ITEM", &ctx.item_id)
            .env("BEANS_BRANCH", &ctx.branch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(worktree) = &ctx.worktree {
            cmd.env("BEANS_WORKTREE", worktree);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // Spawn failure is a terminal outcome, never a hang
                warn!(item_id = %ctx.item_id, error = %e, "Agent spawn failed");
                return RunResult {
                    item_id: ctx.item_id.clone(),
                    exit_code: EXIT_SPAWN_FAILED,
                    cancelled: false,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let (line_tx, line_rx) = mpsc::channel::<(String, bool)>(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_reader(stdout, false, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_reader(stderr, true, line_tx.clone()));
        }
        drop(line_tx);
        let writer = tokio::spawn(pump_log(ctx.log_path.clone(), line_rx, emitter));

        let (exit_code, cancelled) = tokio::select! {
            status = child.wait() => {
                let code = match status {
                    Ok(status) => status.code().unwrap_or(EXIT_SPAWN_FAILED),
                    Err(e) => {
                        warn!(item_id = %ctx.item_id, error = %e, "Failed to reap agent");
                        EXIT_SPAWN_FAILED
                    }
                };
                (code, false)
            }
            _ = cancel_rx.changed() => {
                self.terminate(&mut child, &ctx.item_id).await;
                (EXIT_CANCELLED, true)
            }
        };

        // Drain remaining output; the pipes close once the child is gone
        let _ = writer.await;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(item_id = %ctx.item_id, exit_code, cancelled, duration_ms, "Agent run finished");

        RunResult {
            item_id: ctx.item_id.clone(),
            exit_code,
            cancelled,
            duration_ms,
        }
    }

    /// SIGTERM, wait out the grace period, then SIGKILL
    async fn terminate(&self, child: &mut Child, item_id: &str) {
        if let Some(pid) = child.id() {
            info!(%item_id, pid, "Terminating agent");

            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }

            if tokio::time::timeout(self.config.grace_period(), child.wait()).await.is_ok() {
                return;
            }
            warn!(%item_id, pid, "Agent ignored terminate signal, killing");
        }

        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

/// Substitute execution-context placeholders into one argument
fn substitute(arg: &str, ctx: &ExecutionContext) -> String {
    let worktree = ctx
        .worktree
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    arg.replace("{id}", &ctx.item_id)
        .replace("{branch}", &ctx.branch)
        .replace("{worktree}", &worktree)
}

async fn pump_reader<R: AsyncRead + Unpin>(reader: R, is_stderr: bool, tx: mpsc::Sender<(String, bool)>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send((line, is_stderr)).await.is_err() {
            break;
        }
    }
}

/// Single writer for the append-only per-item log; also fans lines out to
/// event subscribers
async fn pump_log(log_path: std::path::PathBuf, mut rx: mpsc::Receiver<(String, bool)>, emitter: EventEmitter) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %log_path.display(), error = %e, "Failed to open output log");
            None
        }
    };

    while let Some((line, is_stderr)) = rx.recv().await {
        if let Some(f) = file.as_mut() {
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
        emitter.output(&line, is_stderr);
    }

    if let Some(f) = file.as_mut() {
        let _ = f.flush().await;
    }
}
