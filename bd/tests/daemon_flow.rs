//! End-to-end daemon flow against the scripted store CLI
//!
//! These tests run the whole loop the way production does: the backlog is
//! driven through the store binary, the watcher picks changes up from disk,
//! and agents are real subprocesses.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use beansd::backlog::client::BacklogConfig;
use beansd::backlog::{BacklogApi, CliBacklog};
use beansd::completion::CompletionConfig;
use beansd::domain::{ItemType, Status, TAG_FAILED};
use beansd::events::create_event_bus;
use beansd::git::GitConfig;
use beansd::orchestrator::{Orchestrator, OrchestratorConfig};
use beansd::runner::RunnerConfig;
use beansd::scheduler::SchedulerConfig;
use beansd::watcher::WatcherConfig;
use tempfile::TempDir;

async fn setup_git_repo(dir: &Path) {
    for args in [
        vec!["init"],
        vec!["config", "user.email", "test@test.com"],
        vec!["config", "user.name", "Test"],
        vec!["commit", "--allow-empty", "-m", "initial"],
        vec!["branch", "-M", "main"],
    ] {
        let out = tokio::process::Command::new("git")
            .args(&args)
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        assert!(out.status.success(), "git {:?} failed", args);
    }
}

struct Env {
    temp: TempDir,
    backlog: Arc<CliBacklog>,
}

impl Env {
    fn store_dir(&self) -> std::path::PathBuf {
        self.temp.path().join("store")
    }

    fn repo(&self) -> std::path::PathBuf {
        self.temp.path().join("repo")
    }
}

async fn setup() -> Env {
    let temp = TempDir::new().unwrap();
    let script = common::install_store(temp.path());
    let store_dir = temp.path().join("store");
    std::fs::create_dir_all(temp.path().join("repo")).unwrap();
    setup_git_repo(&temp.path().join("repo")).await;

    let backlog = Arc::new(CliBacklog::new(BacklogConfig {
        command: script.to_string_lossy().into_owned(),
        store_dir,
    }));

    Env { temp, backlog }
}

fn orchestrator(env: &Env, agent: (&str, &[&str])) -> Orchestrator {
    Orchestrator::new(
        OrchestratorConfig {
            reevaluate_interval_secs: 1,
        },
        SchedulerConfig {
            max_parallel: 1,
            log_dir: env.temp.path().join("logs"),
        },
        WatcherConfig {
            store_dir: env.store_dir(),
            poll_interval_ms: 50,
            ..Default::default()
        },
        RunnerConfig {
            command: agent.0.to_string(),
            args: agent.1.iter().map(|s| s.to_string()).collect(),
            grace_period_ms: 500,
            repo_root: env.repo(),
        },
        CompletionConfig {
            log_dir: env.temp.path().join("logs"),
            ..Default::default()
        },
        GitConfig {
            repo_root: env.repo(),
            worktree_dir: env.temp.path().join("worktrees"),
            ..Default::default()
        },
        env.backlog.clone(),
        create_event_bus(),
    )
}

/// Poll the store until the predicate holds
async fn wait_until<F>(env: &Env, id: &str, pred: F)
where
    F: Fn(&beansd::domain::Item) -> bool,
{
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let Ok(Some(item)) = env.backlog.get(id).await
                && pred(&item)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("store never reached expected state");
}

#[tokio::test]
async fn test_daemon_completes_item_through_store_cli() {
    let env = setup().await;
    common::seed_item(&env.store_dir(), "i-1", "Write artifact", "task", "todo");

    let orch = orchestrator(&env, ("sh", &["-c", "echo working on {id}; echo done > artifact.txt"]));
    let (handle, task) = orch.start();

    wait_until(&env, "i-1", |item| item.status == Status::Completed).await;

    // The agent's work was committed with a conventional message
    let log = tokio::process::Command::new("git")
        .args(["log", "--format=%B", "main"])
        .current_dir(env.repo())
        .output()
        .await
        .unwrap();
    let log = String::from_utf8_lossy(&log.stdout).into_owned();
    assert!(log.contains("chore: Write artifact"));
    assert!(log.contains("Bean: i-1"));

    // The per-item output log survived at its stable path
    let output_log = std::fs::read_to_string(env.temp.path().join("logs/i-1.log")).unwrap();
    assert!(output_log.contains("working on i-1"));

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_daemon_files_crash_item_through_store_cli() {
    let env = setup().await;
    common::seed_item(&env.store_dir(), "i-1", "Doomed run", "task", "todo");

    let orch = orchestrator(&env, ("sh", &["-c", "echo last words; exit 7"]));
    let (handle, task) = orch.start();

    wait_until(&env, "i-1", |item| item.has_tag(TAG_FAILED)).await;

    let item = env.backlog.get("i-1").await.unwrap().unwrap();
    assert_eq!(item.status, Status::InProgress);
    assert_eq!(item.blocking_ids.len(), 1);

    // The crash item carries the output tail and sits under the container
    let crash = env.backlog.get(&item.blocking_ids[0]).await.unwrap().unwrap();
    assert_eq!(crash.item_type, ItemType::Bug);
    assert_eq!(crash.status, Status::Draft);
    assert!(crash.body.contains("last words"));

    let container = env.backlog.get(crash.parent_id.as_deref().unwrap()).await.unwrap().unwrap();
    assert_eq!(container.title, "Errors");

    // Stuck items are not rescheduled: the daemon idles rather than
    // re-dispatching the failed item
    tokio::time::sleep(Duration::from_millis(500)).await;
    let item_again = env.backlog.get("i-1").await.unwrap().unwrap();
    assert_eq!(item_again.blocking_ids.len(), 1);

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dependency_unblocks_through_store_cli() {
    let env = setup().await;
    common::seed_item(&env.store_dir(), "dep", "Dependency", "task", "todo");

    // Dependent item blocked on "dep"
    common::seed_item(&env.store_dir(), "main-item", "Dependent", "task", "todo");
    let script = env.temp.path().join("beans");
    let out = tokio::process::Command::new(&script)
        .args(["--dir"])
        .arg(env.store_dir())
        .args(["--format", "json", "update", "main-item", "--add-blocking", "dep"])
        .output()
        .await
        .unwrap();
    assert!(out.status.success());

    let orch = orchestrator(&env, ("sh", &["-c", "true"]));
    let (handle, task) = orch.start();

    // Both eventually complete, dependency first
    wait_until(&env, "dep", |item| item.status == Status::Completed).await;
    wait_until(&env, "main-item", |item| item.status == Status::Completed).await;

    handle.stop().await.unwrap();
    task.await.unwrap().unwrap();
}
