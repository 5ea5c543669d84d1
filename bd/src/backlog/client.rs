//! CLI-backed backlog client
//!
//! Drives the external `beans` binary with `--format json` and parses its
//! stdout. Every operation is one subprocess invocation; the store owns all
//! persistence and id assignment (except daemon-minted auxiliary-item ids).

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::{Item, Status};

use super::types::{CreateItem, ListFilter};
use super::{BacklogApi, BacklogError};

/// Backlog client configuration
#[derive(Debug, Clone)]
pub struct BacklogConfig {
    /// Store binary name or path
    pub command: String,

    /// Store data directory, passed as `--dir`
    pub store_dir: PathBuf,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            command: "beans".to_string(),
            store_dir: PathBuf::from(".beans"),
        }
    }
}

/// Client that shells out to the store CLI
pub struct CliBacklog {
    config: BacklogConfig,
}

impl CliBacklog {
    pub fn new(config: BacklogConfig) -> Self {
        Self { config }
    }

    /// Run one store command, optionally feeding stdin
    async fn invoke(&self, args: &[&str], stdin: Option<&str>) -> Result<std::process::Output, BacklogError> {
        debug!(command = %self.config.command, ?args, "CliBacklog::invoke");

        let mut cmd = Command::new(&self.config.command);
        cmd.arg("--dir")
            .arg(&self.config.store_dir)
            .arg("--format")
            .arg("json")
            .args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| BacklogError::Unreachable(e.to_string()))?;

        if let Some(body) = stdin
            && let Some(mut sin) = child.stdin.take()
        {
            sin.write_all(body.as_bytes())
                .await
                .map_err(|e| BacklogError::Unreachable(e.to_string()))?;
            // Close stdin so the store sees EOF
            drop(sin);
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| BacklogError::Unreachable(e.to_string()))
    }

    /// Run a command expected to print exactly one item
    async fn invoke_item(&self, args: &[&str], stdin: Option<&str>) -> Result<Item, BacklogError> {
        let output = self.invoke(args, stdin).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BacklogError::Store(stderr.trim().to_string()));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| BacklogError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl BacklogApi for CliBacklog {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Item>, BacklogError> {
        let mut args = vec!["list".to_string()];
        if let Some(status) = filter.status {
            args.push("--status".to_string());
            args.push(status.to_string());
        }
        if let Some(item_type) = filter.item_type {
            args.push("--type".to_string());
            args.push(item_type.to_string());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.invoke(&arg_refs, None).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BacklogError::Store(stderr.trim().to_string()));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| BacklogError::Malformed(e.to_string()))
    }

    async fn get(&self, id: &str) -> Result<Option<Item>, BacklogError> {
        let output = self.invoke(&["show", id], None).await?;

        if output.status.success() {
            let item = serde_json::from_slice(&output.stdout).map_err(|e| BacklogError::Malformed(e.to_string()))?;
            return Ok(Some(item));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("not found") {
            // Expected outcome on read paths, not an error
            return Ok(None);
        }

        Err(BacklogError::Store(stderr.trim().to_string()))
    }

    async fn update_status(&self, id: &str, status: Status) -> Result<Item, BacklogError> {
        let status = status.to_string();
        self.invoke_item(&["update", id, "--status", &status], None).await
    }

    async fn update_tags(&self, id: &str, add: &[&str], remove: &[&str]) -> Result<Item, BacklogError> {
        let mut args = vec!["tag", id];
        for tag in add {
            args.push("--add");
            args.push(tag);
        }
        for tag in remove {
            args.push("--remove");
            args.push(tag);
        }
        self.invoke_item(&args, None).await
    }

    async fn create(&self, input: CreateItem) -> Result<Item, BacklogError> {
        let item_type = input.item_type.to_string();
        let status = input.status.to_string();
        let priority = input.priority.to_string();

        let mut args = vec![
            "create",
            "--title",
            &input.title,
            "--type",
            &item_type,
            "--status",
            &status,
            "--priority",
            &priority,
        ];
        if let Some(id) = &input.id {
            args.push("--id");
            args.push(id);
        }
        if let Some(parent) = &input.parent_id {
            args.push("--parent");
            args.push(parent);
        }

        // Body goes over stdin; crash bodies carry arbitrary agent output
        self.invoke_item(&args, Some(&input.body)).await
    }

    async fn set_parent(&self, id: &str, parent_id: &str) -> Result<Item, BacklogError> {
        self.invoke_item(&["update", id, "--parent", parent_id], None).await
    }

    async fn add_blocking(&self, id: &str, blocking_id: &str) -> Result<Item, BacklogError> {
        self.invoke_item(&["update", id, "--add-blocking", blocking_id], None).await
    }
}
