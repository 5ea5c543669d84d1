//! Backlog watcher: change detection and the in-memory mirror
//!
//! Polls the store directory for file-level change, reconciles the mirror by
//! id-diff, and republishes one event per semantically distinct change. The
//! watcher is the only writer of the mirror; reads through [`WatcherHandle`]
//! are synchronous and never touch I/O.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use eyre::{Result, eyre};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backlog::{BacklogApi, ListFilter};
use crate::domain::{Item, Status};

use super::config::WatcherConfig;

/// One semantically distinct backlog change
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// New item appeared in the store
    Created(Item),
    /// Non-status, non-tag fields changed (priority, parent, blocking, text)
    Updated(Item),
    /// Status transition
    StatusChanged { item: Item, from: Status, to: Status },
    /// Tag set changed
    TagsChanged {
        item: Item,
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// Item disappeared from the store
    Deleted { item_id: String },
    /// Store has been unreachable for too many consecutive polls; the
    /// watcher keeps serving the last-known mirror
    Degraded { consecutive_failures: u32 },
}

type Mirror = Arc<RwLock<HashMap<String, Item>>>;

/// Synchronous read access to the mirror
#[derive(Clone)]
pub struct WatcherHandle {
    mirror: Mirror,
}

impl WatcherHandle {
    /// Snapshot of every mirrored item
    pub fn get_all(&self) -> Vec<Item> {
        self.mirror.read().expect("mirror lock poisoned").values().cloned().collect()
    }

    /// One item by id
    pub fn get_by_id(&self, id: &str) -> Option<Item> {
        self.mirror.read().expect("mirror lock poisoned").get(id).cloned()
    }
}

/// Watches the backlog store and maintains the mirror
pub struct BacklogWatcher {
    config: WatcherConfig,
    backlog: Arc<dyn BacklogApi>,
    mirror: Mirror,
    events_tx: mpsc::Sender<ChangeEvent>,
    last_mtime: Option<SystemTime>,
    consecutive_failures: u32,
    degraded_signalled: bool,
    initialized: bool,
}

impl BacklogWatcher {
    /// Create a watcher plus its read handle and event stream
    pub fn new(
        config: WatcherConfig,
        backlog: Arc<dyn BacklogApi>,
    ) -> (Self, WatcherHandle, mpsc::Receiver<ChangeEvent>) {
        let mirror: Mirror = Arc::new(RwLock::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::channel(256);

        let watcher = Self {
            config,
            backlog,
            mirror: mirror.clone(),
            events_tx,
            last_mtime: None,
            consecutive_failures: 0,
            degraded_signalled: false,
            initialized: false,
        };

        (watcher, WatcherHandle { mirror }, events_rx)
    }

    /// Run until the shutdown signal flips or the event stream is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.poll_interval_ms,
            store = %self.config.store_dir.display(),
            "BacklogWatcher started"
        );

        let mut delay = self.config.poll_interval();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    match self.check_once().await {
                        Ok(emitted) => {
                            if emitted > 0 {
                                debug!(emitted, "Backlog changes republished");
                            }
                            delay = self.config.poll_interval();
                        }
                        Err(e) => {
                            if self.events_tx.is_closed() {
                                break;
                            }
                            warn!(error = %e, failures = self.consecutive_failures, "Backlog poll failed");
                            delay = self.config.backoff(self.consecutive_failures);
                        }
                    }
                }
            }
        }

        info!("BacklogWatcher stopped");
    }

    /// Initial load: populate the mirror without republishing every
    /// pre-existing item as a change
    pub async fn prime(&mut self) -> Result<usize> {
        let mtime = scan_mtime(&self.config.store_dir);
        let items = self.backlog.list(&ListFilter::all()).await?;
        let count = items.len();

        let fresh: HashMap<String, Item> = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        *self.mirror.write().expect("mirror lock poisoned") = fresh;
        self.last_mtime = mtime;
        self.initialized = true;

        debug!(count, "Mirror primed");
        Ok(count)
    }

    /// Run a single poll; returns the number of events emitted
    pub async fn check_once(&mut self) -> Result<usize> {
        let mtime = scan_mtime(&self.config.store_dir);

        // Unchanged store: skip the list round-trip. A store whose mtime
        // cannot be read is always polled.
        if self.initialized && mtime.is_some() && mtime == self.last_mtime {
            return Ok(0);
        }

        let items = match self.backlog.list(&ListFilter::all()).await {
            Ok(items) => items,
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.config.max_consecutive_failures && !self.degraded_signalled {
                    self.degraded_signalled = true;
                    self.send(ChangeEvent::Degraded {
                        consecutive_failures: self.consecutive_failures,
                    })
                    .await?;
                }
                return Err(eyre!(e));
            }
        };

        if self.consecutive_failures > 0 {
            info!(failures = self.consecutive_failures, "Backlog store reachable again");
        }
        self.consecutive_failures = 0;
        self.degraded_signalled = false;

        let fresh: HashMap<String, Item> = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        let events = {
            let known = self.mirror.read().expect("mirror lock poisoned");
            diff(&known, &fresh)
        };

        *self.mirror.write().expect("mirror lock poisoned") = fresh;
        self.last_mtime = mtime;
        self.initialized = true;

        let count = events.len();
        for event in events {
            self.send(event).await?;
        }

        Ok(count)
    }

    /// Current consecutive failure count (tests, status output)
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    async fn send(&self, event: ChangeEvent) -> Result<()> {
        self.events_tx
            .send(event)
            .await
            .map_err(|_| eyre!("watcher event channel closed"))
    }
}

/// Diff the known mirror against a fresh store snapshot
///
/// A single disk write can yield several events for one item: status and tag
/// changes are always distinct events.
fn diff(known: &HashMap<String, Item>, fresh: &HashMap<String, Item>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for (id, new) in fresh {
        match known.get(id) {
            None => events.push(ChangeEvent::Created(new.clone())),
            Some(old) => {
                if old.status != new.status {
                    events.push(ChangeEvent::StatusChanged {
                        item: new.clone(),
                        from: old.status,
                        to: new.status,
                    });
                }
                if old.tags != new.tags {
                    let added = new.tags.difference(&old.tags).cloned().collect();
                    let removed = old.tags.difference(&new.tags).cloned().collect();
                    events.push(ChangeEvent::TagsChanged {
                        item: new.clone(),
                        added,
                        removed,
                    });
                }
                if old.priority != new.priority
                    || old.parent_id != new.parent_id
                    || old.blocking_ids != new.blocking_ids
                    || old.title != new.title
                    || old.body != new.body
                {
                    events.push(ChangeEvent::Updated(new.clone()));
                }
            }
        }
    }

    for id in known.keys() {
        if !fresh.contains_key(id) {
            events.push(ChangeEvent::Deleted { item_id: id.clone() });
        }
    }

    events
}

/// Latest modification time across the store directory and its entries
fn scan_mtime(dir: &Path) -> Option<SystemTime> {
    let mut latest = std::fs::metadata(dir).ok()?.modified().ok()?;

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata()
                && let Ok(modified) = meta.modified()
                && modified > latest
            {
                latest = modified;
            }
        }
    }

    Some(latest)
}
