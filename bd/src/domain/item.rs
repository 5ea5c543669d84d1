//! Backlog item ("bean") domain type
//!
//! Items are owned by the external backlog store; this is the daemon's view
//! of one unit of work, with the status/type/tag semantics the scheduler and
//! completion handler operate on.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::priority::Priority;

/// Reserved tag marking an item the agent declared itself unable to finish
pub const TAG_BLOCKED: &str = "blocked";

/// Reserved tag marking an item whose agent run crashed
pub const TAG_FAILED: &str = "failed";

/// Backlog item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// Not yet ready for scheduling
    Draft,
    /// Ready to be picked up
    #[default]
    Todo,
    /// Dispatched to an agent (stuck items stay here, tagged)
    InProgress,
    /// Done; satisfies blockers
    Completed,
    /// Abandoned
    Scrapped,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Todo => write!(f, "todo"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Completed => write!(f, "completed"),
            Self::Scrapped => write!(f, "scrapped"),
        }
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "todo" => Ok(Self::Todo),
            "in-progress" | "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "scrapped" => Ok(Self::Scrapped),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Backlog item type, from coarse (milestone) to fine (task)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    Milestone,
    Epic,
    Feature,
    Bug,
    #[default]
    Task,
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Milestone => write!(f, "milestone"),
            Self::Epic => write!(f, "epic"),
            Self::Feature => write!(f, "feature"),
            Self::Bug => write!(f, "bug"),
            Self::Task => write!(f, "task"),
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "milestone" => Ok(Self::Milestone),
            "epic" => Ok(Self::Epic),
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            "task" => Ok(Self::Task),
            _ => Err(format!("Unknown item type: {}", s)),
        }
    }
}

/// Why an item is stuck (sub-state of in-progress, not a status)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StuckKind {
    /// Agent signalled it cannot proceed
    Blocked,
    /// Agent run crashed
    Failed,
}

impl std::fmt::Display for StuckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One unit of backlog work
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Item {
    /// Unique identifier (assigned by the store)
    pub id: String,

    /// Item type
    #[serde(rename = "type")]
    pub item_type: ItemType,

    /// Human-readable title
    pub title: String,

    /// Free-form body text
    #[serde(default)]
    pub body: String,

    /// Current workflow status
    pub status: Status,

    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,

    /// Tags; `blocked` and `failed` are reserved stuck markers
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Parent item ID
    #[serde(rename = "parent", default)]
    pub parent_id: Option<String>,

    /// Items that must reach `completed` before this one is eligible
    #[serde(rename = "blocking", default)]
    pub blocking_ids: Vec<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Create an item with the given id (tests and in-memory stores; the
    /// real store assigns ids itself)
    pub fn new(id: impl Into<String>, title: impl Into<String>, item_type: ItemType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            item_type,
            title: title.into(),
            body: String::new(),
            status: Status::Todo,
            priority: Priority::Normal,
            tags: BTreeSet::new(),
            parent_id: None,
            blocking_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: set the parent
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// Builder: set the status
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Builder: set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: add a blocking dependency
    pub fn with_blocking(mut self, id: impl Into<String>) -> Self {
        self.blocking_ids.push(id.into());
        self
    }

    /// Check for a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// An in-progress item carrying a stuck marker tag
    pub fn is_stuck(&self) -> bool {
        self.stuck_kind().is_some()
    }

    /// Which stuck marker the item carries; `blocked` wins when both are set
    pub fn stuck_kind(&self) -> Option<StuckKind> {
        if self.status != Status::InProgress {
            return None;
        }
        if self.has_tag(TAG_BLOCKED) {
            Some(StuckKind::Blocked)
        } else if self.has_tag(TAG_FAILED) {
            Some(StuckKind::Failed)
        } else {
            None
        }
    }

    /// Check if the item is in a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Completed | Status::Scrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            Status::Draft,
            Status::Todo,
            Status::InProgress,
            Status::Completed,
            Status::Scrapped,
        ] {
            let parsed: Status = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_serde_kebab() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
    }

    #[test]
    fn test_item_type_parse() {
        assert_eq!("epic".parse::<ItemType>().unwrap(), ItemType::Epic);
        assert_eq!("BUG".parse::<ItemType>().unwrap(), ItemType::Bug);
        assert!("gadget".parse::<ItemType>().is_err());
    }

    #[test]
    fn test_item_stuck_requires_in_progress() {
        let mut item = Item::new("i-1", "Test", ItemType::Task);
        item.tags.insert(TAG_FAILED.to_string());

        // Tagged but still todo: not stuck
        assert!(!item.is_stuck());

        item.status = Status::InProgress;
        assert!(item.is_stuck());
        assert_eq!(item.stuck_kind(), Some(StuckKind::Failed));
    }

    #[test]
    fn test_item_stuck_blocked_wins_over_failed() {
        let mut item = Item::new("i-1", "Test", ItemType::Task).with_status(Status::InProgress);
        item.tags.insert(TAG_FAILED.to_string());
        item.tags.insert(TAG_BLOCKED.to_string());

        assert_eq!(item.stuck_kind(), Some(StuckKind::Blocked));
    }

    #[test]
    fn test_item_serde() {
        let item = Item::new("i-42", "Wire the frobnicator", ItemType::Feature)
            .with_parent("i-1")
            .with_blocking("i-2");

        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"type\":\"feature\""));
        assert!(json.contains("\"parent\":\"i-1\""));
        assert!(json.contains("\"blocking\":[\"i-2\"]"));

        let back: Item = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, item.id);
        assert_eq!(back.parent_id, item.parent_id);
        assert_eq!(back.blocking_ids, item.blocking_ids);
    }

    #[test]
    fn test_item_deserialize_defaults() {
        // A minimal store record: missing tags/blocking/body default cleanly
        let json = r#"{
            "id": "i-7",
            "type": "task",
            "title": "Minimal",
            "status": "todo",
            "created-at": "2026-01-01T00:00:00Z",
            "updated-at": "2026-01-01T00:00:00Z"
        }"#;

        let item: Item = serde_json::from_str(json).unwrap();
        assert!(item.tags.is_empty());
        assert!(item.blocking_ids.is_empty());
        assert_eq!(item.priority, Priority::Normal);
    }

    #[test]
    fn test_item_is_terminal() {
        let mut item = Item::new("i-1", "Test", ItemType::Task);
        assert!(!item.is_terminal());

        item.status = Status::Completed;
        assert!(item.is_terminal());

        item.status = Status::Scrapped;
        assert!(item.is_terminal());
    }
}
