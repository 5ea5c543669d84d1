//! Request types for the backlog client

use crate::domain::{ItemType, Priority, Status};

/// Filter for `list`; empty filter matches everything
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<Status>,
    pub item_type: Option<ItemType>,
}

impl ListFilter {
    /// Match all items
    pub fn all() -> Self {
        Self::default()
    }

    /// Match items with the given status
    pub fn with_status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Input for creating a new item
#[derive(Debug, Clone)]
pub struct CreateItem {
    /// Caller-supplied id; the store assigns one when absent
    pub id: Option<String>,
    pub title: String,
    pub body: String,
    pub item_type: ItemType,
    pub status: Status,
    pub priority: Priority,
    pub parent_id: Option<String>,
}

impl CreateItem {
    /// New item input with defaults (todo status, normal priority)
    pub fn new(title: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            id: None,
            title: title.into(),
            body: String::new(),
            item_type,
            status: Status::Todo,
            priority: Priority::Normal,
            parent_id: None,
        }
    }

    /// Builder: set a caller-supplied id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builder: set the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Builder: set the status
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Builder: set the parent
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }
}
