//! In-memory backlog used by unit tests across the crate

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::{Item, Status, generate_id};

use super::types::{CreateItem, ListFilter};
use super::{BacklogApi, BacklogError};

/// Mutex-backed map standing in for the external store
#[derive(Default)]
pub struct MemoryBacklog {
    items: Mutex<HashMap<String, Item>>,
    /// When set, every call fails as unreachable (degraded-mode tests)
    pub fail: std::sync::atomic::AtomicBool,
}

impl MemoryBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an item directly
    pub fn seed(&self, item: Item) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    /// Snapshot of all items
    pub fn all(&self) -> Vec<Item> {
        self.items.lock().unwrap().values().cloned().collect()
    }

    /// Fetch one item synchronously (test assertions)
    pub fn peek(&self, id: &str) -> Option<Item> {
        self.items.lock().unwrap().get(id).cloned()
    }

    /// Remove an item directly (simulates an external delete)
    pub fn remove(&self, id: &str) {
        self.items.lock().unwrap().remove(id);
    }

    fn check_reachable(&self) -> Result<(), BacklogError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            Err(BacklogError::Unreachable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut Item)) -> Result<Item, BacklogError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(id)
            .ok_or_else(|| BacklogError::Malformed(format!("no such item: {}", id)))?;
        f(item);
        item.updated_at = Utc::now();
        Ok(item.clone())
    }
}

#[async_trait]
impl BacklogApi for MemoryBacklog {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Item>, BacklogError> {
        self.check_reachable()?;
        let items = self.items.lock().unwrap();
        let mut out: Vec<Item> = items
            .values()
            .filter(|i| filter.status.is_none_or(|s| i.status == s))
            .filter(|i| filter.item_type.is_none_or(|t| i.item_type == t))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn get(&self, id: &str) -> Result<Option<Item>, BacklogError> {
        self.check_reachable()?;
        Ok(self.items.lock().unwrap().get(id).cloned())
    }

    async fn update_status(&self, id: &str, status: Status) -> Result<Item, BacklogError> {
        self.check_reachable()?;
        self.mutate(id, |item| item.status = status)
    }

    async fn update_tags(&self, id: &str, add: &[&str], remove: &[&str]) -> Result<Item, BacklogError> {
        self.check_reachable()?;
        self.mutate(id, |item| {
            for tag in add {
                item.tags.insert(tag.to_string());
            }
            for tag in remove {
                item.tags.remove(*tag);
            }
        })
    }

    async fn create(&self, input: CreateItem) -> Result<Item, BacklogError> {
        self.check_reachable()?;
        let id = input
            .id
            .unwrap_or_else(|| generate_id(&input.item_type.to_string(), &input.title));

        let mut item = Item::new(id.clone(), input.title, input.item_type);
        item.body = input.body;
        item.status = input.status;
        item.priority = input.priority;
        item.parent_id = input.parent_id;

        self.items.lock().unwrap().insert(id, item.clone());
        Ok(item)
    }

    async fn set_parent(&self, id: &str, parent_id: &str) -> Result<Item, BacklogError> {
        self.check_reachable()?;
        self.mutate(id, |item| item.parent_id = Some(parent_id.to_string()))
    }

    async fn add_blocking(&self, id: &str, blocking_id: &str) -> Result<Item, BacklogError> {
        self.check_reachable()?;
        self.mutate(id, |item| {
            if !item.blocking_ids.iter().any(|b| b == blocking_id) {
                item.blocking_ids.push(blocking_id.to_string());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemType;

    #[tokio::test]
    async fn test_memory_backlog_crud() {
        let backlog = MemoryBacklog::new();
        backlog.seed(Item::new("i-1", "Seeded", ItemType::Task));

        assert!(backlog.get("i-1").await.unwrap().is_some());
        assert!(backlog.get("i-2").await.unwrap().is_none());

        let updated = backlog.update_status("i-1", Status::InProgress).await.unwrap();
        assert_eq!(updated.status, Status::InProgress);

        let tagged = backlog.update_tags("i-1", &["failed"], &[]).await.unwrap();
        assert!(tagged.has_tag("failed"));

        let listed = backlog.list(&ListFilter::with_status(Status::InProgress)).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_backlog_outage() {
        let backlog = MemoryBacklog::new();
        backlog.fail.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = backlog.list(&ListFilter::all()).await.unwrap_err();
        assert!(matches!(err, BacklogError::Unreachable(_)));
    }
}
