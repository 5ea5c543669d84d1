//! Conventional-commit message generation

use crate::domain::{Item, commit_type};

/// Build the commit message for a completed item
///
/// `feat`/`fix`/`chore` from the item type, optional scope from the nearest
/// ancestor epic, body referencing the item id.
pub fn build_commit_message(item: &Item, scope: Option<&str>) -> String {
    let kind = commit_type(item.item_type);
    let header = match scope {
        Some(scope) => format!("{}({}): {}", kind, scope, item.title),
        None => format!("{}: {}", kind, item.title),
    };
    format!("{}\n\nBean: {}", header, item.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemType;

    #[test]
    fn test_feature_with_scope() {
        let item = Item::new("i-1", "Add login endpoint", ItemType::Feature);
        let msg = build_commit_message(&item, Some("auth"));
        assert!(msg.starts_with("feat(auth): Add login endpoint"));
        assert!(msg.ends_with("Bean: i-1"));
    }

    #[test]
    fn test_bug_without_scope() {
        let item = Item::new("i-2", "Fix off-by-one", ItemType::Bug);
        let msg = build_commit_message(&item, None);
        assert!(msg.starts_with("fix: Fix off-by-one"));
    }

    #[test]
    fn test_task_is_chore() {
        let item = Item::new("i-3", "Tidy imports", ItemType::Task);
        let msg = build_commit_message(&item, None);
        assert!(msg.starts_with("chore: Tidy imports"));
    }
}
