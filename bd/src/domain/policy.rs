//! Branch-merge and commit-message policy derived from item type
//!
//! Small closed mappings rather than anything polymorphic: the merge
//! strategy and the conventional-commit type are pure functions of the
//! item type.

use super::item::ItemType;

/// How an item's branch lands in its parent's branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Collapse the branch into a single commit (`git merge --squash`)
    Squash,
    /// Keep the branch topology (`git merge --no-ff`)
    MergeCommit,
}

/// Merge strategy for an item type; milestones live at trunk level and
/// have no branch of their own
pub fn merge_strategy(item_type: ItemType) -> Option<MergeStrategy> {
    match item_type {
        ItemType::Task | ItemType::Bug => Some(MergeStrategy::Squash),
        ItemType::Feature | ItemType::Epic => Some(MergeStrategy::MergeCommit),
        ItemType::Milestone => None,
    }
}

/// Conventional-commit type for an item type
pub fn commit_type(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Feature => "feat",
        ItemType::Bug => "fix",
        ItemType::Milestone | ItemType::Epic | ItemType::Task => "chore",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_strategy_by_type() {
        assert_eq!(merge_strategy(ItemType::Task), Some(MergeStrategy::Squash));
        assert_eq!(merge_strategy(ItemType::Bug), Some(MergeStrategy::Squash));
        assert_eq!(merge_strategy(ItemType::Feature), Some(MergeStrategy::MergeCommit));
        assert_eq!(merge_strategy(ItemType::Epic), Some(MergeStrategy::MergeCommit));
        assert_eq!(merge_strategy(ItemType::Milestone), None);
    }

    #[test]
    fn test_commit_type_by_type() {
        assert_eq!(commit_type(ItemType::Feature), "feat");
        assert_eq!(commit_type(ItemType::Bug), "fix");
        assert_eq!(commit_type(ItemType::Task), "chore");
        assert_eq!(commit_type(ItemType::Epic), "chore");
        assert_eq!(commit_type(ItemType::Milestone), "chore");
    }
}
