//! Offline-edit queue: local file-change events observed while the engine
//! is not `Idle` accumulate here, keyed by path so a later event supersedes
//! an earlier one, and flush in order once the engine returns to `Idle`.

use std::collections::HashMap;

use vault_watch::{ChangeKind, FileChange};

/// One queued local action, superseding any earlier entry for the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// What to do.
    pub kind: ChangeKind,
    /// Vault-relative path.
    pub path: String,
    /// Previous path, present only for [`ChangeKind::Rename`].
    pub old_path: Option<String>,
}

/// Ordered, per-path-deduplicated queue of local changes awaiting flush.
#[derive(Default)]
pub struct OfflineQueue {
    order: Vec<String>,
    by_path: HashMap<String, PendingChange>,
}

impl OfflineQueue {
    /// Build an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change. A rename also supersedes any pending entry for its
    /// old path, since the old path's identity is now folded into the
    /// rename.
    pub fn push(&mut self, change: FileChange) {
        if change.kind == ChangeKind::Rename {
            if let Some(old) = &change.old_path {
                self.remove(old);
            }
        }
        if !self.by_path.contains_key(&change.path) {
            self.order.push(change.path.clone());
        }
        self.by_path.insert(
            change.path.clone(),
            PendingChange { kind: change.kind, path: change.path, old_path: change.old_path },
        );
    }

    fn remove(&mut self, path: &str) {
        if self.by_path.remove(path).is_some() {
            self.order.retain(|p| p != path);
        }
    }

    /// Drain every queued change in the order its path was first queued
    /// (or re-queued, after a flush failure).
    pub fn drain(&mut self) -> Vec<PendingChange> {
        let order = std::mem::take(&mut self.order);
        let mut by_path = std::mem::take(&mut self.by_path);
        order.into_iter().filter_map(|p| by_path.remove(&p)).collect::<Vec<_>>()
    }

    /// Whether any change is currently queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
