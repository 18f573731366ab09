//! Ties the raw event sources, the debouncer, the suppression set, and
//! exclusion rules into the single `FileChange` stream the sync engine
//! consumes (§9 design note: two sources, one stream).

use std::collections::HashMap;

use crate::adapter_poll::AdapterPoller;
use crate::change::{ChangeKind, FileChange, RawEvent};
use crate::debounce::Debouncer;
use crate::exclusion::ExclusionRules;
use crate::suppression::SuppressionSet;

/// Unified vault watcher: feed it editor events via [`Watcher::on_editor_event`]
/// and adapter snapshots via [`Watcher::poll_adapter`], then drain
/// ready, non-suppressed, non-excluded changes with [`Watcher::drain_ready`].
pub struct Watcher {
    debouncer: Debouncer,
    adapter: AdapterPoller,
    suppression: SuppressionSet,
    exclusion: ExclusionRules,
}

impl Watcher {
    /// Build a watcher with the standard 300ms debounce and 1000ms
    /// suppression windows.
    #[must_use]
    pub fn new(exclusion: ExclusionRules) -> Self {
        Self {
            debouncer: Debouncer::new(sync_core::wire::WATCH_DEBOUNCE_MS),
            adapter: AdapterPoller::new(),
            suppression: SuppressionSet::new(sync_core::wire::SUPPRESSION_WINDOW_MS),
            exclusion,
        }
    }

    /// Feed a raw event from the editor's own event bus.
    pub fn on_editor_event(&mut self, event: RawEvent, now_ms: i64) {
        self.debouncer.record(event, now_ms);
    }

    /// Feed a fresh `path -> mtime` snapshot of the adapter-polled subtree;
    /// internally diffs against the previous snapshot and records any
    /// resulting events.
    pub fn poll_adapter(&mut self, snapshot: HashMap<String, i64>, now_ms: i64) {
        for event in self.adapter.poll(snapshot) {
            self.debouncer.record(event, now_ms);
        }
    }

    /// Record that the engine itself just wrote `path`: suppress the path
    /// so the upcoming editor/adapter echo is not treated as a user edit,
    /// and seed the adapter's mtime cache so its next poll doesn't see a
    /// stale-vs-fresh mismatch for paths it tracks.
    pub fn note_self_write(&mut self, path: &str, mtime_ms: i64, now_ms: i64) {
        self.suppression.suppress(path, now_ms);
        self.adapter.seed(path, mtime_ms);
    }

    /// Drain every change whose debounce window has elapsed, dropping any
    /// that are currently suppressed (engine's own writes) or excluded by
    /// policy.
    ///
    /// A rename is only dropped outright when *both* ends are excluded: if
    /// either side is in scope, the event must still reach the engine so
    /// it can delete the old, in-scope path and/or upload the new one
    /// (`execute_change` issues both halves of a rename unconditionally).
    pub fn drain_ready(&mut self, now_ms: i64) -> Vec<FileChange> {
        self.debouncer
            .drain_ready(now_ms)
            .into_iter()
            .filter(|change| {
                if self.suppression.is_suppressed(&change.path, now_ms) {
                    return false;
                }
                let old_path = match change.kind {
                    ChangeKind::Rename => change.old_path.as_deref().unwrap_or(&change.path),
                    _ => change.path.as_str(),
                };
                !(self.exclusion.is_excluded(&change.path) && self.exclusion.is_excluded(old_path))
            })
            .collect()
    }

    /// Shared exclusion rules, for reuse at manifest-build time (§4.7).
    #[must_use]
    pub fn exclusion(&self) -> &ExclusionRules {
        &self.exclusion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::ExclusionConfig;

    fn watcher() -> Watcher {
        Watcher::new(ExclusionRules::new(ExclusionConfig {
            config_dir: ".obsidian".into(),
            own_plugin_dir: "plugins/advanced-sync".into(),
            sync_workspace: true,
            sync_plugins: true,
            sync_settings: true,
            sync_all_file_types: true,
            exclude_globs: vec![],
        }))
    }

    #[test]
    fn self_write_is_not_observed_as_user_edit() {
        let mut w = watcher();
        w.note_self_write("notes/a.md", 1000, 0);
        w.on_editor_event(
            RawEvent { kind: ChangeKind::Create, path: "notes/a.md".into(), old_path: None },
            10,
        );
        w.on_editor_event(
            RawEvent { kind: ChangeKind::Modify, path: "notes/a.md".into(), old_path: None },
            20,
        );
        assert!(w.drain_ready(400).is_empty());
    }

    #[test]
    fn user_edit_after_suppression_expires_is_observed() {
        let mut w = watcher();
        w.note_self_write("notes/a.md", 1000, 0);
        w.on_editor_event(
            RawEvent { kind: ChangeKind::Modify, path: "notes/a.md".into(), old_path: None },
            1500,
        );
        let ready = w.drain_ready(1900);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn excluded_paths_never_surface() {
        let mut w = watcher();
        w.on_editor_event(
            RawEvent {
                kind: ChangeKind::Modify,
                path: ".obsidian/plugins/advanced-sync/data.json".into(),
                old_path: None,
            },
            0,
        );
        assert!(w.drain_ready(400).is_empty());
    }

    #[test]
    fn rename_out_of_excluded_dir_still_surfaces() {
        let mut w = watcher();
        w.on_editor_event(
            RawEvent {
                kind: ChangeKind::Rename,
                path: "notes/recovered.md".into(),
                old_path: Some(".obsidian/plugins/advanced-sync/recovered.md".into()),
            },
            0,
        );
        assert_eq!(w.drain_ready(400).len(), 1, "new path is in scope even though the old one was excluded");
    }

    #[test]
    fn rename_into_excluded_dir_still_surfaces() {
        let mut w = watcher();
        w.on_editor_event(
            RawEvent {
                kind: ChangeKind::Rename,
                path: ".obsidian/plugins/advanced-sync/stash.md".into(),
                old_path: Some("notes/stash.md".into()),
            },
            0,
        );
        assert_eq!(w.drain_ready(400).len(), 1, "old path was in scope and needs its remote delete");
    }

    #[test]
    fn rename_between_two_excluded_paths_is_dropped() {
        let mut w = watcher();
        w.on_editor_event(
            RawEvent {
                kind: ChangeKind::Rename,
                path: ".obsidian/plugins/advanced-sync/b.json".into(),
                old_path: Some(".obsidian/plugins/advanced-sync/a.json".into()),
            },
            0,
        );
        assert!(w.drain_ready(400).is_empty());
    }
}
