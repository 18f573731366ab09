//! Debounces raw per-path events into a single [`FileChange`] per quiet
//! period, so a burst of writes to the same path (common with editors that
//! save via a temp-file-then-rename dance) produces one sync action instead
//! of several.

use std::collections::HashMap;

use crate::change::{ChangeKind, FileChange, RawEvent};

struct Pending {
    kind: ChangeKind,
    old_path: Option<String>,
    last_seen_ms: i64,
}

/// Coalesces [`RawEvent`]s keyed by path; a path is ready to emit once
/// `window_ms` has elapsed since the *last* event seen for it (a classic
/// trailing-edge debounce, not a fixed-delay one-shot).
pub struct Debouncer {
    window_ms: i64,
    pending: HashMap<String, Pending>,
}

impl Debouncer {
    /// Build a debouncer with the given quiet-period window, in milliseconds.
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms: window_ms as i64, pending: HashMap::new() }
    }

    /// Record a raw event observed at `now_ms`. A rename also clears any
    /// pending entry for its old path — the old path's identity is
    /// subsumed by the rename, so a stray pending modify on it would be
    /// stale.
    pub fn record(&mut self, event: RawEvent, now_ms: i64) {
        if event.kind == ChangeKind::Rename {
            if let Some(old) = &event.old_path {
                self.pending.remove(old);
            }
        }
        let entry = self.pending.entry(event.path.clone()).or_insert_with(|| Pending {
            kind: event.kind,
            old_path: event.old_path.clone(),
            last_seen_ms: now_ms,
        });
        // A create immediately followed by a modify (same write) still
        // reads as a create to the engine; any other combination takes the
        // most recent kind.
        if !(entry.kind == ChangeKind::Create && event.kind == ChangeKind::Modify) {
            entry.kind = event.kind;
            entry.old_path = event.old_path;
        }
        entry.last_seen_ms = now_ms;
    }

    /// Drain every path whose quiet period has elapsed as of `now_ms`.
    pub fn drain_ready(&mut self, now_ms: i64) -> Vec<FileChange> {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| now_ms - p.last_seen_ms >= self.window_ms)
            .map(|(path, _)| path.clone())
            .collect();
        ready
            .into_iter()
            .filter_map(|path| {
                self.pending.remove(&path).map(|p| FileChange { kind: p.kind, path, old_path: p.old_path })
            })
            .collect()
    }

    /// Whether any path is currently waiting out its debounce window.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: ChangeKind, path: &str) -> RawEvent {
        RawEvent { kind, path: path.to_string(), old_path: None }
    }

    #[test]
    fn repeated_events_collapse_to_one() {
        let mut d = Debouncer::new(300);
        d.record(ev(ChangeKind::Modify, "a.md"), 0);
        d.record(ev(ChangeKind::Modify, "a.md"), 100);
        d.record(ev(ChangeKind::Modify, "a.md"), 200);
        assert!(d.drain_ready(250).is_empty());
        let ready = d.drain_ready(500);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].path, "a.md");
    }

    #[test]
    fn create_then_modify_reads_as_create() {
        let mut d = Debouncer::new(300);
        d.record(ev(ChangeKind::Create, "a.md"), 0);
        d.record(ev(ChangeKind::Modify, "a.md"), 10);
        let ready = d.drain_ready(400);
        assert_eq!(ready[0].kind, ChangeKind::Create);
    }

    #[test]
    fn rename_clears_pending_on_old_path() {
        let mut d = Debouncer::new(300);
        d.record(ev(ChangeKind::Modify, "old.md"), 0);
        d.record(
            RawEvent { kind: ChangeKind::Rename, path: "new.md".into(), old_path: Some("old.md".into()) },
            50,
        );
        let ready = d.drain_ready(400);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].path, "new.md");
        assert_eq!(ready[0].old_path.as_deref(), Some("old.md"));
    }

    #[test]
    fn independent_paths_debounce_independently() {
        let mut d = Debouncer::new(300);
        d.record(ev(ChangeKind::Modify, "a.md"), 0);
        d.record(ev(ChangeKind::Modify, "b.md"), 200);
        let ready = d.drain_ready(300);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].path, "a.md");
        assert!(d.has_pending());
        let ready2 = d.drain_ready(500);
        assert_eq!(ready2.len(), 1);
        assert_eq!(ready2[0].path, "b.md");
    }
}
