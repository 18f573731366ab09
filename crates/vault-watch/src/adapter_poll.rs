//! Polling adapter for paths the editor's own event bus doesn't cover on
//! every platform — the configuration subtree. Runs every 5s; the first
//! poll establishes a baseline only (no synthetic creates for files that
//! were already there before the watcher ever started).

use std::collections::HashMap;

use crate::change::{ChangeKind, RawEvent};

/// Tracks `path -> mtime` for a polled subtree and turns successive
/// snapshots into [`RawEvent`]s.
pub struct AdapterPoller {
    cache: HashMap<String, i64>,
    baseline_done: bool,
}

impl Default for AdapterPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterPoller {
    /// Build a poller with no baseline yet recorded.
    #[must_use]
    pub fn new() -> Self {
        Self { cache: HashMap::new(), baseline_done: false }
    }

    /// Compare a fresh `path -> mtime` snapshot against the cached one and
    /// emit create/modify/delete events. The very first call only seeds the
    /// cache and returns no events.
    pub fn poll(&mut self, snapshot: HashMap<String, i64>) -> Vec<RawEvent> {
        if !self.baseline_done {
            self.cache = snapshot;
            self.baseline_done = true;
            return Vec::new();
        }

        let mut events = Vec::new();
        for (path, &mtime) in &snapshot {
            match self.cache.get(path) {
                None => events.push(RawEvent { kind: ChangeKind::Create, path: path.clone(), old_path: None }),
                Some(&cached) if mtime > cached => {
                    events.push(RawEvent { kind: ChangeKind::Modify, path: path.clone(), old_path: None });
                }
                _ => {}
            }
        }
        for path in self.cache.keys() {
            if !snapshot.contains_key(path) {
                events.push(RawEvent { kind: ChangeKind::Delete, path: path.clone(), old_path: None });
            }
        }
        self.cache = snapshot;
        events
    }

    /// Seed the cache for `path` without emitting an event. The engine
    /// calls this right after writing a file itself, so the next poll tick
    /// does not mistake its own write for a user edit.
    pub fn seed(&mut self, path: &str, mtime: i64) {
        self.cache.insert(path.to_string(), mtime);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(p, m)| (p.to_string(), *m)).collect()
    }

    #[test]
    fn first_poll_is_baseline_only() {
        let mut p = AdapterPoller::new();
        let events = p.poll(snap(&[("a.json", 100)]));
        assert!(events.is_empty());
    }

    #[test]
    fn second_poll_detects_create_modify_delete() {
        let mut p = AdapterPoller::new();
        p.poll(snap(&[("a.json", 100), ("b.json", 100)]));
        let events = p.poll(snap(&[("a.json", 200), ("c.json", 50)]));
        assert_eq!(events.len(), 3);
        assert!(events.iter().any(|e| e.path == "a.json" && e.kind == ChangeKind::Modify));
        assert!(events.iter().any(|e| e.path == "b.json" && e.kind == ChangeKind::Delete));
        assert!(events.iter().any(|e| e.path == "c.json" && e.kind == ChangeKind::Create));
    }

    #[test]
    fn seed_prevents_self_write_echo() {
        let mut p = AdapterPoller::new();
        p.poll(snap(&[("a.json", 100)]));
        p.seed("a.json", 200);
        let events = p.poll(snap(&[("a.json", 200)]));
        assert!(events.is_empty());
    }

    #[test]
    fn unchanged_mtime_is_not_modify() {
        let mut p = AdapterPoller::new();
        p.poll(snap(&[("a.json", 100)]));
        let events = p.poll(snap(&[("a.json", 100)]));
        assert!(events.is_empty());
    }
}
