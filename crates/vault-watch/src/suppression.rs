//! Writeback suppression: the discipline that stops the engine's own
//! writes from being observed as user edits and re-uploaded. Membership is
//! *not* one-shot — a single editor write can fire `create` + `modify` in
//! quick succession, so a path stays suppressed until the timed unsuppress
//! fires, not until the first matching event is seen.

use std::collections::HashMap;

/// Tracks suppressed paths with their expiry time.
pub struct SuppressionSet {
    window_ms: i64,
    expires_at: HashMap<String, i64>,
}

impl SuppressionSet {
    /// Build a suppression set with the given window, in milliseconds
    /// (spec default: 1000ms after the engine's write completes).
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms: window_ms as i64, expires_at: HashMap::new() }
    }

    /// Mark `path` as suppressed starting at `now_ms`; resets the window if
    /// already suppressed.
    pub fn suppress(&mut self, path: &str, now_ms: i64) {
        self.expires_at.insert(path.to_string(), now_ms + self.window_ms);
    }

    /// Whether `path` is currently suppressed as of `now_ms`. Lazily
    /// expires the entry if the window has passed.
    pub fn is_suppressed(&mut self, path: &str, now_ms: i64) -> bool {
        match self.expires_at.get(path) {
            Some(&expiry) if now_ms < expiry => true,
            Some(_) => {
                self.expires_at.remove(path);
                false
            }
            None => false,
        }
    }

    /// Drop every expired entry. Cheap periodic housekeeping; correctness
    /// does not depend on calling this (lookups self-expire).
    pub fn sweep(&mut self, now_ms: i64) {
        self.expires_at.retain(|_, &mut expiry| expiry > now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppressed_immediately_after_write() {
        let mut s = SuppressionSet::new(1000);
        s.suppress("a.md", 0);
        assert!(s.is_suppressed("a.md", 500));
    }

    #[test]
    fn expires_after_window() {
        let mut s = SuppressionSet::new(1000);
        s.suppress("a.md", 0);
        assert!(!s.is_suppressed("a.md", 1001));
    }

    #[test]
    fn repeated_events_within_window_stay_suppressed() {
        let mut s = SuppressionSet::new(1000);
        s.suppress("a.md", 0);
        assert!(s.is_suppressed("a.md", 400)); // create
        assert!(s.is_suppressed("a.md", 600)); // modify, still within the same write's window
        assert!(!s.is_suppressed("a.md", 1001));
    }

    #[test]
    fn sweep_removes_expired_entries_only() {
        let mut s = SuppressionSet::new(1000);
        s.suppress("a.md", 0);
        s.suppress("b.md", 900);
        s.sweep(1001);
        assert!(!s.is_suppressed("a.md", 1001));
        assert!(s.is_suppressed("b.md", 1001));
    }
}
