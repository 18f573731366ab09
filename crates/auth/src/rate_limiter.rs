//! Per-source-address password rate limiting. There is only one account
//! on a vault server, so limiting is keyed by IP rather than by client-ID.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

/// Failure window for a single address.
struct Entry {
    failures: u32,
    reset_at: i64,
}

/// Tracks password-verification failures per source address within a
/// sliding window, rejecting further attempts once a threshold is hit.
pub struct RateLimiter {
    window_secs: i64,
    threshold: u32,
    entries: Mutex<HashMap<IpAddr, Entry>>,
}

impl RateLimiter {
    /// Build a limiter with the given window (seconds) and failure threshold.
    #[must_use]
    pub fn new(window_secs: u64, threshold: u32) -> Self {
        Self { window_secs: window_secs as i64, threshold, entries: Mutex::new(HashMap::new()) }
    }

    /// Whether `ip` currently has too many recent failures to attempt
    /// another password check. Does not itself count as an attempt.
    #[must_use]
    pub fn is_limited(&self, ip: IpAddr, now_ms: i64) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(&ip) {
            Some(e) if now_ms < e.reset_at => e.failures >= self.threshold,
            _ => false,
        }
    }

    /// Record a failed password check for `ip`. Starts or extends the
    /// 60-second window; does not itself check the threshold (callers
    /// should check [`is_limited`](Self::is_limited) before comparing
    /// the password at all).
    pub fn record_failure(&self, ip: IpAddr, now_ms: i64) {
        let mut entries = self.entries.lock().unwrap();
        let window_ms = self.window_secs * 1000;
        let entry = entries.entry(ip).or_insert(Entry { failures: 0, reset_at: now_ms + window_ms });
        if now_ms >= entry.reset_at {
            entry.failures = 0;
            entry.reset_at = now_ms + window_ms;
        }
        entry.failures += 1;
    }

    /// Clear `ip`'s failure history after a successful verification.
    pub fn clear(&self, ip: IpAddr) {
        self.entries.lock().unwrap().remove(&ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn allows_up_to_threshold_failures() {
        let rl = RateLimiter::new(60, 5);
        for _ in 0..4 {
            assert!(!rl.is_limited(ip(), 0));
            rl.record_failure(ip(), 0);
        }
        assert!(!rl.is_limited(ip(), 0));
    }

    #[test]
    fn blocks_at_threshold_within_window() {
        let rl = RateLimiter::new(60, 5);
        for _ in 0..5 {
            rl.record_failure(ip(), 0);
        }
        assert!(rl.is_limited(ip(), 100));
    }

    #[test]
    fn window_resets_after_expiry() {
        let rl = RateLimiter::new(60, 5);
        for _ in 0..5 {
            rl.record_failure(ip(), 0);
        }
        assert!(rl.is_limited(ip(), 1_000));
        assert!(!rl.is_limited(ip(), 61_000));
    }

    #[test]
    fn clear_resets_failure_count() {
        let rl = RateLimiter::new(60, 5);
        for _ in 0..5 {
            rl.record_failure(ip(), 0);
        }
        rl.clear(ip());
        assert!(!rl.is_limited(ip(), 0));
    }
}
