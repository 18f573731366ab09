//! Small id/time helpers shared by every other crate in the workspace.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch, used for `mtime`, token timestamps,
/// and watcher debounce bookkeeping.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a random 128-bit server identifier, hex-encoded, persisted
/// once to `<DATA_DIR>/server-id`.
#[must_use]
pub fn new_server_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a random per-device client identifier, chosen once on first
/// run and persisted thereafter in the client's durable state.
#[must_use]
pub fn new_client_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("client-{}", hex::encode(bytes))
}
