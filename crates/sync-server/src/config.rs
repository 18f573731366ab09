//! Server configuration, read once from the environment at startup.

use std::path::PathBuf;

/// Everything the server binary needs, resolved once from env vars.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `/sync` and HTTP listen port.
    pub port: u16,
    /// UDP discovery broadcast/listen port.
    pub discovery_port: u16,
    /// Root directory for `changelog.sqlite3`, `blobs/`, and `server-id`.
    pub data_dir: PathBuf,
    /// Advertised hostname, used in discovery beacons and `/api/stats`.
    pub hostname: String,
    /// Whether the HTTP/WS listener terminates TLS itself (false when a
    /// reverse proxy sits in front and forwards plaintext).
    pub use_tls: bool,
}

impl ServerConfig {
    /// Load from environment variables, falling back to the documented
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_u16("PORT", 8787),
            discovery_port: env_u16("DISCOVERY_PORT", 8788),
            data_dir: std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data")),
            hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            use_tls: env_bool("USE_TLS", false),
        }
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("1" | "true" | "TRUE" | "yes") => true,
        Some("0" | "false" | "FALSE" | "no") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u16_falls_back_on_missing_or_invalid() {
        assert_eq!(env_u16("SYNC_SERVER_TEST_NOPE", 8787), 8787);
    }

    #[test]
    fn env_bool_recognizes_common_spellings() {
        std::env::set_var("SYNC_SERVER_TEST_BOOL", "true");
        assert!(env_bool("SYNC_SERVER_TEST_BOOL", false));
        std::env::set_var("SYNC_SERVER_TEST_BOOL", "0");
        assert!(!env_bool("SYNC_SERVER_TEST_BOOL", true));
        std::env::remove_var("SYNC_SERVER_TEST_BOOL");
    }
}
