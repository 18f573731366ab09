//! Session and password authentication: rate limiting, constant-time
//! password/token comparison, and opaque session tokens backed by the
//! change-log store's `vault_meta`/`tokens`/`client_sessions` tables.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod rate_limiter;

use std::net::IpAddr;

use change_log::{meta_key, Store, StoreError};
use subtle::ConstantTimeEq;
use sync_core::crypto::new_session_token;
use thiserror::Error;

pub use rate_limiter::RateLimiter;

/// Errors from session and password authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// `initialize` was called after a password hash already exists.
    #[error("already initialized")]
    AlreadyInitialized,
    /// A supplied password hash was not 64 lowercase hex characters.
    #[error("invalid password hash format")]
    InvalidHashFormat,
    /// The source address has exceeded the failure threshold within the window.
    #[error("rate limited")]
    RateLimited,
    /// No password hash is stored yet, or the supplied hash did not match.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Session and password authentication over a [`Store`].
pub struct Auth<'a> {
    store: &'a Store,
    limiter: RateLimiter,
}

impl<'a> Auth<'a> {
    /// Build an authenticator over `store` with the standard 60-second,
    /// 5-failure rate-limit window.
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self { store, limiter: RateLimiter::new(60, 5) }
    }

    /// Set the vault's password hash. Only valid when no hash is stored
    /// yet; `password_hash` must be 64 lowercase hex characters (a
    /// SHA-256 digest).
    pub fn initialize(&self, password_hash: &str) -> Result<(), AuthError> {
        if !is_hex64(password_hash) {
            return Err(AuthError::InvalidHashFormat);
        }
        if self.store.get_meta(meta_key::PASSWORD_HASH)?.is_some() {
            return Err(AuthError::AlreadyInitialized);
        }
        self.store.set_meta(meta_key::PASSWORD_HASH, password_hash)?;
        Ok(())
    }

    /// Constant-time verify `client_hash` against the stored password
    /// hash. Rejects without comparing if `ip` is currently rate limited;
    /// on mismatch, records a failure against `ip`; on match, clears it.
    pub fn verify_password(&self, client_hash: &str, ip: IpAddr, now_ms: i64) -> Result<(), AuthError> {
        if self.limiter.is_limited(ip, now_ms) {
            return Err(AuthError::RateLimited);
        }
        let Some(stored) = self.store.get_meta(meta_key::PASSWORD_HASH)? else {
            return Err(AuthError::InvalidCredentials);
        };
        let matches = stored.as_bytes().ct_eq(client_hash.as_bytes()).into();
        if matches {
            self.limiter.clear(ip);
            Ok(())
        } else {
            self.limiter.record_failure(ip, now_ms);
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Issue a fresh session token for `client_id`, revoking any tokens
    /// it previously held. Also records the client's session history.
    pub fn issue_token(
        &self,
        client_id: &str,
        device_name: &str,
        ip: IpAddr,
        now_ms: i64,
    ) -> Result<String, AuthError> {
        self.store.revoke_tokens_for_client(client_id)?;
        let token = new_session_token();
        self.store.insert_token(&token, client_id, device_name, &ip.to_string(), now_ms)?;
        self.store.touch_client_session(client_id, device_name, now_ms)?;
        Ok(token)
    }

    /// Look up `(clientId, deviceName)` for a token, bumping `lastUsed`
    /// on a hit. `None` means the token is unknown or was revoked. Scans
    /// every stored token with a constant-time comparison instead of an
    /// indexed lookup, so a connecting client can't learn anything about
    /// which tokens exist from response timing.
    pub fn validate_token(&self, token: &str, now_ms: i64) -> Result<Option<(String, String)>, AuthError> {
        let candidate = token.as_bytes();
        let mut hit: Option<(String, String, String)> = None;
        for (stored_token, client_id, device_name) in self.store.all_tokens()? {
            let matches: bool = stored_token.as_bytes().ct_eq(candidate).into();
            if matches {
                hit = Some((stored_token, client_id, device_name));
            }
        }
        match hit {
            Some((stored_token, client_id, device_name)) => {
                self.store.touch_token(&stored_token, now_ms)?;
                Ok(Some((client_id, device_name)))
            }
            None => Ok(None),
        }
    }

    /// Refresh a client's session-history row without touching its token.
    /// Used on the token-reauthentication path, where the existing token
    /// is kept as-is (only its own `lastUsed` moves, via `validate_token`).
    pub fn touch_session(&self, client_id: &str, device_name: &str, now_ms: i64) -> Result<(), AuthError> {
        self.store.touch_client_session(client_id, device_name, now_ms)?;
        Ok(())
    }

    /// Revoke every token held by `client_id` (used by `CLIENT_KICK` and
    /// on password rotation).
    pub fn revoke_by_client_id(&self, client_id: &str) -> Result<(), AuthError> {
        self.store.revoke_tokens_for_client(client_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use sync_core::crypto::sha256_hex;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory(dir.path().join("blobs")).unwrap();
        (store, dir)
    }

    #[test]
    fn initialize_then_reinitialize_fails() {
        let (s, _dir) = store();
        let auth = Auth::new(&s);
        let hash = sha256_hex(b"correct horse");
        auth.initialize(&hash).unwrap();
        assert!(matches!(auth.initialize(&hash), Err(AuthError::AlreadyInitialized)));
    }

    #[test]
    fn initialize_rejects_malformed_hash() {
        let (s, _dir) = store();
        let auth = Auth::new(&s);
        assert!(matches!(auth.initialize("not-hex"), Err(AuthError::InvalidHashFormat)));
    }

    #[test]
    fn verify_password_matches_and_clears_failures() {
        let (s, _dir) = store();
        let auth = Auth::new(&s);
        let hash = sha256_hex(b"hunter2");
        auth.initialize(&hash).unwrap();
        assert!(auth.verify_password(&hash, ip(), 0).is_ok());
    }

    #[test]
    fn verify_password_rejects_wrong_hash_and_rate_limits() {
        let (s, _dir) = store();
        let auth = Auth::new(&s);
        let hash = sha256_hex(b"hunter2");
        auth.initialize(&hash).unwrap();
        let wrong = sha256_hex(b"wrong");
        for _ in 0..5 {
            assert!(matches!(auth.verify_password(&wrong, ip(), 0), Err(AuthError::InvalidCredentials)));
        }
        assert!(matches!(auth.verify_password(&hash, ip(), 0), Err(AuthError::RateLimited)));
    }

    #[test]
    fn issue_token_revokes_previous_tokens() {
        let (s, _dir) = store();
        let auth = Auth::new(&s);
        let t1 = auth.issue_token("c1", "laptop", ip(), 0).unwrap();
        let t2 = auth.issue_token("c1", "laptop", ip(), 1).unwrap();
        assert_ne!(t1, t2);
        assert!(auth.validate_token(&t1, 2).unwrap().is_none());
        assert_eq!(auth.validate_token(&t2, 2).unwrap(), Some(("c1".to_string(), "laptop".to_string())));
    }

    #[test]
    fn touch_session_does_not_rotate_or_revoke_the_token() {
        let (s, _dir) = store();
        let auth = Auth::new(&s);
        let token = auth.issue_token("c1", "laptop", ip(), 0).unwrap();
        auth.touch_session("c1", "laptop", 5).unwrap();
        assert_eq!(auth.validate_token(&token, 6).unwrap(), Some(("c1".to_string(), "laptop".to_string())));
    }

    #[test]
    fn revoke_by_client_id_invalidates_token() {
        let (s, _dir) = store();
        let auth = Auth::new(&s);
        let token = auth.issue_token("c1", "laptop", ip(), 0).unwrap();
        auth.revoke_by_client_id("c1").unwrap();
        assert!(auth.validate_token(&token, 1).unwrap().is_none());
    }
}
