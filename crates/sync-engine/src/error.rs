//! Error types for the client sync engine.

use thiserror::Error;

/// Failures raised while building a manifest, reconciling, or executing a
/// sync plan.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A local filesystem operation failed.
    #[error("vault filesystem error: {0}")]
    Fs(String),
    /// A crypto operation (encrypt/decrypt/derive) failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] sync_core::crypto::CryptoError),
    /// No vault key is available yet; the caller must authenticate first.
    #[error("no vault key: authenticate before syncing")]
    NoVaultKey,
    /// A download's binary frame arrived with no matching pending header.
    #[error("binary frame arrived with no pending download header")]
    UnpairedBinary,
}
