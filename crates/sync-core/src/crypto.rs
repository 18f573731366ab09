//! Crypto primitives for the vault sync system.
//!
//! All client-visible secrets funnel through [`VaultKey`]: a password and a
//! per-vault salt are stretched once via PBKDF2-HMAC-SHA512 into 256 bits
//! that serve double duty as an AES-256-GCM key and, via its raw bytes, an
//! HMAC-SHA256 key for file-ID derivation. The server never holds this key.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const PBKDF2_ITERATIONS: u32 = 210_000;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;

/// Errors raised by the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// AEAD decryption failed: wrong key, tampered ciphertext, or corrupt framing.
    #[error("decrypt failed: authentication tag mismatch or malformed input")]
    Decrypt,
    /// Input shorter than the mandatory IV prefix.
    #[error("ciphertext shorter than IV ({0} bytes)")]
    ShortInput(usize),
    /// Base64 framing around an encrypted-meta payload was invalid.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The decrypted meta payload was not valid UTF-8/JSON.
    #[error("invalid meta json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A vault's derived symmetric key. Raw bytes are cached for HMAC reuse
/// (deriving a file-ID should never re-run PBKDF2) and zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct VaultKey {
    bytes: [u8; KEY_LEN],
}

impl VaultKey {
    /// Derive a vault key from `password` and the vault's `salt` via
    /// PBKDF2-HMAC-SHA512 with 210000 iterations, 256-bit output.
    pub fn derive(password: &str, salt: &[u8]) -> Self {
        let mut bytes = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut bytes);
        Self { bytes }
    }

    /// Reconstruct a vault key from previously persisted raw bytes (the
    /// client stores these locally, base64-encoded, to skip password
    /// re-entry on reconnect).
    pub fn from_raw(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes, exported once by callers that need to persist them
    /// locally (client-side only; the server never sees these).
    #[must_use]
    pub fn raw_bytes(&self) -> [u8; KEY_LEN] {
        self.bytes
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.bytes))
    }

    /// `HMAC-SHA256(raw_bits, utf8(path))` as lowercase hex: the opaque
    /// file-ID the server indexes by. Reuses the cached raw key bytes
    /// directly rather than re-deriving anything.
    #[must_use]
    pub fn derive_file_id(&self, path: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.bytes)
            .expect("HMAC-SHA256 accepts any key length");
        mac.update(path.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Encrypt `plaintext` under a fresh random 96-bit IV. Output is raw
    /// `iv || ciphertext || tag` bytes, never base64 — this is the framing
    /// used for file blobs on the wire.
    pub fn encrypt_blob(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let ct = self
            .cipher()
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .expect("AES-256-GCM encryption is infallible for well-formed input");
        let mut out = Vec::with_capacity(IV_LEN + ct.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ct);
        out
    }

    /// Inverse of [`encrypt_blob`](Self::encrypt_blob): reads the first 12
    /// bytes as the IV, fails closed on tag mismatch or short input.
    pub fn decrypt_blob(&self, bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if bytes.len() < IV_LEN {
            return Err(CryptoError::ShortInput(bytes.len()));
        }
        let (iv, ct) = bytes.split_at(IV_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(iv), ct)
            .map_err(|_| CryptoError::Decrypt)
    }

    /// Encrypt a JSON value into `base64(iv || ciphertext || tag)` — the
    /// text-frame-friendly encoding used for `encryptedMeta`.
    pub fn encrypt_meta(&self, json: &serde_json::Value) -> String {
        let plaintext = serde_json::to_vec(json).expect("serde_json::Value always serializes");
        BASE64.encode(self.encrypt_blob(&plaintext))
    }

    /// Inverse of [`encrypt_meta`](Self::encrypt_meta).
    pub fn decrypt_meta(&self, b64: &str) -> Result<serde_json::Value, CryptoError> {
        let bytes = BASE64.decode(b64)?;
        let plaintext = self.decrypt_blob(&bytes)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey").field("bytes", &"<redacted>").finish()
    }
}

/// Generate a fresh random 32-byte vault salt, base64-encoded for storage.
#[must_use]
pub fn new_vault_salt() -> String {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    BASE64.encode(salt)
}

/// Generate a fresh opaque session token: 32 random bytes as 64 lowercase
/// hex characters.
#[must_use]
pub fn new_session_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Lowercase hex SHA-256 of arbitrary bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Zeroizing wrapper for a plaintext password read from the user, so it
/// does not linger in memory longer than the single hashing/derivation
/// call that needs it.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Password(String);

impl Password {
    /// Wrap a password string.
    #[must_use]
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Borrow the plaintext password.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn file_id_deterministic_and_distinct() {
        let key = VaultKey::derive("hunter2", b"some-salt");
        let a = key.derive_file_id("notes/a.md");
        let b = key.derive_file_id("notes/a.md");
        let c = key.derive_file_id("notes/b.md");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn blob_roundtrip_and_fresh_iv() {
        let key = VaultKey::derive("pw", b"salt");
        let ct1 = key.encrypt_blob(b"hello vault");
        let ct2 = key.encrypt_blob(b"hello vault");
        assert_ne!(ct1, ct2, "IV must be fresh per call");
        assert_eq!(key.decrypt_blob(&ct1).unwrap(), b"hello vault");
        assert_eq!(key.decrypt_blob(&ct2).unwrap(), b"hello vault");
    }

    #[test]
    fn blob_decrypt_fails_under_wrong_key() {
        let key = VaultKey::derive("pw", b"salt");
        let other = VaultKey::derive("different", b"salt");
        let ct = key.encrypt_blob(b"secret");
        assert!(matches!(other.decrypt_blob(&ct), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn meta_roundtrip() {
        let key = VaultKey::derive("pw", b"salt");
        let json = serde_json::json!({"path": "notes/a.md"});
        let enc = key.encrypt_meta(&json);
        let dec = key.decrypt_meta(&enc).unwrap();
        assert_eq!(dec, json);
    }

    #[test]
    fn short_input_is_rejected() {
        let key = VaultKey::derive("pw", b"salt");
        assert!(matches!(key.decrypt_blob(&[1, 2, 3]), Err(CryptoError::ShortInput(3))));
    }

    proptest! {
        #[test]
        fn file_id_distinct_for_distinct_paths(p1 in "[a-z/]{1,40}", p2 in "[a-z/]{1,40}") {
            prop_assume!(p1 != p2);
            let key = VaultKey::derive("pw", b"salt");
            prop_assert_ne!(key.derive_file_id(&p1), key.derive_file_id(&p2));
        }

        #[test]
        fn blob_roundtrip_arbitrary_bytes(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let key = VaultKey::derive("pw", b"salt");
            let ct = key.encrypt_blob(&data);
            prop_assert_eq!(key.decrypt_blob(&ct).unwrap(), data);
        }
    }
}
