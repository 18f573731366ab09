//! Wire protocol: a tagged JSON message enum paired, for two message
//! types, with an immediately-following binary frame.
//!
//! Every message is a `#[serde(tag = "type")]` variant dispatched by
//! `match`, carried over [`Frame`] so the transport layer can enforce
//! "no frame may come between an upload header and its binary body" at
//! the type level.

use serde::{Deserialize, Serialize};

/// Current protocol version. Bumped on any wire-incompatible change;
/// mismatched versions fail the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Hard cap on any single frame, text or binary.
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

/// Bounded concurrency for the client's upload/delete pipeline.
pub const UPLOAD_CONCURRENCY: usize = 4;

/// Bounded concurrency (sliding window) for the client's download pipeline.
pub const DOWNLOAD_CONCURRENCY: usize = 6;

/// Debounce window for locally observed file-change events.
pub const WATCH_DEBOUNCE_MS: u64 = 300;

/// Adapter poll interval for paths outside the editor's normal event bus.
pub const ADAPTER_POLL_INTERVAL_MS: u64 = 5_000;

/// Auth rate-limit window.
pub const AUTH_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Auth rate-limit failure threshold within the window.
pub const AUTH_RATE_LIMIT_THRESHOLD: u32 = 5;

/// Unauthenticated connections are closed after this many seconds.
pub const AUTH_TIMEOUT_SECS: u64 = 10;

/// Application-level keepalive interval for an open client connection.
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// Writeback suppression window: how long a self-write stays in the
/// suppression set before the watcher will observe that path again.
pub const SUPPRESSION_WINDOW_MS: u64 = 1_000;

/// Close codes used on the websocket transport.
pub mod close_code {
    /// Connection never authenticated within [`super::AUTH_TIMEOUT_SECS`].
    pub const AUTH_TIMEOUT: u16 = 4001;
    /// A text frame failed to parse as JSON.
    pub const INVALID_JSON: u16 = 4002;
    /// An operational message arrived on an unauthenticated session.
    pub const UNAUTHENTICATED_OP: u16 = 4003;
    /// `AUTH.protocolVersion` did not match [`super::PROTOCOL_VERSION`].
    pub const PROTOCOL_MISMATCH: u16 = 4004;
    /// The session's tokens were revoked via `CLIENT_KICK`.
    pub const KICKED: u16 = 4005;
    /// The server performed a full reset (`POST /api/reset`).
    pub const SERVER_RESET: u16 = 1012;
}

/// One live (non-tombstoned) or tombstoned record as carried in a
/// `SYNC_RESPONSE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    /// Opaque file identifier.
    pub file_id: String,
    /// `base64(iv || ciphertext || tag)` of `{"path": ...}`, trusted as-is by the server.
    pub encrypted_meta: String,
    /// Client-supplied modification time, milliseconds since epoch.
    pub mtime: i64,
    /// Plaintext byte length.
    pub size: u64,
    /// The sequence this record was last mutated at.
    pub sequence: u64,
    /// True when this entry is a tombstone (deletion marker).
    #[serde(default)]
    pub deleted: bool,
}

/// A connected device, as broadcast in `CLIENT_LIST`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Stable per-device client identifier.
    pub client_id: String,
    /// Human-readable device name.
    pub device_name: String,
    /// Whether this client currently holds an open connection.
    pub online: bool,
}

/// The full tagged message taxonomy. `#[serde(tag = "type")]`
/// gives each variant its exact `type` discriminant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Client → server: begin authentication.
    #[serde(rename = "AUTH")]
    Auth {
        /// Stable per-device client identifier, chosen by the client.
        client_id: String,
        /// Human-readable device name.
        device_name: String,
        /// This client's protocol version.
        protocol_version: u32,
        /// Present when authenticating with a fresh password hash.
        #[serde(skip_serializing_if = "Option::is_none")]
        password_hash: Option<String>,
        /// Present when re-authenticating with a previously issued token.
        #[serde(skip_serializing_if = "Option::is_none")]
        auth_token: Option<String>,
    },
    /// Server → client: authentication succeeded.
    #[serde(rename = "AUTH_OK")]
    AuthOk {
        /// Server's persistent random identifier.
        server_id: String,
        /// Base64 vault salt, used by the client to derive its vault key.
        vault_salt: String,
        /// Freshly issued or refreshed opaque session token.
        auth_token: String,
    },
    /// Server → client: authentication failed.
    #[serde(rename = "AUTH_FAIL")]
    AuthFail {
        /// Human-readable reason (clients match on `"Session revoked"` to drop a stale token without retrying).
        reason: String,
    },
    /// Client → server: request changes since `last_sequence`.
    #[serde(rename = "SYNC_REQUEST")]
    SyncRequest {
        /// 0 requests a full manifest; >0 requests an incremental replay.
        last_sequence: u64,
    },
    /// Server → client: the requested manifest or incremental changes.
    #[serde(rename = "SYNC_RESPONSE")]
    SyncResponse {
        /// Live entries (full sync) or changed/tombstoned entries (incremental).
        entries: Vec<ChangeEntry>,
        /// The server's current sequence at response time.
        current_sequence: u64,
        /// True when `entries` is the full live manifest, false for incremental.
        full_sync: bool,
    },
    /// Client → server, immediately followed by a binary frame: upload a file.
    #[serde(rename = "FILE_UPLOAD")]
    FileUpload {
        /// Opaque file identifier.
        file_id: String,
        /// Encrypted `{"path": ...}` metadata.
        encrypted_meta: String,
        /// Client-supplied modification time, milliseconds since epoch.
        mtime: i64,
        /// Plaintext byte length.
        size: u64,
    },
    /// Server → client: upload accepted and sequenced.
    #[serde(rename = "FILE_UPLOAD_ACK")]
    FileUploadAck {
        /// The uploaded file's identifier.
        file_id: String,
        /// The sequence allocated to this mutation.
        sequence: u64,
    },
    /// Client → server: request a file's current contents.
    #[serde(rename = "FILE_DOWNLOAD")]
    FileDownload {
        /// Opaque file identifier.
        file_id: String,
    },
    /// Server → client, immediately followed by a binary frame: the
    /// requested file's metadata, with its blob as the next binary frame.
    #[serde(rename = "FILE_DOWNLOAD_RESPONSE")]
    FileDownloadResponse {
        /// Opaque file identifier.
        file_id: String,
        /// Encrypted `{"path": ...}` metadata.
        encrypted_meta: String,
        /// Client-supplied modification time, milliseconds since epoch.
        mtime: i64,
        /// Plaintext byte length.
        size: u64,
    },
    /// Server → client: another client changed a file.
    #[serde(rename = "FILE_CHANGED")]
    FileChanged {
        /// Opaque file identifier.
        file_id: String,
        /// Encrypted `{"path": ...}` metadata.
        encrypted_meta: String,
        /// Client-supplied modification time, milliseconds since epoch.
        mtime: i64,
        /// Plaintext byte length.
        size: u64,
        /// The sequence allocated to this mutation.
        sequence: u64,
        /// The client that originated the change.
        source_client_id: String,
    },
    /// Server → client: another client deleted a file.
    #[serde(rename = "FILE_REMOVED")]
    FileRemoved {
        /// Opaque file identifier.
        file_id: String,
        /// The sequence allocated to this tombstone.
        sequence: u64,
        /// The client that originated the deletion.
        source_client_id: String,
    },
    /// Client → server: delete a file.
    #[serde(rename = "FILE_DELETE")]
    FileDelete {
        /// Opaque file identifier.
        file_id: String,
    },
    /// Server → client: the current set of connected devices.
    #[serde(rename = "CLIENT_LIST")]
    ClientList {
        /// All clients with session history, online or not.
        clients: Vec<ClientInfo>,
    },
    /// Client → server: forcibly revoke another client's session.
    #[serde(rename = "CLIENT_KICK")]
    ClientKick {
        /// The client identifier to revoke.
        target_client_id: String,
    },
    /// Either direction: application-level liveness probe.
    #[serde(rename = "PING")]
    Ping {
        /// Sender's local timestamp, milliseconds since epoch.
        timestamp: i64,
    },
    /// Either direction: liveness response. Purely informative; nothing
    /// times out waiting for it.
    #[serde(rename = "PONG")]
    Pong {
        /// Echoed or fresh timestamp, milliseconds since epoch.
        timestamp: i64,
    },
}

impl Message {
    /// The two message types that are immediately followed by a raw
    /// binary frame on the same connection.
    #[must_use]
    pub fn expects_binary_body(&self) -> bool {
        matches!(self, Message::FileUpload { .. } | Message::FileDownloadResponse { .. })
    }
}

/// A frame on the wire: either a JSON text message or a raw binary body.
/// Keeping these as distinct variants (rather than one blob) is what lets
/// the transport layer refuse a binary frame with no pending header, and
/// refuse a text frame that would interleave with a pending header's body
/// .
#[derive(Debug, Clone)]
pub enum Frame {
    /// A parsed JSON message.
    Text(Message),
    /// A raw binary payload (a file blob).
    Binary(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_message_round_trips_through_json() {
        let msg = Message::Auth {
            client_id: "c1".into(),
            device_name: "laptop".into(),
            protocol_version: PROTOCOL_VERSION,
            password_hash: Some("deadbeef".into()),
            auth_token: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"AUTH\""));
        assert!(!json.contains("auth_token"));
        let back: Message = serde_json::from_str(&json).unwrap();
        match back {
            Message::Auth { client_id, password_hash, auth_token, .. } => {
                assert_eq!(client_id, "c1");
                assert_eq!(password_hash.as_deref(), Some("deadbeef"));
                assert!(auth_token.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn upload_and_download_response_expect_binary_body() {
        let upload = Message::FileUpload {
            file_id: "f".into(),
            encrypted_meta: "m".into(),
            mtime: 0,
            size: 0,
        };
        let resp = Message::FileDownloadResponse {
            file_id: "f".into(),
            encrypted_meta: "m".into(),
            mtime: 0,
            size: 0,
        };
        assert!(upload.expects_binary_body());
        assert!(resp.expects_binary_body());
        assert!(!Message::Ping { timestamp: 0 }.expects_binary_body());
    }
}
