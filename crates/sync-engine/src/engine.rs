//! The client sync engine (§4.7): owns the connection state machine, the
//! vault key lifecycle, reconciliation, the bounded-concurrency
//! upload/delete and download pipelines, the offline queue, and writeback
//! suppression. [`ClientTransport`] sends are non-blocking mpsc pushes, so
//! the engine drives everything synchronously from [`Engine::on_frame`] —
//! no async runtime is required inside this crate.

use std::collections::{HashMap, VecDeque};

use sync_core::crypto::{CryptoError, Password, VaultKey};
use sync_core::ids::now_ms;
use sync_core::wire::{ChangeEntry, Frame, Message, DOWNLOAD_CONCURRENCY, PROTOCOL_VERSION, UPLOAD_CONCURRENCY};
use sync_transport::ClientTransport;
use vault_watch::{ChangeKind, ExclusionRules, FileChange, RawEvent, Watcher};

use crate::downloads::{PendingDownload, PendingDownloads, PendingSlot};
use crate::error::EngineError;
use crate::local::{build_manifest, VaultFs};
use crate::queue::OfflineQueue;
use crate::reconcile::{reconcile_full, reconcile_incremental, Plan, Strategy};
use crate::state::EngineState;

/// Credentials the engine persists so a later reconnect can skip password
/// entry. Stored raw (base64) by design — see module docs on the
/// usability/security tradeoff this implies.
#[derive(Debug, Clone)]
pub struct StoredCredentials {
    /// Base64 vault salt returned by the server at first auth.
    pub vault_salt: String,
    /// Base64 raw vault key bytes, persisted so reconnects skip re-deriving
    /// from the password. This is a deliberate usability/security
    /// tradeoff: anyone who reads the client's state file recovers the
    /// vault key without the password.
    pub key_raw_b64: String,
    /// The currently valid opaque session token.
    pub auth_token: String,
}

/// Durable per-device state the engine reads and writes across restarts.
/// The client binary backs this with the JSON state file from §6; tests
/// back it with an in-memory cell.
pub trait ClientState {
    /// The last sequence committed to durable storage.
    fn last_sequence(&self) -> u64;
    /// Persist a newly committed sequence. Only called after every
    /// download/upload/delete in a batch has completed.
    fn set_last_sequence(&self, seq: u64);
    /// Previously persisted credentials, if any.
    fn stored_credentials(&self) -> Option<StoredCredentials>;
    /// Persist freshly issued credentials (first auth, or a token refresh).
    fn save_credentials(&self, creds: &StoredCredentials);
    /// Clear credentials after a `"Session revoked"` auth failure. Device
    /// identity and setup-complete are untouched — only the password re-entry is required.
    fn clear_credentials(&self);
}

/// Observable things that happened while processing a frame or local
/// event, for the caller to log to history / surface in a UI.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The engine entered a new state.
    StateChanged(EngineState),
    /// A file was downloaded and written locally.
    Downloaded { path: String },
    /// A file was uploaded.
    Uploaded { path: String },
    /// A file was deleted locally as part of reconciliation or an incoming tombstone.
    DeletedLocal { path: String },
    /// A remote delete request was sent.
    DeletedRemote { file_id: String },
    /// A single download in a batch failed; the batch continues.
    DownloadFailed { file_id: String, reason: String },
    /// The pending sequence was committed after a batch fully drained.
    SequenceCommitted(u64),
    /// A local change was queued rather than executed immediately (engine
    /// not `idle`).
    ChangeQueued { path: String },
    /// The full offline queue was flushed after returning to `idle`.
    QueueFlushed { count: usize },
}

/// The client sync engine. Generic over the filesystem and durable-state
/// seams so it can run against an in-memory fake in tests.
pub struct Engine<F: VaultFs, S: ClientState> {
    state: EngineState,
    client_id: String,
    device_name: String,
    fs: F,
    client_state: S,
    exclusion: ExclusionRules,
    watcher: Watcher,
    vault_key: Option<VaultKey>,
    pending_password: Option<Password>,
    upload_queue: VecDeque<String>,
    delete_queue: VecDeque<String>,
    download_queue: VecDeque<String>,
    pending_downloads: PendingDownloads,
    uploads_deletes_inflight: usize,
    downloads_inflight: usize,
    pending_sequence: Option<u64>,
    failed_downloads: usize,
    offline_queue: OfflineQueue,
}

impl<F: VaultFs, S: ClientState> Engine<F, S> {
    /// Build a fresh engine. Loads any previously stored vault key so a
    /// reconnect via stored token does not need the password again.
    pub fn new(client_id: String, device_name: String, exclusion: ExclusionRules, fs: F, client_state: S) -> Self {
        let vault_key = client_state.stored_credentials().and_then(|creds| {
            base64_decode_32(&creds.key_raw_b64).map(VaultKey::from_raw)
        });
        Self {
            state: EngineState::Disconnected,
            client_id,
            device_name,
            fs,
            client_state,
            watcher: Watcher::new(exclusion.clone()),
            exclusion,
            vault_key,
            pending_password: None,
            upload_queue: VecDeque::new(),
            delete_queue: VecDeque::new(),
            download_queue: VecDeque::new(),
            pending_downloads: PendingDownloads::new(),
            uploads_deletes_inflight: 0,
            downloads_inflight: 0,
            pending_sequence: None,
            failed_downloads: 0,
            offline_queue: OfflineQueue::new(),
        }
    }

    /// Current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    fn transition(&mut self, state: EngineState) -> EngineEvent {
        self.state = state;
        EngineEvent::StateChanged(state)
    }

    /// Build the `AUTH` message. Reuses a stored token when available;
    /// otherwise sends a fresh password hash and stashes `password` so
    /// [`Self::on_frame`] can derive the vault key once `AUTH_OK` names
    /// the vault salt.
    pub fn begin_auth(&mut self, password: Option<Password>) -> Message {
        self.state = EngineState::Connecting;
        let stored = self.client_state.stored_credentials();
        let msg = if let Some(creds) = &stored {
            Message::Auth {
                client_id: self.client_id.clone(),
                device_name: self.device_name.clone(),
                protocol_version: PROTOCOL_VERSION,
                password_hash: None,
                auth_token: Some(creds.auth_token.clone()),
            }
        } else if let Some(pw) = &password {
            Message::Auth {
                client_id: self.client_id.clone(),
                device_name: self.device_name.clone(),
                protocol_version: PROTOCOL_VERSION,
                password_hash: Some(sync_core::crypto::sha256_hex(pw.as_str().as_bytes())),
                auth_token: None,
            }
        } else {
            Message::Auth {
                client_id: self.client_id.clone(),
                device_name: self.device_name.clone(),
                protocol_version: PROTOCOL_VERSION,
                password_hash: None,
                auth_token: None,
            }
        };
        self.pending_password = password;
        self.state = EngineState::Authenticating;
        msg
    }

    /// Process one incoming frame, driving state transitions and pipeline
    /// progress, dispatching further wire messages over `transport` as
    /// needed.
    pub fn on_frame(&mut self, frame: Frame, transport: &ClientTransport, strategy: Strategy) -> Vec<EngineEvent> {
        match frame {
            Frame::Text(msg) => self.on_message(msg, transport, strategy),
            Frame::Binary(bytes) => self.on_binary(&bytes),
        }
    }

    fn on_message(&mut self, msg: Message, transport: &ClientTransport, strategy: Strategy) -> Vec<EngineEvent> {
        match msg {
            Message::AuthOk { server_id: _, vault_salt, auth_token } => self.on_auth_ok(vault_salt, auth_token, transport),
            Message::AuthFail { reason } => self.on_auth_fail(&reason),
            Message::SyncResponse { entries, current_sequence, full_sync } => {
                self.on_sync_response(entries, current_sequence, full_sync, strategy, transport)
            }
            Message::FileUploadAck { file_id, sequence } => self.on_upload_ack(&file_id, sequence, transport),
            Message::FileDownloadResponse { file_id, encrypted_meta, mtime, size: _ } => {
                self.on_download_response(file_id, encrypted_meta, mtime)
            }
            Message::FileChanged { file_id: _, encrypted_meta, mtime, size: _, sequence: _, source_client_id } => {
                self.on_peer_changed(&encrypted_meta, mtime, &source_client_id)
            }
            Message::FileRemoved { file_id, sequence: _, source_client_id } => {
                self.on_peer_removed(&file_id, &source_client_id, transport)
            }
            Message::Ping { timestamp } => {
                transport.send(Message::Pong { timestamp });
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_auth_ok(&mut self, vault_salt: String, auth_token: String, transport: &ClientTransport) -> Vec<EngineEvent> {
        let key = if let Some(pw) = self.pending_password.take() {
            let salt = base64_decode(&vault_salt).unwrap_or_default();
            VaultKey::derive(pw.as_str(), &salt)
        } else if let Some(key) = self.vault_key.clone() {
            key
        } else {
            tracing::error!("AUTH_OK with no password pending and no stored key");
            return vec![self.transition(EngineState::Error)];
        };
        self.client_state.save_credentials(&StoredCredentials {
            vault_salt,
            key_raw_b64: base64_encode(&key.raw_bytes()),
            auth_token,
        });
        self.vault_key = Some(key);
        let events = vec![self.transition(EngineState::Syncing)];
        let last_sequence = self.client_state.last_sequence();
        transport.send(Message::SyncRequest { last_sequence });
        events
    }

    fn on_auth_fail(&mut self, reason: &str) -> Vec<EngineEvent> {
        if reason == "Session revoked" {
            self.client_state.clear_credentials();
            self.vault_key = None;
        }
        vec![self.transition(EngineState::Error)]
    }

    fn on_sync_response(
        &mut self,
        entries: Vec<ChangeEntry>,
        current_sequence: u64,
        full_sync: bool,
        strategy: Strategy,
        transport: &ClientTransport,
    ) -> Vec<EngineEvent> {
        let Some(key) = self.vault_key.clone() else {
            return vec![self.transition(EngineState::Error)];
        };
        let manifest = match build_manifest(&self.fs, &key, &self.exclusion) {
            Ok(m) => m,
            Err(err) => {
                tracing::error!(%err, "manifest build failed");
                return vec![self.transition(EngineState::Error)];
            }
        };
        let plan = if full_sync {
            reconcile_full(strategy, &manifest, &entries, &key, &self.exclusion)
        } else {
            reconcile_incremental(&manifest, &entries, &key)
        };
        self.pending_sequence = Some(current_sequence);
        self.queue_plan(plan);
        let mut events = Vec::new();
        self.dispatch_uploads_deletes(transport);
        self.dispatch_downloads(transport);
        if self.batch_drained() {
            events.extend(self.complete_batch(transport));
        }
        events
    }

    fn queue_plan(&mut self, plan: Plan) {
        for path in plan.local_deletes {
            let _ = self.fs.remove(&path);
        }
        for path in plan.uploads {
            self.upload_queue.push_back(path);
        }
        self.delete_queue.extend(plan.remote_deletes);
        self.download_queue.extend(plan.downloads.into_iter().map(|d| d.file_id));
    }

    fn dispatch_uploads_deletes(&mut self, transport: &ClientTransport) {
        let Some(key) = self.vault_key.clone() else { return };
        while self.uploads_deletes_inflight < UPLOAD_CONCURRENCY {
            if let Some(file_id) = self.delete_queue.pop_front() {
                transport.send(Message::FileDelete { file_id });
                self.uploads_deletes_inflight += 1;
                continue;
            }
            if let Some(path) = self.upload_queue.pop_front() {
                match self.fs.read(&path) {
                    Ok(plaintext) => {
                        let encrypted_meta = key.encrypt_meta(&serde_json::json!({ "path": path }));
                        let size = plaintext.len() as u64;
                        let mtime = now_ms();
                        let blob = key.encrypt_blob(&plaintext);
                        transport.send(Message::FileUpload { file_id: key.derive_file_id(&path), encrypted_meta, mtime, size });
                        transport.send_binary(blob);
                        self.uploads_deletes_inflight += 1;
                    }
                    Err(err) => tracing::warn!(%err, %path, "upload read failed, skipping"),
                }
                continue;
            }
            break;
        }
    }

    fn dispatch_downloads(&mut self, transport: &ClientTransport) {
        while self.downloads_inflight < DOWNLOAD_CONCURRENCY {
            let Some(file_id) = self.download_queue.pop_front() else { break };
            transport.send(Message::FileDownload { file_id });
            self.downloads_inflight += 1;
        }
    }

    fn on_upload_ack(&mut self, file_id: &str, _sequence: u64, transport: &ClientTransport) -> Vec<EngineEvent> {
        self.uploads_deletes_inflight = self.uploads_deletes_inflight.saturating_sub(1);
        self.dispatch_uploads_deletes(transport);
        let mut events = vec![EngineEvent::Uploaded { path: file_id.to_string() }];
        if self.batch_drained() {
            events.extend(self.complete_batch(transport));
        }
        events
    }

    fn on_peer_removed(&mut self, file_id: &str, source_client_id: &str, transport: &ClientTransport) -> Vec<EngineEvent> {
        if source_client_id == self.client_id {
            self.uploads_deletes_inflight = self.uploads_deletes_inflight.saturating_sub(1);
            self.dispatch_uploads_deletes(transport);
            let mut events = vec![EngineEvent::DeletedRemote { file_id: file_id.to_string() }];
            if self.batch_drained() {
                events.extend(self.complete_batch(transport));
            }
            return events;
        }
        // Another client deleted a file we may hold locally; resolved by
        // the next incremental SYNC_RESPONSE tombstone rather than here,
        // since we only have the file-ID, not the path, until decrypted.
        Vec::new()
    }

    fn on_peer_changed(&mut self, _encrypted_meta: &str, _mtime: i64, source_client_id: &str) -> Vec<EngineEvent> {
        if source_client_id == self.client_id {
            return Vec::new();
        }
        // A live incremental follow-up (the next SYNC_REQUEST on
        // reconnect, or a push-driven server) carries the authoritative
        // diff; this notification surfaces immediately in history only.
        tracing::info!(%source_client_id, "peer changed a file");
        Vec::new()
    }

    fn on_download_response(&mut self, file_id: String, encrypted_meta: String, mtime: i64) -> Vec<EngineEvent> {
        let Some(key) = self.vault_key.clone() else { return Vec::new() };
        match key.decrypt_meta(&encrypted_meta) {
            Ok(value) => {
                let path = value.get("path").and_then(|p| p.as_str()).unwrap_or_default().to_string();
                self.pending_downloads.push_header(PendingDownload { file_id, path, mtime });
                Vec::new()
            }
            Err(err) => {
                // The binary body still arrives unconditionally right after
                // this header on the wire; reserve its FIFO slot now so
                // on_binary discards that body instead of pairing it with
                // the next real header, and free this download's
                // concurrency slot immediately rather than waiting on a
                // body that was never going to be written anywhere.
                tracing::warn!(%err, %file_id, "failed to decrypt download metadata");
                self.pending_downloads.push_failed();
                self.downloads_inflight = self.downloads_inflight.saturating_sub(1);
                self.failed_downloads += 1;
                vec![EngineEvent::DownloadFailed { file_id, reason: "decrypt failed".into() }]
            }
        }
    }

    fn on_binary(&mut self, bytes: &[u8]) -> Vec<EngineEvent> {
        let Some(slot) = self.pending_downloads.pair_binary() else {
            tracing::warn!("binary frame with no pending download header, discarding");
            return Vec::new();
        };
        let header = match slot {
            PendingSlot::Header(header) => header,
            PendingSlot::Failed => {
                // Its download was already counted as failed and its
                // concurrency slot already freed when the header's
                // metadata failed to decrypt; this body is the one the
                // server still sent for it and is simply discarded.
                return Vec::new();
            }
        };
        let Some(key) = self.vault_key.clone() else { return Vec::new() };
        self.downloads_inflight = self.downloads_inflight.saturating_sub(1);

        let mut events = Vec::new();
        if self.exclusion.is_excluded(&header.path) {
            tracing::debug!(path = %header.path, "downloaded path excluded by policy, discarding");
        } else {
            match key.decrypt_blob(bytes) {
                Ok(plaintext) => match self.fs.write(&header.path, &plaintext) {
                    Ok(written_mtime) => {
                        self.watcher.note_self_write(&header.path, written_mtime.max(header.mtime), now_ms());
                        events.push(EngineEvent::Downloaded { path: header.path.clone() });
                    }
                    Err(err) => {
                        self.failed_downloads += 1;
                        events.push(EngineEvent::DownloadFailed { file_id: header.file_id.clone(), reason: err.to_string() });
                    }
                },
                Err(CryptoError::Decrypt | CryptoError::ShortInput(_)) => {
                    self.failed_downloads += 1;
                    events.push(EngineEvent::DownloadFailed { file_id: header.file_id.clone(), reason: "decrypt failed".into() });
                }
                Err(err) => {
                    self.failed_downloads += 1;
                    events.push(EngineEvent::DownloadFailed { file_id: header.file_id.clone(), reason: err.to_string() });
                }
            }
        }
        events
    }

    fn batch_drained(&self) -> bool {
        self.upload_queue.is_empty()
            && self.delete_queue.is_empty()
            && self.download_queue.is_empty()
            && self.uploads_deletes_inflight == 0
            && self.downloads_inflight == 0
            && !self.pending_downloads.has_pending()
    }

    fn complete_batch(&mut self, transport: &ClientTransport) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if let Some(seq) = self.pending_sequence.take() {
            self.client_state.set_last_sequence(seq);
            events.push(EngineEvent::SequenceCommitted(seq));
        }
        if self.failed_downloads > 0 {
            tracing::warn!(failed = self.failed_downloads, "batch completed with download failures");
            self.failed_downloads = 0;
        }
        events.push(self.transition(EngineState::Idle));
        if !self.offline_queue.is_empty() {
            events.extend(self.flush_with(transport));
        }
        events
    }

    /// Feed a locally observed file-change event (from the watcher). If
    /// `idle`, executes it immediately against `transport`; otherwise
    /// queues it for the next flush.
    pub fn on_local_change(&mut self, change: FileChange, transport: &ClientTransport) -> Vec<EngineEvent> {
        if !self.state.accepts_incremental_traffic() {
            let path = change.path.clone();
            self.offline_queue.push(change);
            return vec![EngineEvent::ChangeQueued { path }];
        }
        self.execute_change(&change, transport)
    }

    fn execute_change(&mut self, change: &FileChange, transport: &ClientTransport) -> Vec<EngineEvent> {
        let Some(key) = self.vault_key.clone() else { return Vec::new() };
        match change.kind {
            ChangeKind::Create | ChangeKind::Modify => {
                if let Ok(plaintext) = self.fs.read(&change.path) {
                    let encrypted_meta = key.encrypt_meta(&serde_json::json!({ "path": change.path }));
                    let size = plaintext.len() as u64;
                    let mtime = now_ms();
                    transport.send(Message::FileUpload { file_id: key.derive_file_id(&change.path), encrypted_meta, mtime, size });
                    transport.send_binary(key.encrypt_blob(&plaintext));
                    vec![EngineEvent::Uploaded { path: change.path.clone() }]
                } else {
                    Vec::new()
                }
            }
            ChangeKind::Delete => {
                transport.send(Message::FileDelete { file_id: key.derive_file_id(&change.path) });
                vec![EngineEvent::DeletedRemote { file_id: key.derive_file_id(&change.path) }]
            }
            ChangeKind::Rename => {
                let mut events = Vec::new();
                if let Some(old) = &change.old_path {
                    transport.send(Message::FileDelete { file_id: key.derive_file_id(old) });
                    events.push(EngineEvent::DeletedRemote { file_id: key.derive_file_id(old) });
                }
                if let Ok(plaintext) = self.fs.read(&change.path) {
                    let encrypted_meta = key.encrypt_meta(&serde_json::json!({ "path": change.path }));
                    let size = plaintext.len() as u64;
                    let mtime = now_ms();
                    transport.send(Message::FileUpload { file_id: key.derive_file_id(&change.path), encrypted_meta, mtime, size });
                    transport.send_binary(key.encrypt_blob(&plaintext));
                    events.push(EngineEvent::Uploaded { path: change.path.clone() });
                }
                events
            }
        }
    }

    /// Flush the offline queue against a live transport. Exposed
    /// separately from the internal flush performed at batch completion
    /// so callers can also trigger it explicitly (e.g. after a manual
    /// reconnect with no pending batch).
    pub fn flush_with(&mut self, transport: &ClientTransport) -> Vec<EngineEvent> {
        if !self.state.accepts_incremental_traffic() {
            return Vec::new();
        }
        let pending = self.offline_queue.drain();
        let count = pending.len();
        let mut events = Vec::new();
        for change in pending {
            events.extend(self.execute_change(&change, transport));
        }
        events.push(EngineEvent::QueueFlushed { count });
        events
    }

    /// The transport reported its connection closed. Drops every piece of
    /// per-connection pipeline state that a new connection cannot resume —
    /// in-flight upload/delete/download queues, their concurrency counters,
    /// and the download FIFO pairing map — since none of their in-flight
    /// requests or replies will ever arrive on the socket that replaces
    /// this one. `pending_sequence` is also dropped un-committed, which is
    /// already correct per the deferred-commit invariant (§7): a sequence
    /// is only ever persisted once its whole batch has drained. The offline
    /// queue survives untouched so anything queued while disconnected still
    /// flushes once the next batch completes. Returns to `Connecting` so
    /// outgoing traffic queues until the reconnect re-authenticates.
    pub fn on_disconnect(&mut self) -> EngineEvent {
        self.upload_queue.clear();
        self.delete_queue.clear();
        self.download_queue.clear();
        self.pending_downloads.clear();
        self.uploads_deletes_inflight = 0;
        self.downloads_inflight = 0;
        self.pending_sequence = None;
        self.failed_downloads = 0;
        self.transition(EngineState::Connecting)
    }

    /// Feed a raw event from the editor's own event bus into the watcher.
    pub fn record_editor_event(&mut self, event: RawEvent, now: i64) {
        self.watcher.on_editor_event(event, now);
    }

    /// Feed a fresh adapter-subtree snapshot into the watcher.
    pub fn poll_adapter(&mut self, snapshot: HashMap<String, i64>, now: i64) {
        self.watcher.poll_adapter(snapshot, now);
    }

    /// Drain every change whose debounce window has elapsed and act on
    /// each (immediately if `idle`, queued otherwise).
    pub fn drain_local_changes(&mut self, now: i64, transport: &ClientTransport) -> Vec<EngineEvent> {
        let ready = self.watcher.drain_ready(now);
        let mut events = Vec::new();
        for change in ready {
            events.extend(self.on_local_change(change, transport));
        }
        events
    }

    /// Compute a reconciliation preview without executing it — the
    /// dry-run path (§4.7), reusing the same reconciliation code the real
    /// sync uses.
    pub fn preview(&self, entries: &[ChangeEntry], full_sync: bool, strategy: Strategy) -> Result<Plan, EngineError> {
        let key = self.vault_key.clone().ok_or(EngineError::NoVaultKey)?;
        let manifest = build_manifest(&self.fs, &key, &self.exclusion)?;
        Ok(if full_sync {
            reconcile_full(strategy, &manifest, entries, &key, &self.exclusion)
        } else {
            reconcile_incremental(&manifest, entries, &key)
        })
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.encode(bytes)
}

fn base64_decode(s: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    STANDARD.decode(s).ok()
}

fn base64_decode_32(s: &str) -> Option<[u8; 32]> {
    let bytes = base64_decode(s)?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::test_support::InMemoryFs;
    use std::cell::RefCell;
    use vault_watch::ExclusionConfig;

    #[derive(Default)]
    struct FakeClientState {
        last_sequence: RefCell<u64>,
        credentials: RefCell<Option<StoredCredentials>>,
    }

    impl ClientState for FakeClientState {
        fn last_sequence(&self) -> u64 {
            *self.last_sequence.borrow()
        }
        fn set_last_sequence(&self, seq: u64) {
            *self.last_sequence.borrow_mut() = seq;
        }
        fn stored_credentials(&self) -> Option<StoredCredentials> {
            self.credentials.borrow().as_ref().map(|c| StoredCredentials {
                vault_salt: c.vault_salt.clone(),
                key_raw_b64: c.key_raw_b64.clone(),
                auth_token: c.auth_token.clone(),
            })
        }
        fn save_credentials(&self, creds: &StoredCredentials) {
            *self.credentials.borrow_mut() = Some(StoredCredentials {
                vault_salt: creds.vault_salt.clone(),
                key_raw_b64: creds.key_raw_b64.clone(),
                auth_token: creds.auth_token.clone(),
            });
        }
        fn clear_credentials(&self) {
            *self.credentials.borrow_mut() = None;
        }
    }

    fn rules() -> ExclusionRules {
        ExclusionRules::new(ExclusionConfig {
            config_dir: ".obsidian".into(),
            own_plugin_dir: "plugins/advanced-sync".into(),
            sync_workspace: true,
            sync_plugins: true,
            sync_settings: true,
            sync_all_file_types: true,
            exclude_globs: vec![],
        })
    }

    fn engine() -> Engine<InMemoryFs, FakeClientState> {
        Engine::new(
            "client-a".into(),
            "laptop".into(),
            rules(),
            InMemoryFs::default(),
            FakeClientState::default(),
        )
    }

    fn transport() -> ClientTransport {
        ClientTransport::connect("ws://127.0.0.1:1/sync".into()).0
    }

    #[tokio::test]
    async fn begin_auth_with_password_sends_hash_not_token() {
        let mut e = engine();
        let msg = e.begin_auth(Some(Password::new("hunter2".into())));
        assert_eq!(e.state(), EngineState::Authenticating);
        match msg {
            Message::Auth { password_hash, auth_token, .. } => {
                assert!(password_hash.is_some());
                assert!(auth_token.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn begin_auth_reuses_stored_token() {
        let mut e = engine();
        e.client_state.save_credentials(&StoredCredentials {
            vault_salt: "salt".into(),
            key_raw_b64: base64_encode(&[0u8; 32]),
            auth_token: "tok123".into(),
        });
        let msg = e.begin_auth(None);
        match msg {
            Message::Auth { password_hash, auth_token, .. } => {
                assert!(password_hash.is_none());
                assert_eq!(auth_token.as_deref(), Some("tok123"));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_ok_derives_key_and_persists_credentials() {
        let mut e = engine();
        let t = transport();
        e.begin_auth(Some(Password::new("hunter2".into())));
        let events = e.on_message(
            Message::AuthOk {
                server_id: "srv1".into(),
                vault_salt: sync_core::crypto::new_vault_salt(),
                auth_token: "tok".into(),
            },
            &t,
            Strategy::Merge,
        );
        assert!(e.vault_key.is_some());
        assert!(e.client_state.stored_credentials().is_some());
        assert!(matches!(events[0], EngineEvent::StateChanged(EngineState::Syncing)));
    }

    #[tokio::test]
    async fn empty_sync_response_completes_batch_immediately() {
        let mut e = engine();
        let t = transport();
        e.begin_auth(Some(Password::new("hunter2".into())));
        e.on_message(
            Message::AuthOk {
                server_id: "srv1".into(),
                vault_salt: sync_core::crypto::new_vault_salt(),
                auth_token: "tok".into(),
            },
            &t,
            Strategy::Merge,
        );
        let events = e.on_message(
            Message::SyncResponse { entries: vec![], current_sequence: 0, full_sync: true },
            &t,
            Strategy::Merge,
        );
        assert_eq!(e.state(), EngineState::Idle);
        assert!(events.iter().any(|ev| matches!(ev, EngineEvent::StateChanged(EngineState::Idle))));
        assert_eq!(e.client_state.last_sequence(), 0);
    }

    #[tokio::test]
    async fn session_revoked_clears_credentials_and_key() {
        let mut e = engine();
        let t = transport();
        e.begin_auth(Some(Password::new("hunter2".into())));
        e.on_message(
            Message::AuthOk {
                server_id: "srv1".into(),
                vault_salt: sync_core::crypto::new_vault_salt(),
                auth_token: "tok".into(),
            },
            &t,
            Strategy::Merge,
        );
        assert!(e.vault_key.is_some());
        e.on_message(Message::AuthFail { reason: "Session revoked".into() }, &t, Strategy::Merge);
        assert!(e.vault_key.is_none());
        assert!(e.client_state.stored_credentials().is_none());
        assert_eq!(e.state(), EngineState::Error);
    }

    #[tokio::test]
    async fn download_metadata_decrypt_failure_frees_slot_and_preserves_fifo() {
        let mut e = engine();
        let t = transport();
        e.begin_auth(Some(Password::new("hunter2".into())));
        e.on_message(
            Message::AuthOk {
                server_id: "srv1".into(),
                vault_salt: sync_core::crypto::new_vault_salt(),
                auth_token: "tok".into(),
            },
            &t,
            Strategy::Merge,
        );
        let key = e.vault_key.clone().unwrap();
        e.downloads_inflight = 2;

        let events = e.on_message(
            Message::FileDownloadResponse {
                file_id: "bad".into(),
                encrypted_meta: "not valid base64!!".into(),
                mtime: 0,
                size: 0,
            },
            &t,
            Strategy::Merge,
        );
        assert!(matches!(events.as_slice(), [EngineEvent::DownloadFailed { .. }]));
        assert_eq!(e.downloads_inflight, 1, "failed metadata must free its concurrency slot immediately");

        // The server still sends this download's binary body unconditionally;
        // it must be discarded rather than paired with the next real header.
        let events = e.on_frame(Frame::Binary(vec![1, 2, 3]), &t, Strategy::Merge);
        assert!(events.is_empty());
        assert_eq!(e.downloads_inflight, 1);

        let good_path = "notes/a.md";
        let encrypted_meta = key.encrypt_meta(&serde_json::json!({ "path": good_path }));
        e.on_message(
            Message::FileDownloadResponse { file_id: "good".into(), encrypted_meta, mtime: 555, size: 5 },
            &t,
            Strategy::Merge,
        );
        let blob = key.encrypt_blob(b"hello");
        let events = e.on_frame(Frame::Binary(blob), &t, Strategy::Merge);
        assert!(events.iter().any(|ev| matches!(ev, EngineEvent::Downloaded { path } if path == good_path)));
        assert_eq!(e.downloads_inflight, 0);
        assert_eq!(e.fs.read(good_path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn local_change_queues_while_not_idle() {
        let mut e = engine();
        let t = transport();
        assert_eq!(e.state(), EngineState::Disconnected);
        let events = e.on_local_change(
            FileChange { kind: ChangeKind::Modify, path: "a.md".into(), old_path: None },
            &t,
        );
        assert!(matches!(events[0], EngineEvent::ChangeQueued { .. }));
        assert!(!e.offline_queue.is_empty());
    }

    #[tokio::test]
    async fn on_disconnect_drops_in_flight_batch_state() {
        let mut e = engine();
        e.upload_queue.push_back("a.md".into());
        e.delete_queue.push_back("b.md".into());
        e.download_queue.push_back("file-1".into());
        e.downloads_inflight = 2;
        e.uploads_deletes_inflight = 1;
        e.pending_sequence = Some(42);
        e.pending_downloads.push_header(PendingDownload {
            file_id: "file-1".into(),
            path: "notes/a.md".into(),
            mtime: 0,
        });

        let event = e.on_disconnect();

        assert!(e.upload_queue.is_empty());
        assert!(e.delete_queue.is_empty());
        assert!(e.download_queue.is_empty());
        assert_eq!(e.downloads_inflight, 0);
        assert_eq!(e.uploads_deletes_inflight, 0);
        assert!(e.pending_sequence.is_none(), "an incomplete batch's sequence must not be committed");
        assert!(!e.pending_downloads.has_pending());
        assert_eq!(e.state(), EngineState::Connecting);
        assert!(matches!(event, EngineEvent::StateChanged(EngineState::Connecting)));
    }
}
