//! Durable per-device state (§6 persisted state): a single JSON file held
//! under the vault's own plugin directory, so the exclusion rules that
//! already carve that directory out of every sync also keep this file
//! off the wire.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sync_engine::{ClientState, StoredCredentials};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub client_id: String,
    pub device_name: String,
    pub server_url: String,
    pub auth_token: Option<String>,
    pub encryption_key_b64: Option<String>,
    pub vault_salt: Option<String>,
    pub server_id: Option<String>,
    pub last_sequence: u64,
    pub setup_complete: bool,
    pub sync_workspace: bool,
    pub sync_plugins: bool,
    pub sync_settings: bool,
    pub sync_all_file_types: bool,
    pub exclude_patterns: Vec<String>,
}

impl PersistedState {
    fn fresh(client_id: String, device_name: String, server_url: String) -> Self {
        Self {
            client_id,
            device_name,
            server_url,
            auth_token: None,
            encryption_key_b64: None,
            vault_salt: None,
            server_id: None,
            last_sequence: 0,
            setup_complete: true,
            sync_workspace: true,
            sync_plugins: true,
            sync_settings: true,
            sync_all_file_types: true,
            exclude_patterns: Vec::new(),
        }
    }
}

/// [`ClientState`] backed by a JSON file on disk, loaded once at startup
/// and rewritten on every mutation.
pub struct FileClientState {
    path: PathBuf,
    inner: Mutex<PersistedState>,
}

impl FileClientState {
    /// Load `path` if it exists; otherwise seed fresh state for a new
    /// device and write it immediately.
    pub fn load_or_init(path: PathBuf, device_name: &str, server_url: &str) -> anyhow::Result<Self> {
        let state = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            PersistedState::fresh(sync_core::ids::new_client_id(), device_name.to_string(), server_url.to_string())
        };
        let client = Self { path, inner: Mutex::new(state) };
        client.persist();
        Ok(client)
    }

    pub fn client_id(&self) -> String {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).client_id.clone()
    }

    pub fn device_name(&self) -> String {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).device_name.clone()
    }

    pub fn server_url(&self) -> String {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).server_url.clone()
    }

    pub fn exclusion_config(&self) -> vault_watch::ExclusionConfig {
        let s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        vault_watch::ExclusionConfig {
            config_dir: ".obsidian".to_string(),
            own_plugin_dir: "plugins/advanced-sync".to_string(),
            sync_workspace: s.sync_workspace,
            sync_plugins: s.sync_plugins,
            sync_settings: s.sync_settings,
            sync_all_file_types: s.sync_all_file_types,
            exclude_globs: s.exclude_patterns.clone(),
        }
    }

    fn persist(&self) {
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                tracing::error!(%err, path = %self.path.display(), "failed to create state directory");
                return;
            }
        }
        match serde_json::to_vec_pretty(&*state) {
            Ok(bytes) => {
                if let Err(err) = fs::write(&self.path, bytes) {
                    tracing::error!(%err, path = %self.path.display(), "failed to persist client state");
                }
            }
            Err(err) => tracing::error!(%err, "failed to serialize client state"),
        }
    }
}

impl ClientState for FileClientState {
    fn last_sequence(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).last_sequence
    }

    fn set_last_sequence(&self, seq: u64) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).last_sequence = seq;
        self.persist();
    }

    fn stored_credentials(&self) -> Option<StoredCredentials> {
        let s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (vault_salt, key_raw_b64, auth_token) =
            (s.vault_salt.clone()?, s.encryption_key_b64.clone()?, s.auth_token.clone()?);
        Some(StoredCredentials { vault_salt, key_raw_b64, auth_token })
    }

    fn save_credentials(&self, creds: &StoredCredentials) {
        {
            let mut s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            s.vault_salt = Some(creds.vault_salt.clone());
            s.encryption_key_b64 = Some(creds.key_raw_b64.clone());
            s.auth_token = Some(creds.auth_token.clone());
        }
        self.persist();
    }

    fn clear_credentials(&self) {
        {
            let mut s = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            s.auth_token = None;
            s.encryption_key_b64 = None;
            s.vault_salt = None;
        }
        self.persist();
    }
}

/// Default state-file location: inside the vault's own plugin directory,
/// which the exclusion rules always keep out of the sync stream.
#[must_use]
pub fn default_state_path(vault_root: &Path) -> PathBuf {
    vault_root.join(".obsidian").join("plugins").join("advanced-sync").join("state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_is_seeded_and_persisted_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let client = FileClientState::load_or_init(path.clone(), "laptop", "ws://localhost:9000").unwrap();
        assert!(path.exists());
        assert_eq!(client.device_name(), "laptop");
        assert_eq!(client.last_sequence(), 0);
        assert!(client.stored_credentials().is_none());
    }

    #[test]
    fn reload_recovers_the_same_client_id_and_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let first = FileClientState::load_or_init(path.clone(), "laptop", "ws://localhost:9000").unwrap();
        let id = first.client_id();
        first.set_last_sequence(42);
        drop(first);

        let second = FileClientState::load_or_init(path, "laptop", "ws://localhost:9000").unwrap();
        assert_eq!(second.client_id(), id);
        assert_eq!(second.last_sequence(), 42);
    }

    #[test]
    fn save_then_clear_credentials_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let client = FileClientState::load_or_init(path.clone(), "laptop", "ws://localhost:9000").unwrap();
        client.save_credentials(&StoredCredentials {
            vault_salt: "c2FsdA==".into(),
            key_raw_b64: "a2V5".into(),
            auth_token: "tok123".into(),
        });
        assert!(client.stored_credentials().is_some());

        let reloaded = FileClientState::load_or_init(path, "laptop", "ws://localhost:9000").unwrap();
        let creds = reloaded.stored_credentials().unwrap();
        assert_eq!(creds.auth_token, "tok123");

        reloaded.clear_credentials();
        assert!(reloaded.stored_credentials().is_none());
    }

    #[test]
    fn default_state_path_lives_under_the_sync_plugins_own_directory() {
        let root = Path::new("/vault");
        let path = default_state_path(root);
        assert_eq!(path, root.join(".obsidian/plugins/advanced-sync/state.json"));
    }
}
