//! Manifest reconciliation: turns a `SYNC_RESPONSE` plus the local
//! manifest into three disjoint action sets (§4.7). Pure and synchronous —
//! no I/O, no transport — so it can be exercised and previewed (dry-run)
//! without side effects.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sync_core::crypto::VaultKey;
use sync_core::wire::ChangeEntry;
use vault_watch::ExclusionRules;

use crate::local::LocalEntry;

/// How the client wants the engine to reconcile a full manifest response.
/// `Merge` is the default for an already-set-up device; `Pull`/`Push` are
/// the first-sync choices offered to a brand new device; `ForcePull` is
/// the server-initiated full resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Admin-forced full resync: local state is discarded in favor of the server's.
    ForcePull,
    /// New device, "overwrite local with remote".
    Pull,
    /// New device, "overwrite remote with local".
    Push,
    /// Default: per-file last-writer-wins, with config-subtree special-casing.
    Merge,
}

/// One file to download, carrying the decrypted path so a preview can
/// display it and so the download pipeline knows where to write the
/// result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedDownload {
    /// Opaque file identifier.
    pub file_id: String,
    /// Decrypted vault-relative path.
    pub path: String,
    /// The server's mtime for this entry, to apply after writing.
    pub mtime: i64,
}

/// The three disjoint action sets produced by reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Files to fetch from the server, in file-ID-ascending dispatch order.
    pub downloads: Vec<PlannedDownload>,
    /// Local paths to upload.
    pub uploads: Vec<String>,
    /// File-IDs to ask the server to delete (present locally as a
    /// tombstone, or intentionally removed by a push strategy).
    pub remote_deletes: Vec<String>,
    /// Local paths to delete outright (pull/force-pull: file-IDs the
    /// server no longer carries).
    pub local_deletes: Vec<String>,
}

/// Reconcile a **full** manifest response (`full_sync: true`) against the
/// local manifest, per `strategy`.
#[must_use]
pub fn reconcile_full(
    strategy: Strategy,
    local: &HashMap<String, LocalEntry>,
    server: &[ChangeEntry],
    key: &VaultKey,
    exclusion: &ExclusionRules,
) -> Plan {
    match strategy {
        Strategy::ForcePull | Strategy::Pull => reconcile_pull(local, server, key),
        Strategy::Push => reconcile_push(local, server),
        Strategy::Merge => reconcile_merge(local, server, key, exclusion),
    }
}

fn decrypt_path(entry: &ChangeEntry, key: &VaultKey) -> Option<String> {
    key.decrypt_meta(&entry.encrypted_meta)
        .ok()
        .and_then(|v| v.get("path").and_then(|p| p.as_str()).map(str::to_string))
}

fn reconcile_pull(
    local: &HashMap<String, LocalEntry>,
    server: &[ChangeEntry],
    key: &VaultKey,
) -> Plan {
    let mut plan = Plan::default();
    let server_ids: std::collections::HashSet<&str> =
        server.iter().filter(|e| !e.deleted).map(|e| e.file_id.as_str()).collect();

    for entry in server.iter().filter(|e| !e.deleted) {
        let Some(path) = decrypt_path(entry, key) else { continue };
        plan.downloads.push(PlannedDownload { file_id: entry.file_id.clone(), path, mtime: entry.mtime });
    }
    for (file_id, local_entry) in local {
        if !server_ids.contains(file_id.as_str()) {
            plan.local_deletes.push(local_entry.path.clone());
        }
    }
    plan
}

fn reconcile_push(local: &HashMap<String, LocalEntry>, server: &[ChangeEntry]) -> Plan {
    let mut plan = Plan::default();
    let local_ids: std::collections::HashSet<&str> = local.keys().map(String::as_str).collect();

    for (_, local_entry) in local {
        plan.uploads.push(local_entry.path.clone());
    }
    for entry in server.iter().filter(|e| !e.deleted) {
        if !local_ids.contains(entry.file_id.as_str()) {
            plan.remote_deletes.push(entry.file_id.clone());
        }
    }
    plan
}

fn reconcile_merge(
    local: &HashMap<String, LocalEntry>,
    server: &[ChangeEntry],
    key: &VaultKey,
    exclusion: &ExclusionRules,
) -> Plan {
    let mut plan = Plan::default();
    let server_by_id: HashMap<&str, &ChangeEntry> =
        server.iter().filter(|e| !e.deleted).map(|e| (e.file_id.as_str(), e)).collect();

    for (file_id, server_entry) in &server_by_id {
        match local.get(*file_id) {
            Some(local_entry) => {
                // Rule 1: on both sides.
                if exclusion.is_config_path(&local_entry.path) {
                    plan.downloads.push(PlannedDownload {
                        file_id: (*file_id).to_string(),
                        path: local_entry.path.clone(),
                        mtime: server_entry.mtime,
                    });
                } else if server_entry.mtime > local_entry.mtime {
                    let Some(path) = decrypt_path(server_entry, key) else { continue };
                    plan.downloads.push(PlannedDownload {
                        file_id: (*file_id).to_string(),
                        path,
                        mtime: server_entry.mtime,
                    });
                } else if local_entry.mtime > server_entry.mtime {
                    plan.uploads.push(local_entry.path.clone());
                }
                // Equal mtime: no-op.
            }
            None => {
                // Rule 2: server-only.
                let Some(path) = decrypt_path(server_entry, key) else { continue };
                let eligible = if exclusion.is_config_path(&path) {
                    !exclusion.is_excluded(&path)
                } else {
                    true
                };
                if eligible {
                    plan.downloads.push(PlannedDownload {
                        file_id: (*file_id).to_string(),
                        path,
                        mtime: server_entry.mtime,
                    });
                }
            }
        }
    }

    // Rule 3: local-only.
    for (file_id, local_entry) in local {
        if server_by_id.contains_key(file_id.as_str()) {
            continue;
        }
        if exclusion.is_config_path(&local_entry.path) {
            continue;
        }
        plan.uploads.push(local_entry.path.clone());
    }

    // `server_by_id` is a HashMap, so its iteration order above is
    // unspecified; restore the dispatch order `Plan::downloads` promises.
    plan.downloads.sort_by(|a, b| a.file_id.cmp(&b.file_id));

    plan
}

/// Reconcile an **incremental** (non-full) response: per entry, delete if
/// tombstoned, else queue for download when the server's copy is newer (or
/// locally absent). Ties go to the remote copy.
#[must_use]
pub fn reconcile_incremental(
    local: &HashMap<String, LocalEntry>,
    server: &[ChangeEntry],
    key: &VaultKey,
) -> Plan {
    let mut plan = Plan::default();
    let local_by_id: HashMap<&str, &LocalEntry> =
        local.iter().map(|(id, e)| (id.as_str(), e)).collect();

    for entry in server {
        if entry.deleted {
            if let Some(local_entry) = local_by_id.get(entry.file_id.as_str()) {
                plan.local_deletes.push(local_entry.path.clone());
            }
            continue;
        }
        let newer_or_absent = match local_by_id.get(entry.file_id.as_str()) {
            None => true,
            Some(local_entry) => entry.mtime >= local_entry.mtime,
        };
        if newer_or_absent {
            let Some(path) = decrypt_path(entry, key) else { continue };
            plan.downloads.push(PlannedDownload { file_id: entry.file_id.clone(), path, mtime: entry.mtime });
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_watch::ExclusionConfig;

    fn key() -> VaultKey {
        VaultKey::derive("hunter2", b"salt")
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

    fn entry(key: &VaultKey, path: &str, mtime: i64, deleted: bool) -> ChangeEntry {
        ChangeEntry {
            file_id: key.derive_file_id(path),
            encrypted_meta: key.encrypt_meta(&serde_json::json!({ "path": path })),
            mtime,
            size: 10,
            sequence: 1,
            deleted,
        }
    }

    #[test]
    fn merge_local_only_config_path_is_not_pushed() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(
            k.derive_file_id(".obsidian/app.json"),
            LocalEntry { path: ".obsidian/app.json".into(), mtime: 100, size: 2 },
        );
        let plan = reconcile_merge(&local, &[], &k, &rules());
        assert!(plan.uploads.is_empty());
    }

    #[test]
    fn merge_both_sides_config_path_always_downloads() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(
            k.derive_file_id(".obsidian/app.json"),
            LocalEntry { path: ".obsidian/app.json".into(), mtime: 9_999_999, size: 2 },
        );
        let server = vec![entry(&k, ".obsidian/app.json", 1, false)];
        let plan = reconcile_merge(&local, &server, &k, &rules());
        assert_eq!(plan.downloads.len(), 1);
        assert!(plan.uploads.is_empty());
    }

    #[test]
    fn merge_both_sides_newer_local_uploads() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(k.derive_file_id("a.md"), LocalEntry { path: "a.md".into(), mtime: 200, size: 2 });
        let server = vec![entry(&k, "a.md", 100, false)];
        let plan = reconcile_merge(&local, &server, &k, &rules());
        assert_eq!(plan.uploads, vec!["a.md".to_string()]);
        assert!(plan.downloads.is_empty());
    }

    #[test]
    fn merge_equal_mtime_is_noop() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(k.derive_file_id("a.md"), LocalEntry { path: "a.md".into(), mtime: 100, size: 2 });
        let server = vec![entry(&k, "a.md", 100, false)];
        let plan = reconcile_merge(&local, &server, &k, &rules());
        assert!(plan.uploads.is_empty());
        assert!(plan.downloads.is_empty());
    }

    #[test]
    fn incremental_tie_goes_to_remote() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(k.derive_file_id("a.md"), LocalEntry { path: "a.md".into(), mtime: 100, size: 2 });
        let server = vec![entry(&k, "a.md", 100, false)];
        let plan = reconcile_incremental(&local, &server, &k);
        assert_eq!(plan.downloads.len(), 1);
    }

    #[test]
    fn incremental_tombstone_deletes_local() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(k.derive_file_id("a.md"), LocalEntry { path: "a.md".into(), mtime: 100, size: 2 });
        let server = vec![entry(&k, "a.md", 200, true)];
        let plan = reconcile_incremental(&local, &server, &k);
        assert_eq!(plan.local_deletes, vec!["a.md".to_string()]);
    }

    #[test]
    fn pull_downloads_everything_and_deletes_local_only() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(k.derive_file_id("stale.md"), LocalEntry { path: "stale.md".into(), mtime: 1, size: 1 });
        let server = vec![entry(&k, "a.md", 100, false)];
        let plan = reconcile_full(Strategy::Pull, &local, &server, &k, &rules());
        assert_eq!(plan.downloads.len(), 1);
        assert_eq!(plan.local_deletes, vec!["stale.md".to_string()]);
    }

    #[test]
    fn push_uploads_everything_and_deletes_remote_only() {
        let k = key();
        let mut local = HashMap::new();
        local.insert(k.derive_file_id("mine.md"), LocalEntry { path: "mine.md".into(), mtime: 1, size: 1 });
        let server = vec![entry(&k, "theirs.md", 100, false)];
        let plan = reconcile_full(Strategy::Push, &local, &server, &k, &rules());
        assert_eq!(plan.uploads, vec!["mine.md".to_string()]);
        assert_eq!(plan.remote_deletes, vec![k.derive_file_id("theirs.md")]);
    }
}
