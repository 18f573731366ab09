//! Local vault access and manifest construction. [`VaultFs`] is the seam
//! between the engine's pure reconciliation logic and actual disk I/O, so
//! the reconciliation strategies can be exercised without touching a real
//! filesystem.

use std::collections::HashMap;

use sync_core::crypto::VaultKey;
use vault_watch::ExclusionRules;

use crate::error::EngineError;

/// One locally observed file, as seen by [`VaultFs::list_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Vault-relative path, forward-slash separated.
    pub path: String,
    /// Last modification time, milliseconds since epoch.
    pub mtime: i64,
    /// Plaintext byte length.
    pub size: u64,
}

/// A manifest entry: a local file paired with its derived file-ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Vault-relative path.
    pub path: String,
    /// Last modification time, milliseconds since epoch.
    pub mtime: i64,
    /// Plaintext byte length.
    pub size: u64,
}

/// Access to the vault's files and the editor's configuration subtree.
/// Implemented against real disk I/O by the client binary; implemented
/// against an in-memory map in tests.
pub trait VaultFs {
    /// Enumerate every regular file under the vault root and the editor's
    /// configuration subtree (the adapter interface in §4.8), unfiltered —
    /// the caller applies exclusion rules.
    fn list_files(&self) -> Result<Vec<LocalFile>, EngineError>;

    /// Read a file's full plaintext contents.
    fn read(&self, path: &str) -> Result<Vec<u8>, EngineError>;

    /// Write `contents` to `path`, creating parent directories as needed.
    /// Returns the resulting mtime so the caller can seed writeback
    /// suppression and the adapter poller.
    fn write(&self, path: &str, contents: &[u8]) -> Result<i64, EngineError>;

    /// Remove `path` if present. Not an error if already absent.
    fn remove(&self, path: &str) -> Result<(), EngineError>;
}

/// Build the manifest: derive each in-scope local file's file-ID under
/// `key`, keyed by that ID. Exclusion rules gate inclusion exactly as the
/// watcher does, so the two never disagree about what's in scope.
pub fn build_manifest(
    fs: &dyn VaultFs,
    key: &VaultKey,
    exclusion: &ExclusionRules,
) -> Result<HashMap<String, LocalEntry>, EngineError> {
    let mut manifest = HashMap::new();
    for file in fs.list_files()? {
        if exclusion.is_excluded(&file.path) {
            continue;
        }
        let file_id = key.derive_file_id(&file.path);
        manifest.insert(
            file_id,
            LocalEntry { path: file.path, mtime: file.mtime, size: file.size },
        );
    }
    Ok(manifest)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{EngineError, LocalFile, VaultFs};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct InMemoryFs {
        pub files: RefCell<HashMap<String, (i64, Vec<u8>)>>,
    }

    impl InMemoryFs {
        pub fn put(&self, path: &str, mtime: i64, contents: &[u8]) {
            self.files.borrow_mut().insert(path.to_string(), (mtime, contents.to_vec()));
        }
    }

    impl VaultFs for InMemoryFs {
        fn list_files(&self) -> Result<Vec<LocalFile>, EngineError> {
            Ok(self
                .files
                .borrow()
                .iter()
                .map(|(path, (mtime, contents))| LocalFile {
                    path: path.clone(),
                    mtime: *mtime,
                    size: contents.len() as u64,
                })
                .collect())
        }

        fn read(&self, path: &str) -> Result<Vec<u8>, EngineError> {
            self.files
                .borrow()
                .get(path)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| EngineError::Fs(format!("no such file: {path}")))
        }

        fn write(&self, path: &str, contents: &[u8]) -> Result<i64, EngineError> {
            let mtime = self.files.borrow().get(path).map_or(1, |(m, _)| m + 1);
            self.files.borrow_mut().insert(path.to_string(), (mtime, contents.to_vec()));
            Ok(mtime)
        }

        fn remove(&self, path: &str) -> Result<(), EngineError> {
            self.files.borrow_mut().remove(path);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::InMemoryFs;
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

    #[test]
    fn manifest_excludes_own_plugin_dir() {
        let fs = InMemoryFs::default();
        fs.put("notes/a.md", 100, b"hi");
        fs.put(".obsidian/plugins/advanced-sync/data.json", 100, b"{}");
        let manifest = build_manifest(&fs, &key(), &rules()).unwrap();
        assert_eq!(manifest.len(), 1);
        let entry = manifest.values().next().unwrap();
        assert_eq!(entry.path, "notes/a.md");
    }

    #[test]
    fn manifest_keys_match_derived_file_id() {
        let fs = InMemoryFs::default();
        fs.put("notes/a.md", 100, b"hi");
        let k = key();
        let manifest = build_manifest(&fs, &k, &rules()).unwrap();
        let expected_id = k.derive_file_id("notes/a.md");
        assert!(manifest.contains_key(&expected_id));
    }
}
