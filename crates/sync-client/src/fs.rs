//! [`VaultFs`] against real disk I/O, plus the adapter-poll snapshot
//! builder driving [`sync_engine::Engine::poll_adapter`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sync_engine::{EngineError, LocalFile, VaultFs};

/// A vault rooted at a directory on disk.
pub struct RealFs {
    root: PathBuf,
}

impl RealFs {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl VaultFs for RealFs {
    fn list_files(&self) -> Result<Vec<LocalFile>, EngineError> {
        let mut out = Vec::new();
        walk(&self.root, &self.root, &mut out)?;
        Ok(out)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, EngineError> {
        std::fs::read(self.absolute(path)).map_err(|err| EngineError::Fs(err.to_string()))
    }

    fn write(&self, path: &str, contents: &[u8]) -> Result<i64, EngineError> {
        let full = self.absolute(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(|err| EngineError::Fs(err.to_string()))?;
        }
        std::fs::write(&full, contents).map_err(|err| EngineError::Fs(err.to_string()))?;
        mtime_ms(&full)
    }

    fn remove(&self, path: &str) -> Result<(), EngineError> {
        match std::fs::remove_file(self.absolute(path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EngineError::Fs(err.to_string())),
        }
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<LocalFile>) -> Result<(), EngineError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(EngineError::Fs(err.to_string())),
    };
    for entry in entries {
        let entry = entry.map_err(|err| EngineError::Fs(err.to_string()))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|err| EngineError::Fs(err.to_string()))?;
        if file_type.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else { continue };
        let Some(rel_str) = rel.to_str() else { continue };
        let size = entry.metadata().map_err(|err| EngineError::Fs(err.to_string()))?.len();
        let mtime = mtime_ms(&path)?;
        out.push(LocalFile { path: rel_str.replace('\\', "/"), mtime, size });
    }
    Ok(())
}

fn mtime_ms(path: &Path) -> Result<i64, EngineError> {
    let meta = std::fs::metadata(path).map_err(|err| EngineError::Fs(err.to_string()))?;
    let modified = meta.modified().map_err(|err| EngineError::Fs(err.to_string()))?;
    let ms = modified.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
    Ok(ms)
}

/// Snapshot every file's mtime under `root`, for the periodic adapter-poll
/// tick. This binary has no native editor event bus to subscribe to, so
/// polling the whole vault tree on every tick is this adapter's only
/// change-detection source, not just a fallback for a config subtree.
pub fn snapshot(root: &Path) -> HashMap<String, i64> {
    let mut files = Vec::new();
    if walk(root, root, &mut files).is_err() {
        return HashMap::new();
    }
    files.into_iter().map(|f| (f.path, f.mtime)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips_and_reports_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new(dir.path().to_path_buf());
        let written_mtime = fs.write("notes/a.md", b"hello").unwrap();
        assert!(written_mtime > 0);
        assert_eq!(fs.read("notes/a.md").unwrap(), b"hello");
    }

    #[test]
    fn remove_is_idempotent_for_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new(dir.path().to_path_buf());
        assert!(fs.remove("never-existed.md").is_ok());
    }

    #[test]
    fn list_files_walks_nested_directories_with_forward_slash_paths() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new(dir.path().to_path_buf());
        fs.write("a.md", b"x").unwrap();
        fs.write("sub/b.md", b"yy").unwrap();
        let mut files = fs.list_files().unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.md");
        assert_eq!(files[1].path, "sub/b.md");
        assert_eq!(files[1].size, 2);
    }

    #[test]
    fn snapshot_matches_list_files_mtimes() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFs::new(dir.path().to_path_buf());
        fs.write("a.md", b"x").unwrap();
        let snap = snapshot(dir.path());
        assert_eq!(snap.len(), 1);
        assert!(snap.contains_key("a.md"));
    }
}
