//! The change-log store: `{fileId -> (metadata, blob, sequence, tombstone)}`
//! with a strictly increasing sequence allocated once per mutation, plus
//! the vault-metadata, client-session, and token tables that ride along
//! with it on the same connection.
//!
//! A single [`rusqlite::Connection`] behind a [`Mutex`] gives a serialized
//! writer with consistent reads, which is the discipline this store needs:
//! sequence allocation and the record write happen in one transaction, and
//! every other table is small enough that lock contention is not a concern.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use sync_core::wire::ChangeEntry;

use crate::blob::BlobDir;
use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    file_id        TEXT PRIMARY KEY,
    encrypted_meta TEXT NOT NULL,
    mtime          INTEGER NOT NULL,
    size           INTEGER NOT NULL,
    deleted        INTEGER NOT NULL DEFAULT 0,
    sequence       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_files_sequence ON files(sequence);

CREATE TABLE IF NOT EXISTS seq_counter (
    id    INTEGER PRIMARY KEY CHECK (id = 0),
    value INTEGER NOT NULL
);
INSERT OR IGNORE INTO seq_counter (id, value) VALUES (0, 0);

CREATE TABLE IF NOT EXISTS vault_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS client_sessions (
    client_id   TEXT PRIMARY KEY,
    device_name TEXT NOT NULL,
    first_seen  INTEGER NOT NULL,
    last_seen   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tokens (
    token       TEXT PRIMARY KEY,
    client_id   TEXT NOT NULL,
    device_name TEXT NOT NULL,
    ip          TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    last_used   INTEGER NOT NULL
);
"#;

/// Well-known keys in the `vault_meta` table.
pub mod meta_key {
    /// Base64-encoded vault salt, generated once on first init.
    pub const VAULT_SALT: &str = "vault_salt";
    /// SHA-256 hex digest of the vault password.
    pub const PASSWORD_HASH: &str = "password_hash";
    /// Server's persistent random identifier.
    pub const SERVER_ID: &str = "server_id";
}

/// The server's durable state: change-log, blob directory, and the small
/// auxiliary tables that ride along with it.
pub struct Store {
    conn: Mutex<Connection>,
    blobs: BlobDir,
}

impl Store {
    /// Open (creating if needed) a store rooted at `data_dir`: a SQLite
    /// database at `data_dir/changelog.sqlite3` and a blob directory at
    /// `data_dir/blobs`.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let conn = Connection::open(data_dir.join("changelog.sqlite3"))?;
        conn.execute_batch(SCHEMA)?;
        let blobs = BlobDir::open(data_dir.join("blobs"))?;
        Ok(Self { conn: Mutex::new(conn), blobs })
    }

    /// Open an in-memory store, for tests.
    pub fn open_in_memory(blob_root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        let blobs = BlobDir::open(blob_root)?;
        Ok(Self { conn: Mutex::new(conn), blobs })
    }

    fn allocate_sequence(tx: &rusqlite::Transaction<'_>) -> Result<u64, StoreError> {
        tx.execute("UPDATE seq_counter SET value = value + 1 WHERE id = 0", [])?;
        let value: i64 = tx.query_row("SELECT value FROM seq_counter WHERE id = 0", [], |r| r.get(0))?;
        Ok(value as u64)
    }

    /// Upsert a live record for `file_id` with a freshly allocated
    /// sequence, and write its blob. Sequence allocation and the record
    /// write are one transaction; the blob write happens after (a crash
    /// between the two leaves a record with a missing blob, which a
    /// client will simply fail to download and can re-upload).
    pub fn put_file(
        &self,
        file_id: &str,
        encrypted_meta: &str,
        mtime: i64,
        size: u64,
        blob_bytes: &[u8],
    ) -> Result<u64, StoreError> {
        let sequence = {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let sequence = Self::allocate_sequence(&tx)?;
            tx.execute(
                "INSERT INTO files (file_id, encrypted_meta, mtime, size, deleted, sequence)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)
                 ON CONFLICT(file_id) DO UPDATE SET
                     encrypted_meta = excluded.encrypted_meta,
                     mtime = excluded.mtime,
                     size = excluded.size,
                     deleted = 0,
                     sequence = excluded.sequence",
                params![file_id, encrypted_meta, mtime, size as i64, sequence as i64],
            )?;
            tx.commit()?;
            sequence
        };
        self.blobs.put(file_id, blob_bytes)?;
        Ok(sequence)
    }

    /// Tombstone `file_id`: allocate a fresh sequence, mark deleted, and
    /// unlink its blob (missing-blob errors are ignored — already gone
    /// is the goal state).
    pub fn delete_file(&self, file_id: &str) -> Result<u64, StoreError> {
        let sequence = {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let sequence = Self::allocate_sequence(&tx)?;
            tx.execute(
                "INSERT INTO files (file_id, encrypted_meta, mtime, size, deleted, sequence)
                 VALUES (?1, '', 0, 0, 1, ?2)
                 ON CONFLICT(file_id) DO UPDATE SET deleted = 1, sequence = excluded.sequence",
                params![file_id, sequence as i64],
            )?;
            tx.commit()?;
            sequence
        };
        self.blobs.remove(file_id);
        Ok(sequence)
    }

    /// Fetch the current record for `file_id`, live or tombstoned.
    /// Returns `None` if the file-ID has never been seen.
    pub fn get_file_meta(&self, file_id: &str) -> Result<Option<ChangeEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT file_id, encrypted_meta, mtime, size, sequence, deleted FROM files WHERE file_id = ?1",
            params![file_id],
            row_to_entry,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Read the blob for `file_id`. Errors with [`StoreError::NotFound`]
    /// if the record is a tombstone or was never uploaded.
    pub fn get_blob(&self, file_id: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs.get(file_id)
    }

    /// The full live manifest (`!deleted`) and the current sequence at
    /// the moment it was read.
    pub fn get_manifest(&self) -> Result<(Vec<ChangeEntry>, u64), StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT file_id, encrypted_meta, mtime, size, sequence, deleted
             FROM files WHERE deleted = 0 ORDER BY sequence ASC",
        )?;
        let entries = stmt
            .query_map([], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        let sequence = Self::current_sequence_locked(&conn)?;
        Ok((entries, sequence))
    }

    /// Every record (live or tombstoned) mutated after `since`, ordered
    /// by sequence ascending.
    pub fn get_changes_since(&self, since: u64) -> Result<Vec<ChangeEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT file_id, encrypted_meta, mtime, size, sequence, deleted
             FROM files WHERE sequence > ?1 ORDER BY sequence ASC",
        )?;
        let entries = stmt
            .query_map(params![since as i64], row_to_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// The highest sequence allocated so far (0 if the vault is empty).
    pub fn get_current_sequence(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        Self::current_sequence_locked(&conn)
    }

    fn current_sequence_locked(conn: &Connection) -> Result<u64, StoreError> {
        let value: i64 = conn.query_row("SELECT value FROM seq_counter WHERE id = 0", [], |r| r.get(0))?;
        Ok(value as u64)
    }

    /// Read a `vault_meta` value by key.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM vault_meta WHERE key = ?1", params![key], |r| r.get(0))
            .optional()
            .map_err(StoreError::from)
    }

    /// Upsert a `vault_meta` value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO vault_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Record a client's session activity (device name, first/last seen).
    pub fn touch_client_session(&self, client_id: &str, device_name: &str, now_ms: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO client_sessions (client_id, device_name, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(client_id) DO UPDATE SET device_name = excluded.device_name, last_seen = excluded.last_seen",
            params![client_id, device_name, now_ms],
        )?;
        Ok(())
    }

    /// All client IDs with session history and their device names,
    /// ordered by first-seen (used for `CLIENT_LIST` and the dashboard).
    pub fn list_client_sessions(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT client_id, device_name FROM client_sessions ORDER BY first_seen ASC")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert a freshly issued token.
    pub fn insert_token(
        &self,
        token: &str,
        client_id: &str,
        device_name: &str,
        ip: &str,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tokens (token, client_id, device_name, ip, created_at, last_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![token, client_id, device_name, ip, now_ms],
        )?;
        Ok(())
    }

    /// Every stored token with its owning identity. `Auth::validate_token`
    /// scans the full set with a constant-time comparison rather than
    /// looking a single token up by index, so a client probing for valid
    /// tokens can't learn anything from query timing.
    pub fn all_tokens(&self) -> Result<Vec<(String, String, String)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT token, client_id, device_name FROM tokens")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Bump `last_used` for a token already known to exist (e.g. found by
    /// [`Self::all_tokens`]'s constant-time scan). Looking it up again here
    /// by index is safe: the outcome was already decided by the scan, so
    /// this query's timing reveals nothing the scan didn't already commit to.
    pub fn touch_token(&self, token: &str, now_ms: i64) -> Result<Option<(String, String)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let identity: Option<(String, String)> = conn
            .query_row(
                "SELECT client_id, device_name FROM tokens WHERE token = ?1",
                params![token],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if identity.is_some() {
            conn.execute("UPDATE tokens SET last_used = ?2 WHERE token = ?1", params![token, now_ms])?;
        }
        Ok(identity)
    }

    /// Revoke every token belonging to `client_id` (kick, or password rotation).
    pub fn revoke_tokens_for_client(&self, client_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM tokens WHERE client_id = ?1", params![client_id])?;
        Ok(n)
    }

    /// Full server reset: truncate every table, clear the blob directory,
    /// and reinitialize the sequence counter. The caller is responsible
    /// for regenerating the on-disk `server-id` file alongside this.
    pub fn reset(&self) -> Result<(), StoreError> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch(
                "DELETE FROM files;
                 DELETE FROM vault_meta;
                 DELETE FROM client_sessions;
                 DELETE FROM tokens;
                 UPDATE seq_counter SET value = 0 WHERE id = 0;",
            )?;
        }
        self.blobs.clear()?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChangeEntry> {
    Ok(ChangeEntry {
        file_id: row.get(0)?,
        encrypted_meta: row.get(1)?,
        mtime: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        sequence: row.get::<_, i64>(4)? as u64,
        deleted: row.get::<_, i64>(5)? != 0,
    })
}
