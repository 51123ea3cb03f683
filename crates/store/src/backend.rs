//! Durable storage of permission flags.
//!
//! # Schema
//!
//! One table, `uid_flags`, with columns `uid INTEGER PRIMARY KEY` and
//! `flags INTEGER NOT NULL`. Flags are stored as their unsigned value; rows
//! written by older builds as signed 32-bit integers read back unchanged.

use capbridge_core::{Error, PermissionEntry, Result, Uid, UID_TABLE};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Durable identity to flags table.
///
/// Writes are best effort from the caller's point of view: the store logs a
/// failed write and keeps its in-memory view authoritative.
pub trait PermissionBackend: Send + Sync {
    /// Every stored row.
    fn read_all(&self) -> Result<Vec<PermissionEntry>>;

    /// Set `flags` for `uid`, inserting the row when missing.
    fn upsert(&self, uid: Uid, flags: u32) -> Result<()>;

    /// Delete the row for `uid`, if any.
    fn delete(&self, uid: Uid) -> Result<()>;
}

/// SQLite implementation of [`PermissionBackend`].
///
/// The connection is opened on first use. A database that cannot be opened or
/// initialized is deleted and re-created once; if that also fails the backend
/// stays unavailable for the lifetime of the value: reads return
/// [`Error::StorageUnavailable`] and writes are dropped.
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    connection: OnceCell<Option<Mutex<Connection>>>,
}

fn sql_error(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Error {
    move |e| Error::storage(operation, e.to_string())
}

fn flags_from_column(raw: i64) -> u32 {
    (raw as u64 & u64::from(u32::MAX)) as u32
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            connection: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the database if that has not been attempted yet.
    pub fn is_available(&self) -> bool {
        self.connection().is_some()
    }

    fn connection(&self) -> Option<&Mutex<Connection>> {
        self.connection
            .get_or_init(|| open_with_recovery(&self.path).map(Mutex::new))
            .as_ref()
    }
}

fn open_with_recovery(path: &Path) -> Option<Connection> {
    match open(path) {
        Ok(connection) => Some(connection),
        Err(e) => {
            error!(path = %path.display(), "failed to open permission database: {e}");
            if path.exists() && fs::remove_file(path).is_ok() {
                info!(path = %path.display(), "deleted permission database, retrying");
                match open(path) {
                    Ok(connection) => Some(connection),
                    Err(e) => {
                        error!(path = %path.display(), "permission database unavailable: {e}");
                        None
                    }
                }
            } else {
                None
            }
        }
    }
}

fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::file_system(parent, "create directory", e))?;
    }
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(sql_error("open"))?;
    connection
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .map_err(sql_error("set journal mode"))?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .map_err(sql_error("set synchronous mode"))?;
    connection
        .execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {UID_TABLE}(uid INTEGER PRIMARY KEY, flags INTEGER NOT NULL);"
        ))
        .map_err(sql_error("create schema"))?;
    debug!(path = %path.display(), "permission database opened");
    Ok(connection)
}

impl PermissionBackend for SqliteBackend {
    fn read_all(&self) -> Result<Vec<PermissionEntry>> {
        let Some(connection) = self.connection() else {
            return Err(Error::storage_unavailable(&self.path));
        };
        let connection = connection.lock();
        let mut statement = connection
            .prepare(&format!("SELECT uid, flags FROM {UID_TABLE} ORDER BY uid"))
            .map_err(sql_error("read"))?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
            .map_err(sql_error("read"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_error("read"))?;

        let mut entries = Vec::with_capacity(rows.len());
        for (uid, flags) in rows {
            match i32::try_from(uid) {
                Ok(uid) => entries.push(PermissionEntry::new(Uid(uid), flags_from_column(flags))),
                Err(_) => warn!(uid, "skipping row with out-of-range uid"),
            }
        }
        Ok(entries)
    }

    fn upsert(&self, uid: Uid, flags: u32) -> Result<()> {
        let Some(connection) = self.connection() else {
            return Ok(());
        };
        let connection = connection.lock();
        let updated = connection
            .execute(
                &format!("UPDATE {UID_TABLE} SET flags = ?2 WHERE uid = ?1"),
                params![uid.as_raw(), i64::from(flags)],
            )
            .map_err(sql_error("update"))?;
        if updated == 0 {
            // Insert-or-ignore: a concurrent writer that got there first keeps its value.
            connection
                .execute(
                    &format!("INSERT OR IGNORE INTO {UID_TABLE}(uid, flags) VALUES (?1, ?2)"),
                    params![uid.as_raw(), i64::from(flags)],
                )
                .map_err(sql_error("insert"))?;
        }
        Ok(())
    }

    fn delete(&self, uid: Uid) -> Result<()> {
        let Some(connection) = self.connection() else {
            return Ok(());
        };
        connection
            .lock()
            .execute(
                &format!("DELETE FROM {UID_TABLE} WHERE uid = ?1"),
                params![uid.as_raw()],
            )
            .map_err(sql_error("delete"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend_in(dir: &TempDir) -> SqliteBackend {
        SqliteBackend::new(dir.path().join("nested").join("bridge.db"))
    }

    #[test]
    fn test_lazy_open_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let backend = backend_in(&dir);
        assert!(!backend.path().exists());

        assert!(backend.read_all().unwrap().is_empty());
        assert!(backend.path().exists());
    }

    #[test]
    fn test_upsert_inserts_then_updates() {
        let dir = TempDir::new().unwrap();
        let backend = backend_in(&dir);

        backend.upsert(Uid(10_001), 0x2).unwrap();
        backend.upsert(Uid(10_001), 0x6).unwrap();
        backend.upsert(Uid::DEFAULT, 0x2).unwrap();

        let entries = backend.read_all().unwrap();
        assert_eq!(
            entries,
            vec![
                PermissionEntry::new(Uid::DEFAULT, 0x2),
                PermissionEntry::new(Uid(10_001), 0x6),
            ]
        );
    }

    #[test]
    fn test_full_width_flags_survive() {
        let dir = TempDir::new().unwrap();
        let backend = backend_in(&dir);
        backend.upsert(Uid::GLOBAL, u32::MAX).unwrap();
        assert_eq!(backend.read_all().unwrap()[0].flags, u32::MAX);
    }

    #[test]
    fn test_legacy_signed_rows_read_as_unsigned() {
        let dir = TempDir::new().unwrap();
        let backend = backend_in(&dir);
        backend.read_all().unwrap();
        {
            let connection = backend.connection().unwrap().lock();
            connection
                .execute(
                    &format!("INSERT INTO {UID_TABLE}(uid, flags) VALUES (?1, ?2)"),
                    params![-2, -1i64],
                )
                .unwrap();
        }
        assert_eq!(
            backend.read_all().unwrap(),
            vec![PermissionEntry::new(Uid::GLOBAL, u32::MAX)]
        );
    }

    #[test]
    fn test_delete_removes_row() {
        let dir = TempDir::new().unwrap();
        let backend = backend_in(&dir);
        backend.upsert(Uid(10_002), 0x4).unwrap();
        backend.delete(Uid(10_002)).unwrap();
        backend.delete(Uid(10_003)).unwrap();
        assert!(backend.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bridge.db");
        fs::write(&path, b"this is definitely not an sqlite database, just some junk bytes")
            .unwrap();

        let backend = SqliteBackend::new(&path);
        assert!(backend.read_all().unwrap().is_empty());
        backend.upsert(Uid(10_005), 0x2).unwrap();
        assert_eq!(backend.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_unrecoverable_backend_degrades_to_noop() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file where a directory should be").unwrap();

        let backend = SqliteBackend::new(blocker.join("bridge.db"));
        assert!(!backend.is_available());
        assert!(matches!(
            backend.read_all(),
            Err(Error::StorageUnavailable { .. })
        ));
        backend.upsert(Uid(10_001), 0x2).unwrap();
        backend.delete(Uid(10_001)).unwrap();
    }
}
