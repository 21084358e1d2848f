//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use memento_core::error::MementoError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// The queue, dead-letter sink, stored decisions and profile cache all share
/// one database file. rusqlite's Connection is not Sync, hence the Mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, and runs all pending
    /// migrations.
    pub fn new(path: &Path) -> Result<Self, MementoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| MementoError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA cache_size = -16384;",
        )
        .map_err(|e| MementoError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, MementoError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MementoError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure, so multi-statement
    /// work inside one closure is serialized against every other caller.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, MementoError>
    where
        F: FnOnce(&Connection) -> Result<T, MementoError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MementoError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error into the storage variant with some context.
pub(crate) fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> MementoError {
    move |e| MementoError::Storage(format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .map_err(|e| MementoError::Storage(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(table_count(&db, "event_queue"), 0);
        assert_eq!(table_count(&db, "stored_decisions"), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memento.db");
        let db = Database::new(&path).unwrap();
        assert_eq!(table_count(&db, "dead_letters"), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        let mode: String = db
            .with_conn(|conn| {
                conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
                    .map_err(|e| MementoError::Storage(e.to_string()))
            })
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memento.db");
        {
            let db = Database::new(&path).unwrap();
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO profile_cache (scope, profile_version, built_at, body)
                     VALUES ('default', 1, 0, '{}')",
                    [],
                )
                .map_err(|e| MementoError::Storage(e.to_string()))?;
                Ok(())
            })
            .unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(table_count(&db, "profile_cache"), 1);
    }
}
