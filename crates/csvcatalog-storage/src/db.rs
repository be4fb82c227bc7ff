//! Database connection management.
//!
//! Wraps the single rusqlite Connection of an open store. Every engine
//! operation runs through [`Database::with_conn`], sequentially.

use std::path::Path;
use std::sync::{Arc, Mutex};

use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Statement};
use tracing::{debug, info};

use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::Row;

use crate::migrations;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Owner of the store's connection.
///
/// The connection lives in a Mutex since rusqlite Connection is not Sync;
/// `close` takes it out, after which every call fails with an engine error.
pub struct Database {
    conn: Mutex<Option<Connection>>,
}

impl Database {
    /// Open (or create) a store file at the given path.
    ///
    /// Registers the REGEXP function and initializes the metadata catalog.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        if path.is_dir() {
            return Err(CatalogError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Database path '{}' is a directory", path.display()),
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| CatalogError::Engine(format!("Failed to open database: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::init(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, CatalogError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CatalogError::Engine(format!("Failed to open in-memory db: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, CatalogError> {
        register_regexp(&conn)
            .map_err(|e| CatalogError::Engine(format!("Failed to register REGEXP: {}", e)))?;

        let db = Self {
            conn: Mutex::new(Some(conn)),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// The mutex is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CatalogError>
    where
        F: FnOnce(&Connection) -> Result<T, CatalogError>,
    {
        let guard = self
            .conn
            .lock()
            .map_err(|e| CatalogError::Engine(format!("Database lock poisoned: {}", e)))?;
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(CatalogError::Engine("Database is closed".to_string())),
        }
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) -> Result<(), CatalogError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| CatalogError::Engine(format!("Database lock poisoned: {}", e)))?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| {
                CatalogError::Engine(format!("Failed to close database: {}", e))
            })?;
            debug!("Database connection closed");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.conn.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// `value REGEXP pattern`, evaluated as `regexp(pattern, value)`. NULL never matches.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let regex: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;
            let is_match = match ctx.get_raw(1) {
                ValueRef::Null => false,
                ValueRef::Text(bytes) => regex.is_match(&String::from_utf8_lossy(bytes)),
                other => regex.is_match(&value_to_text(other).unwrap_or_default()),
            };
            Ok(is_match)
        },
    )
}

/// Render any SQLite value as text. Blobs become lowercase hex.
pub(crate) fn value_to_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Some(bytes.iter().map(|b| format!("{:02x}", b)).collect()),
    }
}

/// Run a prepared statement and collect every result row as a [`Row`].
pub(crate) fn collect_rows<P: rusqlite::Params>(
    stmt: &mut Statement<'_>,
    params: P,
) -> rusqlite::Result<Vec<Row>> {
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (i, name) in names.iter().enumerate() {
            record.insert(name.clone(), value_to_text(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

/// Whether SQLite already resolves `name` to a table. Matching ignores case,
/// as SQLite's own name resolution does.
pub(crate) fn engine_table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database_has_catalog() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let exists = engine_table_exists(conn, crate::catalog::CATALOG_TABLE)
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            assert!(exists);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_engine_table_exists_ignores_case() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("CREATE TABLE people (name TEXT)")
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            for name in ["people", "People", "PEOPLE"] {
                assert!(engine_table_exists(conn, name).unwrap(), "{name}");
            }
            assert!(!engine_table_exists(conn, "peoples").unwrap());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::open(&path).unwrap();
        db.close().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_directory_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = Database::open(dir.path());
        assert!(matches!(result, Err(CatalogError::Io(_))));
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_use() {
        let db = Database::in_memory().unwrap();
        db.close().unwrap();
        db.close().unwrap();
        assert!(db.is_closed());
        let result = db.with_conn(|_| Ok(()));
        assert!(matches!(result, Err(CatalogError::Engine(_))));
    }

    #[test]
    fn test_regexp_function() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let matched: bool = conn
                .query_row("SELECT 'ann@x.com' REGEXP '^[a-z]+@'", [], |r| r.get(0))
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            assert!(matched);
            let null_match: bool = conn
                .query_row("SELECT NULL REGEXP '.*'", [], |r| r.get(0))
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            assert!(!null_match);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(ValueRef::Null), None);
        assert_eq!(value_to_text(ValueRef::Integer(7)).as_deref(), Some("7"));
        assert_eq!(value_to_text(ValueRef::Text(b"hi")).as_deref(), Some("hi"));
        assert_eq!(
            value_to_text(ValueRef::Blob(&[0xde, 0xad])).as_deref(),
            Some("dead")
        );
    }
}
