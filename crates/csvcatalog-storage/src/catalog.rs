//! Metadata catalog.
//!
//! One row per user table in a reserved engine-internal table. The catalog is
//! authoritative for column order, row count, creation time and description;
//! it is never rebuilt from SQLite's own schema introspection.
//!
//! All functions take a `&Connection` so lifecycle operations can run them
//! inside the same transaction as their DDL.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::Table;

use crate::ident;

/// Prefix shared by every engine-internal table. User tables may not use it.
pub const RESERVED_PREFIX: &str = "__csvcatalog_";

/// Name of the metadata catalog table.
pub const CATALOG_TABLE: &str = "__csvcatalog_metadata";

/// Namespace for catalog operations.
pub struct Catalog;

type RawEntry = (String, String, i64, String, Option<String>);

impl Catalog {
    /// Create the catalog table if absent. Idempotent.
    pub fn ensure_initialized(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {CATALOG_TABLE} (
                name        TEXT PRIMARY KEY NOT NULL,
                columns     TEXT NOT NULL,
                row_count   INTEGER NOT NULL DEFAULT 0 CHECK (row_count >= 0),
                created_at  TEXT NOT NULL,
                description TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS {CATALOG_TABLE}_name_nocase
                ON {CATALOG_TABLE} (name COLLATE NOCASE);"
        ))
        .map_err(|e| CatalogError::Engine(format!("Failed to create catalog table: {}", e)))
    }

    /// Whether `name` falls in the engine-internal namespace, in any letter case.
    pub fn is_reserved(name: &str) -> bool {
        name.to_ascii_lowercase().starts_with(RESERVED_PREFIX)
    }

    /// The catalogued name SQLite would confuse with `name`, if any.
    ///
    /// SQLite resolves table names case-insensitively, so `People` and
    /// `people` cannot both exist even though catalog lookups are exact.
    pub fn find_conflict(conn: &Connection, name: &str) -> Result<Option<String>, CatalogError> {
        conn.query_row(
            &format!("SELECT name FROM {CATALOG_TABLE} WHERE name = ?1 COLLATE NOCASE LIMIT 1"),
            [name],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CatalogError::Engine(e.to_string()))
    }

    /// Insert or replace the entry for `name` with a zero count and `created_at = now`.
    pub fn register(
        conn: &Connection,
        name: &str,
        columns: &[String],
    ) -> Result<Table, CatalogError> {
        ident::validate(name)?;
        for column in columns {
            ident::validate(column)?;
        }

        let created_at = Utc::now().trunc_subsecs(0);
        let columns_json = serde_json::to_string(columns)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {CATALOG_TABLE}
                     (name, columns, row_count, created_at, description)
                 VALUES (?1, ?2, 0, ?3, NULL)"
            ),
            rusqlite::params![name, columns_json, format_timestamp(&created_at)],
        )
        .map_err(|e| CatalogError::Engine(format!("Failed to register table: {}", e)))?;

        debug!(table = %name, "Registered table in catalog");
        Ok(Table {
            name: name.to_string(),
            columns: columns.to_vec(),
            count: 0,
            created_at,
            description: None,
        })
    }

    /// Remove the entry for `name`. No-op if absent.
    pub fn unregister(conn: &Connection, name: &str) -> Result<(), CatalogError> {
        conn.execute(
            &format!("DELETE FROM {CATALOG_TABLE} WHERE name = ?1"),
            [name],
        )
        .map_err(|e| CatalogError::Engine(format!("Failed to unregister table: {}", e)))?;
        Ok(())
    }

    /// Remove every entry.
    pub fn clear(conn: &Connection) -> Result<(), CatalogError> {
        conn.execute(&format!("DELETE FROM {CATALOG_TABLE}"), [])
            .map_err(|e| CatalogError::Engine(format!("Failed to clear catalog: {}", e)))?;
        Ok(())
    }

    /// Find the entry for `name`.
    pub fn get(conn: &Connection, name: &str) -> Result<Option<Table>, CatalogError> {
        let raw = conn
            .query_row(
                &format!(
                    "SELECT name, columns, row_count, created_at, description
                     FROM {CATALOG_TABLE} WHERE name = ?1"
                ),
                [name],
                row_to_raw,
            )
            .optional()
            .map_err(|e| CatalogError::Engine(e.to_string()))?;

        raw.map(raw_to_table).transpose()
    }

    /// All entries, in no particular order.
    pub fn list(conn: &Connection) -> Result<Vec<Table>, CatalogError> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT name, columns, row_count, created_at, description FROM {CATALOG_TABLE}"
            ))
            .map_err(|e| CatalogError::Engine(e.to_string()))?;

        let rows = stmt
            .query_map([], row_to_raw)
            .map_err(|e| CatalogError::Engine(e.to_string()))?;

        let mut tables = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| CatalogError::Engine(e.to_string()))?;
            tables.push(raw_to_table(raw)?);
        }
        Ok(tables)
    }

    pub fn set_row_count(conn: &Connection, name: &str, count: u64) -> Result<(), CatalogError> {
        let count = i64::try_from(count)
            .map_err(|_| CatalogError::Engine(format!("Row count out of range: {}", count)))?;
        Self::update(conn, "row_count = ?1", rusqlite::params![count, name])
    }

    pub fn set_description(
        conn: &Connection,
        name: &str,
        description: Option<&str>,
    ) -> Result<(), CatalogError> {
        Self::update(conn, "description = ?1", rusqlite::params![description, name])
    }

    pub fn rename(conn: &Connection, old: &str, new: &str) -> Result<(), CatalogError> {
        ident::validate(new)?;
        Self::update(conn, "name = ?1", rusqlite::params![new, old])
    }

    pub fn set_created_at(
        conn: &Connection,
        name: &str,
        created_at: &DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        Self::update(
            conn,
            "created_at = ?1",
            rusqlite::params![format_timestamp(created_at), name],
        )
    }

    /// `UPDATE ... SET {assignment} WHERE name = ?2`. No-op when the row is missing.
    fn update(
        conn: &Connection,
        assignment: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), CatalogError> {
        conn.execute(
            &format!("UPDATE {CATALOG_TABLE} SET {assignment} WHERE name = ?2"),
            params,
        )
        .map_err(|e| CatalogError::Engine(format!("Failed to update catalog: {}", e)))?;
        Ok(())
    }
}

/// ISO-8601 / RFC 3339 with second precision and a `Z` suffix.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, CatalogError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CatalogError::Serialization(format!("Invalid timestamp '{}': {}", s, e)))
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn raw_to_table(raw: RawEntry) -> Result<Table, CatalogError> {
    let (name, columns_json, row_count, created_at, description) = raw;
    Ok(Table {
        columns: serde_json::from_str(&columns_json)?,
        count: row_count.max(0) as u64,
        created_at: parse_timestamp(&created_at)?,
        name,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        Catalog::ensure_initialized(&conn).unwrap();
        conn
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let conn = open_test_conn();
        Catalog::ensure_initialized(&conn).unwrap();
        assert!(Catalog::list(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_register_and_get() {
        let conn = open_test_conn();
        let registered = Catalog::register(&conn, "people", &cols(&["name", "email"])).unwrap();

        let found = Catalog::get(&conn, "people").unwrap().unwrap();
        assert_eq!(found.name, "people");
        assert_eq!(found.columns, vec!["name", "email"]);
        assert_eq!(found.count, 0);
        assert_eq!(found.description, None);
        assert_eq!(found.created_at, registered.created_at);
    }

    #[test]
    fn test_register_rejects_unsafe_names() {
        let conn = open_test_conn();
        let result = Catalog::register(&conn, "bad name", &cols(&["a"]));
        assert!(matches!(result, Err(CatalogError::InvalidIdentifier(_))));
        let result = Catalog::register(&conn, "ok", &cols(&["a-b"]));
        assert!(matches!(result, Err(CatalogError::InvalidIdentifier(_))));
        assert!(Catalog::list(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_register_replaces_existing_entry() {
        let conn = open_test_conn();
        Catalog::register(&conn, "t", &cols(&["a"])).unwrap();
        Catalog::set_row_count(&conn, "t", 5).unwrap();
        Catalog::register(&conn, "t", &cols(&["a", "b"])).unwrap();

        let t = Catalog::get(&conn, "t").unwrap().unwrap();
        assert_eq!(t.columns, vec!["a", "b"]);
        assert_eq!(t.count, 0);
    }

    #[test]
    fn test_get_missing_is_none() {
        let conn = open_test_conn();
        assert!(Catalog::get(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let conn = open_test_conn();
        Catalog::unregister(&conn, "nope").unwrap();
    }

    #[test]
    fn test_targeted_updates() {
        let conn = open_test_conn();
        Catalog::register(&conn, "t", &cols(&["a"])).unwrap();

        Catalog::set_row_count(&conn, "t", 42).unwrap();
        Catalog::set_description(&conn, "t", Some("imported orders")).unwrap();
        let ts = parse_timestamp("2020-05-17T08:30:00Z").unwrap();
        Catalog::set_created_at(&conn, "t", &ts).unwrap();

        let t = Catalog::get(&conn, "t").unwrap().unwrap();
        assert_eq!(t.count, 42);
        assert_eq!(t.description.as_deref(), Some("imported orders"));
        assert_eq!(t.created_at, ts);

        Catalog::set_description(&conn, "t", None).unwrap();
        assert_eq!(Catalog::get(&conn, "t").unwrap().unwrap().description, None);
    }

    #[test]
    fn test_updates_on_missing_row_are_noops() {
        let conn = open_test_conn();
        Catalog::set_row_count(&conn, "ghost", 1).unwrap();
        Catalog::set_description(&conn, "ghost", Some("x")).unwrap();
        Catalog::rename(&conn, "ghost", "spirit").unwrap();
        assert!(Catalog::list(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_rename() {
        let conn = open_test_conn();
        Catalog::register(&conn, "old", &cols(&["a"])).unwrap();
        Catalog::rename(&conn, "old", "new").unwrap();
        assert!(Catalog::get(&conn, "old").unwrap().is_none());
        assert!(Catalog::get(&conn, "new").unwrap().is_some());
    }

    #[test]
    fn test_lookups_are_exact_but_conflicts_ignore_case() {
        let conn = open_test_conn();
        Catalog::register(&conn, "people", &cols(&["name"])).unwrap();

        assert!(Catalog::get(&conn, "People").unwrap().is_none());
        assert_eq!(
            Catalog::find_conflict(&conn, "PEOPLE").unwrap().as_deref(),
            Some("people")
        );
        assert_eq!(Catalog::find_conflict(&conn, "orders").unwrap(), None);
    }

    #[test]
    fn test_case_variants_cannot_both_be_catalogued() {
        let conn = open_test_conn();
        let insert = format!(
            "INSERT INTO {CATALOG_TABLE} (name, columns, row_count, created_at)
             VALUES (?1, '[]', 0, '2024-01-01T00:00:00Z')"
        );
        conn.execute(&insert, ["people"]).unwrap();
        assert!(conn.execute(&insert, ["People"]).is_err());
    }

    #[test]
    fn test_is_reserved_ignores_case() {
        assert!(Catalog::is_reserved(CATALOG_TABLE));
        assert!(Catalog::is_reserved("__CSVCATALOG_METADATA"));
        assert!(Catalog::is_reserved("__CsvCatalog_x"));
        assert!(!Catalog::is_reserved("csvcatalog_x"));
        assert!(!Catalog::is_reserved("_csvcatalog_x"));
    }

    #[test]
    fn test_list_and_clear() {
        let conn = open_test_conn();
        Catalog::register(&conn, "a", &cols(&["x"])).unwrap();
        Catalog::register(&conn, "b", &cols(&["y"])).unwrap();
        assert_eq!(Catalog::list(&conn).unwrap().len(), 2);

        Catalog::clear(&conn).unwrap();
        assert!(Catalog::list(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = parse_timestamp("2024-02-29T12:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(&ts), "2024-02-29T10:00:00Z");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
