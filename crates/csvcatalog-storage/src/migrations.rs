//! Store schema migrations.
//!
//! Creates the engine-internal tables on first open. User tables are never
//! touched here.

use rusqlite::Connection;
use tracing::info;

use csvcatalog_core::error::CatalogError;

use crate::catalog::Catalog;

/// Name of the migrations tracking table.
pub const MIGRATIONS_TABLE: &str = "__csvcatalog_schema";

/// Run all pending migrations. Safe to call on every open.
pub fn run_migrations(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );"
    ))
    .map_err(|e| CatalogError::Engine(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
            [],
            |row| row.get(0),
        )
        .map_err(|e| CatalogError::Engine(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: metadata_catalog");
    }

    // The catalog may have been dropped through the raw SQL passthrough.
    Catalog::ensure_initialized(conn)
}

/// Version 1: the metadata catalog.
fn apply_v1(conn: &Connection) -> Result<(), CatalogError> {
    Catalog::ensure_initialized(conn)?;
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {MIGRATIONS_TABLE} (version, name)
             VALUES (1, 'metadata_catalog')"
        ),
        [],
    )
    .map_err(|e| CatalogError::Engine(format!("Failed to apply migration v1: {}", e)))?;
    Ok(())
}
