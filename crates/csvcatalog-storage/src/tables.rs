//! Table lifecycle: create, delete, purge, save, rename and metadata edits.
//!
//! Every operation keeps the SQL table and its catalog entry in step by
//! running the DDL/DML and the catalog write in one transaction.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::{Row, Table};

use crate::catalog::Catalog;
use crate::db::{engine_table_exists, Database};
use crate::ident;

/// Creates, mutates and destroys user tables.
pub struct TableManager {
    db: Arc<Database>,
}

impl TableManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a table with all-TEXT columns and register it.
    ///
    /// The name and every column are sanitized first; the returned [`Table`]
    /// carries the names actually used. Re-creating a table with the same
    /// columns returns the existing entry unchanged. A different column set
    /// fails with `NameConflict` instead of silently keeping the old shape,
    /// as does a name differing from an existing table only in letter case.
    pub fn create_table(&self, name: &str, columns: &[String]) -> Result<Table, CatalogError> {
        let safe_name = ident::sanitize(name);
        let safe_columns: Vec<String> = columns.iter().map(|c| ident::sanitize(c)).collect();

        if Catalog::is_reserved(&safe_name) {
            return Err(CatalogError::NameConflict(safe_name));
        }
        if safe_columns.is_empty() {
            return Err(CatalogError::InvalidIdentifier(format!(
                "{}: a table needs at least one column",
                safe_name
            )));
        }
        let mut seen = HashSet::new();
        for column in &safe_columns {
            if !seen.insert(column.as_str()) {
                return Err(CatalogError::NameConflict(format!(
                    "{}.{}: duplicate column",
                    safe_name, column
                )));
            }
        }
        if safe_name != name {
            debug!(requested = %name, table = %safe_name, "Table name sanitized");
        }

        self.db.with_conn(|conn| {
            if let Some(existing) = Catalog::get(conn, &safe_name)? {
                if existing.columns == safe_columns {
                    debug!(table = %safe_name, "Table already exists with the same columns");
                    return Ok(existing);
                }
                return Err(CatalogError::NameConflict(safe_name.clone()));
            }
            if let Some(existing) = Catalog::find_conflict(conn, &safe_name)? {
                return Err(name_collision(&safe_name, &existing));
            }
            let exists = engine_table_exists(conn, &safe_name)
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            if exists {
                // Present in SQLite but not in the catalog (e.g. made via raw SQL).
                return Err(CatalogError::NameConflict(safe_name.clone()));
            }

            let column_defs = safe_columns
                .iter()
                .map(|c| ident::quote(c).map(|q| format!("{} TEXT", q)))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                ident::quote(&safe_name)?,
                column_defs
            );

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            tx.execute(&ddl, [])
                .map_err(|e| CatalogError::Engine(format!("Failed to create table: {}", e)))?;
            let table = Catalog::register(&tx, &safe_name, &safe_columns)?;
            tx.commit()
                .map_err(|e| CatalogError::Engine(format!("Failed to commit: {}", e)))?;

            info!(table = %safe_name, columns = safe_columns.len(), "Created table");
            Ok(table)
        })
    }

    /// Drop a table and its catalog entry, then compact the store.
    ///
    /// The name is matched exactly. Compaction failures are logged only,
    /// since the drop has already committed.
    pub fn delete_table(&self, name: &str) -> Result<(), CatalogError> {
        ident::validate(name)?;

        self.db.with_conn(|conn| {
            if Catalog::get(conn, name)?.is_none() {
                return Err(CatalogError::TableNotFound(name.to_string()));
            }

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            drop_if_exists(&tx, name)?;
            Catalog::unregister(&tx, name)?;
            tx.commit()
                .map_err(|e| CatalogError::Engine(format!("Failed to commit: {}", e)))?;

            info!(table = %name, "Deleted table");
            compact(conn);
            Ok(())
        })
    }

    /// Drop every catalogued table, clear the catalog, then compact.
    ///
    /// A catalogued table already missing from SQLite counts as deleted.
    /// Returns the number of catalog entries removed.
    pub fn purge(&self) -> Result<usize, CatalogError> {
        self.db.with_conn(|conn| {
            let tables = Catalog::list(conn)?;

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            for table in &tables {
                if Catalog::is_reserved(&table.name) {
                    warn!(table = %table.name, "Skipping drop of reserved catalog name");
                } else if ident::is_valid(&table.name) {
                    drop_if_exists(&tx, &table.name)?;
                } else {
                    warn!(table = %table.name, "Skipping drop of unsafe catalog name");
                }
            }
            Catalog::clear(&tx)?;
            tx.commit()
                .map_err(|e| CatalogError::Engine(format!("Failed to commit: {}", e)))?;

            info!(tables = tables.len(), "Purged store");
            compact(conn);
            Ok(tables.len())
        })
    }

    /// Insert `rows` into `table` in one transaction and refresh its count.
    ///
    /// Columns missing from a row are stored as NULL. The count is a full
    /// recount, not an increment. Returns the number of rows inserted.
    pub fn save(&self, table: &str, rows: &[Row]) -> Result<usize, CatalogError> {
        if rows.is_empty() {
            return Ok(0);
        }
        ident::validate(table)?;

        self.db.with_conn(|conn| {
            let entry = Catalog::get(conn, table)?
                .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;

            for row in rows {
                if let Some(unknown) = row.columns().find(|c| !entry.has_column(c)) {
                    return Err(CatalogError::InvalidIdentifier(format!(
                        "{}.{}",
                        table, unknown
                    )));
                }
            }

            let quoted_columns = entry
                .columns
                .iter()
                .map(|c| ident::quote(c))
                .collect::<Result<Vec<_>, _>>()?;
            let placeholders = vec!["?"; entry.columns.len()].join(", ");
            let insert = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                ident::quote(table)?,
                quoted_columns.join(", "),
                placeholders
            );

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            {
                let mut stmt = tx
                    .prepare(&insert)
                    .map_err(|e| CatalogError::Engine(format!("Failed to prepare insert: {}", e)))?;
                for row in rows {
                    let values = entry.columns.iter().map(|c| row.get(c));
                    stmt.execute(rusqlite::params_from_iter(values))
                        .map_err(|e| CatalogError::Engine(format!("Failed to insert row: {}", e)))?;
                }
            }
            let count = count_rows(&tx, table)?;
            Catalog::set_row_count(&tx, table, count)?;
            tx.commit()
                .map_err(|e| CatalogError::Engine(format!("Failed to commit: {}", e)))?;

            debug!(table = %table, inserted = rows.len(), count, "Saved rows");
            Ok(rows.len())
        })
    }

    pub fn update_description(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<(), CatalogError> {
        self.db.with_conn(|conn| {
            require(conn, name)?;
            Catalog::set_description(conn, name, description)?;
            info!(table = %name, "Updated description");
            Ok(())
        })
    }

    pub fn update_created_at(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        self.db.with_conn(|conn| {
            require(conn, name)?;
            Catalog::set_created_at(conn, name, &created_at)?;
            info!(table = %name, %created_at, "Updated created_at");
            Ok(())
        })
    }

    /// Rename the SQL table and its catalog entry.
    ///
    /// `new` must already be a valid identifier; callers sanitize first. A
    /// `new` naming any existing table, in any letter case, is a conflict.
    pub fn rename_table(&self, old: &str, new: &str) -> Result<(), CatalogError> {
        ident::validate(old)?;
        ident::validate(new)?;
        if Catalog::is_reserved(new) {
            return Err(CatalogError::NameConflict(new.to_string()));
        }

        self.db.with_conn(|conn| {
            require(conn, old)?;
            if old == new {
                return Ok(());
            }
            if let Some(existing) = Catalog::find_conflict(conn, new)? {
                return Err(name_collision(new, &existing));
            }
            let exists =
                engine_table_exists(conn, new).map_err(|e| CatalogError::Engine(e.to_string()))?;
            if exists {
                return Err(CatalogError::NameConflict(new.to_string()));
            }

            let tx = conn
                .unchecked_transaction()
                .map_err(|e| CatalogError::Engine(e.to_string()))?;
            tx.execute(
                &format!(
                    "ALTER TABLE {} RENAME TO {}",
                    ident::quote(old)?,
                    ident::quote(new)?
                ),
                [],
            )
            .map_err(|e| CatalogError::Engine(format!("Failed to rename table: {}", e)))?;
            Catalog::rename(&tx, old, new)?;
            tx.commit()
                .map_err(|e| CatalogError::Engine(format!("Failed to commit: {}", e)))?;

            info!(from = %old, to = %new, "Renamed table");
            Ok(())
        })
    }

    pub fn get_table(&self, name: &str) -> Result<Option<Table>, CatalogError> {
        self.db.with_conn(|conn| Catalog::get(conn, name))
    }

    /// All catalogued tables, sorted by name.
    pub fn get_tables(&self) -> Result<Vec<Table>, CatalogError> {
        let mut tables = self.db.with_conn(Catalog::list)?;
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    /// Tables whose description contains `filter`, case-insensitively.
    pub fn get_tables_matching(&self, filter: &str) -> Result<Vec<Table>, CatalogError> {
        Ok(self
            .get_tables()?
            .into_iter()
            .filter(|t| t.description_matches(filter))
            .collect())
    }
}

fn require(conn: &Connection, name: &str) -> Result<Table, CatalogError> {
    Catalog::get(conn, name)?.ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
}

fn drop_if_exists(conn: &Connection, name: &str) -> Result<(), CatalogError> {
    conn.execute(&format!("DROP TABLE IF EXISTS {}", ident::quote(name)?), [])
        .map_err(|e| CatalogError::Engine(format!("Failed to drop table '{}': {}", name, e)))?;
    Ok(())
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64, CatalogError> {
    let count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}", ident::quote(table)?),
            [],
            |row| row.get(0),
        )
        .map_err(|e| CatalogError::Engine(format!("Failed to count rows: {}", e)))?;
    Ok(count.max(0) as u64)
}

fn name_collision(requested: &str, existing: &str) -> CatalogError {
    if requested == existing {
        CatalogError::NameConflict(requested.to_string())
    } else {
        CatalogError::NameConflict(format!("{} (clashes with table {})", requested, existing))
    }
}

/// VACUUM the store. Errors are logged, not returned.
fn compact(conn: &Connection) {
    if let Err(e) = conn.execute_batch("VACUUM") {
        warn!(error = %e, "Failed to compact store");
    }
}
