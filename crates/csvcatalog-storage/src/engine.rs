//! The storage capability interface and its SQLite implementation.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::{Row, SearchOutcome, Table};

use crate::db::Database;
use crate::queries::{ExportRequest, QueryService};
use crate::search::SearchPlanner;
use crate::tables::TableManager;

/// Operations the presentation layer may call on an open store.
///
/// Every mutating call commits before returning. Implementations are
/// single-connection; callers serialize access.
pub trait Storage {
    /// Create a table; names are sanitized, see [`TableManager::create_table`].
    fn create_table(&self, name: &str, columns: &[String]) -> Result<Table, CatalogError>;
    fn delete_table(&self, name: &str) -> Result<(), CatalogError>;
    /// Drop every table. Returns how many were removed.
    fn purge(&self) -> Result<usize, CatalogError>;
    fn get_table(&self, name: &str) -> Result<Option<Table>, CatalogError>;
    /// All tables sorted by name.
    fn get_tables(&self) -> Result<Vec<Table>, CatalogError>;
    fn get_tables_matching(&self, description_filter: &str) -> Result<Vec<Table>, CatalogError>;
    /// Insert rows and refresh the cached count. Returns rows inserted.
    fn save(&self, table: &str, rows: &[Row]) -> Result<usize, CatalogError>;
    fn update_description(&self, name: &str, description: Option<&str>)
        -> Result<(), CatalogError>;
    fn rename_table(&self, old: &str, new: &str) -> Result<(), CatalogError>;
    fn update_created_at(&self, name: &str, created_at: DateTime<Utc>)
        -> Result<(), CatalogError>;
    /// Tolerant multi-target search.
    fn search(&self, value: &str, targets: &[String]) -> Result<SearchOutcome, CatalogError>;
    /// Strict search of one table.
    fn search_table(&self, value: &str, table: &str) -> Result<Vec<Row>, CatalogError>;
    /// Raw SQL escape hatch.
    fn sql(&self, query: &str, params: &[String]) -> Result<Vec<Row>, CatalogError>;
    fn export_rows(&self, request: &ExportRequest) -> Result<Vec<Row>, CatalogError>;
    /// Close the connection. Further calls fail with an engine error.
    fn close(&self) -> Result<(), CatalogError>;
}

/// [`Storage`] backed by one SQLite connection.
pub struct SqliteStorage {
    db: Arc<Database>,
    tables: TableManager,
    search: SearchPlanner,
    queries: QueryService,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        Ok(Self::with_database(Database::open(path)?))
    }

    pub fn in_memory() -> Result<Self, CatalogError> {
        Ok(Self::with_database(Database::in_memory()?))
    }

    fn with_database(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            tables: TableManager::new(Arc::clone(&db)),
            search: SearchPlanner::new(Arc::clone(&db)),
            queries: QueryService::new(Arc::clone(&db)),
            db,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.db.is_closed()
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").field("db", &self.db).finish()
    }
}

impl Storage for SqliteStorage {
    fn create_table(&self, name: &str, columns: &[String]) -> Result<Table, CatalogError> {
        self.tables.create_table(name, columns)
    }

    fn delete_table(&self, name: &str) -> Result<(), CatalogError> {
        self.tables.delete_table(name)
    }

    fn purge(&self) -> Result<usize, CatalogError> {
        self.tables.purge()
    }

    fn get_table(&self, name: &str) -> Result<Option<Table>, CatalogError> {
        self.tables.get_table(name)
    }

    fn get_tables(&self) -> Result<Vec<Table>, CatalogError> {
        self.tables.get_tables()
    }

    fn get_tables_matching(&self, description_filter: &str) -> Result<Vec<Table>, CatalogError> {
        self.tables.get_tables_matching(description_filter)
    }

    fn save(&self, table: &str, rows: &[Row]) -> Result<usize, CatalogError> {
        self.tables.save(table, rows)
    }

    fn update_description(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<(), CatalogError> {
        self.tables.update_description(name, description)
    }

    fn rename_table(&self, old: &str, new: &str) -> Result<(), CatalogError> {
        self.tables.rename_table(old, new)
    }

    fn update_created_at(
        &self,
        name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        self.tables.update_created_at(name, created_at)
    }

    fn search(&self, value: &str, targets: &[String]) -> Result<SearchOutcome, CatalogError> {
        self.search.search(value, targets)
    }

    fn search_table(&self, value: &str, table: &str) -> Result<Vec<Row>, CatalogError> {
        self.search.search_table(value, table)
    }

    fn sql(&self, query: &str, params: &[String]) -> Result<Vec<Row>, CatalogError> {
        self.queries.run_sql(query, params)
    }

    fn export_rows(&self, request: &ExportRequest) -> Result<Vec<Row>, CatalogError> {
        self.queries.export_rows(request)
    }

    fn close(&self) -> Result<(), CatalogError> {
        self.db.close()
    }
}
