//! Raw SQL passthrough and filtered export queries.

use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::Row;

use crate::catalog::Catalog;
use crate::db::{collect_rows, Database};
use crate::ident;

/// Parameters for [`QueryService::export_rows`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    pub table: String,
    /// Columns to return, in order. Empty means every column.
    pub columns: Vec<String>,
    /// `(column, regex)` pairs; a row must match all of them.
    pub filters: Vec<(String, String)>,
    pub distinct: bool,
    pub limit: Option<u64>,
}

impl ExportRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push((column.into(), pattern.into()));
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }
}

/// Read-side queries that bypass the search planner.
pub struct QueryService {
    db: Arc<Database>,
}

impl QueryService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Execute one arbitrary statement with positional parameters.
    ///
    /// The query text is not sanitized. The connection is in autocommit mode,
    /// so the statement is committed as soon as it completes. Statements that
    /// produce no result columns (DDL, DML) return an empty vector.
    pub fn run_sql(&self, query: &str, params: &[String]) -> Result<Vec<Row>, CatalogError> {
        debug!(query = %query, params = params.len(), "Executing raw SQL");

        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(query)
                .map_err(|e| CatalogError::Engine(format!("Failed to prepare query: {}", e)))?;

            if stmt.column_count() == 0 {
                let changed = stmt
                    .execute(rusqlite::params_from_iter(params.iter()))
                    .map_err(|e| CatalogError::Engine(format!("Query failed: {}", e)))?;
                debug!(changed, "Statement executed");
                return Ok(Vec::new());
            }

            collect_rows(&mut stmt, rusqlite::params_from_iter(params.iter()))
                .map_err(|e| CatalogError::Engine(format!("Query failed: {}", e)))
        })
    }

    /// Select rows of one table, optionally projected, regex-filtered,
    /// deduplicated and limited.
    pub fn export_rows(&self, request: &ExportRequest) -> Result<Vec<Row>, CatalogError> {
        ident::validate(&request.table)?;

        // Compile up front so a bad pattern fails before touching the store.
        for (column, pattern) in &request.filters {
            Regex::new(pattern)
                .map_err(|e| CatalogError::InvalidFilter(format!("{}: {}", column, e)))?;
        }

        self.db.with_conn(|conn| {
            let table = Catalog::get(conn, &request.table)?
                .ok_or_else(|| CatalogError::TableNotFound(request.table.clone()))?;

            let requested = request
                .columns
                .iter()
                .chain(request.filters.iter().map(|(c, _)| c));
            for column in requested {
                if !table.has_column(column) {
                    return Err(CatalogError::InvalidIdentifier(format!(
                        "{}.{}",
                        table.name, column
                    )));
                }
            }

            let columns = if request.columns.is_empty() {
                &table.columns
            } else {
                &request.columns
            };
            let projection = columns
                .iter()
                .map(|c| ident::quote(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ");

            let mut sql = format!(
                "SELECT {}{} FROM {}",
                if request.distinct { "DISTINCT " } else { "" },
                projection,
                ident::quote(&table.name)?
            );
            let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if !request.filters.is_empty() {
                let mut clauses = Vec::with_capacity(request.filters.len());
                for (column, pattern) in &request.filters {
                    params_vec.push(Box::new(pattern.clone()));
                    clauses.push(format!("{} REGEXP ?{}", ident::quote(column)?, params_vec.len()));
                }
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            if let Some(limit) = request.limit {
                let limit = i64::try_from(limit).unwrap_or(i64::MAX);
                params_vec.push(Box::new(limit));
                sql.push_str(&format!(" LIMIT ?{}", params_vec.len()));
            }

            debug!(table = %table.name, sql = %sql, "Export query");

            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params_vec.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| CatalogError::Engine(format!("Export query prepare: {}", e)))?;
            collect_rows(&mut stmt, params_refs.as_slice())
                .map_err(|e| CatalogError::Engine(format!("Export query: {}", e)))
        })
    }
}
