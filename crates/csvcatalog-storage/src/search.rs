//! Multi-target substring search.
//!
//! Resolves target selectors (`table`, `table.column`, `*.column`) against
//! the catalog into one column set per table, then runs one parameterized
//! `LIKE` query per table. A failing table is logged and skipped.
//!
//! Rows are deduplicated only for tables reached by more than one selector;
//! otherwise identical data rows are distinct matches and all are returned.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;
use tracing::{debug, warn};

use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::{Row, SearchOutcome, SearchTarget, Table, TableSelector};

use crate::catalog::Catalog;
use crate::db::{collect_rows, Database};
use crate::ident;

/// One table's share of a search.
#[derive(Debug)]
struct PlanEntry<'a> {
    table: &'a Table,
    columns: ColumnSet,
    /// Number of selectors that resolved to this table.
    selectors: usize,
}

/// Columns selected for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnSet {
    All,
    Only(BTreeSet<String>),
}

impl ColumnSet {
    fn merge(&mut self, other: ColumnSet) {
        match (self, other) {
            (ColumnSet::All, _) => {}
            (this, ColumnSet::All) => *this = ColumnSet::All,
            (ColumnSet::Only(mine), ColumnSet::Only(theirs)) => mine.extend(theirs),
        }
    }

    /// Selected columns in the table's own column order.
    fn resolve<'a>(&self, table: &'a Table) -> Vec<&'a str> {
        table
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| match self {
                ColumnSet::All => true,
                ColumnSet::Only(set) => set.contains(*c),
            })
            .collect()
    }
}

/// Plans and executes searches over the catalogued tables.
pub struct SearchPlanner {
    db: Arc<Database>,
}

impl SearchPlanner {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Tolerant batch search.
    ///
    /// Unparseable selectors, unknown tables and unknown columns are skipped
    /// with a warning. An empty `targets` list searches every column of every
    /// table. Tables without matches are absent from the outcome.
    pub fn search(&self, value: &str, targets: &[String]) -> Result<SearchOutcome, CatalogError> {
        let started = Instant::now();

        self.db.with_conn(|conn| {
            let tables = Catalog::list(conn)?;
            let plan = plan(&tables, targets);
            debug!(tables = plan.len(), "Search plan resolved");

            let mut outcome = SearchOutcome::default();
            for entry in plan.into_values() {
                let table = entry.table;
                let columns = entry.columns.resolve(table);
                let dedup = entry.selectors > 1;
                match query_table(conn, &table.name, &columns, value, dedup) {
                    Ok(rows) if !rows.is_empty() => {
                        outcome.total_matches += rows.len();
                        outcome.results.insert(table.name.clone(), rows);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(
                        table = %table.name,
                        error = %e,
                        "Search query failed, skipping table"
                    ),
                }
            }

            outcome.duration = started.elapsed();
            debug!(
                matches = outcome.total_matches,
                duration_ms = outcome.duration.as_millis() as u64,
                "Search finished"
            );
            Ok(outcome)
        })
    }

    /// Strict search of every column of a single table.
    pub fn search_table(&self, value: &str, table: &str) -> Result<Vec<Row>, CatalogError> {
        ident::validate(table)?;
        self.db.with_conn(|conn| {
            let entry = Catalog::get(conn, table)?
                .ok_or_else(|| CatalogError::TableNotFound(table.to_string()))?;
            let columns = ColumnSet::All.resolve(&entry);
            query_table(conn, &entry.name, &columns, value, false)
        })
    }
}

/// Resolve selectors into one entry per table, ordered by table name.
fn plan<'a>(tables: &'a [Table], targets: &[String]) -> BTreeMap<&'a str, PlanEntry<'a>> {
    let mut plan: BTreeMap<&str, PlanEntry<'a>> = BTreeMap::new();
    let mut add = |table: &'a Table, columns: ColumnSet| {
        match plan.get_mut(table.name.as_str()) {
            Some(entry) => {
                entry.columns.merge(columns);
                entry.selectors += 1;
            }
            None => {
                let entry = PlanEntry {
                    table,
                    columns,
                    selectors: 1,
                };
                plan.insert(table.name.as_str(), entry);
            }
        }
    };

    if targets.is_empty() {
        for table in tables {
            add(table, ColumnSet::All);
        }
    }

    for selector in targets {
        let target = match SearchTarget::parse(selector) {
            Ok(t) => t,
            Err(e) => {
                warn!(selector = %selector, error = %e, "Ignoring malformed search target");
                continue;
            }
        };

        match (&target.table, &target.column) {
            (TableSelector::Any, None) => {
                for table in tables {
                    add(table, ColumnSet::All);
                }
            }
            (TableSelector::Any, Some(column)) => {
                let mut found = false;
                for table in tables.iter().filter(|t| t.has_column(column)) {
                    found = true;
                    add(table, only(column));
                }
                if !found {
                    debug!(column = %column, "No table has the searched column");
                }
            }
            (TableSelector::Named(name), column) => {
                let Some(table) = tables.iter().find(|t| &t.name == name) else {
                    warn!(table = %name, "Search target table not found, skipping");
                    continue;
                };
                match column {
                    None => add(table, ColumnSet::All),
                    Some(c) if table.has_column(c) => add(table, only(c)),
                    Some(c) => warn!(
                        table = %name,
                        column = %c,
                        "Search target column not found, skipping"
                    ),
                }
            }
        }
    }

    plan
}

fn only(column: &str) -> ColumnSet {
    ColumnSet::Only(BTreeSet::from([column.to_string()]))
}

/// Run one `SELECT * ... WHERE c1 LIKE ?1 OR c2 LIKE ?1 ...` query. With
/// `dedup`, duplicate rows are dropped, keeping first occurrences in engine order.
fn query_table(
    conn: &Connection,
    table: &str,
    columns: &[&str],
    value: &str,
    dedup: bool,
) -> Result<Vec<Row>, CatalogError> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }

    let predicate = columns
        .iter()
        .map(|c| ident::quote(c).map(|q| format!("{} LIKE ?1 ESCAPE '\\'", q)))
        .collect::<Result<Vec<_>, _>>()?
        .join(" OR ");
    let query = format!("SELECT * FROM {} WHERE {}", ident::quote(table)?, predicate);
    let pattern = format!("%{}%", escape_like(value));

    let mut stmt = conn
        .prepare(&query)
        .map_err(|e| CatalogError::Engine(format!("Failed to prepare search: {}", e)))?;
    let rows = collect_rows(&mut stmt, [pattern.as_str()])
        .map_err(|e| CatalogError::Engine(format!("Search query failed: {}", e)))?;

    if !dedup {
        return Ok(rows);
    }
    let mut seen = HashSet::new();
    Ok(rows.into_iter().filter(|r| seen.insert(r.clone())).collect())
}

/// Escape LIKE wildcards so the value matches literally.
fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
