//! Shared domain types for the catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

// =============================================================================
// Table metadata
// =============================================================================

/// Catalog metadata for one user table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Unique, case-sensitive name; also the name of the SQL table.
    pub name: String,
    /// Ordered column names. Every column is stored as TEXT.
    pub columns: Vec<String>,
    /// Cached row count, refreshed after every save.
    pub count: u64,
    /// When the table was registered (UTC).
    pub created_at: DateTime<Utc>,
    /// Optional free-text description.
    pub description: Option<String>,
}

impl Table {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Case-insensitive substring match against the description.
    pub fn description_matches(&self, filter: &str) -> bool {
        let needle = filter.to_lowercase();
        self.description
            .as_deref()
            .map(|d| d.to_lowercase().contains(&needle))
            .unwrap_or(false)
    }
}

// =============================================================================
// Rows
// =============================================================================

/// One row of text values, in column order.
///
/// `None` represents SQL NULL (e.g. a column missing from a saved row).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    cells: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        }
    }

    /// Append a cell. A repeated column name replaces the earlier value.
    pub fn insert(&mut self, column: impl Into<String>, value: Option<String>) {
        let column = column.into();
        match self.cells.iter_mut().find(|(c, _)| *c == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    /// Value of `column`; `None` if the column is absent or NULL.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.cells.iter().any(|(c, _)| c == column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = Option<&str>> {
        self.cells.iter().map(|(_, v)| v.as_deref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.cells.iter().map(|(c, v)| (c.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

// =============================================================================
// Search targets
// =============================================================================

/// Table part of a search selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableSelector {
    /// `*`: every table in the catalog.
    Any,
    Named(String),
}

/// A parsed search selector: `table`, `table.column`, `*.column` (or `*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SearchTarget {
    pub table: TableSelector,
    pub column: Option<String>,
}

impl SearchTarget {
    /// Parse one selector, splitting on the first `.`.
    pub fn parse(selector: &str) -> Result<Self> {
        let selector = selector.trim();
        let (table_part, column_part) = match selector.split_once('.') {
            Some((t, c)) => (t, Some(c)),
            None => (selector, None),
        };

        if table_part.is_empty() {
            return Err(CatalogError::InvalidIdentifier(selector.to_string()));
        }
        let column = match column_part {
            Some("") => return Err(CatalogError::InvalidIdentifier(selector.to_string())),
            Some(c) => Some(c.to_string()),
            None => None,
        };
        let table = if table_part == "*" {
            TableSelector::Any
        } else {
            TableSelector::Named(table_part.to_string())
        };

        Ok(Self { table, column })
    }

    /// Split comma- or argument-separated tokens into selector strings.
    pub fn split_tokens<S: AsRef<str>>(tokens: &[S]) -> Vec<String> {
        tokens
            .iter()
            .flat_map(|t| t.as_ref().split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl fmt::Display for SearchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            TableSelector::Any => write!(f, "*")?,
            TableSelector::Named(name) => write!(f, "{}", name)?,
        }
        if let Some(ref column) = self.column {
            write!(f, ".{}", column)?;
        }
        Ok(())
    }
}

/// Result envelope of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Matched rows per table. Tables with no matches are absent.
    pub results: BTreeMap<String, Vec<Row>>,
    /// Sum of matched rows over all tables.
    pub total_matches: usize,
    /// Wall-clock time spent planning and executing.
    pub duration: Duration,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
