//! CSV Catalog storage crate - SQLite catalog engine and encrypted sessions.
//!
//! Provides identifier sanitization, a metadata catalog kept beside the user
//! tables, table lifecycle operations, the multi-target search planner, a
//! raw SQL passthrough with filtered export, and password-based encryption
//! of the whole store file.

pub mod catalog;
pub mod db;
pub mod engine;
pub mod envelope;
pub mod ident;
pub mod migrations;
pub mod queries;
pub mod search;
pub mod session;
pub mod tables;

pub use catalog::{Catalog, CATALOG_TABLE, RESERVED_PREFIX};
pub use db::Database;
pub use engine::{SqliteStorage, Storage};
pub use queries::{ExportRequest, QueryService};
pub use search::SearchPlanner;
pub use session::Session;
pub use tables::TableManager;
