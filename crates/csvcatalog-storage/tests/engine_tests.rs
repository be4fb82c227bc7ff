//! End-to-end tests for the catalog engine through the public `Storage` API.
//!
//! Each test opens its own in-memory or temp-dir store.

use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::Row;
use csvcatalog_storage::{ExportRequest, Session, SqliteStorage, Storage};

// =============================================================================
// Helpers
// =============================================================================

fn make_storage() -> SqliteStorage {
    SqliteStorage::in_memory().unwrap()
}

fn cols(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn row(pairs: &[(&str, &str)]) -> Row {
    Row::from_pairs(pairs.iter().copied())
}

/// people(name, email), orders(item, email), tags(label).
fn seed(storage: &dyn Storage) {
    storage
        .create_table("people", &cols(&["name", "email"]))
        .unwrap();
    storage
        .create_table("orders", &cols(&["item", "email"]))
        .unwrap();
    storage.create_table("tags", &cols(&["label"])).unwrap();

    storage
        .save(
            "people",
            &[
                row(&[("name", "Ann"), ("email", "ann@x.com")]),
                row(&[("name", "Bob"), ("email", "bob@x.com")]),
            ],
        )
        .unwrap();
    storage
        .save(
            "orders",
            &[
                row(&[("item", "banner"), ("email", "ann@x.com")]),
                row(&[("item", "chair"), ("email", "cy@y.org")]),
            ],
        )
        .unwrap();
    storage
        .save("tags", &[row(&[("label", "annual")]), row(&[("label", "misc")])])
        .unwrap();
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_people_scenario() {
    let storage = make_storage();
    storage
        .create_table("people", &cols(&["name", "email"]))
        .unwrap();
    storage
        .save("people", &[row(&[("name", "Ann"), ("email", "ann@x.com")])])
        .unwrap();

    let outcome = storage.search("ann", &[]).unwrap();
    assert_eq!(outcome.total_matches, 1);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(
        outcome.results["people"],
        vec![row(&[("name", "Ann"), ("email", "ann@x.com")])]
    );
}

#[test]
fn test_sanitized_table_name() {
    let storage = make_storage();
    let table = storage
        .create_table("1bad name!", &cols(&["col one"]))
        .unwrap();
    assert_eq!(table.name, "_1bad_name_");
    assert_eq!(table.columns, vec!["col_one"]);

    assert!(storage.get_table("_1bad_name_").unwrap().is_some());
    assert!(matches!(
        storage.delete_table("1bad name!"),
        Err(CatalogError::InvalidIdentifier(_))
    ));
    storage.delete_table("_1bad_name_").unwrap();
}

#[test]
fn test_purge_leaves_nothing() {
    let storage = make_storage();
    seed(&storage);
    assert_eq!(storage.purge().unwrap(), 3);

    assert!(storage.get_tables().unwrap().is_empty());
    for name in ["people", "orders", "tags"] {
        assert!(storage.get_table(name).unwrap().is_none());
        assert!(matches!(
            storage.delete_table(name),
            Err(CatalogError::TableNotFound(_))
        ));
    }
    assert!(storage.search("ann", &[]).unwrap().is_empty());
}

#[test]
fn test_delete_then_recreate() {
    let storage = make_storage();
    seed(&storage);
    storage.delete_table("people").unwrap();
    assert!(storage.get_table("people").unwrap().is_none());

    let table = storage
        .create_table("people", &cols(&["name", "phone"]))
        .unwrap();
    assert_eq!(table.count, 0);
    assert_eq!(table.columns, vec!["name", "phone"]);
}

#[test]
fn test_count_matches_engine_after_saves() {
    let storage = make_storage();
    storage.create_table("t", &cols(&["v"])).unwrap();
    for batch in 1..=4 {
        let rows: Vec<Row> = (0..batch)
            .map(|i| Row::from_pairs([("v", format!("{batch}-{i}"))]))
            .collect();
        storage.save("t", &rows).unwrap();

        let cached = storage.get_table("t").unwrap().unwrap().count;
        let actual = storage.sql("SELECT COUNT(*) AS n FROM t", &[]).unwrap();
        assert_eq!(actual[0].get("n"), Some(cached.to_string().as_str()));
    }
    assert_eq!(storage.get_table("t").unwrap().unwrap().count, 10);
}

#[test]
fn test_metadata_edits() {
    let storage = make_storage();
    seed(&storage);
    storage
        .update_description("orders", Some("Q3 orders export"))
        .unwrap();
    storage.rename_table("orders", "orders_q3").unwrap();

    let ts = chrono::DateTime::parse_from_rfc3339("2021-07-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    storage.update_created_at("orders_q3", ts).unwrap();

    let table = storage.get_table("orders_q3").unwrap().unwrap();
    assert_eq!(table.description.as_deref(), Some("Q3 orders export"));
    assert_eq!(table.created_at, ts);
    assert_eq!(table.count, 2);

    let matching = storage.get_tables_matching("q3").unwrap();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0].name, "orders_q3");
}

#[test]
fn test_case_variant_names_never_split_catalog_from_engine() {
    let storage = make_storage();
    storage.create_table("people", &cols(&["name"])).unwrap();
    storage.save("people", &[row(&[("name", "Ann")])]).unwrap();

    assert!(matches!(
        storage.create_table("People", &cols(&["city", "zip"])),
        Err(CatalogError::NameConflict(_))
    ));
    assert!(matches!(
        storage.delete_table("People"),
        Err(CatalogError::TableNotFound(_))
    ));
    storage.create_table("orders", &cols(&["item"])).unwrap();
    assert!(matches!(
        storage.rename_table("orders", "PEOPLE"),
        Err(CatalogError::NameConflict(_))
    ));

    // Catalog and engine still agree on people.
    let tables = storage.get_tables().unwrap();
    assert_eq!(tables.len(), 2);
    let people = storage.get_table("people").unwrap().unwrap();
    assert_eq!(people.columns, vec!["name"]);
    assert_eq!(people.count, 1);
    let outcome = storage.search("ann", &[]).unwrap();
    assert_eq!(outcome.total_matches, 1);
}

#[test]
fn test_reserved_name_in_upper_case_cannot_break_purge() {
    let storage = make_storage();
    seed(&storage);
    assert!(matches!(
        storage.create_table("__CSVCATALOG_METADATA", &cols(&["a"])),
        Err(CatalogError::NameConflict(_))
    ));

    assert_eq!(storage.purge().unwrap(), 3);
    assert!(storage.get_tables().unwrap().is_empty());
    storage.create_table("fresh", &cols(&["a"])).unwrap();
    assert_eq!(storage.purge().unwrap(), 1);
}

// =============================================================================
// Search
// =============================================================================

#[test]
fn test_wildcard_column_only_hits_tables_with_column() {
    let storage = make_storage();
    seed(&storage);

    let outcome = storage.search("ann", &cols(&["*.email"])).unwrap();
    let tables: Vec<&String> = outcome.results.keys().collect();
    assert_eq!(tables, vec!["orders", "people"]);
    assert!(!outcome.results.contains_key("tags"));
}

#[test]
fn test_global_search_is_superset_of_targeted() {
    let storage = make_storage();
    seed(&storage);

    let global = storage.search("an", &[]).unwrap();
    for target in ["people", "orders", "tags", "people.email", "*.label"] {
        let targeted = storage.search("an", &cols(&[target])).unwrap();
        for (table, rows) in &targeted.results {
            let global_rows = &global.results[table];
            for r in rows {
                assert!(global_rows.contains(r), "{target}: {r:?} missing globally");
            }
        }
    }
}

#[test]
fn test_search_mixing_valid_and_invalid_targets() {
    let storage = make_storage();
    seed(&storage);

    let outcome = storage
        .search("ann", &cols(&["nope", "people.nope", "tags", "people.name"]))
        .unwrap();
    let tables: Vec<&String> = outcome.results.keys().collect();
    assert_eq!(tables, vec!["people", "tags"]);

    assert!(matches!(
        storage.search_table("ann", "nope"),
        Err(CatalogError::TableNotFound(_))
    ));
}

#[test]
fn test_search_value_is_never_interpolated() {
    let storage = make_storage();
    seed(&storage);
    let outcome = storage
        .search("x'); DROP TABLE people; --", &[])
        .unwrap();
    assert!(outcome.is_empty());
    assert!(storage.get_table("people").unwrap().is_some());
    assert_eq!(storage.search("bob", &[]).unwrap().total_matches, 1);
}

// =============================================================================
// Raw SQL and export
// =============================================================================

#[test]
fn test_sql_passthrough() {
    let storage = make_storage();
    seed(&storage);
    let rows = storage
        .sql(
            "SELECT p.name, o.item FROM people p JOIN orders o ON o.email = p.email",
            &[],
        )
        .unwrap();
    assert_eq!(rows, vec![row(&[("name", "Ann"), ("item", "banner")])]);
}

#[test]
fn test_export_with_filter() {
    let storage = make_storage();
    seed(&storage);
    let rows = storage
        .export_rows(
            &ExportRequest::new("people")
                .columns(["email"])
                .filter("name", "^B"),
        )
        .unwrap();
    assert_eq!(rows, vec![row(&[("email", "bob@x.com")])]);
}

// =============================================================================
// Encrypted sessions
// =============================================================================

#[test]
fn test_encrypted_session_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    let session = Session::open(&path, Some("correct horse")).unwrap();
    seed(session.storage());
    session.close().unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert!(!raw.starts_with(b"SQLite format 3"));
    assert!(!raw.windows(9).any(|w| w == b"ann@x.com"));

    let session = Session::open(&path, Some("correct horse")).unwrap();
    let outcome = session.storage().search("ann", &cols(&["people"])).unwrap();
    assert_eq!(outcome.total_matches, 1);
    session.close().unwrap();
}

#[test]
fn test_encrypted_session_wrong_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    let session = Session::open(&path, Some("right")).unwrap();
    seed(session.storage());
    session.close().unwrap();
    let before = std::fs::read(&path).unwrap();

    let err = Session::open(&path, Some("wrong")).unwrap_err();
    assert!(matches!(err, CatalogError::DecryptionFailed));
    assert_eq!(std::fs::read(&path).unwrap(), before);
}
