//! CLI argument definitions for the csvcatalog binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > settings file > defaults.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use csvcatalog_core::config::{self, Settings};

/// csvcatalog - import CSV files into a searchable, optionally encrypted catalog.
#[derive(Parser, Debug)]
#[command(name = "csvcatalog", version, about)]
pub struct CliArgs {
    /// Path to the settings file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Store file to operate on.
    #[arg(short = 'd', long = "db", global = true)]
    pub db: Option<PathBuf>,

    /// Password for an encrypted store.
    #[arg(short = 'p', long = "password", global = true)]
    pub password: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Import a CSV file into a table.
    Extract(ExtractArgs),
    /// List tables, optionally filtered by description.
    Tables {
        /// Case-insensitive description filter.
        filter: Option<String>,
    },
    /// Delete a table.
    Delete {
        table: String,
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Delete every table.
    Purge {
        /// Confirm the purge.
        #[arg(long)]
        yes: bool,
    },
    /// Run a raw SQL statement.
    Sql {
        query: String,
        /// Positional parameters bound to ?1, ?2, ...
        params: Vec<String>,
    },
    /// Search for a value across tables and columns.
    Search {
        value: String,
        /// Targets: `table`, `table.column` or `*.column` (comma or space separated).
        targets: Vec<String>,
    },
    /// Set (or clear, with an empty string) a table description.
    Describe { table: String, description: String },
    /// Rename a table.
    Rename { old: String, new: String },
    /// Overwrite a table's creation time (RFC 3339 or YYYY-MM-DD).
    CreatedAt { table: String, timestamp: String },
    /// Export a table to CSV.
    Export(ExportArgs),
    /// Show or change settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Manage saved regex filters.
    Filters {
        #[command(subcommand)]
        action: FiltersAction,
    },
}

impl Command {
    /// Key into the handler table.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Extract(_) => "extract",
            Command::Tables { .. } => "tables",
            Command::Delete { .. } => "delete",
            Command::Purge { .. } => "purge",
            Command::Sql { .. } => "sql",
            Command::Search { .. } => "search",
            Command::Describe { .. } => "describe",
            Command::Rename { .. } => "rename",
            Command::CreatedAt { .. } => "created-at",
            Command::Export(_) => "export",
            Command::Settings { .. } => "settings",
            Command::Filters { .. } => "filters",
        }
    }
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ExtractArgs {
    /// CSV file to import. The first line is the header.
    pub file: PathBuf,

    /// Table name (defaults to the file stem).
    #[arg(short, long)]
    pub table: Option<String>,

    /// Field separator.
    #[arg(short, long, default_value = ",")]
    pub separator: String,

    /// Only import these header columns (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ExportArgs {
    pub table: String,

    /// Columns to export (comma separated). Defaults to all.
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// `column=regex` or `column=@saved_filter`. Repeatable.
    #[arg(short, long = "filter")]
    pub filters: Vec<String>,

    /// Export only unique rows.
    #[arg(long)]
    pub distinct: bool,

    /// Maximum number of rows.
    #[arg(long)]
    pub limit: Option<u64>,

    /// Output file (defaults to `<table>.csv`; `-` for stdout).
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SettingsAction {
    /// Print the effective settings.
    Show,
    /// Set the store file.
    Dbfile { path: PathBuf },
    /// Turn at-rest encryption on or off, converting an existing store.
    Encryption { state: Toggle },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum FiltersAction {
    /// List saved filters.
    List,
    /// Save a named regex filter.
    Add { name: String, pattern: String },
    /// Remove a saved filter.
    Remove { name: String },
}

impl CliArgs {
    /// Resolve the settings file path.
    ///
    /// Priority: --config flag > CSVCATALOG_CONFIG env var > platform default.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CSVCATALOG_CONFIG") {
            return PathBuf::from(p);
        }
        config::default_settings_path()
    }

    /// Resolve the store file.
    ///
    /// Priority: --db flag > CSVCATALOG_DB env var > settings file > data dir default.
    pub fn resolve_db_path(&self, settings: &Settings) -> PathBuf {
        if let Some(ref p) = self.db {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CSVCATALOG_DB") {
            return PathBuf::from(p);
        }
        settings.resolve_db_path(&config::default_data_dir())
    }

    /// Resolve the store password.
    ///
    /// Priority: --password flag > CSVCATALOG_PASSWORD env var.
    pub fn resolve_password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var("CSVCATALOG_PASSWORD").ok())
    }

    /// Resolve the log filter directive.
    ///
    /// Priority: --log-level flag > settings file value.
    pub fn resolve_log_level(&self, settings: &Settings) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| settings.general.log_level.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("csvcatalog").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_parse_extract() {
        let cli = parse(&["extract", "data.csv", "-s", ";", "--columns", "a,b"]);
        match cli.command {
            Command::Extract(args) => {
                assert_eq!(args.file, PathBuf::from("data.csv"));
                assert_eq!(args.separator, ";");
                assert_eq!(args.columns, vec!["a", "b"]);
                assert_eq!(args.table, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_search_targets_and_globals() {
        let cli = parse(&["search", "ann", "people.email", "*.name", "--db", "x.db"]);
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        assert_eq!(
            cli.command,
            Command::Search {
                value: "ann".into(),
                targets: vec!["people.email".into(), "*.name".into()],
            }
        );
    }

    #[test]
    fn test_parse_export_filters() {
        let cli = parse(&[
            "export", "people", "-f", "name=^A", "-f", "city=@nordic", "--limit", "5",
        ]);
        let Command::Export(args) = cli.command else {
            panic!("expected export");
        };
        assert_eq!(args.filters, vec!["name=^A", "city=@nordic"]);
        assert_eq!(args.limit, Some(5));
        assert!(!args.distinct);
    }

    #[test]
    fn test_parse_settings_encryption() {
        let cli = parse(&["settings", "encryption", "on"]);
        assert_eq!(
            cli.command,
            Command::Settings {
                action: SettingsAction::Encryption { state: Toggle::On }
            }
        );
        assert_eq!(cli.command.name(), "settings");
    }

    #[test]
    fn test_delete_requires_table() {
        assert!(CliArgs::try_parse_from(["csvcatalog", "delete"]).is_err());
    }

    #[test]
    fn test_explicit_flags_win() {
        let cli = parse(&["--db", "explicit.db", "-p", "pw", "-l", "debug", "tables"]);
        let settings = Settings::default();
        assert_eq!(cli.resolve_db_path(&settings), PathBuf::from("explicit.db"));
        assert_eq!(cli.resolve_password().as_deref(), Some("pw"));
        assert_eq!(cli.resolve_log_level(&settings), "debug");
    }

    #[test]
    fn test_log_level_falls_back_to_settings() {
        let cli = parse(&["tables"]);
        assert_eq!(cli.resolve_log_level(&Settings::default()), "warn");
    }
}
