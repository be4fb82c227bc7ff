//! Command handlers and the name → handler table.
//!
//! Every handler opens its own session on the resolved store, performs one
//! operation and closes the session before returning, so an encrypted store
//! is re-encrypted after each command.

use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tracing::{debug, info};

use csvcatalog_core::config::Settings;
use csvcatalog_core::error::CatalogError;
use csvcatalog_core::types::{Row, SearchOutcome, SearchTarget, TableSelector};
use csvcatalog_storage::{envelope, ident, ExportRequest, Session, Storage};

use crate::cli::{Command, ExportArgs, ExtractArgs, FiltersAction, SettingsAction, Toggle};
use crate::csvio;
use crate::render;

pub type CmdResult<T = ()> = Result<T, Box<dyn Error>>;

/// A command handler. Output meant for the user goes to `out`.
pub type Handler = fn(&mut Context, &Command, &mut dyn Write) -> CmdResult;

/// Resolved state shared by all handlers.
pub struct Context {
    pub settings: Settings,
    pub settings_path: PathBuf,
    pub db_path: PathBuf,
    pub password: Option<String>,
}

impl Context {
    /// Open the store, decrypting it when encryption is enabled.
    fn open_session(&self) -> CmdResult<Session> {
        let password = if self.settings.storage.encryption {
            Some(self.require_password()?)
        } else {
            None
        };
        Ok(Session::open(&self.db_path, password)?)
    }

    fn require_password(&self) -> CmdResult<&str> {
        self.password.as_deref().ok_or_else(|| {
            "the store is encrypted: pass --password or set CSVCATALOG_PASSWORD".into()
        })
    }

    fn save_settings(&self) -> CmdResult {
        self.settings.save(&self.settings_path)?;
        Ok(())
    }
}

/// Maps command names to handlers.
pub struct Registry {
    handlers: BTreeMap<&'static str, Handler>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, handler: Handler) {
        self.handlers.insert(name, handler);
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn dispatch(&self, ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
        let name = command.name();
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| format!("no handler registered for '{}'", name))?;
        debug!(command = name, "Dispatching command");
        handler(ctx, command, out)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// The handler table for every subcommand.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("extract", extract);
    registry.register("tables", tables);
    registry.register("delete", delete);
    registry.register("purge", purge);
    registry.register("sql", sql);
    registry.register("search", search);
    registry.register("describe", describe);
    registry.register("rename", rename);
    registry.register("created-at", created_at);
    registry.register("export", export);
    registry.register("settings", settings);
    registry.register("filters", filters);
    registry
}

fn mismatch(expected: &str, command: &Command) -> Box<dyn Error> {
    format!("handler '{}' cannot run '{}'", expected, command.name()).into()
}

// =============================================================================
// Table commands
// =============================================================================

fn extract(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Extract(args) = command else {
        return Err(mismatch("extract", command));
    };
    let data = csvio::read_csv(&args.file, &args.separator)?;
    let selected = select_columns(&data.headers, &args.columns)?;
    let requested_name = table_name_for(args);
    let columns: Vec<String> = selected.iter().map(|&i| data.headers[i].clone()).collect();

    let session = ctx.open_session()?;
    let table = session.storage().create_table(&requested_name, &columns)?;
    if table.name != requested_name {
        writeln!(out, "note: table '{}' stored as '{}'", requested_name, table.name)?;
    }
    for (requested, stored) in columns.iter().zip(&table.columns) {
        if requested != stored {
            writeln!(out, "note: column '{}' stored as '{}'", requested, stored)?;
        }
    }

    let rows: Vec<Row> = data
        .records
        .iter()
        .map(|record| {
            let mut row = Row::new();
            for (&index, column) in selected.iter().zip(&table.columns) {
                if let Some(value) = record.get(index) {
                    row.insert(column.clone(), Some(value.clone()));
                }
            }
            row
        })
        .filter(|row| !row.is_empty())
        .collect();

    let inserted = session.storage().save(&table.name, &rows)?;
    session.close()?;

    info!(file = %args.file.display(), table = %table.name, rows = inserted, "Extracted CSV");
    writeln!(out, "Imported {} rows into '{}'", inserted, table.name)?;
    Ok(())
}

/// Header indexes to import, in header order when no subset is given.
fn select_columns(headers: &[String], wanted: &[String]) -> CmdResult<Vec<usize>> {
    if wanted.is_empty() {
        return Ok((0..headers.len()).collect());
    }
    wanted
        .iter()
        .map(|w| {
            headers
                .iter()
                .position(|h| h == w.trim())
                .ok_or_else(|| -> Box<dyn Error> {
                    format!("column '{}' is not in the CSV header", w).into()
                })
        })
        .collect()
}

fn table_name_for(args: &ExtractArgs) -> String {
    args.table.clone().unwrap_or_else(|| {
        args.file
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "imported".to_string())
    })
}

fn tables(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Tables { filter } = command else {
        return Err(mismatch("tables", command));
    };
    let session = ctx.open_session()?;
    let listing = match filter {
        Some(f) => session.storage().get_tables_matching(f)?,
        None => session.storage().get_tables()?,
    };
    session.close()?;
    out.write_all(render::tables(&listing).as_bytes())?;
    Ok(())
}

fn delete(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Delete { table, yes } = command else {
        return Err(mismatch("delete", command));
    };
    if !yes {
        return Err(format!("refusing to delete '{}' without --yes", table).into());
    }
    let session = ctx.open_session()?;
    session.storage().delete_table(table)?;
    session.close()?;
    writeln!(out, "Deleted table '{}'", table)?;
    Ok(())
}

fn purge(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Purge { yes } = command else {
        return Err(mismatch("purge", command));
    };
    if !yes {
        return Err("refusing to purge without --yes".into());
    }
    let session = ctx.open_session()?;
    let removed = session.storage().purge()?;
    session.close()?;
    writeln!(out, "Purged {} tables", removed)?;
    Ok(())
}

fn describe(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Describe { table, description } = command else {
        return Err(mismatch("describe", command));
    };
    let description = Some(description.trim()).filter(|d| !d.is_empty());
    let session = ctx.open_session()?;
    session.storage().update_description(table, description)?;
    session.close()?;
    match description {
        Some(_) => writeln!(out, "Updated description of '{}'", table)?,
        None => writeln!(out, "Cleared description of '{}'", table)?,
    }
    Ok(())
}

fn rename(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Rename { old, new } = command else {
        return Err(mismatch("rename", command));
    };
    let safe_new = ident::sanitize(new);
    if &safe_new != new {
        writeln!(out, "note: new name '{}' stored as '{}'", new, safe_new)?;
    }
    let session = ctx.open_session()?;
    session.storage().rename_table(old, &safe_new)?;
    session.close()?;
    writeln!(out, "Renamed '{}' to '{}'", old, safe_new)?;
    Ok(())
}

fn created_at(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::CreatedAt { table, timestamp } = command else {
        return Err(mismatch("created-at", command));
    };
    let ts = parse_created_at(timestamp)?;
    let session = ctx.open_session()?;
    session.storage().update_created_at(table, ts)?;
    session.close()?;
    writeln!(out, "Set created_at of '{}' to {}", table, ts.to_rfc3339())?;
    Ok(())
}

/// RFC 3339, or a bare `YYYY-MM-DD` taken as midnight UTC.
fn parse_created_at(s: &str) -> CmdResult<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("invalid timestamp '{}': expected RFC 3339 or YYYY-MM-DD", s))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid date '{}'", s))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

// =============================================================================
// Query commands
// =============================================================================

fn sql(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Sql { query, params } = command else {
        return Err(mismatch("sql", command));
    };
    let session = ctx.open_session()?;
    let rows = session.storage().sql(query, params)?;
    session.close()?;
    if rows.is_empty() {
        writeln!(out, "OK")?;
    } else {
        out.write_all(render::rows(&rows).as_bytes())?;
    }
    Ok(())
}

fn search(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Search { value, targets } = command else {
        return Err(mismatch("search", command));
    };
    let targets = SearchTarget::split_tokens(targets);
    let session = ctx.open_session()?;
    let outcome = run_search(session.storage(), value, &targets)?;
    session.close()?;

    if outcome.is_empty() {
        writeln!(out, "No matches for '{}'", value)?;
        return Ok(());
    }
    for (table, rows) in &outcome.results {
        writeln!(out, "== {} ({})", table, rows.len())?;
        out.write_all(render::rows(rows).as_bytes())?;
        writeln!(out)?;
    }
    writeln!(
        out,
        "{} matches in {} ms",
        outcome.total_matches,
        outcome.duration.as_millis()
    )?;
    Ok(())
}

/// A lone bare table name is an explicit request for that table, so it goes
/// through the strict search and an unknown table is an error. Any other
/// target list uses the tolerant batch search.
fn run_search(
    storage: &dyn Storage,
    value: &str,
    targets: &[String],
) -> CmdResult<SearchOutcome> {
    let sole_table = match targets {
        [only] => match SearchTarget::parse(only) {
            Ok(SearchTarget {
                table: TableSelector::Named(name),
                column: None,
            }) => Some(name),
            _ => None,
        },
        _ => None,
    };
    let Some(table) = sole_table else {
        return Ok(storage.search(value, targets)?);
    };

    let started = Instant::now();
    let rows = storage.search_table(value, &table)?;
    let mut outcome = SearchOutcome {
        total_matches: rows.len(),
        ..SearchOutcome::default()
    };
    if !rows.is_empty() {
        outcome.results.insert(table, rows);
    }
    outcome.duration = started.elapsed();
    Ok(outcome)
}

fn export(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Export(args) = command else {
        return Err(mismatch("export", command));
    };
    let request = export_request(&ctx.settings, args)?;

    let session = ctx.open_session()?;
    let rows = session.storage().export_rows(&request)?;
    let headers = if request.columns.is_empty() {
        session
            .storage()
            .get_table(&request.table)?
            .map(|t| t.columns)
            .unwrap_or_default()
    } else {
        request.columns.clone()
    };
    session.close()?;

    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    let records: Vec<Vec<Option<&str>>> = rows.iter().map(|r| r.values().collect()).collect();

    let target = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.csv", request.table)));
    if target.as_os_str() == "-" {
        csvio::write_csv(out, &header_refs, &records)?;
        return Ok(());
    }
    write_export_file(&target, &header_refs, &records)?;
    info!(table = %request.table, rows = rows.len(), path = %target.display(), "Exported table");
    writeln!(out, "Exported {} rows to {}", rows.len(), target.display())?;
    Ok(())
}

fn write_export_file(
    path: &Path,
    headers: &[&str],
    records: &[Vec<Option<&str>>],
) -> CmdResult {
    let mut writer = BufWriter::new(File::create(path)?);
    csvio::write_csv(&mut writer, headers, records)?;
    Ok(())
}

/// Build an export request, resolving `col=@name` against saved filters.
fn export_request(settings: &Settings, args: &ExportArgs) -> CmdResult<ExportRequest> {
    let mut request = ExportRequest::new(args.table.clone())
        .columns(args.columns.iter().map(|c| c.trim().to_string()))
        .distinct(args.distinct)
        .limit(args.limit);

    for raw in &args.filters {
        let (column, pattern) = raw.split_once('=').ok_or_else(|| {
            CatalogError::InvalidFilter(format!("'{}' is not of the form column=regex", raw))
        })?;
        let pattern = match pattern.strip_prefix('@') {
            Some(name) => settings.filter(name).ok_or_else(|| {
                CatalogError::InvalidFilter(format!("no saved filter named '{}'", name))
            })?,
            None => pattern,
        };
        request = request.filter(column.trim(), pattern);
    }
    Ok(request)
}

// =============================================================================
// Settings commands
// =============================================================================

fn settings(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Settings { action } = command else {
        return Err(mismatch("settings", command));
    };
    match action {
        SettingsAction::Show => {
            writeln!(out, "settings file: {}", ctx.settings_path.display())?;
            writeln!(out, "store file:    {}", ctx.db_path.display())?;
            writeln!(
                out,
                "encryption:    {}",
                if ctx.settings.storage.encryption { "on" } else { "off" }
            )?;
            writeln!(out, "log level:     {}", ctx.settings.general.log_level)?;
            writeln!(out, "filters:       {}", ctx.settings.filters.len())?;
        }
        SettingsAction::Dbfile { path } => {
            ctx.settings.storage.db_path = Some(path.clone());
            ctx.save_settings()?;
            writeln!(out, "Store file set to {}", path.display())?;
        }
        SettingsAction::Encryption { state } => {
            let enable = *state == Toggle::On;
            if ctx.settings.storage.encryption == enable {
                writeln!(out, "Encryption is already {}", if enable { "on" } else { "off" })?;
                return Ok(());
            }
            let password = ctx.require_password()?;
            let converted = if enable {
                envelope::encrypt_file_in_place(&ctx.db_path, password)?
            } else {
                envelope::decrypt_file_in_place(&ctx.db_path, password)?
            };
            ctx.settings.storage.encryption = enable;
            ctx.save_settings()?;
            if converted {
                writeln!(
                    out,
                    "{} {}",
                    if enable { "Encrypted" } else { "Decrypted" },
                    ctx.db_path.display()
                )?;
            }
            writeln!(out, "Encryption {}", if enable { "on" } else { "off" })?;
        }
    }
    Ok(())
}

fn filters(ctx: &mut Context, command: &Command, out: &mut dyn Write) -> CmdResult {
    let Command::Filters { action } = command else {
        return Err(mismatch("filters", command));
    };
    match action {
        FiltersAction::List => {
            if ctx.settings.filters.is_empty() {
                writeln!(out, "(no saved filters)")?;
            } else {
                let body: Vec<Vec<String>> = ctx
                    .settings
                    .filters
                    .iter()
                    .map(|(name, pattern)| vec![name.clone(), pattern.clone()])
                    .collect();
                out.write_all(render::grid(&["name", "pattern"], &body).as_bytes())?;
            }
        }
        FiltersAction::Add { name, pattern } => {
            ctx.settings.filters.insert(name.clone(), pattern.clone());
            ctx.save_settings()?;
            writeln!(out, "Saved filter '{}'", name)?;
        }
        FiltersAction::Remove { name } => {
            if ctx.settings.filters.remove(name).is_none() {
                return Err(format!("no saved filter named '{}'", name).into());
            }
            ctx.save_settings()?;
            writeln!(out, "Removed filter '{}'", name)?;
        }
    }
    Ok(())
}
