//! csvcatalog binary - composition root.
//!
//! 1. Parse CLI arguments
//! 2. Load settings from TOML
//! 3. Initialize tracing (stderr; stdout is the user interface)
//! 4. Resolve the store path and password
//! 5. Dispatch the subcommand through the handler table

mod cli;
mod commands;
mod csvio;
mod render;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use csvcatalog_core::config::Settings;

use crate::cli::CliArgs;
use crate::commands::Context;

/// Filter priority: --log-level > RUST_LOG > settings > warn.
fn init_tracing(args: &CliArgs, settings: &Settings) {
    let from_env = if args.log_level.is_none() {
        EnvFilter::try_from_default_env().ok()
    } else {
        None
    };
    let filter = from_env
        .or_else(|| EnvFilter::try_new(args.resolve_log_level(settings)).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Settings.
    let settings_path = args.resolve_config_path();
    let settings = Settings::load_or_default(&settings_path);

    init_tracing(&args, &settings);
    tracing::debug!("Starting csvcatalog v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!(path = %settings_path.display(), "Settings resolved");

    // Store.
    let db_path = args.resolve_db_path(&settings);
    tracing::debug!(
        path = %db_path.display(),
        encrypted = settings.storage.encryption,
        "Store resolved"
    );

    let mut ctx = Context {
        password: args.resolve_password(),
        settings,
        settings_path,
        db_path,
    };

    let registry = commands::registry();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match registry.dispatch(&mut ctx, &args.command, &mut out) {
        Ok(()) => {
            let _ = out.flush();
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = out.flush();
            tracing::debug!(command = args.command.name(), error = ?e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
