//! update-mime-database: merge the MIME-info fragments in MIME-DIR/packages
//! into the compiled database files under MIME-DIR.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mimedb::update_mime_database;

/// Update the MIME database in MIME-DIR from the fragments in MIME-DIR/packages.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Database root; must contain a `packages` subdirectory of fragment files.
    mime_dir: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();

    let args = Args::parse();
    println!("***\n* Updating MIME database in {}...", args.mime_dir.display());

    match update_mime_database(&args.mime_dir) {
        Ok(()) => {
            println!("***");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("update-mime-database: {}", err);
            ExitCode::FAILURE
        }
    }
}
