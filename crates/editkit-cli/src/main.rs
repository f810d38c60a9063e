//! editkit CLI
//!
//! Command-line interface for transactional schema editing

use clap::{Parser, Subcommand, ValueEnum};
use editkit_core::logging_facility::{self, Profile};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "editkit")]
#[command(about = "editkit - merged, transactional schema edits for SQLite", long_about = None)]
struct Cli {
    /// Log output on stderr; RUST_LOG overrides the level
    #[arg(long, value_enum, default_value_t = LogFormat::Dev, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Dev,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a JSON edit script and save the merged result
    Apply(commands::apply::ApplyArgs),
    /// List tables and columns
    Tables(commands::tables::TablesArgs),
}

fn main() {
    let cli = Cli::parse();

    logging_facility::init(match cli.log_format {
        LogFormat::Dev => Profile::Development,
        LogFormat::Json => Profile::Production,
    });

    let result = match cli.command {
        Commands::Apply(args) => commands::apply::execute(args),
        Commands::Tables(args) => commands::tables::execute(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
