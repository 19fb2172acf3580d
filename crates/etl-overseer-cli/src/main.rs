mod commands;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::journal::JournalSubcommand;
use commands::run::RunArgs;
use commands::table::TableSubcommand;
use logging::LogFormat;

#[derive(Parser)]
#[command(
    name = "etl-overseer",
    about = "Run configuration-driven ETL pipelines with incremental journaling",
    version,
    propagate_version = true
)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pipelines or individual actions over a date range
    Run(RunArgs),

    /// Show pipelines and their resolved action order
    List {
        /// Configuration file
        #[arg(short, long, env = "ETL_OVERSEER_CONFIG")]
        config: PathBuf,
    },

    /// Inspect or reset journal watermarks
    Journal {
        /// Configuration file
        #[arg(short, long, env = "ETL_OVERSEER_CONFIG")]
        config: PathBuf,

        #[command(subcommand)]
        subcommand: JournalSubcommand,
    },

    /// Print DDL for table definition files
    Table {
        #[command(subcommand)]
        subcommand: TableSubcommand,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose, cli.log_format) {
        eprintln!("error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.json),
        Commands::List { config } => commands::list::run(&config, cli.json).map(|_| true),
        Commands::Journal { config, subcommand } => {
            commands::journal::run(&config, subcommand, cli.json).map(|_| true)
        }
        Commands::Table { subcommand } => commands::table::run(subcommand, cli.json).map(|_| true),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}
