//! Storelens CLI: run the e-commerce ETL pipeline from the terminal.

mod commands;

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Storelens: load raw shop exports into an indexed reporting store
#[derive(Parser, Debug)]
#[command(name = "storelens", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (relative config paths resolve against it)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Extract, validate, transform and load
    Run {
        #[command(flatten)]
        sources: SourceArgs,

        /// SQLite database to replace
        #[arg(short, long)]
        database: Option<PathBuf>,

        /// Reference date for tenure (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Extract and validate without writing anything
    Validate {
        #[command(flatten)]
        sources: SourceArgs,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Source file overrides shared by `run` and `validate`.
#[derive(clap::Args, Debug, Default)]
struct SourceArgs {
    /// Delimited customer records
    #[arg(long)]
    customers: Option<PathBuf>,

    /// Delimited order records
    #[arg(long)]
    orders: Option<PathBuf>,

    /// JSON product records
    #[arg(long)]
    products: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write a default .storelens/config.toml into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "storelens", "storelens")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "storelens.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = commands::resolve_workspace(&cli.workspace)?;
    commands::handle_command(cli.command, &workspace)
}
