//! Command-line argument definitions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use storeload_core::logging::LogFormat;
use storeload_core::{Operation, RejectionPolicy, Strategy};

/// Default base URL of the store API.
pub const DEFAULT_API_URL: &str = "https://etl-server.fly.dev";

#[derive(Parser, Debug)]
#[command(name = "storeload")]
#[command(about = "Load CSV files and API payloads into the store database")]
#[command(version)]
#[command(long_about = "
storeload - bike store data loader

Reads one CSV file per table, or the customers/orders/order_items resources
of the store API, cleans every row against the store schema and writes the
tables in foreign-key order.

FAILURE HANDLING:
- Rows with missing or malformed required values are rejected and reported
- Rows the database refuses are isolated and reported; the rest still load
- Only configuration and connectivity problems stop a run

DATABASE URL SOURCES (first match wins):
- --database-url
- DATABASE_URL environment variable
- --database-url-file

EXAMPLES:
  storeload init
  storeload load --csv-dir ./data
  storeload load --source api --tables customers,orders --operation upsert
  storeload load --dry-run --csv-dir ./data --report report.json
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Database connection URL
    #[arg(
        long,
        global = true,
        help = "MySQL connection string (credentials will be sanitized in logs)"
    )]
    pub database_url: Option<String>,

    /// File holding the database connection URL
    #[arg(long, value_name = "FILE", global = true)]
    pub database_url_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load rows from CSV files or the API
    Load(LoadArgs),
    /// Create the store tables if they do not exist
    Init,
    /// Print the row count of every table
    Counts(CountsArgs),
    /// Test the database connection
    Test,
    /// Print the table load order
    Order,
    /// Fetch API resources and write them as CSV files
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,

    /// Log event format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Where rows come from
    #[arg(long, value_enum, default_value_t = SourceKind::Csv)]
    pub source: SourceKind,

    /// Directory holding `<table>.csv` files
    #[arg(long, value_name = "DIR", default_value = "data")]
    pub csv_dir: PathBuf,

    #[command(flatten)]
    pub api: ApiArgs,

    /// Restrict the run to these tables
    #[arg(long, value_delimiter = ',', help = "Comma-separated list of tables to load")]
    pub tables: Vec<String>,

    #[arg(long, value_enum, default_value_t = StrategyArg::Standard)]
    pub strategy: StrategyArg,

    #[arg(long, value_enum, default_value_t = OperationArg::Insert)]
    pub operation: OperationArg,

    /// Rows per statement for the chosen strategy
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// What a rejected row does to its table
    #[arg(long, value_enum, default_value_t = RejectArg::Skip)]
    pub on_reject: RejectArg,

    /// Exit with status 2 when rejected plus failed rows exceed N
    #[arg(long, value_name = "N")]
    pub max_failures: Option<u64>,

    /// Write the JSON load report to FILE
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Load into an in-memory store instead of the database
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ApiArgs {
    /// Base URL of the store API
    #[arg(long, env = "STORELOAD_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub api_timeout: u64,

    /// Retries for server errors and timeouts
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub api_retries: u32,
}

#[derive(Args, Debug, Clone)]
pub struct CountsArgs {
    /// Print counts as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    /// Directory the CSV files are written to
    #[arg(long, value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Restrict the export to these tables
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Csv,
    Api,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyArg {
    Standard,
    Streaming,
    Direct,
}

impl From<StrategyArg> for Strategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Standard => Self::Standard,
            StrategyArg::Streaming => Self::Streaming,
            StrategyArg::Direct => Self::Direct,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationArg {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl From<OperationArg> for Operation {
    fn from(value: OperationArg) -> Self {
        match value {
            OperationArg::Insert => Self::Insert,
            OperationArg::Update => Self::Update,
            OperationArg::Upsert => Self::Upsert,
            OperationArg::Delete => Self::Delete,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectArg {
    Skip,
    Abort,
}

impl From<RejectArg> for RejectionPolicy {
    fn from(value: RejectArg) -> Self {
        match value {
            RejectArg::Skip => Self::Skip,
            RejectArg::Abort => Self::Abort,
        }
    }
}
