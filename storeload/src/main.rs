//! storeload command-line entry point.
//!
//! # Guarantees
//! - Tables are written parents first; deletes run children first
//! - A bad row is reported, never fatal; exit status 1 is reserved for
//!   configuration, connectivity and source errors
//! - An interrupted load exits with status 130, never 0
//! - Database credentials are never printed or logged

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use storeload::cli::{Cli, Command, CountsArgs, LoadArgs};
use storeload::{
    EXIT_FAILURE_THRESHOLD, EXIT_FATAL, EXIT_SUCCESS, commands, exit_code_for, get_database_url,
};
use storeload_core::error::redact_database_url;
use storeload_core::logging::init_logging;
use storeload_core::{ConnectionProvider, MemoryProvider, SchemaRegistry};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(
        cli.global.verbose,
        cli.global.quiet,
        cli.global.log_format.into(),
    ) {
        eprintln!("Error: {e}");
        std::process::exit(EXIT_FATAL);
    }

    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Load(args) => load(cli, args).await,
        Command::Init => init(cli).await.map(|()| EXIT_SUCCESS),
        Command::Counts(args) => counts(cli, args).await.map(|()| EXIT_SUCCESS),
        Command::Test => test_connection(cli).await.map(|()| EXIT_SUCCESS),
        Command::Order => {
            let registry = SchemaRegistry::store_schema()?;
            println!("{}", commands::render_order(&registry));
            Ok(EXIT_SUCCESS)
        }
        Command::Export(args) => {
            for table in commands::run_export(args).await? {
                println!(
                    "{}: {} rows written to {} ({} rejected)",
                    table.table,
                    table.written,
                    table.path.display(),
                    table.rejected
                );
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

fn database_url(cli: &Cli) -> Result<String> {
    let (url, source) = get_database_url(
        cli.database_url.as_deref(),
        cli.database_url_file.as_deref(),
    )
    .map_err(|e| anyhow!(e))?;
    info!(
        "Target: {} (from {:?})",
        redact_database_url(&url),
        source
    );
    Ok(url)
}

/// Runs the load on its own task; Ctrl-C stops reading input and lets the
/// pending chunk finish.
async fn load(cli: &Cli, args: &LoadArgs) -> Result<i32> {
    let provider = open_provider(cli, args.dry_run).await?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current chunk");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let task_args = args.clone();
    let task = tokio::spawn(async move {
        commands::run_load(provider.as_ref(), &task_args, cancelled).await
    });
    let report = task.await.context("load task failed")??;

    println!("{}", commands::render_summary(&report));
    if report.cancelled {
        warn!("Load interrupted after {} rows", report.total_attempted());
    } else if report.is_partial() {
        warn!("Load finished with {} failed rows", report.failure_count());
    } else {
        info!("✓ Load completed");
    }

    let code = exit_code_for(&report, args.max_failures);
    if code == EXIT_FAILURE_THRESHOLD {
        error!(
            "{} failed rows exceed --max-failures {}",
            report.failure_count(),
            args.max_failures.unwrap_or_default()
        );
    }
    Ok(code)
}

async fn open_provider(cli: &Cli, dry_run: bool) -> Result<Arc<dyn ConnectionProvider>> {
    if dry_run {
        info!("Dry run: loading into an in-memory store");
        let registry = Arc::new(SchemaRegistry::store_schema()?);
        return Ok(Arc::new(MemoryProvider::new(registry)));
    }
    Ok(Arc::new(mysql::connect(cli).await?))
}

async fn init(cli: &Cli) -> Result<()> {
    let provider = mysql::connect(cli).await?;
    let registry = SchemaRegistry::store_schema()?;
    let created = mysql::create_tables(&provider, &registry).await?;
    println!("{created} tables ensured");
    Ok(())
}

async fn counts(cli: &Cli, args: &CountsArgs) -> Result<()> {
    let provider = mysql::connect(cli).await?;
    let registry = SchemaRegistry::store_schema()?;
    let counts = mysql::table_counts(&provider, &registry).await?;
    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|(table, count)| (table, count.into()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (table, count) in counts {
            println!("{table:<12} {count}");
        }
    }
    Ok(())
}

async fn test_connection(cli: &Cli) -> Result<()> {
    info!("Testing database connection...");
    let provider = mysql::connect(cli).await?;
    mysql::test(&provider).await?;
    info!("✓ Connection test successful");
    println!("Connection to {} successful", provider.describe());
    Ok(())
}

#[cfg(feature = "mysql")]
mod mysql {
    use super::{Cli, database_url};
    use anyhow::Result;
    use storeload_core::SchemaRegistry;
    pub(super) use storeload_core::provider::MySqlProvider as Provider;

    pub(super) async fn connect(cli: &Cli) -> Result<Provider> {
        Ok(Provider::connect(&database_url(cli)?).await?)
    }

    pub(super) async fn test(provider: &Provider) -> Result<()> {
        Ok(provider.test_connection().await?)
    }

    pub(super) async fn create_tables(provider: &Provider, registry: &SchemaRegistry) -> Result<usize> {
        Ok(provider.create_tables(registry).await?)
    }

    pub(super) async fn table_counts(
        provider: &Provider,
        registry: &SchemaRegistry,
    ) -> Result<Vec<(String, u64)>> {
        Ok(provider.table_counts(registry).await?)
    }
}

#[cfg(not(feature = "mysql"))]
mod mysql {
    use super::Cli;
    use anyhow::{Result, bail};
    use storeload_core::SchemaRegistry;
    pub(super) use storeload_core::MemoryProvider as Provider;

    const DISABLED: &str = "storeload was built without the `mysql` feature; only --dry-run loads are available";

    pub(super) async fn connect(_cli: &Cli) -> Result<Provider> {
        bail!(DISABLED)
    }

    pub(super) async fn test(_provider: &Provider) -> Result<()> {
        bail!(DISABLED)
    }

    pub(super) async fn create_tables(_provider: &Provider, _registry: &SchemaRegistry) -> Result<usize> {
        bail!(DISABLED)
    }

    pub(super) async fn table_counts(
        _provider: &Provider,
        _registry: &SchemaRegistry,
    ) -> Result<Vec<(String, u64)>> {
        bail!(DISABLED)
    }
}
