//! Command bodies shared by the binary and its tests.
//!
//! Everything here takes its database as a [`ConnectionProvider`], so a run
//! against the in-memory store exercises the same path as a real load.

use crate::cli::{ApiArgs, ExportArgs, LoadArgs, SourceKind};
use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use storeload_core::source::{self, ApiClient, ApiConfig, Cancellable, CsvSource, api};
use storeload_core::{
    BatchStatus, ConnectionProvider, LoadOptions, LoadReport, Loader, Operation, RowStream,
    Sanitizer, SanitizerConfig, SchemaRegistry, Strategy, TableDescriptor,
};
use tracing::{debug, info, warn};

/// Builds loader options from `load` flags.
///
/// # Errors
///
/// Returns an error if the chunk size is zero or too large
pub fn load_options(args: &LoadArgs) -> Result<LoadOptions> {
    let strategy = Strategy::from(args.strategy);
    let mut options = LoadOptions::default().with_rejection_policy(args.on_reject.into());
    if let Some(size) = args.chunk_size {
        if strategy == Strategy::Direct {
            warn!("--chunk-size has no effect with the direct strategy");
        }
        options = options.with_chunk_size(strategy, size);
    }
    options.validate().context("invalid load options")?;
    Ok(options)
}

/// API client settings from the shared API flags.
#[must_use]
pub fn api_config(args: &ApiArgs) -> ApiConfig {
    ApiConfig::default()
        .with_base_url(args.api_url.as_str())
        .with_timeout(Duration::from_secs(args.api_timeout))
        .with_max_retries(args.api_retries)
}

/// Resolves `--tables` against the registry, in load order.
///
/// An empty request selects every table.
///
/// # Errors
///
/// Returns an error naming every unknown table
pub fn select_tables(
    registry: &SchemaRegistry,
    requested: &[String],
) -> Result<Vec<Arc<TableDescriptor>>> {
    let unknown: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|name| !registry.contains(name))
        .collect();
    if !unknown.is_empty() {
        bail!("unknown table(s): {}", unknown.join(", "));
    }

    Ok(registry
        .ordered()
        .filter(|table| requested.is_empty() || requested.iter().any(|r| r == table.name()))
        .cloned()
        .collect())
}

/// Opens the CSV file of every selected table found in `dir`.
///
/// Selected tables without a file simply get no input.
///
/// # Errors
///
/// Returns an error if the directory or a file header cannot be read
pub fn csv_streams(
    dir: &Path,
    sanitizer: &Sanitizer,
    tables: &[Arc<TableDescriptor>],
    operation: Operation,
    cancelled: &Arc<AtomicBool>,
) -> Result<HashMap<String, RowStream>> {
    let mut grouped = HashMap::new();
    for (table, path) in source::discover(dir, sanitizer.registry())
        .with_context(|| format!("scanning {}", dir.display()))?
    {
        if !tables.iter().any(|t| t.name() == table.name()) {
            debug!("Ignoring {} (table not selected)", path.display());
            continue;
        }
        let name = table.name().to_string();
        let csv = CsvSource::open(&path, table)
            .with_context(|| format!("opening {}", path.display()))?;
        info!("Reading {} from {}", name, path.display());

        let rows = source::sanitized(
            csv.records(),
            sanitizer.for_table(&name)?.for_operation(operation),
        );
        let stream: RowStream = Box::new(Cancellable::new(rows, Arc::clone(cancelled)));
        grouped.insert(name, stream);
    }

    for table in tables {
        if !grouped.contains_key(table.name()) {
            debug!("No CSV file for table {}", table.name());
        }
    }
    Ok(grouped)
}

/// Fetches the API resource of every selected table.
///
/// # Errors
///
/// Returns an error if an explicitly selected table has no API resource or
/// a fetch fails
pub async fn api_streams(
    client: &ApiClient,
    sanitizer: &Sanitizer,
    tables: &[Arc<TableDescriptor>],
    explicit: bool,
    operation: Operation,
    cancelled: &Arc<AtomicBool>,
) -> Result<HashMap<String, RowStream>> {
    let mappings = api_mappings(tables, explicit)?;
    let mut grouped = HashMap::new();
    for mapping in mappings {
        let payload = client
            .fetch(mapping.resource)
            .await
            .with_context(|| format!("fetching {}", mapping.resource))?;
        let records = mapping.records(payload);
        info!("Fetched {} records from /{}", records.len(), mapping.resource);

        let rows = source::sanitized(
            records,
            sanitizer.for_table(mapping.table)?.for_operation(operation),
        );
        let stream: RowStream = Box::new(Cancellable::new(rows, Arc::clone(cancelled)));
        grouped.insert(mapping.table.to_string(), stream);
    }
    Ok(grouped)
}

/// API resources for the selected tables, in load order.
///
/// Tables the API does not serve are left out unless they were named
/// explicitly, which is an error.
fn api_mappings(
    tables: &[Arc<TableDescriptor>],
    explicit: bool,
) -> Result<Vec<&'static api::ResourceMapping>> {
    let mut mappings = Vec::new();
    let mut unserved = Vec::new();
    for table in tables {
        match api::resources().find(|m| m.table == table.name()) {
            Some(mapping) => mappings.push(mapping),
            None => unserved.push(table.name()),
        }
    }
    if explicit && !unserved.is_empty() {
        bail!("no API resource for table(s): {}", unserved.join(", "));
    }
    Ok(mappings)
}

/// Runs one `load` invocation against `provider`.
///
/// The report is written to `--report` before returning, whatever its
/// contents.
///
/// # Errors
///
/// Returns an error for bad arguments, an unreadable source, or a
/// configuration or connectivity failure during the load
pub async fn run_load(
    provider: &dyn ConnectionProvider,
    args: &LoadArgs,
    cancelled: Arc<AtomicBool>,
) -> Result<LoadReport> {
    let registry = Arc::new(SchemaRegistry::store_schema()?);
    let sanitizer = Sanitizer::new(Arc::clone(&registry), SanitizerConfig::default())?;
    let loader = Loader::new(Arc::clone(&registry), load_options(args)?)?;
    let operation = Operation::from(args.operation);
    let strategy = Strategy::from(args.strategy);
    let tables = select_tables(&registry, &args.tables)?;

    let grouped = match args.source {
        SourceKind::Csv => {
            csv_streams(&args.csv_dir, &sanitizer, &tables, operation, &cancelled)?
        }
        SourceKind::Api => {
            let client = ApiClient::new(api_config(&args.api))?;
            let explicit = !args.tables.is_empty();
            api_streams(&client, &sanitizer, &tables, explicit, operation, &cancelled).await?
        }
    };

    info!(
        "Starting {} load of {} table(s) into {}",
        operation,
        grouped.len(),
        provider.describe()
    );
    let mut report = loader
        .load_all_with(provider, grouped, strategy, operation)
        .await?;
    if cancelled.load(Ordering::Relaxed) {
        warn!(run_id = %report.run_id, "Load interrupted; remaining input was not read");
        report.mark_cancelled();
    }

    if let Some(path) = &args.report {
        write_report(&report, path)?;
        info!("Report written to {}", path.display());
    }
    Ok(report)
}

fn write_report(report: &LoadReport, path: &Path) -> Result<()> {
    let json = report.to_json()?;
    std::fs::write(path, json).with_context(|| format!("writing report {}", path.display()))
}

/// One line per table plus totals.
#[must_use]
pub fn render_summary(report: &LoadReport) -> String {
    let mut out = String::new();
    for result in &report.results {
        let status = match &result.status {
            BatchStatus::Completed if result.is_partial() => "partial".to_string(),
            BatchStatus::Completed => "ok".to_string(),
            BatchStatus::Halted => "halted".to_string(),
            BatchStatus::Skipped { blocked_by } => format!("skipped ({})", blocked_by.join(", ")),
        };
        let _ = writeln!(
            out,
            "{:<12} {:<8} attempted={} applied={} rejected={} failed={}",
            result.table, status, result.attempted, result.inserted, result.rejected, result.failed
        );
    }
    if report.cancelled {
        let _ = writeln!(out, "Interrupted before all input was read");
    }
    let _ = write!(
        out,
        "Total: attempted={} applied={} rejected={} failed={}",
        report.total_attempted(),
        report.total_inserted(),
        report.total_rejected(),
        report.total_failed()
    );
    out
}

/// Table names in load order, one per line.
#[must_use]
pub fn render_order(registry: &SchemaRegistry) -> String {
    registry
        .ordered()
        .enumerate()
        .map(|(i, table)| {
            let parents: Vec<String> = table
                .foreign_keys()
                .iter()
                .map(|fk| fk.references_table.clone())
                .filter(|parent| parent != table.name())
                .collect();
            if parents.is_empty() {
                format!("{}. {}", i + 1, table.name())
            } else {
                format!("{}. {} <- {}", i + 1, table.name(), parents.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of exporting one API resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedTable {
    pub table: String,
    pub path: PathBuf,
    pub written: usize,
    pub rejected: usize,
}

/// Fetches API resources and writes each as `<table>.csv` under the output
/// directory, so the files can later be loaded with `--source csv`.
///
/// Rows the sanitizer rejects are logged and left out.
///
/// # Errors
///
/// Returns an error if a fetch fails or a file cannot be written
pub async fn run_export(args: &ExportArgs) -> Result<Vec<ExportedTable>> {
    let registry = Arc::new(SchemaRegistry::store_schema()?);
    let sanitizer = Sanitizer::new(Arc::clone(&registry), SanitizerConfig::default())?;
    let tables = select_tables(&registry, &args.tables)?;
    let mappings = api_mappings(&tables, !args.tables.is_empty())?;
    let client = ApiClient::new(api_config(&args.api))?;

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let mut exported = Vec::new();
    for mapping in mappings {
        let payload = client
            .fetch(mapping.resource)
            .await
            .with_context(|| format!("fetching {}", mapping.resource))?;
        let table_sanitizer = sanitizer.for_table(mapping.table)?;

        let mut rows = Vec::new();
        let mut rejected = 0;
        for sanitized in source::sanitized(mapping.records(payload), table_sanitizer.clone()) {
            match sanitized {
                Ok(row) => rows.push(row),
                Err(rejection) => {
                    warn!("Skipping {}: {}", mapping.resource, rejection);
                    rejected += 1;
                }
            }
        }

        let path = args.output_dir.join(format!("{}.csv", mapping.table));
        let written = source::csv::write_rows(&path, table_sanitizer.table(), &rows)?;
        info!("Wrote {} rows to {}", written, path.display());
        exported.push(ExportedTable {
            table: mapping.table.to_string(),
            path,
            written,
            rejected,
        });
    }
    Ok(exported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::store_schema().unwrap()
    }

    #[test]
    fn test_select_tables_keeps_load_order() {
        let registry = registry();
        let requested = vec!["stocks".to_string(), "brands".to_string()];
        let names: Vec<String> = select_tables(&registry, &requested)
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["brands", "stocks"]);
        assert_eq!(select_tables(&registry, &[]).unwrap().len(), 9);
    }

    #[test]
    fn test_select_tables_rejects_unknown() {
        let error = select_tables(&registry(), &["brand".to_string(), "shops".to_string()])
            .unwrap_err();
        assert_eq!(error.to_string(), "unknown table(s): brand, shops");
    }

    #[test]
    fn test_api_mappings_for_all_tables_skip_unserved() {
        let registry = registry();
        let mappings = api_mappings(&select_tables(&registry, &[]).unwrap(), false).unwrap();
        let tables: Vec<&str> = mappings.iter().map(|m| m.table).collect();
        assert_eq!(tables, vec!["orders", "order_items", "customers"]);
    }

    #[test]
    fn test_api_mappings_reject_explicit_unserved_table() {
        let registry = registry();
        let tables = select_tables(&registry, &["customers".to_string()]).unwrap();
        assert_eq!(api_mappings(&tables, true).unwrap().len(), 1);

        let tables = select_tables(&registry, &["brands".to_string()]).unwrap();
        let error = api_mappings(&tables, true).unwrap_err();
        assert!(error.to_string().contains("brands"));
    }

    #[test]
    fn test_render_order_lists_parents() {
        let order = render_order(&registry());
        let lines: Vec<&str> = order.lines().collect();
        assert_eq!(lines.len(), 9);
        assert_eq!(lines[0], "1. brands");
        assert!(lines.iter().any(|l| l.starts_with("6. stocks <- ")));
    }
}
