//! Batch load orchestrator.
//!
//! # Module Structure
//! - `options`: [`LoadOptions`], [`Strategy`] and [`RejectionPolicy`]
//! - `result`: [`LoadResult`] and [`LoadReport`] accounting
//!
//! A batch is consumed lazily, exactly once. Valid rows collect into chunks
//! sized by the strategy; each chunk is submitted as one statement (or one
//! transaction). When a chunk fails on a constraint it is replayed row by row
//! so only the offending rows are recorded. Connectivity and configuration
//! errors abort the call. A connection is acquired on the first submission
//! and released when the call returns, whatever the outcome.

pub mod options;
pub mod result;

use crate::Result;
use crate::error::LoadError;
use crate::models::{Operation, Row, Sanitized, Value};
use crate::provider::{ConnectionProvider, LoadConnection, Statement};
use crate::schema::{SchemaRegistry, TableDescriptor};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use options::{LoadOptions, RejectionPolicy, Strategy};
pub use result::{BatchStatus, FailureCause, LoadReport, LoadResult, RowFailure};

/// A lazily consumed stream of sanitized rows for one table.
pub type RowStream = Box<dyn Iterator<Item = Sanitized> + Send>;

/// Connection acquired on first use.
struct LazyConnection<'p> {
    provider: &'p dyn ConnectionProvider,
    handle: Option<Box<dyn LoadConnection>>,
}

impl<'p> LazyConnection<'p> {
    fn new(provider: &'p dyn ConnectionProvider) -> Self {
        Self {
            provider,
            handle: None,
        }
    }

    async fn get(&mut self) -> Result<&mut Box<dyn LoadConnection>> {
        if self.handle.is_none() {
            debug!("Acquiring connection to {}", self.provider.describe());
            self.handle = Some(self.provider.acquire().await?);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| LoadError::connectivity("connection handle unavailable"))
    }
}

/// Loads sanitized rows through a caller-supplied [`ConnectionProvider`].
///
/// # Example
/// ```rust,no_run
/// use std::sync::Arc;
/// use storeload_core::loader::{LoadOptions, Loader, Strategy};
/// use storeload_core::provider::MemoryProvider;
/// use storeload_core::schema::SchemaRegistry;
///
/// # async fn example() -> storeload_core::Result<()> {
/// let registry = Arc::new(SchemaRegistry::store_schema()?);
/// let provider = MemoryProvider::new(Arc::clone(&registry));
/// let loader = Loader::new(registry, LoadOptions::default())?;
/// let result = loader
///     .load(&provider, "brands", Vec::new(), Strategy::Standard)
///     .await?;
/// assert_eq!(result.attempted, 0);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Loader {
    registry: Arc<SchemaRegistry>,
    options: LoadOptions,
}

impl Loader {
    /// # Errors
    /// Returns error if the options are invalid
    pub fn new(registry: Arc<SchemaRegistry>, options: LoadOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { registry, options })
    }

    /// Schema every load is checked against.
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Validated options in effect for this loader.
    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Inserts one table's rows.
    ///
    /// # Errors
    /// Returns error for an unknown table, a row built for another table, or
    /// a connectivity failure
    pub async fn load<I>(
        &self,
        provider: &dyn ConnectionProvider,
        table: &str,
        rows: I,
        strategy: Strategy,
    ) -> Result<LoadResult>
    where
        I: IntoIterator<Item = Sanitized>,
        I::IntoIter: Send,
    {
        self.load_with(provider, table, rows, strategy, Operation::Insert)
            .await
    }

    /// Applies `operation` to one table's rows.
    ///
    /// # Errors
    /// Returns error for an unknown table, a row built for another table, or
    /// a connectivity failure
    pub async fn load_with<I>(
        &self,
        provider: &dyn ConnectionProvider,
        table: &str,
        rows: I,
        strategy: Strategy,
        operation: Operation,
    ) -> Result<LoadResult>
    where
        I: IntoIterator<Item = Sanitized>,
        I::IntoIter: Send,
    {
        let descriptor = Arc::clone(self.registry.describe(table)?);
        let mut connection = LazyConnection::new(provider);
        self.run_batch(
            &mut connection,
            &descriptor,
            rows.into_iter(),
            strategy,
            operation,
        )
        .await
    }

    /// Inserts several tables' rows in dependency order.
    ///
    /// # Errors
    /// Returns error for an unknown table name or a connectivity failure
    pub async fn load_all(
        &self,
        provider: &dyn ConnectionProvider,
        grouped: HashMap<String, RowStream>,
        strategy: Strategy,
    ) -> Result<LoadReport> {
        self.load_all_with(provider, grouped, strategy, Operation::Insert)
            .await
    }

    /// Applies `operation` to several tables' rows.
    ///
    /// Every registry table gets a result, in processing order: load order,
    /// or reverse load order for deletes. A table whose required parent was
    /// wholly unsuccessful in this call is skipped.
    ///
    /// # Errors
    /// Returns error for an unknown table name (before any work) or a
    /// connectivity failure
    pub async fn load_all_with(
        &self,
        provider: &dyn ConnectionProvider,
        mut grouped: HashMap<String, RowStream>,
        strategy: Strategy,
        operation: Operation,
    ) -> Result<LoadReport> {
        let mut unknown: Vec<&str> = grouped
            .keys()
            .map(String::as_str)
            .filter(|name| !self.registry.contains(name))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(LoadError::configuration(format!(
                "no table descriptor for: {}",
                unknown.join(", ")
            )));
        }

        let tables: Vec<Arc<TableDescriptor>> = if operation == Operation::Delete {
            self.registry.ordered().rev().cloned().collect()
        } else {
            self.registry.ordered().cloned().collect()
        };

        let mut report = LoadReport::new(strategy, operation);
        info!(
            run_id = %report.run_id,
            %strategy,
            %operation,
            tables = grouped.len(),
            "Starting load"
        );

        let mut connection = LazyConnection::new(provider);
        for table in tables {
            let rows = grouped.remove(table.name());

            if operation != Operation::Delete {
                let blocked_by: Vec<String> = table
                    .required_dependencies()
                    .into_iter()
                    .filter(|dependency| {
                        report
                            .get(dependency)
                            .is_some_and(LoadResult::is_wholly_failed)
                    })
                    .map(str::to_string)
                    .collect();
                if !blocked_by.is_empty() {
                    warn!(
                        table = %table.name(),
                        blocked_by = %blocked_by.join(", "),
                        "Skipping table: required dependency loaded nothing"
                    );
                    report.results.push(LoadResult::skipped(
                        table.name(),
                        operation,
                        strategy,
                        blocked_by,
                    ));
                    continue;
                }
            }

            let result = match rows {
                Some(rows) => {
                    self.run_batch(&mut connection, &table, rows, strategy, operation)
                        .await?
                }
                None => LoadResult::new(table.name(), operation, strategy),
            };
            report.results.push(result);
        }

        info!(
            run_id = %report.run_id,
            attempted = report.total_attempted(),
            inserted = report.total_inserted(),
            rejected = report.total_rejected(),
            failed = report.total_failed(),
            "Load finished"
        );
        Ok(report)
    }

    /// Rows per submission for `table`, within the placeholder limit.
    fn chunk_size(&self, table: &TableDescriptor, strategy: Strategy) -> usize {
        let configured = strategy.chunk_size(&self.options).max(1);
        let width = table.columns().len().max(1);
        configured.min((options::MAX_PLACEHOLDERS / width).max(1))
    }

    async fn run_batch(
        &self,
        connection: &mut LazyConnection<'_>,
        table: &TableDescriptor,
        rows: impl Iterator<Item = Sanitized> + Send,
        strategy: Strategy,
        operation: Operation,
    ) -> Result<LoadResult> {
        let started = Instant::now();
        let chunk_size = self.chunk_size(table, strategy);
        let mut result = LoadResult::new(table.name(), operation, strategy);
        let mut pending: Vec<Row> = Vec::with_capacity(chunk_size);

        debug!(
            table = %table.name(),
            %strategy,
            %operation,
            chunk_size,
            "Starting batch"
        );

        for item in rows {
            result.attempted += 1;
            match item {
                Ok(row) => {
                    if row.table_name() != table.name() {
                        return Err(LoadError::configuration(format!(
                            "row for '{}' submitted in a '{}' batch",
                            row.table_name(),
                            table.name()
                        )));
                    }
                    pending.push(row);
                    if pending.len() >= chunk_size {
                        self.flush(connection, table, &mut pending, strategy, operation, &mut result)
                            .await?;
                    }
                }
                Err(rejection) => {
                    debug!(table = %table.name(), "Rejected {}", rejection);
                    result.record_rejection(rejection, self.options.max_recorded_failures);
                    if self.options.rejection_policy == RejectionPolicy::Abort {
                        self.flush(connection, table, &mut pending, strategy, operation, &mut result)
                            .await?;
                        result.status = BatchStatus::Halted;
                        warn!(
                            table = %table.name(),
                            after = result.attempted,
                            "Batch halted on rejected row"
                        );
                        break;
                    }
                }
            }
        }
        self.flush(connection, table, &mut pending, strategy, operation, &mut result)
            .await?;

        result.elapsed = started.elapsed();
        info!(
            table = %table.name(),
            attempted = result.attempted,
            inserted = result.inserted,
            rejected = result.rejected,
            failed = result.failed,
            elapsed_ms = u64::try_from(result.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Loaded {}",
            table.name()
        );
        Ok(result)
    }

    /// Submits pending rows, isolating constraint failures row by row.
    async fn flush(
        &self,
        connection: &mut LazyConnection<'_>,
        table: &TableDescriptor,
        pending: &mut Vec<Row>,
        strategy: Strategy,
        operation: Operation,
        result: &mut LoadResult,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(pending);

        match submit(connection, table, &rows, strategy, operation).await {
            Ok(affected) => {
                debug!(table = %table.name(), rows = rows.len(), affected, "Chunk applied");
                result.inserted += rows.len() as u64;
                result.affected_rows += affected;
                Ok(())
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                if rows.len() > 1 {
                    warn!(
                        table = %table.name(),
                        rows = rows.len(),
                        "Chunk refused ({}); retrying rows individually",
                        error
                    );
                    self.isolate(connection, table, &rows, operation, result)
                        .await
                } else {
                    self.record(&rows[0], &error, result);
                    Ok(())
                }
            }
        }
    }

    async fn isolate(
        &self,
        connection: &mut LazyConnection<'_>,
        table: &TableDescriptor,
        rows: &[Row],
        operation: Operation,
        result: &mut LoadResult,
    ) -> Result<()> {
        for row in rows {
            match submit(
                connection,
                table,
                std::slice::from_ref(row),
                Strategy::Direct,
                operation,
            )
            .await
            {
                Ok(affected) => {
                    result.inserted += 1;
                    result.affected_rows += affected;
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => self.record(row, &error, result),
            }
        }
        Ok(())
    }

    fn record(&self, row: &Row, error: &LoadError, result: &mut LoadResult) {
        let kind = error
            .constraint_kind()
            .unwrap_or(crate::error::ConstraintKind::Other);
        debug!(table = %row.table_name(), row = %row.id(), "Row refused: {}", kind);
        result.record_constraint(row, kind, self.options.max_recorded_failures);
    }
}

/// Hands one chunk to the connection in the strategy's submission mode.
async fn submit(
    connection: &mut LazyConnection<'_>,
    table: &TableDescriptor,
    rows: &[Row],
    strategy: Strategy,
    operation: Operation,
) -> Result<u64> {
    let handle = connection.get().await?;
    match (strategy, operation) {
        (Strategy::Standard, Operation::Insert | Operation::Upsert) => {
            let statement = Statement::multi_row(table, operation, rows.len());
            let params: Vec<Value> = rows.iter().flat_map(|row| statement.params(row)).collect();
            handle.execute(&statement, &params).await
        }
        (Strategy::Standard | Strategy::Streaming, _) => {
            let statement = Statement::new(table, operation);
            let params: Vec<Vec<Value>> = rows.iter().map(|row| statement.params(row)).collect();
            handle.execute_many(&statement, &params).await
        }
        (Strategy::Direct, _) => {
            let statement = Statement::new(table, operation);
            let mut affected = 0;
            for row in rows {
                affected += handle.execute(&statement, &statement.params(row)).await?;
            }
            Ok(affected)
        }
    }
}
