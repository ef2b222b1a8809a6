//! Per-table load results and the per-invocation report.

use super::options::Strategy;
use crate::Result;
use crate::error::{ConstraintKind, LoadError};
use crate::models::{Operation, Rejection, RejectionCause, Row, RowId};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// How a table's batch ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every input row was processed
    Completed,
    /// A rejection stopped the batch under the abort policy
    Halted,
    /// Not started because a required dependency loaded nothing
    Skipped { blocked_by: Vec<String> },
}

/// Why a row did not land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureCause {
    /// The sanitizer refused the row
    Rejected { cause: RejectionCause },
    /// The database refused the row
    Constraint { kind: ConstraintKind },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { cause } => write!(f, "rejected: {cause}"),
            Self::Constraint { kind } => write!(f, "database refused row: {kind}"),
        }
    }
}

/// One row that did not land, with where and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub row: RowId,
    /// Offending column, when the failure is tied to one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub cause: FailureCause,
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}: column '{}': {}", self.row, column, self.cause),
            None => write!(f, "{}: {}", self.row, self.cause),
        }
    }
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u128(elapsed.as_millis())
}

/// Outcome of loading one table.
///
/// For a completed batch `attempted == inserted + rejected + failed`.
/// `inserted` counts rows the database accepted for the batch's operation,
/// so it also covers updated, upserted and deleted rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadResult {
    /// Target table
    pub table: String,
    pub operation: Operation,
    pub strategy: Strategy,
    /// Outcome of the batch as a whole
    pub status: BatchStatus,
    /// Input rows seen
    pub attempted: u64,
    /// Rows the database accepted
    pub inserted: u64,
    /// Rows the sanitizer refused
    pub rejected: u64,
    /// Rows the database refused
    pub failed: u64,
    /// Rows the database reported as changed
    pub affected_rows: u64,
    /// Recorded failures, up to the configured cap
    pub failures: Vec<RowFailure>,
    /// More failures happened than were recorded
    pub failures_truncated: bool,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl LoadResult {
    pub(crate) fn new(table: &str, operation: Operation, strategy: Strategy) -> Self {
        Self {
            table: table.to_string(),
            operation,
            strategy,
            status: BatchStatus::Completed,
            attempted: 0,
            inserted: 0,
            rejected: 0,
            failed: 0,
            affected_rows: 0,
            failures: Vec::new(),
            failures_truncated: false,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn skipped(
        table: &str,
        operation: Operation,
        strategy: Strategy,
        blocked_by: Vec<String>,
    ) -> Self {
        Self {
            status: BatchStatus::Skipped { blocked_by },
            ..Self::new(table, operation, strategy)
        }
    }

    pub(crate) fn record_rejection(&mut self, rejection: Rejection, cap: usize) {
        self.rejected += 1;
        self.push_failure(
            RowFailure {
                row: rejection.row,
                column: rejection.column,
                cause: FailureCause::Rejected {
                    cause: rejection.cause,
                },
            },
            cap,
        );
    }

    pub(crate) fn record_constraint(&mut self, row: &Row, kind: ConstraintKind, cap: usize) {
        self.failed += 1;
        self.push_failure(
            RowFailure {
                row: row.id(),
                column: None,
                cause: FailureCause::Constraint { kind },
            },
            cap,
        );
    }

    fn push_failure(&mut self, failure: RowFailure, cap: usize) {
        if self.failures.len() < cap {
            self.failures.push(failure);
        } else {
            self.failures_truncated = true;
        }
    }

    /// Rejected plus failed rows.
    pub fn failure_count(&self) -> u64 {
        self.rejected + self.failed
    }

    /// Some rows landed and some did not.
    pub fn is_partial(&self) -> bool {
        self.inserted > 0 && self.failure_count() > 0
    }

    /// Nothing landed although there was input, or the table was skipped.
    pub fn is_wholly_failed(&self) -> bool {
        matches!(self.status, BatchStatus::Skipped { .. })
            || (self.attempted > 0 && self.inserted == 0)
    }

    /// Not started because a required parent loaded nothing.
    pub fn is_skipped(&self) -> bool {
        matches!(self.status, BatchStatus::Skipped { .. })
    }
}

/// Results of one `load_all` invocation, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Unique id of this invocation, for correlating logs
    pub run_id: Uuid,
    pub strategy: Strategy,
    pub operation: Operation,
    /// When the run began
    pub started_at: DateTime<Utc>,
    /// Input was cut short by cancellation; tables may hold only some rows
    pub cancelled: bool,
    pub results: Vec<LoadResult>,
}

impl LoadReport {
    pub(crate) fn new(strategy: Strategy, operation: Operation) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            strategy,
            operation,
            started_at: Utc::now(),
            cancelled: false,
            results: Vec::new(),
        }
    }

    /// Marks the run as interrupted.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Result for `table`, if it was part of the run.
    pub fn get(&self, table: &str) -> Option<&LoadResult> {
        self.results.iter().find(|r| r.table == table)
    }

    /// Input rows seen across all tables.
    pub fn total_attempted(&self) -> u64 {
        self.results.iter().map(|r| r.attempted).sum()
    }

    /// Rows applied across all tables.
    pub fn total_inserted(&self) -> u64 {
        self.results.iter().map(|r| r.inserted).sum()
    }

    /// Rows the sanitizer refused across all tables.
    pub fn total_rejected(&self) -> u64 {
        self.results.iter().map(|r| r.rejected).sum()
    }

    /// Rows the database refused across all tables.
    pub fn total_failed(&self) -> u64 {
        self.results.iter().map(|r| r.failed).sum()
    }

    /// Rejected plus failed rows across all tables.
    pub fn failure_count(&self) -> u64 {
        self.total_rejected() + self.total_failed()
    }

    /// True when the failure count is above `threshold`; `None` never trips.
    pub fn exceeds(&self, threshold: Option<u64>) -> bool {
        threshold.is_some_and(|limit| self.failure_count() > limit)
    }

    /// Any table lost rows, halted or was skipped, or the run was cancelled.
    pub fn is_partial(&self) -> bool {
        self.cancelled
            || self
                .results
                .iter()
                .any(|r| r.failure_count() > 0 || r.status != BatchStatus::Completed)
    }

    /// Pretty JSON rendering for `--report`.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| LoadError::serialization("load report", e))
    }
}
