//! Core library for storeload.
//!
//! Loads CSV files and REST API payloads into the nine-table store schema.
//! Rows pass through a schema-aware sanitizer and are written in foreign-key
//! order by a batch orchestrator that isolates failures per row and reports
//! per table.
//!
//! # Architecture
//! - `schema`: table descriptors, load order and DDL
//! - `sanitize`: raw records to typed rows or rejections
//! - `source`: CSV and API adapters
//! - `loader`: strategies, operations and result accounting
//! - `provider`: the connection seam, with MySQL and in-memory backends
//!
//! # Guarantees
//! - Absence is always `NULL`; no sentinel or NaN reaches the database
//! - A failing row never aborts its table; a failing table never aborts the
//!   run unless the database itself is unreachable
//! - Credentials are never logged or included in error text

pub mod error;
pub mod loader;
pub mod logging;
pub mod models;
pub mod provider;
pub mod sanitize;
pub mod schema;
pub mod source;

// Re-export commonly used types
pub use error::{ConstraintKind, LoadError, Result};
pub use loader::{
    BatchStatus, LoadOptions, LoadReport, LoadResult, Loader, RejectionPolicy, RowStream,
    Strategy,
};
pub use models::{
    Operation, RawRow, RawValue, Rejection, RejectionCause, Row, RowId, Sanitized, SemanticType,
    Value,
};
pub use provider::{ConnectionProvider, LoadConnection, MemoryProvider};
pub use sanitize::{Sanitizer, SanitizerConfig, TableSanitizer};
pub use schema::{SchemaRegistry, TableDescriptor};
