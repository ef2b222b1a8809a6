//! Source adapters: CSV files and REST API payloads to raw rows.
//!
//! # Module Structure
//! - `csv`: one `<table>.csv` file per table
//! - `api`: per-resource JSON field mappings
//! - `client`: HTTP client with retry and backoff
//!
//! Adapters produce [`RawRecord`]s. A record the adapter could not read at all
//! becomes a `Malformed` rejection so it is counted like any other bad row.

pub mod api;
pub mod client;
pub mod csv;

use crate::models::{RawRow, Rejection, Sanitized};
use crate::sanitize::TableSanitizer;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use api::{ApiRecords, ResourceMapping, mapping_for};
pub use client::{ApiClient, ApiConfig};
pub use csv::{CsvSource, discover};

/// Adapter output for one source record.
pub type RawRecord = Result<RawRow, Rejection>;

/// Runs adapter output through a table sanitizer.
pub fn sanitized<I>(records: I, sanitizer: TableSanitizer) -> impl Iterator<Item = Sanitized> + Send
where
    I: IntoIterator<Item = RawRecord>,
    I::IntoIter: Send,
{
    records
        .into_iter()
        .map(move |record| record.and_then(|raw| sanitizer.sanitize(&raw)))
}

/// Iterator adapter that ends early once a shared flag is raised.
///
/// The flag is checked before each item, so an item already handed out is
/// never cut short.
#[derive(Debug)]
pub struct Cancellable<I> {
    inner: I,
    cancelled: Arc<AtomicBool>,
}

impl<I> Cancellable<I> {
    /// Wraps `inner`; iteration stops once `cancelled` is set.
    pub fn new(inner: I, cancelled: Arc<AtomicBool>) -> Self {
        Self { inner, cancelled }
    }
}

impl<I: Iterator> Iterator for Cancellable<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancelled.load(Ordering::Relaxed) {
            return None;
        }
        self.inner.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawValue;
    use crate::sanitize::{Sanitizer, SanitizerConfig};
    use crate::schema::SchemaRegistry;

    #[test]
    fn test_cancellable_stops_between_items() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut items = Cancellable::new(1..=10, Arc::clone(&flag));
        assert_eq!(items.next(), Some(1));
        assert_eq!(items.next(), Some(2));
        flag.store(true, Ordering::Relaxed);
        assert_eq!(items.next(), None);
    }

    #[test]
    fn test_sanitized_passes_malformed_records_through() {
        let registry = Arc::new(SchemaRegistry::store_schema().unwrap());
        let sanitizer = Sanitizer::new(registry, SanitizerConfig::default()).unwrap();
        let records: Vec<RawRecord> = vec![
            Ok(RawRow::new(1)
                .with("brand_id", "1")
                .with("brand_name", RawValue::Text("Electra".into()))),
            Err(Rejection::malformed(2, "wrong number of fields")),
        ];
        let rows: Vec<_> = sanitized(records, sanitizer.for_table("brands").unwrap()).collect();
        assert!(rows[0].is_ok());
        assert_eq!(rows[1].as_ref().unwrap_err().row.ordinal, 2);
    }
}
