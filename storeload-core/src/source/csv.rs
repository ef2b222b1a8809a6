//! CSV source adapter.
//!
//! Each table reads from `<table>.csv` with a header row. Headers map to
//! columns case-insensitively and through the table's aliases. Every field
//! arrives as text; the sanitizer does the typing.

use super::RawRecord;
use crate::Result;
use crate::error::LoadError;
use crate::models::{RawRow, RawValue, Rejection, Row};
use crate::schema::{SchemaRegistry, TableDescriptor};
use csv::{ReaderBuilder, StringRecordsIntoIter, Trim, WriterBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// An opened CSV file bound to its target table.
pub struct CsvSource {
    path: PathBuf,
    table: Arc<TableDescriptor>,
    headers: Vec<String>,
    reader: csv::Reader<File>,
}

impl std::fmt::Debug for CsvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSource")
            .field("path", &self.path)
            .field("table", &self.table.name())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl CsvSource {
    /// Opens `path` and reads its header row.
    ///
    /// Headers that map to no column are logged once here.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or has no readable header
    pub fn open(path: impl AsRef<Path>, table: Arc<TableDescriptor>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| LoadError::io(format!("opening {}", path.display()), e))?;
        let mut reader = ReaderBuilder::new()
            .trim(Trim::Headers)
            .flexible(false)
            .from_reader(file);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| LoadError::source_failed(format!("reading header of {}", path.display()), e))?
            .iter()
            .map(str::to_string)
            .collect();

        let source = Self {
            path,
            table,
            headers,
            reader,
        };
        let unmapped = source.unmapped_headers();
        if !unmapped.is_empty() {
            warn!(
                "{}: columns not in table '{}' will be ignored: {}",
                source.path.display(),
                source.table.name(),
                unmapped.join(", ")
            );
        }
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.table
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Headers that resolve to no column of the target table.
    pub fn unmapped_headers(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|header| self.table.resolve_column(header).is_none())
            .cloned()
            .collect()
    }

    /// Consumes the source into a lazy record stream.
    ///
    /// When the table's auto-increment key has no column in the file, each
    /// record gets its 1-based position as the key, so reloading the same
    /// file addresses the same rows.
    pub fn records(self) -> CsvRecords {
        let synthesized_key = self
            .table
            .auto_increment_column()
            .filter(|column| self.table.is_primary_key(&column.name))
            .filter(|column| {
                let index = self.table.column_index(&column.name);
                !self
                    .headers
                    .iter()
                    .any(|header| self.table.resolve_column(header) == index)
            })
            .map(|column| column.name.clone());
        if let Some(column) = &synthesized_key {
            debug!(
                "{}: assigning '{}' from row position",
                self.path.display(),
                column
            );
        }

        CsvRecords {
            records: self.reader.into_records(),
            headers: self.headers,
            synthesized_key,
            ordinal: 0,
            finished: false,
        }
    }
}

/// Lazy record stream of a [`CsvSource`].
pub struct CsvRecords {
    records: StringRecordsIntoIter<File>,
    headers: Vec<String>,
    synthesized_key: Option<String>,
    ordinal: u64,
    finished: bool,
}

impl Iterator for CsvRecords {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let record = self.records.next()?;
        self.ordinal += 1;

        match record {
            Ok(record) => {
                let mut raw = RawRow::new(self.ordinal);
                for (header, field) in self.headers.iter().zip(record.iter()) {
                    raw.insert(header.clone(), RawValue::Text(field.to_string()));
                }
                if let Some(column) = &self.synthesized_key {
                    let position = i64::try_from(self.ordinal).unwrap_or(i64::MAX);
                    raw.insert(column.clone(), RawValue::Integer(position));
                }
                Some(Ok(raw))
            }
            Err(error) => {
                // A failing reader cannot recover.
                if matches!(error.kind(), csv::ErrorKind::Io(_)) {
                    self.finished = true;
                }
                Some(Err(Rejection::malformed(self.ordinal, error.to_string())))
            }
        }
    }
}

/// Finds `<table>.csv` files in `dir`, matched case-insensitively, in load
/// order.
///
/// # Errors
/// Returns error if the directory cannot be read
pub fn discover(
    dir: impl AsRef<Path>,
    registry: &SchemaRegistry,
) -> Result<Vec<(Arc<TableDescriptor>, PathBuf)>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| LoadError::io(format!("reading directory {}", dir.display()), e))?;

    let mut files: HashMap<String, PathBuf> = HashMap::new();
    for entry in entries {
        let path = entry
            .map_err(|e| LoadError::io(format!("reading directory {}", dir.display()), e))?
            .path();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_lowercase);
        if let (true, Some(stem)) = (is_csv, stem) {
            if registry.contains(&stem) {
                files.insert(stem, path);
            } else {
                debug!("No table for {}", path.display());
            }
        }
    }

    Ok(registry
        .ordered()
        .filter_map(|table| {
            files
                .remove(table.name())
                .map(|path| (Arc::clone(table), path))
        })
        .collect())
}

/// Writes rows of `table` to `path` with a header of column names.
///
/// `NULL` becomes an empty field.
///
/// # Errors
/// Returns error if the file cannot be written
pub fn write_rows<'r>(
    path: impl AsRef<Path>,
    table: &TableDescriptor,
    rows: impl IntoIterator<Item = &'r Row>,
) -> Result<usize> {
    let path = path.as_ref();
    let failed = |e: csv::Error| LoadError::source_failed(format!("writing {}", path.display()), e);
    let mut writer = WriterBuilder::new().from_path(path).map_err(failed)?;

    writer
        .write_record(table.columns().iter().map(|c| c.name.as_str()))
        .map_err(failed)?;
    let mut written = 0;
    for row in rows {
        writer
            .write_record(row.values().iter().map(crate::models::Value::to_field))
            .map_err(failed)?;
        written += 1;
    }
    writer
        .flush()
        .map_err(|e| LoadError::io(format!("writing {}", path.display()), e))?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::store_schema().unwrap()
    }

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_records_are_text_keyed_by_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "brands.csv", "brand_id,brand_name\n1,Electra\n2,Haro\n");
        let registry = registry();
        let source = CsvSource::open(&path, Arc::clone(registry.describe("brands").unwrap())).unwrap();
        assert_eq!(source.headers(), ["brand_id", "brand_name"]);

        let records: Vec<_> = source.records().collect();
        assert_eq!(records.len(), 2);
        let second = records[1].as_ref().unwrap();
        assert_eq!(second.ordinal, 2);
        assert_eq!(second.get("brand_name"), Some(&RawValue::Text("Haro".into())));
    }

    #[test]
    fn test_store_id_is_synthesized_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "stores.csv",
            "store_name,phone,zip_code\nSanta Cruz Bikes,(831) 476-4321,95060\nBaldwin Bikes,(516) 379-8888,11432\n",
        );
        let registry = registry();
        let source = CsvSource::open(&path, Arc::clone(registry.describe("stores").unwrap())).unwrap();
        let records: Vec<_> = source.records().map(|r| r.unwrap()).collect();
        assert_eq!(records[0].get("store_id"), Some(&RawValue::Integer(1)));
        assert_eq!(records[1].get("store_id"), Some(&RawValue::Integer(2)));
    }

    #[test]
    fn test_uneven_record_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "brands.csv", "brand_id,brand_name\n1,Electra\n2\n3,Heller\n");
        let registry = registry();
        let source = CsvSource::open(&path, Arc::clone(registry.describe("brands").unwrap())).unwrap();
        let records: Vec<_> = source.records().collect();
        assert_eq!(records.len(), 3);
        let rejection = records[1].as_ref().unwrap_err();
        assert_eq!(rejection.row.ordinal, 2);
        assert!(records[2].is_ok());
    }

    #[test]
    fn test_unmapped_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "stores.csv", "Store Name,revenue\nRowlett Bikes,10\n");
        let registry = registry();
        let source = CsvSource::open(&path, Arc::clone(registry.describe("stores").unwrap())).unwrap();
        assert_eq!(source.unmapped_headers(), vec!["revenue".to_string()]);
    }

    #[test]
    fn test_discover_in_load_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Stocks.CSV", "store_name,product_id,quantity\n");
        write(dir.path(), "brands.csv", "brand_id,brand_name\n");
        write(dir.path(), "products.csv", "product_id,product_name\n");
        write(dir.path(), "suppliers.csv", "id\n");
        write(dir.path(), "notes.txt", "");

        let found = discover(dir.path(), &registry()).unwrap();
        let names: Vec<_> = found.iter().map(|(t, _)| t.name()).collect();
        assert_eq!(names, vec!["brands", "products", "stocks"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let registry = registry();
        let error = CsvSource::open(
            "/nonexistent/brands.csv",
            Arc::clone(registry.describe("brands").unwrap()),
        )
        .unwrap_err();
        assert!(matches!(error, LoadError::Io { .. }));
    }
}
