//! Value and row types shared by sources, the sanitizer and the loader.
//!
//! Adapters produce [`RawRow`]s of loosely typed [`RawValue`]s. The sanitizer
//! turns them into [`Row`]s holding one typed [`Value`] per declared column, or
//! into a [`Rejection`] explaining why the row cannot be submitted.

use crate::schema::TableDescriptor;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Semantic column type as declared in a table descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Integer,
    Decimal,
    String,
    Date,
    Boolean,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Date => "date",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A sanitized column value.
///
/// `Null` is the single absence marker and maps to SQL NULL on write. There is
/// deliberately no floating point variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Decimal(Decimal),
    Text(String),
    Date(NaiveDate),
    Boolean(bool),
}

impl Value {
    /// True for the absence marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Renders the value as a CSV field; `Null` becomes an empty field.
    pub fn to_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Boolean(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// A value as produced by a source adapter, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Missing,
    Integer(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl RawValue {
    /// Short printable form used in rejection messages.
    pub fn describe(&self) -> String {
        const MAX: usize = 64;
        let text = match self {
            Self::Missing => return "<missing>".to_string(),
            Self::Integer(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Text(v) => v.clone(),
            Self::Bool(v) => v.to_string(),
        };
        if text.chars().count() > MAX {
            let mut shortened: String = text.chars().take(MAX).collect();
            shortened.push_str("...");
            shortened
        } else {
            text
        }
    }
}

impl From<&serde_json::Value> for RawValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Missing,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => n.as_f64().map_or(Self::Missing, Self::Float),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            nested => Self::Text(nested.to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One source record keyed by source field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    /// 1-based position of the record in its source
    pub ordinal: u64,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRow {
    pub fn new(ordinal: u64) -> Self {
        Self {
            ordinal,
            fields: BTreeMap::new(),
        }
    }

    /// Builder method to add a field.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: RawValue) {
        self.fields.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.fields.get(name)
    }
}

/// Identifies a row in results: its source position and, when known, its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowId {
    pub ordinal: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "row {} (key {})", self.ordinal, key),
            None => write!(f, "row {}", self.ordinal),
        }
    }
}

/// Why the sanitizer refused a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionCause {
    /// A required column held no value
    MissingRequired,
    /// The value could not be coerced to the column type
    TypeMismatch {
        expected: SemanticType,
        value: String,
    },
    /// Text longer than the column allows
    TooLong { max: u32, actual: usize },
    /// The source record itself was unreadable
    Malformed { reason: String },
}

impl fmt::Display for RejectionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequired => f.write_str("required value missing"),
            Self::TypeMismatch { expected, value } => {
                write!(f, "cannot read '{value}' as {expected}")
            }
            Self::TooLong { max, actual } => {
                write!(f, "value has {actual} characters, column allows {max}")
            }
            Self::Malformed { reason } => write!(f, "malformed record: {reason}"),
        }
    }
}

/// A row that never reaches the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub row: RowId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub cause: RejectionCause,
}

impl Rejection {
    /// Rejection for a record the source could not parse.
    pub fn malformed(ordinal: u64, reason: impl Into<String>) -> Self {
        Self {
            row: RowId { ordinal, key: None },
            column: None,
            cause: RejectionCause::Malformed {
                reason: reason.into(),
            },
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}: column '{}': {}", self.row, column, self.cause),
            None => write!(f, "{}: {}", self.row, self.cause),
        }
    }
}

/// Write operation applied to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    #[default]
    Insert,
    Update,
    Upsert,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A validated row with exactly one value per declared column.
///
/// Only the sanitizer constructs rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    table: Arc<TableDescriptor>,
    ordinal: u64,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(table: Arc<TableDescriptor>, ordinal: u64, values: Vec<Value>) -> Self {
        debug_assert_eq!(table.columns().len(), values.len());
        Self {
            table,
            ordinal,
            values,
        }
    }

    pub fn table(&self) -> &TableDescriptor {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Values in declared column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Looks up a value by exact column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.table
            .column_index(column)
            .and_then(|index| self.values.get(index))
    }

    /// Primary key values in key order.
    pub fn key(&self) -> Vec<Value> {
        self.table
            .primary_key_indices()
            .into_iter()
            .filter_map(|index| self.values.get(index).cloned())
            .collect()
    }

    /// Result identifier for this row.
    pub fn id(&self) -> RowId {
        let key = self.key();
        let key = if key.iter().all(Value::is_null) {
            None
        } else {
            Some(
                key.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("/"),
            )
        };
        RowId {
            ordinal: self.ordinal,
            key,
        }
    }
}

/// Sanitizer output for one source record.
pub type Sanitized = std::result::Result<Row, Rejection>;
