//! Row sanitizer: raw source records to typed rows or rejections.
//!
//! Every form of "no data" (missing fields, NaN or infinite floats, blank
//! text, sentinel strings such as `NULL`) collapses to [`Value::Null`]. Values
//! are then coerced to the column's semantic type. Coercion and nullability
//! failures produce a [`Rejection`]; they are never errors.

use crate::error::LoadError;
use crate::models::{
    Operation, RawRow, RawValue, Rejection, RejectionCause, Row, RowId, Sanitized, SemanticType,
    Value,
};
use crate::schema::{ColumnDescriptor, SchemaRegistry, TableDescriptor};
use crate::Result;
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Sanitizer tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Text values treated as missing (compared after trimming)
    pub missing_sentinels: Vec<String>,
    /// Treat empty or whitespace-only text as missing
    pub empty_string_is_missing: bool,
    /// chrono formats tried in order for date columns
    pub date_formats: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            missing_sentinels: ["NULL", "null", "NaN", "nan", "None"]
                .into_iter()
                .map(String::from)
                .collect(),
            empty_string_is_missing: true,
            date_formats: ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl SanitizerConfig {
    /// Validates sanitizer configuration.
    ///
    /// # Errors
    /// Returns error if no date format is configured or a format is blank
    pub fn validate(&self) -> Result<()> {
        if self.date_formats.is_empty() {
            return Err(LoadError::configuration(
                "at least one date format must be configured",
            ));
        }
        if self.date_formats.iter().any(|f| f.trim().is_empty()) {
            return Err(LoadError::configuration("date formats cannot be blank"));
        }
        Ok(())
    }

    /// Builder method to add a missing-value sentinel.
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.missing_sentinels.push(sentinel.into());
        self
    }

    /// Builder method to set the date formats.
    pub fn with_date_formats(mut self, formats: Vec<String>) -> Self {
        self.date_formats = formats;
        self
    }

    fn is_missing(&self, value: &RawValue) -> bool {
        match value {
            RawValue::Missing => true,
            RawValue::Float(f) => !f.is_finite(),
            RawValue::Text(text) => {
                let trimmed = text.trim();
                (trimmed.is_empty() && self.empty_string_is_missing)
                    || self.missing_sentinels.iter().any(|s| s == trimmed)
            }
            RawValue::Integer(_) | RawValue::Bool(_) => false,
        }
    }
}

/// Schema-aware sanitizer shared by all tables.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    registry: Arc<SchemaRegistry>,
    config: Arc<SanitizerConfig>,
}

impl Sanitizer {
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn new(registry: Arc<SchemaRegistry>, config: SanitizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config: Arc::new(config),
        })
    }

    /// Sanitizer bound to one table, for inserts.
    ///
    /// # Errors
    /// Returns a configuration error for an unknown table
    pub fn for_table(&self, table: &str) -> Result<TableSanitizer> {
        let descriptor = self.registry.describe(table)?;
        Ok(TableSanitizer {
            table: Arc::clone(descriptor),
            config: Arc::clone(&self.config),
            operation: Operation::Insert,
        })
    }

    /// One-off sanitization of a single record.
    ///
    /// # Errors
    /// Returns a configuration error for an unknown table
    pub fn sanitize(&self, table: &str, raw: &RawRow) -> Result<Sanitized> {
        Ok(self.for_table(table)?.sanitize(raw))
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }
}

/// Sanitizer bound to one table and operation.
#[derive(Debug, Clone)]
pub struct TableSanitizer {
    table: Arc<TableDescriptor>,
    config: Arc<SanitizerConfig>,
    operation: Operation,
}

impl TableSanitizer {
    /// Builder method to select which columns are required.
    ///
    /// Insert and upsert require every NOT NULL column without a default,
    /// except database-assigned ones. Update additionally requires the full
    /// primary key. Delete requires only the primary key.
    pub fn for_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.table
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Source headers that map to no column of this table.
    pub fn unmapped_columns<'h>(&self, headers: impl IntoIterator<Item = &'h str>) -> Vec<String> {
        headers
            .into_iter()
            .filter(|header| self.table.resolve_column(header).is_none())
            .map(str::to_string)
            .collect()
    }

    /// Converts one raw record into a row or a rejection.
    pub fn sanitize(&self, raw: &RawRow) -> Sanitized {
        let columns = self.table.columns();
        let mut slots: Vec<Option<&RawValue>> = vec![None; columns.len()];

        for (field, value) in &raw.fields {
            match self.table.resolve_column(field) {
                Some(index) => {
                    let occupied = slots[index].is_some_and(|v| !self.config.is_missing(v));
                    if !occupied {
                        slots[index] = Some(value);
                    }
                }
                None => debug!(table = %self.table.name(), field = %field, "Ignoring unmapped field"),
            }
        }

        let mut values = Vec::with_capacity(columns.len());
        for (column, slot) in columns.iter().zip(slots) {
            let is_key = self.table.is_primary_key(&column.name);
            if self.operation == Operation::Delete && !is_key {
                values.push(Value::Null);
                continue;
            }

            let raw_value = slot.unwrap_or(&RawValue::Missing);
            let value = if self.config.is_missing(raw_value) {
                self.absent_value(column, is_key)
            } else {
                coerce(raw_value, column, &self.config)
            };

            match value {
                Ok(value) => values.push(value),
                Err(cause) => {
                    return Err(Rejection {
                        row: self.row_id(raw),
                        column: Some(column.name.clone()),
                        cause,
                    });
                }
            }
        }

        Ok(Row::new(Arc::clone(&self.table), raw.ordinal, values))
    }

    fn absent_value(
        &self,
        column: &ColumnDescriptor,
        is_key: bool,
    ) -> std::result::Result<Value, RejectionCause> {
        match self.operation {
            Operation::Update | Operation::Delete if is_key => {
                Err(RejectionCause::MissingRequired)
            }
            _ if column.nullable => Ok(Value::Null),
            _ => match &column.default {
                Some(default) => Ok(default.clone()),
                None if column.auto_increment => Ok(Value::Null),
                None => Err(RejectionCause::MissingRequired),
            },
        }
    }

    fn row_id(&self, raw: &RawRow) -> RowId {
        let parts: Vec<String> = raw
            .fields
            .iter()
            .filter(|(field, value)| {
                !self.config.is_missing(value)
                    && self
                        .table
                        .resolve_column(field)
                        .and_then(|i| self.table.columns().get(i))
                        .is_some_and(|c| self.table.is_primary_key(&c.name))
            })
            .map(|(_, value)| value.describe())
            .collect();
        RowId {
            ordinal: raw.ordinal,
            key: (!parts.is_empty()).then(|| parts.join("/")),
        }
    }
}

fn mismatch(column: &ColumnDescriptor, raw: &RawValue) -> RejectionCause {
    RejectionCause::TypeMismatch {
        expected: column.semantic_type,
        value: raw.describe(),
    }
}

fn coerce(
    raw: &RawValue,
    column: &ColumnDescriptor,
    config: &SanitizerConfig,
) -> std::result::Result<Value, RejectionCause> {
    let coerced = match column.semantic_type {
        SemanticType::Integer => coerce_integer(raw).map(Value::Integer),
        SemanticType::Decimal => coerce_decimal(raw, column.decimal).map(Value::Decimal),
        SemanticType::String => {
            let text = coerce_string(raw);
            if let Some(max) = column.max_length {
                let actual = text.chars().count();
                if actual > max as usize {
                    return Err(RejectionCause::TooLong { max, actual });
                }
            }
            Some(Value::Text(text))
        }
        SemanticType::Date => coerce_date(raw, &config.date_formats).map(Value::Date),
        SemanticType::Boolean => coerce_boolean(raw).map(Value::Boolean),
    };
    coerced.ok_or_else(|| mismatch(column, raw))
}

/// Integer columns are created as 32-bit `INT`; wider values do not fit.
fn coerce_integer(raw: &RawValue) -> Option<i64> {
    let value = match raw {
        RawValue::Integer(v) => Some(*v),
        RawValue::Float(f) => Decimal::from_f64(*f)
            .filter(|d| d.fract().is_zero())
            .and_then(|d| d.to_i64()),
        RawValue::Text(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                Decimal::from_str(text)
                    .ok()
                    .filter(|d| d.fract().is_zero())
                    .and_then(|d| d.to_i64())
            })
        }
        RawValue::Bool(b) => Some(i64::from(*b)),
        RawValue::Missing => None,
    };
    value.filter(|v| i32::try_from(*v).is_ok())
}

fn coerce_decimal(raw: &RawValue, precision: Option<(u8, u8)>) -> Option<Decimal> {
    let value = match raw {
        RawValue::Integer(v) => Some(Decimal::from(*v)),
        RawValue::Float(f) => Decimal::from_f64(*f),
        RawValue::Text(text) => {
            let text = text.trim();
            Decimal::from_str(text)
                .or_else(|_| Decimal::from_scientific(text))
                .ok()
        }
        RawValue::Bool(_) | RawValue::Missing => None,
    }?;

    match precision {
        Some((precision, scale)) => {
            let rounded = value
                .round_dp_with_strategy(u32::from(scale), RoundingStrategy::MidpointAwayFromZero);
            let integer_digits = u32::from(precision.saturating_sub(scale));
            let limit = Decimal::from(10_i64.checked_pow(integer_digits)?);
            (rounded.abs() < limit).then_some(rounded)
        }
        None => Some(value),
    }
}

fn coerce_string(raw: &RawValue) -> String {
    match raw {
        RawValue::Text(text) => text.trim().to_string(),
        RawValue::Integer(v) => v.to_string(),
        // Numeric-looking text columns (zip codes, phones) often arrive as floats.
        RawValue::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{f:.0}"),
        RawValue::Float(f) => f.to_string(),
        RawValue::Bool(b) => b.to_string(),
        RawValue::Missing => String::new(),
    }
}

fn coerce_date(raw: &RawValue, formats: &[String]) -> Option<NaiveDate> {
    let RawValue::Text(text) = raw else {
        return None;
    };
    let text = text.trim();
    let parse = |candidate: &str| {
        formats
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(candidate, format).ok())
    };
    parse(text).or_else(|| {
        // Datetime values: keep the date part ("2016-01-01 00:00:00", "2016-01-01T08:00:00Z").
        let date_part = text.split(['T', ' ']).next()?;
        (date_part.len() < text.len()).then(|| parse(date_part)).flatten()
    })
}

fn coerce_boolean(raw: &RawValue) -> Option<bool> {
    match raw {
        RawValue::Bool(b) => Some(*b),
        RawValue::Integer(0) => Some(false),
        RawValue::Integer(1) => Some(true),
        RawValue::Float(f) if *f == 0.0 => Some(false),
        RawValue::Float(f) if *f == 1.0 => Some(true),
        RawValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" | "yes" | "y" => Some(true),
            "0" | "false" | "f" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(
            Arc::new(SchemaRegistry::store_schema().unwrap()),
            SanitizerConfig::default(),
        )
        .unwrap()
    }

    fn product(ordinal: u64) -> RawRow {
        RawRow::new(ordinal)
            .with("product_id", "7")
            .with("product_name", "Trek 820 - 2016")
            .with("brand_id", "9")
            .with("category_id", "6")
            .with("model_year", "2016")
            .with("list_price", "379.99")
    }

    #[test]
    fn test_valid_row_is_typed() {
        let row = sanitizer().sanitize("products", &product(1)).unwrap().unwrap();
        assert_eq!(row.get("product_id"), Some(&Value::Integer(7)));
        assert_eq!(
            row.get("list_price"),
            Some(&Value::Decimal(Decimal::from_str("379.99").unwrap()))
        );
        assert_eq!(row.values().len(), 6);
        assert_eq!(row.id().key.as_deref(), Some("7"));
    }

    #[test]
    fn test_missing_like_values_become_null_in_nullable_columns() {
        let sanitizer = sanitizer();
        for missing in [
            RawValue::Missing,
            RawValue::Float(f64::NAN),
            RawValue::Float(f64::INFINITY),
            RawValue::Text(String::new()),
            RawValue::Text("   ".into()),
            RawValue::Text("NULL".into()),
            RawValue::Text("nan".into()),
            RawValue::Text("None".into()),
        ] {
            let raw = product(1).with("model_year", missing.clone());
            let row = sanitizer.sanitize("products", &raw).unwrap().unwrap();
            assert_eq!(row.get("model_year"), Some(&Value::Null), "{missing:?}");
        }
    }

    #[test]
    fn test_missing_required_value_is_rejected() {
        let raw = product(3).with("product_name", RawValue::Float(f64::NAN));
        let rejection = sanitizer().sanitize("products", &raw).unwrap().unwrap_err();
        assert_eq!(rejection.column.as_deref(), Some("product_name"));
        assert_eq!(rejection.cause, RejectionCause::MissingRequired);
        assert_eq!(rejection.row.ordinal, 3);
        assert_eq!(rejection.row.key.as_deref(), Some("7"));
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let raw = product(1).with("model_year", "next year");
        let rejection = sanitizer().sanitize("products", &raw).unwrap().unwrap_err();
        assert!(matches!(
            rejection.cause,
            RejectionCause::TypeMismatch {
                expected: SemanticType::Integer,
                ..
            }
        ));
    }

    #[test]
    fn test_integer_coercions() {
        assert_eq!(coerce_integer(&RawValue::Float(3.0)), Some(3));
        assert_eq!(coerce_integer(&RawValue::Float(3.5)), None);
        assert_eq!(coerce_integer(&RawValue::Text(" 42 ".into())), Some(42));
        assert_eq!(coerce_integer(&RawValue::Text("42.0".into())), Some(42));
        assert_eq!(coerce_integer(&RawValue::Text("4x".into())), None);
    }

    #[test]
    fn test_integer_range_matches_int_columns() {
        assert_eq!(
            coerce_integer(&RawValue::Integer(i64::from(i32::MAX))),
            Some(i64::from(i32::MAX))
        );
        assert_eq!(
            coerce_integer(&RawValue::Text("-2147483648".into())),
            Some(i64::from(i32::MIN))
        );
        assert_eq!(coerce_integer(&RawValue::Text("3000000000".into())), None);
        assert_eq!(coerce_integer(&RawValue::Float(3e9)), None);
        assert_eq!(coerce_integer(&RawValue::Integer(-2_147_483_649)), None);

        let sanitizer = sanitizer();
        for brand_id in [RawValue::Text("3000000000".into()), RawValue::Float(3e9)] {
            let raw = RawRow::new(1)
                .with("brand_id", brand_id)
                .with("brand_name", "Electra");
            let rejection = sanitizer.sanitize("brands", &raw).unwrap().unwrap_err();
            assert_eq!(rejection.column.as_deref(), Some("brand_id"));
            assert!(matches!(
                rejection.cause,
                RejectionCause::TypeMismatch {
                    expected: SemanticType::Integer,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_decimal_precision_is_enforced() {
        assert_eq!(
            coerce_decimal(&RawValue::Float(0.2), Some((4, 2))),
            Some(Decimal::from_str("0.20").unwrap())
        );
        assert_eq!(
            coerce_decimal(&RawValue::Text("12.345".into()), Some((10, 2))),
            Some(Decimal::from_str("12.35").unwrap())
        );
        assert_eq!(coerce_decimal(&RawValue::Integer(100), Some((4, 2))), None);
        assert_eq!(coerce_decimal(&RawValue::Text("abc".into()), None), None);
    }

    #[test]
    fn test_date_formats() {
        let formats = SanitizerConfig::default().date_formats;
        let expected = NaiveDate::from_ymd_opt(2016, 1, 3);
        for text in ["2016-01-03", "03/01/2016", "2016/01/03", "2016-01-03 00:00:00", "2016-01-03T10:00:00Z"] {
            assert_eq!(coerce_date(&RawValue::Text(text.into()), &formats), expected, "{text}");
        }
        assert_eq!(coerce_date(&RawValue::Text("yesterday".into()), &formats), None);
        assert_eq!(coerce_date(&RawValue::Integer(20160103), &formats), None);
    }

    #[test]
    fn test_boolean_coercions() {
        assert_eq!(coerce_boolean(&RawValue::Text("Yes".into())), Some(true));
        assert_eq!(coerce_boolean(&RawValue::Integer(0)), Some(false));
        assert_eq!(coerce_boolean(&RawValue::Integer(2)), None);
    }

    #[test]
    fn test_string_length_is_checked() {
        let raw = RawRow::new(1)
            .with("store_name", "Santa Cruz Bikes")
            .with("zip_code", "1".repeat(21).as_str());
        let rejection = sanitizer().sanitize("stores", &raw).unwrap().unwrap_err();
        assert_eq!(rejection.cause, RejectionCause::TooLong { max: 20, actual: 21 });
    }

    #[test]
    fn test_float_zip_code_renders_without_fraction() {
        let raw = RawRow::new(1)
            .with("name", "Baldwin Bikes")
            .with("zip_code", RawValue::Float(11432.0));
        let row = sanitizer().sanitize("stores", &raw).unwrap().unwrap();
        assert_eq!(row.get("zip_code"), Some(&Value::Text("11432".into())));
    }

    #[test]
    fn test_defaults_fill_absent_columns() {
        let raw = RawRow::new(1)
            .with("item_id", 1_i64)
            .with("order_id", 1_i64)
            .with("product_id", 20_i64)
            .with("list_price", "599.99");
        let row = sanitizer().sanitize("order_items", &raw).unwrap().unwrap();
        assert_eq!(row.get("quantity"), Some(&Value::Integer(1)));
        assert_eq!(row.get("discount"), Some(&Value::Null));
    }

    #[test]
    fn test_auto_increment_key_may_be_absent_on_insert_only() {
        let sanitizer = sanitizer();
        let raw = RawRow::new(1).with("name", "Rowlett Bikes");

        let table = sanitizer.for_table("stores").unwrap();
        let row = table.sanitize(&raw).unwrap();
        assert_eq!(row.get("store_id"), Some(&Value::Null));

        let update = table.clone().for_operation(Operation::Update);
        let rejection = update.sanitize(&raw).unwrap_err();
        assert_eq!(rejection.column.as_deref(), Some("store_id"));
    }

    #[test]
    fn test_delete_needs_only_the_key() {
        let table = sanitizer()
            .for_table("products")
            .unwrap()
            .for_operation(Operation::Delete);
        let row = table.sanitize(&RawRow::new(1).with("product_id", "7")).unwrap();
        assert_eq!(row.get("product_id"), Some(&Value::Integer(7)));
        assert_eq!(row.get("product_name"), Some(&Value::Null));
    }

    #[test]
    fn test_json_null_for_optional_numeric_is_null() {
        let payload = serde_json::json!({"item_id": 5, "order_id": 2, "product_id": 8,
            "quantity": 1, "list_price": 269.99, "discount": null});
        let mut raw = RawRow::new(1);
        for (key, value) in payload.as_object().unwrap() {
            raw.insert(key.clone(), RawValue::from(value));
        }
        let row = sanitizer().sanitize("order_items", &raw).unwrap().unwrap();
        assert_eq!(row.get("discount"), Some(&Value::Null));
    }

    #[test]
    fn test_unmapped_columns() {
        let table = sanitizer().for_table("stores").unwrap();
        let unmapped = table.unmapped_columns(["store_name", "Zip Code", "revenue"]);
        assert_eq!(unmapped, vec!["revenue".to_string()]);
    }

    #[test]
    fn test_unknown_table_is_configuration_error() {
        let error = sanitizer()
            .sanitize("suppliers", &RawRow::new(1))
            .unwrap_err();
        assert!(matches!(error, LoadError::Configuration { .. }));
    }

    #[test]
    fn test_config_validation() {
        assert!(SanitizerConfig::default().validate().is_ok());
        let empty = SanitizerConfig::default().with_date_formats(Vec::new());
        assert!(empty.validate().is_err());
    }
}
