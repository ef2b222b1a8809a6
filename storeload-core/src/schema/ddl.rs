//! MySQL `CREATE TABLE` rendering for registry descriptors.

use super::{ColumnDescriptor, SchemaRegistry, TableDescriptor};
use crate::models::{SemanticType, Value};

/// Backtick-quotes an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn column_type(column: &ColumnDescriptor) -> String {
    match column.semantic_type {
        SemanticType::Integer => "INT".to_string(),
        SemanticType::Decimal => {
            let (precision, scale) = column.decimal.unwrap_or((10, 2));
            format!("DECIMAL({precision},{scale})")
        }
        SemanticType::String => match column.max_length {
            Some(length) => format!("VARCHAR({length})"),
            None => "TEXT".to_string(),
        },
        SemanticType::Date => "DATE".to_string(),
        SemanticType::Boolean => "BOOLEAN".to_string(),
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Decimal(v) => v.to_string(),
        Value::Text(v) => format!("'{}'", v.replace('\'', "''")),
        Value::Date(v) => format!("'{}'", v.format("%Y-%m-%d")),
        Value::Boolean(true) => "TRUE".to_string(),
        Value::Boolean(false) => "FALSE".to_string(),
    }
}

fn column_definition(column: &ColumnDescriptor) -> String {
    let mut definition = format!("{} {}", quote_ident(&column.name), column_type(column));
    if !column.nullable {
        definition.push_str(" NOT NULL");
    }
    if column.auto_increment {
        definition.push_str(" AUTO_INCREMENT");
    }
    if let Some(default) = &column.default {
        definition.push_str(" DEFAULT ");
        definition.push_str(&literal(default));
    }
    definition
}

fn ident_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Renders `CREATE TABLE IF NOT EXISTS` for one table (InnoDB, utf8mb4).
pub fn create_table_sql(table: &TableDescriptor) -> String {
    let mut lines: Vec<String> = table.columns().iter().map(column_definition).collect();

    lines.push(format!(
        "PRIMARY KEY ({})",
        ident_list(table.primary_key_columns())
    ));

    for column in table.columns().iter().filter(|c| c.unique) {
        lines.push(format!(
            "UNIQUE KEY {} ({})",
            quote_ident(&format!("uq_{}_{}", table.name(), column.name)),
            quote_ident(&column.name)
        ));
    }

    for index in table.indexes() {
        lines.push(format!(
            "KEY {} ({})",
            quote_ident(&index.name),
            ident_list(&index.columns)
        ));
    }

    for fk in table.foreign_keys() {
        lines.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            quote_ident(&format!("fk_{}_{}", table.name(), fk.column)),
            quote_ident(&fk.column),
            quote_ident(&fk.references_table),
            quote_ident(&fk.references_column)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        quote_ident(table.name()),
        lines.join(",\n    ")
    )
}

/// DDL for every table, parents before children.
pub fn create_statements(registry: &SchemaRegistry) -> Vec<String> {
    registry
        .ordered()
        .map(|table| create_table_sql(table))
        .collect()
}
