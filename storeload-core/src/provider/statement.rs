//! Structured write statements.

use crate::models::{Operation, Row, Value};
use crate::schema::TableDescriptor;
use crate::schema::ddl::quote_ident;

/// One write statement against one table.
///
/// Insert and upsert may cover several rows in a single multi-row `VALUES`
/// list; update and delete always address one row by primary key.
#[derive(Debug, Clone, Copy)]
pub struct Statement<'a> {
    table: &'a TableDescriptor,
    operation: Operation,
    rows: usize,
}

impl<'a> Statement<'a> {
    /// Single-row statement.
    pub fn new(table: &'a TableDescriptor, operation: Operation) -> Self {
        Self {
            table,
            operation,
            rows: 1,
        }
    }

    /// Multi-row insert or upsert; other operations stay single-row.
    pub fn multi_row(table: &'a TableDescriptor, operation: Operation, rows: usize) -> Self {
        let rows = match operation {
            Operation::Insert | Operation::Upsert => rows.max(1),
            Operation::Update | Operation::Delete => 1,
        };
        Self {
            table,
            operation,
            rows,
        }
    }

    pub fn table(&self) -> &'a TableDescriptor {
        self.table
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Column positions bound for one row, in placeholder order.
    ///
    /// Insert and upsert bind every column; update binds non-key columns and
    /// then the key; delete binds the key only.
    pub fn bound_columns(&self) -> Vec<usize> {
        let key = self.table.primary_key_indices();
        let non_key = || {
            (0..self.table.columns().len())
                .filter(|index| !key.contains(index))
                .collect::<Vec<_>>()
        };
        match self.operation {
            Operation::Insert | Operation::Upsert => (0..self.table.columns().len()).collect(),
            Operation::Update => {
                let mut columns = non_key();
                columns.extend(key.iter().copied());
                columns
            }
            Operation::Delete => key.clone(),
        }
    }

    /// Parameters for one row in placeholder order.
    pub fn params(&self, row: &Row) -> Vec<Value> {
        self.bound_columns()
            .into_iter()
            .map(|index| row.values().get(index).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Renders MySQL SQL with `?` placeholders.
    pub fn to_mysql(&self) -> String {
        let table = quote_ident(self.table.name());
        let key: Vec<&str> = self
            .table
            .primary_key_columns()
            .iter()
            .map(String::as_str)
            .collect();
        let non_key: Vec<&str> = self
            .table
            .columns()
            .iter()
            .map(|c| c.name.as_str())
            .filter(|name| !key.contains(name))
            .collect();
        // Tables without non-key columns still need a SET target.
        let assigned = if non_key.is_empty() { &key } else { &non_key };
        let key_predicate = key
            .iter()
            .map(|c| format!("{} = ?", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(" AND ");

        match self.operation {
            Operation::Insert | Operation::Upsert => {
                let columns = self
                    .table
                    .columns()
                    .iter()
                    .map(|c| quote_ident(&c.name))
                    .collect::<Vec<_>>()
                    .join(", ");
                let tuple = format!(
                    "({})",
                    vec!["?"; self.table.columns().len()].join(", ")
                );
                let values = vec![tuple.as_str(); self.rows].join(", ");
                let mut sql = format!("INSERT INTO {table} ({columns}) VALUES {values}");
                if self.operation == Operation::Upsert {
                    let updates = assigned
                        .iter()
                        .map(|c| format!("{0} = VALUES({0})", quote_ident(c)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(" ON DUPLICATE KEY UPDATE ");
                    sql.push_str(&updates);
                }
                sql
            }
            Operation::Update => {
                let sets = if non_key.is_empty() {
                    key.iter()
                        .map(|c| format!("{0} = {0}", quote_ident(c)))
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    non_key
                        .iter()
                        .map(|c| format!("{} = ?", quote_ident(c)))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("UPDATE {table} SET {sets} WHERE {key_predicate}")
            }
            Operation::Delete => format!("DELETE FROM {table} WHERE {key_predicate}"),
        }
    }
}
