//! Schema registry: static table descriptors and foreign-key load order.
//!
//! # Module Structure
//! - `tables`: the nine store tables
//! - `ddl`: `CREATE TABLE` rendering for MySQL
//!
//! A [`SchemaRegistry`] is validated once at construction and immutable
//! afterwards. Construction fails with a configuration error when a
//! descriptor is inconsistent or the foreign-key graph has a cycle, so a
//! registry that exists always has a valid topological load order.

pub mod ddl;
pub mod tables;

use crate::error::LoadError;
use crate::models::{SemanticType, Value};
use crate::Result;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Declared column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    /// Maximum length in characters, strings only
    pub max_length: Option<u32>,
    /// (precision, scale), decimals only
    pub decimal: Option<(u8, u8)>,
    pub auto_increment: bool,
    pub unique: bool,
    /// Value applied when a row omits the column
    pub default: Option<Value>,
}

impl ColumnDescriptor {
    fn new(name: impl Into<String>, semantic_type: SemanticType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable,
            max_length: None,
            decimal: None,
            auto_increment: false,
            unique: false,
            default: None,
        }
    }

    /// A NOT NULL column.
    pub fn required(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self::new(name, semantic_type, false)
    }

    /// A nullable column.
    pub fn optional(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self::new(name, semantic_type, true)
    }

    /// Builder method to set the maximum string length.
    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Builder method to set decimal precision and scale.
    pub fn decimal(mut self, precision: u8, scale: u8) -> Self {
        self.decimal = Some((precision, scale));
        self
    }

    /// Builder method to mark the column as database-assigned.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Builder method to add a unique constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Builder method to set the default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// `column → table.column` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Secondary (non-unique) index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
}

/// Static description of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    name: String,
    columns: Vec<ColumnDescriptor>,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKey>,
    /// Normalized source header → column name
    aliases: Vec<(String, String)>,
    indexes: Vec<IndexDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            aliases: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Builder method to append a column.
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Builder method to set the primary key columns.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Builder method to add a foreign key.
    pub fn foreign_key(mut self, column: &str, table: &str, references: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references_table: table.to_string(),
            references_column: references.to_string(),
        });
        self
    }

    /// Builder method to map an alternative source header onto a column.
    pub fn alias(mut self, header: &str, column: &str) -> Self {
        self.aliases
            .push((normalize_header(header), column.to_string()));
        self
    }

    /// Builder method to add a secondary index.
    pub fn index(mut self, name: &str, columns: &[&str]) -> Self {
        self.indexes.push(IndexDescriptor {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    /// Table name as it appears in the database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Primary key column names, in key order.
    pub fn primary_key_columns(&self) -> &[String] {
        &self.primary_key
    }

    /// Outgoing references to parent tables.
    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    /// Secondary indexes created alongside the table.
    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    /// Position of `name` within [`columns`](Self::columns).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Looks up a column by exact name.
    pub fn column_named(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `column` is part of the primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    /// Column positions of the primary key, in key order.
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|c| self.column_index(c))
            .collect()
    }

    /// The database-assigned column, if any.
    pub fn auto_increment_column(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    /// Maps a source header to a column position.
    ///
    /// Matching is case-insensitive with spaces and hyphens treated as
    /// underscores; aliases are consulted when no column matches directly.
    pub fn resolve_column(&self, header: &str) -> Option<usize> {
        let normalized = normalize_header(header);
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(&normalized))
            .or_else(|| {
                self.aliases
                    .iter()
                    .find(|(alias, _)| *alias == normalized)
                    .and_then(|(_, column)| self.column_index(column))
            })
    }

    /// Tables this one references, self-references excluded.
    pub fn dependencies(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.references_table != self.name)
            .map(|fk| fk.references_table.as_str())
            .collect()
    }

    /// Tables referenced through NOT NULL foreign-key columns.
    pub fn required_dependencies(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.references_table != self.name)
            .filter(|fk| self.column_named(&fk.column).is_some_and(|c| !c.nullable))
            .map(|fk| fk.references_table.as_str())
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(LoadError::configuration("table name cannot be empty"));
        }
        if self.columns.is_empty() {
            return Err(LoadError::configuration(format!(
                "table '{}' declares no columns",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(LoadError::configuration(format!(
                    "table '{}' declares column '{}' twice",
                    self.name, column.name
                )));
            }
            if column.auto_increment && column.semantic_type != SemanticType::Integer {
                return Err(LoadError::configuration(format!(
                    "auto-increment column '{}.{}' must be an integer",
                    self.name, column.name
                )));
            }
        }
        if self.columns.iter().filter(|c| c.auto_increment).count() > 1 {
            return Err(LoadError::configuration(format!(
                "table '{}' declares more than one auto-increment column",
                self.name
            )));
        }

        if self.primary_key.is_empty() {
            return Err(LoadError::configuration(format!(
                "table '{}' has no primary key",
                self.name
            )));
        }
        for key in &self.primary_key {
            match self.column_named(key) {
                None => {
                    return Err(LoadError::configuration(format!(
                        "primary key column '{}.{}' is not declared",
                        self.name, key
                    )));
                }
                Some(column) if column.nullable => {
                    return Err(LoadError::configuration(format!(
                        "primary key column '{}.{}' must not be nullable",
                        self.name, key
                    )));
                }
                Some(_) => {}
            }
        }

        for fk in &self.foreign_keys {
            if self.column_index(&fk.column).is_none() {
                return Err(LoadError::configuration(format!(
                    "foreign key column '{}.{}' is not declared",
                    self.name, fk.column
                )));
            }
        }
        for (alias, column) in &self.aliases {
            if self.column_index(column).is_none() {
                return Err(LoadError::configuration(format!(
                    "alias '{}' of table '{}' points at unknown column '{}'",
                    alias, self.name, column
                )));
            }
        }
        for index in &self.indexes {
            if let Some(missing) = index.columns.iter().find(|c| self.column_index(c).is_none()) {
                return Err(LoadError::configuration(format!(
                    "index '{}' of table '{}' uses unknown column '{}'",
                    index.name, self.name, missing
                )));
            }
        }
        Ok(())
    }
}

/// Lowercases a header and folds spaces and hyphens into underscores.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Validated, immutable set of table descriptors with their load order.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<Arc<TableDescriptor>>,
    by_name: HashMap<String, usize>,
    order: Vec<usize>,
}

impl SchemaRegistry {
    /// Validates the descriptors and computes the load order.
    ///
    /// # Errors
    /// Returns a configuration error for duplicate tables, undeclared or
    /// nullable key columns, dangling foreign keys, foreign keys that target
    /// neither a single-column primary key nor a unique column, and
    /// foreign-key cycles (self-references excepted).
    pub fn new(tables: Vec<TableDescriptor>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(tables.len());
        for (index, table) in tables.iter().enumerate() {
            table.validate()?;
            if by_name.insert(table.name.clone(), index).is_some() {
                return Err(LoadError::configuration(format!(
                    "table '{}' is declared twice",
                    table.name
                )));
            }
        }

        for table in &tables {
            for fk in &table.foreign_keys {
                let target = by_name
                    .get(&fk.references_table)
                    .and_then(|&i| tables.get(i))
                    .ok_or_else(|| {
                        LoadError::configuration(format!(
                            "foreign key '{}.{}' references missing table '{}'",
                            table.name, fk.column, fk.references_table
                        ))
                    })?;
                let column = target.column_named(&fk.references_column).ok_or_else(|| {
                    LoadError::configuration(format!(
                        "foreign key '{}.{}' references missing column '{}.{}'",
                        table.name, fk.column, fk.references_table, fk.references_column
                    ))
                })?;
                let is_single_key = target.primary_key.len() == 1
                    && target.primary_key[0] == fk.references_column;
                if !is_single_key && !column.unique {
                    return Err(LoadError::configuration(format!(
                        "foreign key '{}.{}' must reference a primary key or unique column, '{}.{}' is neither",
                        table.name, fk.column, fk.references_table, fk.references_column
                    )));
                }
            }
        }

        let order = topological_order(&tables, &by_name)?;
        Ok(Self {
            tables: tables.into_iter().map(Arc::new).collect(),
            by_name,
            order,
        })
    }

    /// Registry of the nine store tables.
    pub fn store_schema() -> Result<Self> {
        Self::new(tables::store_tables())
    }

    /// Descriptor for `name`.
    ///
    /// # Errors
    /// Returns a configuration error when no such table is declared.
    pub fn describe(&self, name: &str) -> Result<&Arc<TableDescriptor>> {
        self.by_name
            .get(name)
            .and_then(|&index| self.tables.get(index))
            .ok_or_else(|| LoadError::configuration(format!("no descriptor for table '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Table names such that every foreign-key target precedes its referrers.
    pub fn load_order(&self) -> Vec<&str> {
        self.ordered().map(|t| t.name()).collect()
    }

    /// Descriptors in load order.
    pub fn ordered(&self) -> impl DoubleEndedIterator<Item = &Arc<TableDescriptor>> {
        self.order.iter().filter_map(|&index| self.tables.get(index))
    }

    /// Descriptors in declaration order.
    pub fn tables(&self) -> &[Arc<TableDescriptor>] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Kahn's algorithm; among ready tables the earliest declared goes first.
fn topological_order(
    tables: &[TableDescriptor],
    by_name: &HashMap<String, usize>,
) -> Result<Vec<usize>> {
    let mut in_degree = vec![0usize; tables.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];

    for (index, table) in tables.iter().enumerate() {
        for dependency in table.dependencies() {
            if let Some(&target) = by_name.get(dependency) {
                in_degree[index] += 1;
                dependents[target].push(index);
            }
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| index)
        .collect();
    let mut order = Vec::with_capacity(tables.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() < tables.len() {
        let cyclic: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(index, _)| tables[index].name())
            .collect();
        return Err(LoadError::configuration(format!(
            "foreign key cycle between tables: {}",
            cyclic.join(", ")
        )));
    }
    Ok(order)
}
