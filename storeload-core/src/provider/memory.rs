//! In-process connection provider.
//!
//! Tables live in memory and enforce the registry's primary key, unique,
//! not-null, foreign-key and auto-increment rules with MySQL semantics: a
//! statement either applies completely or not at all, a parent row cannot be
//! deleted while referenced, and upsert updates the row it collides with.
//! The CLI uses it for `--dry-run`; tests use its hooks to observe handles,
//! statements and table contents.

use super::{ConnectionProvider, LoadConnection, Statement};
use crate::error::{ConstraintKind, LoadError};
use crate::models::{Operation, Value};
use crate::schema::{SchemaRegistry, TableDescriptor};
use crate::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = Vec<Value>;

#[derive(Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<Key, Vec<Value>>,
    next_auto: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    offline: bool,
    open_handles: usize,
    statements: u64,
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| LoadError::configuration(format!("no in-memory table '{name}'")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| LoadError::configuration(format!("no in-memory table '{name}'")))
    }
}

/// Undo record for statement atomicity.
struct Undo {
    table: String,
    key: Key,
    previous: Option<Vec<Value>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Constraint-enforcing in-memory store.
///
/// Clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    registry: Arc<SchemaRegistry>,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryProvider {
    /// Creates empty tables for every registry table.
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        let tables = registry
            .tables()
            .iter()
            .map(|t| (t.name().to_string(), MemoryTable::default()))
            .collect();
        Self {
            registry,
            state: Arc::new(Mutex::new(MemoryState {
                tables,
                ..MemoryState::default()
            })),
        }
    }

    /// Simulates losing the server: acquires and statements fail with a
    /// connectivity error until switched back.
    pub fn set_offline(&self, offline: bool) {
        lock(&self.state).offline = offline;
    }

    /// Handles acquired and not yet dropped.
    pub fn open_handles(&self) -> usize {
        lock(&self.state).open_handles
    }

    /// Statements received, including failed ones.
    pub fn statements_executed(&self) -> u64 {
        lock(&self.state).statements
    }

    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.state)
            .tables
            .get(table)
            .map_or(0, |t| t.rows.len())
    }

    /// Table contents ordered by primary key, each row keyed by column name.
    pub fn rows(&self, table: &str) -> Vec<BTreeMap<String, Value>> {
        let Ok(descriptor) = self.registry.describe(table) else {
            return Vec::new();
        };
        let state = lock(&self.state);
        state
            .tables
            .get(table)
            .map(|t| {
                t.rows
                    .values()
                    .map(|values| {
                        descriptor
                            .columns()
                            .iter()
                            .map(|c| c.name.clone())
                            .zip(values.iter().cloned())
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionProvider for MemoryProvider {
    async fn acquire(&self) -> Result<Box<dyn LoadConnection>> {
        let mut state = lock(&self.state);
        if state.offline {
            return Err(LoadError::connectivity("in-memory store is offline"));
        }
        state.open_handles = state.open_handles.saturating_add(1);
        drop(state);

        Ok(Box::new(MemoryConnection {
            registry: Arc::clone(&self.registry),
            state: Arc::clone(&self.state),
        }))
    }

    fn describe(&self) -> String {
        "in-memory store".to_string()
    }
}

struct MemoryConnection {
    registry: Arc<SchemaRegistry>,
    state: Arc<Mutex<MemoryState>>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}

#[async_trait]
impl LoadConnection for MemoryConnection {
    async fn execute(&mut self, statement: &Statement<'_>, params: &[Value]) -> Result<u64> {
        let width = statement.bound_columns().len();
        if width == 0 || params.len() != width.saturating_mul(statement.row_count()) {
            return Err(LoadError::configuration(format!(
                "statement on '{}' expects {} parameters per row, got {} in total",
                statement.table().name(),
                width,
                params.len()
            )));
        }
        self.apply(statement, params.chunks(width))
    }

    async fn execute_many(
        &mut self,
        statement: &Statement<'_>,
        params: &[Vec<Value>],
    ) -> Result<u64> {
        let width = statement.bound_columns().len();
        if params.iter().any(|row| row.len() != width) {
            return Err(LoadError::configuration(format!(
                "statement on '{}' expects {} parameters per row",
                statement.table().name(),
                width
            )));
        }
        self.apply(statement, params.iter().map(Vec::as_slice))
    }
}

impl MemoryConnection {
    fn apply<'p>(
        &self,
        statement: &Statement<'_>,
        rows: impl Iterator<Item = &'p [Value]>,
    ) -> Result<u64> {
        let mut state = lock(&self.state);
        if state.offline {
            return Err(LoadError::connectivity("in-memory store is offline"));
        }
        state.statements = state.statements.saturating_add(1);

        let mut undo = Vec::new();
        let mut affected = 0u64;
        for params in rows {
            match self.apply_row(&mut state, statement, params, &mut undo) {
                Ok(count) => affected = affected.saturating_add(count),
                Err(error) => {
                    rollback(&mut state, undo);
                    return Err(error);
                }
            }
        }
        Ok(affected)
    }

    fn apply_row(
        &self,
        state: &mut MemoryState,
        statement: &Statement<'_>,
        params: &[Value],
        undo: &mut Vec<Undo>,
    ) -> Result<u64> {
        let table = statement.table();
        let mut values = vec![Value::Null; table.columns().len()];
        for (index, value) in statement.bound_columns().into_iter().zip(params) {
            if let Some(slot) = values.get_mut(index) {
                *slot = value.clone();
            }
        }

        match statement.operation() {
            Operation::Insert => self.insert(state, table, values, undo),
            Operation::Upsert => match find_conflict(state, table, &values)? {
                Some(key) => self.update_existing(state, table, &key, &values, undo, 2),
                None => self.insert(state, table, values, undo),
            },
            Operation::Update => {
                let key = key_of(table, &values);
                if state.table(table.name())?.rows.contains_key(&key) {
                    self.update_existing(state, table, &key, &values, undo, 1)
                } else {
                    Ok(0)
                }
            }
            Operation::Delete => {
                let key = key_of(table, &values);
                let Some(current) = state.table(table.name())?.rows.get(&key).cloned() else {
                    return Ok(0);
                };
                self.check_not_referenced(state, table, &current, |_| true)?;
                state.table_mut(table.name())?.rows.remove(&key);
                undo.push(Undo {
                    table: table.name().to_string(),
                    key,
                    previous: Some(current),
                });
                Ok(1)
            }
        }
    }

    fn insert(
        &self,
        state: &mut MemoryState,
        table: &TableDescriptor,
        mut values: Vec<Value>,
        undo: &mut Vec<Undo>,
    ) -> Result<u64> {
        if let Some(index) = table.columns().iter().position(|c| c.auto_increment) {
            let memory = state.table_mut(table.name())?;
            match values.get(index) {
                Some(Value::Null) => {
                    let next = memory.next_auto.max(1);
                    values[index] = Value::Integer(next);
                    memory.next_auto = next.saturating_add(1);
                }
                Some(Value::Integer(given)) => {
                    memory.next_auto = memory.next_auto.max(given.saturating_add(1));
                }
                _ => {}
            }
        }

        check_not_null(table, &values)?;
        let key = key_of(table, &values);
        if state.table(table.name())?.rows.contains_key(&key) {
            return Err(LoadError::constraint(
                ConstraintKind::UniqueViolation,
                format!("duplicate primary key in '{}'", table.name()),
            ));
        }
        check_unique(state, table, &values, None)?;
        self.check_foreign_keys(state, table, &values)?;

        state
            .table_mut(table.name())?
            .rows
            .insert(key.clone(), values);
        undo.push(Undo {
            table: table.name().to_string(),
            key,
            previous: None,
        });
        Ok(1)
    }

    /// Replaces the non-key columns of the row stored under `key`.
    fn update_existing(
        &self,
        state: &mut MemoryState,
        table: &TableDescriptor,
        key: &Key,
        values: &[Value],
        undo: &mut Vec<Undo>,
        changed_count: u64,
    ) -> Result<u64> {
        let Some(current) = state.table(table.name())?.rows.get(key).cloned() else {
            return Ok(0);
        };
        let key_indices = table.primary_key_indices();
        let mut updated = current.clone();
        for (index, slot) in updated.iter_mut().enumerate() {
            if !key_indices.contains(&index)
                && let Some(value) = values.get(index)
            {
                *slot = value.clone();
            }
        }
        if updated == current {
            return Ok(0);
        }

        check_not_null(table, &updated)?;
        check_unique(state, table, &updated, Some(key))?;
        self.check_foreign_keys(state, table, &updated)?;
        self.check_not_referenced(state, table, &current, |index| {
            current.get(index) != updated.get(index)
        })?;

        state
            .table_mut(table.name())?
            .rows
            .insert(key.clone(), updated);
        undo.push(Undo {
            table: table.name().to_string(),
            key: key.clone(),
            previous: Some(current),
        });
        Ok(changed_count)
    }

    fn check_foreign_keys(
        &self,
        state: &MemoryState,
        table: &TableDescriptor,
        values: &[Value],
    ) -> Result<()> {
        for fk in table.foreign_keys() {
            let Some(value) = table.column_index(&fk.column).and_then(|i| values.get(i)) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            let target = self.registry.describe(&fk.references_table)?;
            let Some(target_index) = target.column_index(&fk.references_column) else {
                continue;
            };
            let references_itself =
                fk.references_table == table.name() && values.get(target_index) == Some(value);
            if references_itself {
                continue;
            }

            let rows = &state.table(target.name())?.rows;
            let by_key = matches!(target.primary_key_columns(), [only] if *only == fk.references_column);
            let found = if by_key {
                rows.contains_key(std::slice::from_ref(value))
            } else {
                rows.values().any(|row| row.get(target_index) == Some(value))
            };
            if !found {
                return Err(LoadError::constraint(
                    ConstraintKind::ForeignKeyViolation,
                    format!(
                        "'{}.{}' = {} has no parent in '{}'",
                        table.name(),
                        fk.column,
                        value,
                        fk.references_table
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Fails when a child row still references `row` through one of the
    /// columns selected by `watched`.
    fn check_not_referenced(
        &self,
        state: &MemoryState,
        table: &TableDescriptor,
        row: &[Value],
        watched: impl Fn(usize) -> bool,
    ) -> Result<()> {
        let own_key = key_of(table, row);
        for child in self.registry.tables() {
            for fk in child
                .foreign_keys()
                .iter()
                .filter(|fk| fk.references_table == table.name())
            {
                let Some(target_index) = table.column_index(&fk.references_column) else {
                    continue;
                };
                if !watched(target_index) {
                    continue;
                }
                let Some(value) = row.get(target_index).filter(|v| !v.is_null()) else {
                    continue;
                };
                let Some(child_index) = child.column_index(&fk.column) else {
                    continue;
                };
                let is_self = child.name() == table.name();
                let referenced = state.table(child.name())?.rows.iter().any(|(key, values)| {
                    values.get(child_index) == Some(value) && !(is_self && *key == own_key)
                });
                if referenced {
                    return Err(LoadError::constraint(
                        ConstraintKind::ForeignKeyViolation,
                        format!(
                            "'{}' row is still referenced by '{}.{}'",
                            table.name(),
                            child.name(),
                            fk.column
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn key_of(table: &TableDescriptor, values: &[Value]) -> Key {
    table
        .primary_key_indices()
        .into_iter()
        .map(|i| values.get(i).cloned().unwrap_or(Value::Null))
        .collect()
}

fn check_not_null(table: &TableDescriptor, values: &[Value]) -> Result<()> {
    for (column, value) in table.columns().iter().zip(values) {
        if !column.nullable && value.is_null() {
            return Err(LoadError::constraint(
                ConstraintKind::NotNullViolation,
                format!("'{}.{}' cannot be null", table.name(), column.name),
            ));
        }
    }
    Ok(())
}

fn check_unique(
    state: &MemoryState,
    table: &TableDescriptor,
    values: &[Value],
    except: Option<&Key>,
) -> Result<()> {
    let rows = &state.table(table.name())?.rows;
    for (index, column) in table.columns().iter().enumerate() {
        if !column.unique {
            continue;
        }
        let Some(value) = values.get(index).filter(|v| !v.is_null()) else {
            continue;
        };
        let clash = rows
            .iter()
            .any(|(key, row)| Some(key) != except && row.get(index) == Some(value));
        if clash {
            return Err(LoadError::constraint(
                ConstraintKind::UniqueViolation,
                format!("duplicate value for '{}.{}'", table.name(), column.name),
            ));
        }
    }
    Ok(())
}

/// Key of the stored row an upsert collides with: same primary key first,
/// then same value in a unique column.
fn find_conflict(
    state: &MemoryState,
    table: &TableDescriptor,
    values: &[Value],
) -> Result<Option<Key>> {
    let rows = &state.table(table.name())?.rows;
    let key = key_of(table, values);
    if key.iter().all(|v| !v.is_null()) && rows.contains_key(&key) {
        return Ok(Some(key));
    }
    for (index, column) in table.columns().iter().enumerate() {
        if !column.unique {
            continue;
        }
        let Some(value) = values.get(index).filter(|v| !v.is_null()) else {
            continue;
        };
        if let Some((existing, _)) = rows.iter().find(|(_, row)| row.get(index) == Some(value)) {
            return Ok(Some(existing.clone()));
        }
    }
    Ok(None)
}

fn rollback(state: &mut MemoryState, undo: Vec<Undo>) {
    for entry in undo.into_iter().rev() {
        if let Some(table) = state.tables.get_mut(&entry.table) {
            match entry.previous {
                Some(previous) => {
                    table.rows.insert(entry.key, previous);
                }
                None => {
                    table.rows.remove(&entry.key);
                }
            }
        }
    }
}
