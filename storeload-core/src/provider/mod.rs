//! Connection provider abstraction used by the loader.
//!
//! # Module Structure
//! - `statement`: structured write statements and their MySQL rendering
//! - `config`: pool and session configuration
//! - `memory`: in-process provider enforcing the registry's constraints
//! - `mysql`: sqlx-backed provider (feature `mysql`)
//!
//! The loader never reaches for an ambient pool: the caller owns a
//! [`ConnectionProvider`] and passes it in explicitly. Each load call acquires
//! one handle and drops it on every exit path, which releases it.

pub mod config;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod statement;

use crate::Result;
use crate::models::Value;
use async_trait::async_trait;

pub use config::ConnectionConfig;
pub use memory::MemoryProvider;
#[cfg(feature = "mysql")]
pub use mysql::MySqlProvider;
pub use statement::Statement;

/// Source of scoped database handles.
///
/// # Object Safety
/// This trait is object-safe; the loader takes `&dyn ConnectionProvider`.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Acquires a handle. Dropping the returned box releases it.
    ///
    /// # Errors
    /// Returns a connectivity error when no handle can be supplied
    async fn acquire(&self) -> Result<Box<dyn LoadConnection>>;

    /// Human readable target description, credentials redacted.
    fn describe(&self) -> String;
}

/// A scoped handle able to run write statements.
///
/// Errors are classified: [`crate::LoadError::Constraint`] for data the
/// database refused, [`crate::LoadError::Connectivity`] when the handle is
/// unusable. Raw driver errors never escape.
#[async_trait]
pub trait LoadConnection: Send {
    /// Runs the statement once with a flat parameter list.
    async fn execute(&mut self, statement: &Statement<'_>, params: &[Value]) -> Result<u64>;

    /// Runs the statement once per parameter tuple, all or nothing.
    async fn execute_many(&mut self, statement: &Statement<'_>, params: &[Vec<Value>])
    -> Result<u64>;
}
