//! Persistence backend seam. Query terminals and transaction steps run against an `Executor`;
//! a `Backend` hands out autocommit executors and transactional scopes.

mod memory;
mod postgres;

pub use memory::MemoryBackend;
pub use postgres::{ensure_database_exists, ensure_tables, PgBackend};

use crate::error::AppError;
use crate::model::EntitySchema;
use crate::query::Spec;
use async_trait::async_trait;
use serde_json::{Map, Value};

#[async_trait]
pub trait Executor: Send {
    /// Rows matching `spec`, restricted to its projection, deduplicated when unique, windowed.
    async fn select(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<Vec<Value>, AppError>;

    /// Number of rows `select` would return for the same spec.
    async fn count(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError>;

    /// Inserts one row and returns it as stored, including defaulted columns.
    async fn insert(&mut self, schema: &'static EntitySchema, row: &Map<String, Value>) -> Result<Value, AppError>;

    async fn update(
        &mut self,
        schema: &'static EntitySchema,
        spec: &Spec,
        field: &str,
        value: &Value,
    ) -> Result<u64, AppError>;

    async fn delete(&mut self, schema: &'static EntitySchema, spec: &Spec) -> Result<u64, AppError>;
}

/// A transactional scope. Dropping it without `commit` rolls back.
#[async_trait]
pub trait Transaction: Executor {
    fn executor(&mut self) -> &mut dyn Executor;

    async fn commit(&mut self) -> Result<(), AppError>;

    async fn rollback(&mut self) -> Result<(), AppError>;
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Executor whose statements each commit on their own.
    fn executor(&self) -> Box<dyn Executor>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;

    async fn ping(&self) -> Result<(), AppError>;
}

pub(crate) fn finished() -> AppError {
    AppError::Conflict("transaction already finished".into())
}
