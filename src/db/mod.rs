//! Database module for PostgreSQL connection and operations
//!
//! The repair loop and the schema service only see the two traits below;
//! [`PostgresClient`] implements both against a live database.

pub mod connection;
pub mod postgres;

pub use connection::{init_lazy_pool, DbPool};
pub use postgres::PostgresClient;

use crate::error::Result;
use crate::schema::TableSchema;
use crate::types::Row;
use async_trait::async_trait;

/// Runs guard-accepted SQL and returns a bounded list of rows. Implementors
/// must enforce a read-only transaction and a statement timeout.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn run_query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Lists tables and columns of a database schema.
#[async_trait]
pub trait TableCatalog: Send + Sync {
    async fn table_schemas(&self, schema: &str) -> Result<Vec<TableSchema>>;
}
