//! PostgreSQL Client
//!
//! Executes guarded SQL inside a read-only transaction with a pinned
//! `search_path` and a per-transaction statement timeout, and reads table
//! metadata from `information_schema`.

use super::connection::{init_lazy_pool, ping, DbPool};
use super::{QueryExecutor, TableCatalog};
use crate::config::Settings;
use crate::error::{AgentError, Result};
use crate::redaction::redact_sensitive_text;
use crate::schema::{ColumnSchema, TableSchema};
use crate::types::Row;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

const COLUMNS_QUERY: &str = r#"
    SELECT
        table_schema::text,
        table_name::text,
        column_name::text,
        data_type::text,
        ordinal_position::int
    FROM information_schema.columns
    WHERE table_schema = $1
    ORDER BY table_name, ordinal_position
"#;

pub struct PostgresClient {
    pool: DbPool,
    row_limit: usize,
    query_timeout_ms: u64,
    default_schema: String,
}

impl PostgresClient {
    pub fn new(
        pool: DbPool,
        row_limit: usize,
        query_timeout_ms: u64,
        default_schema: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            row_limit,
            query_timeout_ms,
            default_schema: default_schema.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let pool = init_lazy_pool(
            &settings.postgres_dsn,
            Duration::from_secs(settings.db_connect_timeout_seconds),
        )
        .map_err(|e| AgentError::Database(redact_sensitive_text(&e.to_string())))?;
        Ok(Self::new(
            pool,
            settings.query_row_limit,
            settings.query_timeout_ms,
            settings.db_schema.clone(),
        ))
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    /// `Ok(())` when the database answers `SELECT 1`.
    pub async fn check_connection(&self) -> Result<()> {
        ping(&self.pool)
            .await
            .map_err(|e| AgentError::Database(redact_sensitive_text(&e.to_string())))
    }
}

/// Wrap a single SELECT so every row comes back as one JSON object and the
/// row limit is enforced server-side. The newlines keep a trailing line
/// comment from swallowing the closing parenthesis.
pub fn wrap_for_json_rows(sql: &str, row_limit: usize) -> String {
    format!(
        "SELECT to_jsonb(q)::text AS row_json FROM (\n{}\n) AS q LIMIT {}",
        sql, row_limit
    )
}

#[async_trait]
impl QueryExecutor for PostgresClient {
    async fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        let mut tx = self.pool.begin().await?;

        // The guard is not the only line of defense.
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('search_path', $1, true)")
            .bind(&self.default_schema)
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(self.query_timeout_ms.to_string())
            .execute(&mut *tx)
            .await?;

        let wrapped = wrap_for_json_rows(sql, self.row_limit);
        debug!("Running wrapped SQL: {}", wrapped);
        let raw_rows: Vec<String> = sqlx::query_scalar(&wrapped).fetch_all(&mut *tx).await?;
        tx.rollback().await?;

        raw_rows
            .iter()
            .map(|raw| serde_json::from_str::<Row>(raw).map_err(AgentError::from))
            .collect()
    }
}

#[async_trait]
impl TableCatalog for PostgresClient {
    async fn table_schemas(&self, schema: &str) -> Result<Vec<TableSchema>> {
        let rows: Vec<(String, String, String, String, i32)> = sqlx::query_as(COLUMNS_QUERY)
            .bind(schema)
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: BTreeMap<(String, String), Vec<ColumnSchema>> = BTreeMap::new();
        for (table_schema, table_name, column_name, data_type, ordinal_position) in rows {
            grouped
                .entry((table_schema, table_name))
                .or_default()
                .push(ColumnSchema {
                    column_name,
                    data_type,
                    ordinal_position,
                });
        }

        let tables: Vec<TableSchema> = grouped
            .into_iter()
            .map(|((table_schema, table_name), columns)| TableSchema {
                table_schema,
                table_name,
                columns,
            })
            .collect();
        info!("Read {} tables from schema '{}'.", tables.len(), schema);
        Ok(tables)
    }
}
