//! SQL Steps
//!
//! The four units of work the repair loop schedules: generate, preflight
//! (guard), execute and repair. Each returns a structured failure instead
//! of an error so the loop decides what happens next.

use super::error_classifier::{ErrorClassifier, FailureKind};
use crate::db::QueryExecutor;
use crate::llm::SqlGenerator;
use crate::redaction::redact_sensitive_text;
use crate::sql_guard::{normalize_sql, validate_readonly_sql, AllowedTables};
use crate::types::{Row, SqlDraft, SqlFailure, SqlMode, SqlRequest};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Question-level inputs shared by every draft of one question.
#[derive(Debug, Clone, Copy)]
pub struct DraftInput<'a> {
    pub question: &'a str,
    pub schema_context: &'a str,
    pub allowed_tables: &'a AllowedTables,
    pub metadata_context: &'a str,
    pub conversation_context: &'a str,
}

pub struct SqlSteps {
    generator: Arc<dyn SqlGenerator>,
    executor: Arc<dyn QueryExecutor>,
    classifier: ErrorClassifier,
    row_limit: usize,
}

impl SqlSteps {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn QueryExecutor>,
        row_limit: usize,
    ) -> Self {
        Self {
            generator,
            executor,
            classifier: ErrorClassifier::new(),
            row_limit,
        }
    }

    /// Draft SQL for the question from scratch.
    pub async fn generate(&self, input: DraftInput<'_>) -> Result<SqlDraft, SqlFailure> {
        if input.schema_context.trim().is_empty() || input.allowed_tables.is_empty() {
            return Err(SqlFailure::new(
                FailureKind::SchemaContext,
                "Schema context is empty, cannot generate SQL.",
            ));
        }

        let request = self.request(input, SqlMode::Generate);
        match self.generator.draft(&request).await {
            Ok(draft) => {
                let sql = normalize_sql(&draft.sql);
                if sql.is_empty() {
                    let msg = "SQL generation failed: model returned empty SQL.";
                    error!("{}", msg);
                    return Err(SqlFailure::with_detail(
                        FailureKind::Generation,
                        msg,
                        "model returned empty SQL",
                    ));
                }
                info!("Generated SQL draft successfully.");
                Ok(SqlDraft {
                    sql,
                    reasoning: draft.reasoning,
                })
            }
            Err(e) => {
                let detail = redact_sensitive_text(&e.detail());
                let msg = format!("SQL generation failed: {}", detail);
                error!("{}", msg);
                let kind = self
                    .classifier
                    .classify_llm_failure(&detail, FailureKind::Generation);
                Err(SqlFailure::with_detail(kind, msg, detail))
            }
        }
    }

    /// Ask the model to fix `failed_sql` given the error it produced.
    pub async fn repair(
        &self,
        input: DraftInput<'_>,
        failed_sql: &str,
        sql_error: &str,
        attempt: u32,
    ) -> Result<SqlDraft, SqlFailure> {
        if input.schema_context.trim().is_empty() || input.allowed_tables.is_empty() {
            return Err(SqlFailure::new(
                FailureKind::SchemaContext,
                "Schema context is empty, cannot repair SQL.",
            ));
        }

        let request = self.request(
            input,
            SqlMode::Repair {
                failed_sql: failed_sql.to_string(),
                sql_error: sql_error.to_string(),
            },
        );
        match self.generator.draft(&request).await {
            Ok(draft) => {
                info!("SQL repaired on attempt={}.", attempt);
                let sql = normalize_sql(&draft.sql);
                if sql.is_empty() {
                    let msg = "SQL repair failed: model returned empty SQL.";
                    error!("{}", msg);
                    return Err(SqlFailure::with_detail(
                        FailureKind::Repair,
                        msg,
                        "model returned empty SQL",
                    ));
                }
                Ok(SqlDraft {
                    sql,
                    reasoning: draft.reasoning,
                })
            }
            Err(e) => {
                let detail = redact_sensitive_text(&e.detail());
                let msg = format!("SQL repair failed: {}", detail);
                error!("{}", msg);
                let kind = self
                    .classifier
                    .classify_llm_failure(&detail, FailureKind::Repair);
                Err(SqlFailure::with_detail(kind, msg, detail))
            }
        }
    }

    /// Guard verdict for `sql`. An empty allowlist is a refusal, not a
    /// skipped check.
    pub fn preflight(&self, sql: &str, allowed_tables: &AllowedTables) -> Result<(), SqlFailure> {
        if allowed_tables.is_empty() {
            let msg = "Allowed table context is empty; refusing to execute SQL.";
            warn!("{}", msg);
            return Err(SqlFailure::new(FailureKind::Allowlist, msg));
        }

        match validate_readonly_sql(sql, Some(allowed_tables)) {
            None => Ok(()),
            Some(rejection) => {
                let kind = FailureKind::from(self.classifier.classify(&rejection));
                warn!("SQL rejected by guard: {}", rejection);
                Err(SqlFailure::new(kind, rejection))
            }
        }
    }

    /// Run guard-accepted SQL.
    pub async fn execute(&self, sql: &str) -> Result<Vec<Row>, SqlFailure> {
        match self.executor.run_query(sql).await {
            Ok(rows) => {
                info!("SQL executed successfully with {} rows.", rows.len());
                Ok(rows)
            }
            Err(e) => {
                let msg = redact_sensitive_text(&e.detail());
                let kind = FailureKind::from(self.classifier.classify(&msg));
                error!("SQL execution failed ({}): {}", kind, msg);
                Err(SqlFailure::new(kind, msg))
            }
        }
    }

    fn request(&self, input: DraftInput<'_>, mode: SqlMode) -> SqlRequest {
        SqlRequest {
            mode,
            question: input.question.to_string(),
            schema_context: input.schema_context.to_string(),
            allowed_tables: input.allowed_tables.clone(),
            metadata_context: input.metadata_context.to_string(),
            conversation_context: input.conversation_context.to_string(),
            row_limit: self.row_limit,
        }
    }
}
