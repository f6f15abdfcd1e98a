//! Shared records passed between the repair loop and its collaborators.

use crate::execution_loop::error_classifier::FailureKind;
use crate::sql_guard::AllowedTables;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result row, column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// What the SQL generator returned: untrusted text plus its explanation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlDraft {
    pub sql: String,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlMode {
    Generate,
    Repair { failed_sql: String, sql_error: String },
}

/// Everything the generator needs for one draft.
#[derive(Debug, Clone)]
pub struct SqlRequest {
    pub mode: SqlMode,
    pub question: String,
    pub schema_context: String,
    pub allowed_tables: AllowedTables,
    pub metadata_context: String,
    pub conversation_context: String,
    pub row_limit: usize,
}

impl SqlRequest {
    pub fn is_repair(&self) -> bool {
        matches!(self.mode, SqlMode::Repair { .. })
    }

    /// Allowed tables as the comma separated list shown to the model.
    pub fn allowed_tables_text(&self) -> String {
        self.allowed_tables
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A classified failure. `sql_error` is the full message,
/// `sql_error_message` the underlying detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlFailure {
    #[serde(rename = "sql_error_type")]
    pub kind: FailureKind,
    pub sql_error: String,
    pub sql_error_message: String,
}

impl SqlFailure {
    pub fn new(kind: FailureKind, sql_error: impl Into<String>) -> Self {
        let sql_error = sql_error.into();
        Self {
            kind,
            sql_error_message: sql_error.clone(),
            sql_error,
        }
    }

    pub fn with_detail(
        kind: FailureKind,
        sql_error: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            sql_error: sql_error.into(),
            sql_error_message: detail.into(),
        }
    }
}

/// What the repair loop hands back for one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SqlOutcome {
    pub sql_query: String,
    pub sql_reasoning: String,
    pub rows: Vec<Row>,
    #[serde(flatten)]
    pub failure: Option<SqlFailure>,
    pub attempts: u32,
    /// Last SQL that failed guard or execution, kept for error reporting.
    pub last_failed_sql: String,
}

impl SqlOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn sql_error(&self) -> &str {
        self.failure
            .as_ref()
            .map(|failure| failure.sql_error.as_str())
            .unwrap_or("")
    }

    pub fn sql_error_type(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|failure| failure.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    Sql,
    Unsupported,
}

/// Final answer for one `ask` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentResult {
    pub question: String,
    pub thread_id: String,
    pub route: Route,
    pub route_reason: String,
    pub sql_query: String,
    pub sql_reasoning: String,
    pub sql_rows: Vec<Row>,
    pub sql_error: String,
    pub sql_error_type: Option<FailureKind>,
    pub sql_error_message: String,
    pub attempts: u32,
    pub final_answer: String,
}

impl AgentResult {
    /// Result for a question that never reached SQL generation.
    pub fn unsupported(
        question: impl Into<String>,
        thread_id: impl Into<String>,
        reason: impl Into<String>,
        final_answer: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            thread_id: thread_id.into(),
            route: Route::Unsupported,
            route_reason: reason.into(),
            sql_query: String::new(),
            sql_reasoning: String::new(),
            sql_rows: Vec::new(),
            sql_error: String::new(),
            sql_error_type: None,
            sql_error_message: String::new(),
            attempts: 0,
            final_answer: final_answer.into(),
        }
    }

    pub fn from_outcome(
        question: impl Into<String>,
        thread_id: impl Into<String>,
        outcome: SqlOutcome,
        final_answer: impl Into<String>,
    ) -> Self {
        let (sql_error, sql_error_type, sql_error_message) = match outcome.failure {
            Some(failure) => (failure.sql_error, Some(failure.kind), failure.sql_error_message),
            None => (String::new(), None, String::new()),
        };
        Self {
            question: question.into(),
            thread_id: thread_id.into(),
            route: Route::Sql,
            route_reason: String::new(),
            sql_query: outcome.sql_query,
            sql_reasoning: outcome.sql_reasoning,
            sql_rows: outcome.rows,
            sql_error,
            sql_error_type,
            sql_error_message,
            attempts: outcome.attempts,
            final_answer: final_answer.into(),
        }
    }
}
