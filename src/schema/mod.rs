//! Schema model and prompt rendering.

pub mod service;

pub use service::SchemaService;

use crate::sql_guard::AllowedTables;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const NO_SCHEMA_OVERVIEW: &str = "No schema overview available.";
pub const NO_SCHEMA_CONTEXT: &str = "No schema context available.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column_name: String,
    pub data_type: String,
    pub ordinal_position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_schema: String,
    pub table_name: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.table_schema, self.table_name)
    }
}

/// Schema material for one question: the retrieved subset plus the full
/// schema used after an allowlist failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaContext {
    /// Non-empty when the schema could not be loaded or is empty.
    pub schema_error: String,
    pub schema_overview: String,
    pub schema_context: String,
    pub schema_context_full: String,
    pub allowed_tables: AllowedTables,
    pub all_allowed_tables: AllowedTables,
}

impl SchemaContext {
    pub fn failed(schema_error: impl Into<String>, schema_overview: &str) -> Self {
        Self {
            schema_error: schema_error.into(),
            schema_overview: schema_overview.to_string(),
            schema_context: NO_SCHEMA_CONTEXT.to_string(),
            schema_context_full: NO_SCHEMA_CONTEXT.to_string(),
            allowed_tables: AllowedTables::default(),
            all_allowed_tables: AllowedTables::default(),
        }
    }
}

/// Supplies the schema context for a question.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn context_for(&self, question: &str) -> SchemaContext;
}

/// Cut `text` to `max_chars` characters, ending in `...` when cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }
    let head: String = text.chars().take(max_chars - 3).collect();
    format!("{}...", head.trim_end())
}

/// Bare lower-case name plus `schema.table` for every table.
pub fn build_allowlist(tables: &[TableSchema]) -> AllowedTables {
    tables
        .iter()
        .flat_map(|table| [table.table_name.to_lowercase(), table.full_name().to_lowercase()])
        .collect()
}

/// Comma separated full names, at most `max_tables` of them.
pub fn build_schema_overview(tables: &[TableSchema], max_tables: usize) -> String {
    if tables.is_empty() {
        return "No tables found.".to_string();
    }
    let names: Vec<String> = tables.iter().take(max_tables).map(TableSchema::full_name).collect();
    let mut overview = names.join(", ");
    if tables.len() > max_tables {
        overview.push_str(&format!(", ... (+{} tables)", tables.len() - max_tables));
    }
    overview
}

pub fn build_schema_context(tables: &[TableSchema], max_columns_per_table: usize, max_chars: usize) -> String {
    if tables.is_empty() {
        return "No schema available.".to_string();
    }

    let mut lines = Vec::new();
    for table in tables {
        lines.push(format!("Table: {}", table.full_name()));
        lines.push("Columns:".to_string());
        for column in table.columns.iter().take(max_columns_per_table) {
            lines.push(format!("- {} ({})", column.column_name, column.data_type));
        }
        lines.push(String::new());
    }

    truncate_text(lines.join("\n").trim(), max_chars)
}
