//! Prompt Templates
//!
//! System and user messages for SQL generation, SQL repair and the final
//! answer.

use crate::types::{Row, SqlMode, SqlRequest};

const NO_METADATA: &str = "No metadata hints.";
const NO_CONVERSATION: &str = "No prior conversation context.";

/// Rows shown to the answer model.
pub const ANSWER_ROWS_PREVIEW: usize = 20;

pub const ANSWER_SYSTEM_PROMPT: &str = r#"You are an analytics answer agent.
You receive:
- user question
- executed SQL
- SQL rows

Tasks:
1) Explain result clearly.
2) Use the same language style as the user question (Vietnamese or English).
3) If rows are empty, say no matching data.
4) Keep answer concise and practical."#;

fn or_default<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

/// System prompt for a generate or repair request.
pub fn sql_system_prompt(request: &SqlRequest) -> String {
    let (role, task, write_rule, output_name) = match request.mode {
        SqlMode::Generate => (
            "You are a SQL generation agent.",
            "Generate one PostgreSQL query for the user question.",
            "Never use INSERT/UPDATE/DELETE/DROP/ALTER/TRUNCATE.",
            "generated SQL string",
        ),
        SqlMode::Repair { .. } => (
            "You are a SQL repair agent.",
            "Fix the failed PostgreSQL query so it matches the schema and user intent.",
            "Never use write operations.",
            "repaired SQL string",
        ),
    };

    format!(
        r#"{role}
{task}

Schema:
{schema}

Allowed tables:
{allowed}

Metadata hints:
{metadata}

Conversation context:
{conversation}

Rules:
1) Output exactly one SQL statement.
2) Use only SELECT or WITH...SELECT.
3) Use only tables listed in "Allowed tables".
4) {write_rule}
5) Prefer explicit column names.
6) If query returns raw rows (non-aggregate), include LIMIT {row_limit}.
7) Keep SQL valid PostgreSQL syntax.

Output format:
- Return ONLY a JSON object with keys:
  - "sql": {output_name}
  - "reasoning": short string
- Do not include markdown fences."#,
        role = role,
        task = task,
        schema = request.schema_context,
        allowed = request.allowed_tables_text(),
        metadata = or_default(&request.metadata_context, NO_METADATA),
        conversation = or_default(&request.conversation_context, NO_CONVERSATION),
        write_rule = write_rule,
        row_limit = request.row_limit,
        output_name = output_name,
    )
}

/// User message for a generate or repair request.
pub fn sql_user_prompt(request: &SqlRequest) -> String {
    match &request.mode {
        SqlMode::Generate => request.question.clone(),
        SqlMode::Repair {
            failed_sql,
            sql_error,
        } => format!(
            "User question:\n{}\n\nFailed SQL:\n{}\n\nDatabase error:\n{}",
            request.question, failed_sql, sql_error
        ),
    }
}

/// User message for the answer model.
pub fn answer_user_prompt(question: &str, sql: &str, rows: &[Row]) -> String {
    let preview: Vec<&Row> = rows.iter().take(ANSWER_ROWS_PREVIEW).collect();
    let rows_json = serde_json::to_string(&preview).unwrap_or_else(|_| "[]".to_string());
    format!(
        "User question:\n{}\n\nExecuted SQL:\n{}\n\nRows(JSON):\n{}",
        question, sql, rows_json
    )
}
