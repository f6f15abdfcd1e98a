use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use taxi_sql_agent::db::QueryExecutor;
use taxi_sql_agent::error::{AgentError, Result};
use taxi_sql_agent::llm::{AnswerWriter, SqlGenerator};
use taxi_sql_agent::schema::{SchemaContext, SchemaProvider};
use taxi_sql_agent::sql_guard::AllowedTables;
use taxi_sql_agent::types::{Route, Row, SqlDraft, SqlRequest};
use taxi_sql_agent::{FailureKind, SqlAgent};

struct FixedSchema(SchemaContext);

#[async_trait]
impl SchemaProvider for FixedSchema {
    async fn context_for(&self, _question: &str) -> SchemaContext {
        self.0.clone()
    }
}

fn trips_schema() -> SchemaContext {
    let allowed = AllowedTables::new(["public.trips", "trips"]);
    SchemaContext {
        schema_error: String::new(),
        schema_overview: "public.trips".to_string(),
        schema_context: "Table: public.trips\nColumns:\n- fare_amount (numeric)".to_string(),
        schema_context_full: "Table: public.trips\nColumns:\n- fare_amount (numeric)".to_string(),
        allowed_tables: allowed.clone(),
        all_allowed_tables: allowed,
    }
}

/// Always drafts the same SQL and records the requests.
struct FixedGenerator {
    sql: String,
    requests: Mutex<Vec<SqlRequest>>,
}

impl FixedGenerator {
    fn new(sql: &str) -> Arc<Self> {
        Arc::new(Self {
            sql: sql.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SqlGenerator for FixedGenerator {
    async fn draft(&self, request: &SqlRequest) -> Result<SqlDraft> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(SqlDraft {
            sql: self.sql.clone(),
            reasoning: String::new(),
        })
    }
}

struct ScriptedExecutor(Mutex<VecDeque<Result<Vec<Row>>>>);

impl ScriptedExecutor {
    fn new(results: Vec<Result<Vec<Row>>>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(results.into())))
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn run_query(&self, _sql: &str) -> Result<Vec<Row>> {
        self.0.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Answers with a fixed text, or fails when `None`.
struct FixedAnswer(Option<String>);

#[async_trait]
impl AnswerWriter for FixedAnswer {
    async fn write_answer(&self, _question: &str, _sql: &str, rows: &[Row]) -> Result<String> {
        match &self.0 {
            Some(text) => Ok(format!("{} ({} rows)", text, rows.len())),
            None => Err(AgentError::Llm("LLM API error (503): unavailable".to_string())),
        }
    }
}

fn fare_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| json!({ "fare_amount": 10 + i }).as_object().unwrap().clone())
        .collect()
}

fn agent(
    schema: SchemaContext,
    generator: Arc<FixedGenerator>,
    executor: Arc<ScriptedExecutor>,
    answer: Option<&str>,
) -> SqlAgent {
    SqlAgent::new(
        Arc::new(FixedSchema(schema)),
        generator,
        executor,
        Arc::new(FixedAnswer(answer.map(str::to_string))),
        100,
        1,
        10,
    )
}

#[tokio::test]
async fn test_empty_question() {
    let generator = FixedGenerator::new("SELECT 1 FROM trips");
    let agent = agent(trips_schema(), generator.clone(), ScriptedExecutor::new(vec![]), Some("ok"));

    let result = agent.ask("   ", "  ").await;

    assert_eq!(result.route, Route::Unsupported);
    assert_eq!(result.route_reason, "Empty question.");
    assert_eq!(result.thread_id, "default");
    assert!(result.final_answer.contains("The question is empty"));
    assert!(generator.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_schema_error_is_unsupported() {
    let schema = SchemaContext::failed(
        "Cannot read schema from PostgreSQL: connection refused",
        "No schema overview available.",
    );
    let agent = agent(
        schema,
        FixedGenerator::new("SELECT 1 FROM trips"),
        ScriptedExecutor::new(vec![]),
        Some("ok"),
    );

    let result = agent.ask("How many trips?", "t1").await;

    assert_eq!(result.route, Route::Unsupported);
    assert_eq!(
        result.final_answer,
        "I cannot answer this request from the current PostgreSQL schema.\n\
         Reason: Cannot read schema from PostgreSQL: connection refused"
    );
    assert_eq!(result.sql_error_type, None);
}

#[tokio::test]
async fn test_success_is_answered_and_remembered() {
    let generator = FixedGenerator::new("SELECT fare_amount FROM trips LIMIT 2;");
    let executor = ScriptedExecutor::new(vec![Ok(fare_rows(2)), Ok(fare_rows(1))]);
    let agent = agent(trips_schema(), generator.clone(), executor, Some("Two fares"));

    let first = agent.ask("Show two fares", "t1").await;

    assert_eq!(first.route, Route::Sql);
    assert_eq!(first.sql_query, "SELECT fare_amount FROM trips LIMIT 2");
    assert_eq!(first.sql_rows.len(), 2);
    assert_eq!(first.sql_error, "");
    assert_eq!(first.final_answer, "Two fares (2 rows)");
    assert_eq!(agent.memory().previous_turn("t1").unwrap().question, "Show two fares");

    agent.ask("And just one?", "t1").await;

    let requests = generator.requests.lock().unwrap();
    assert_eq!(requests[0].conversation_context, "No previous conversation context.");
    assert!(requests[1]
        .conversation_context
        .starts_with("Previous question: Show two fares\nPrevious SQL: SELECT fare_amount FROM trips LIMIT 2"));
    assert!(requests[0].metadata_context.starts_with("Metadata hints (pre-SQL):"));
}

#[tokio::test]
async fn test_threads_do_not_share_memory() {
    let generator = FixedGenerator::new("SELECT fare_amount FROM trips");
    let agent = agent(trips_schema(), generator.clone(), ScriptedExecutor::new(vec![]), Some("ok"));

    agent.ask("fares please", "a").await;
    agent.ask("fares please", "b").await;

    let requests = generator.requests.lock().unwrap();
    assert_eq!(requests[1].conversation_context, "No previous conversation context.");
}

#[tokio::test]
async fn test_answer_writer_failure_uses_localized_fallback() {
    let agent_en = agent(
        trips_schema(),
        FixedGenerator::new("SELECT fare_amount FROM trips"),
        ScriptedExecutor::new(vec![Ok(fare_rows(3)), Ok(Vec::new())]),
        None,
    );
    let result = agent_en.ask("Show fares", "t").await;
    assert_eq!(
        result.final_answer,
        "Query succeeded with 3 rows (showing up to configured limit)."
    );
    let result = agent_en.ask("Show fares again", "t").await;
    assert_eq!(
        result.final_answer,
        "No matching data was found for the query conditions."
    );

    let agent_vi = agent(
        trips_schema(),
        FixedGenerator::new("SELECT fare_amount FROM trips"),
        ScriptedExecutor::new(vec![Ok(Vec::new())]),
        None,
    );
    let result = agent_vi.ask("Doanh thu trong thang 3 la bao nhieu?", "t").await;
    assert_eq!(result.final_answer, "Không có dữ liệu phù hợp với điều kiện truy vấn.");
}

#[tokio::test]
async fn test_failure_after_retry_quotes_sql_and_error() {
    let generator = FixedGenerator::new("SELECT fare FROM trips");
    let executor = ScriptedExecutor::new(vec![
        Err(AgentError::Database("column \"fare\" does not exist".to_string())),
        Err(AgentError::Database("column \"fare\" does not exist".to_string())),
    ]);
    let agent = agent(trips_schema(), generator.clone(), executor, Some("unused"));

    let result = agent.ask("Average fare?", "t1").await;

    assert_eq!(result.route, Route::Sql);
    assert_eq!(result.sql_error_type, Some(FailureKind::Db));
    assert_eq!(result.attempts, 1);
    assert_eq!(
        result.final_answer,
        "Query execution failed after retry.\nQuestion: Average fare?\n\
         SQL: SELECT fare FROM trips\nError: column \"fare\" does not exist"
    );
    assert!(agent.memory().previous_turn("t1").is_none());
    assert_eq!(generator.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_result_serializes_snake_case_fields() {
    let agent = agent(
        trips_schema(),
        FixedGenerator::new("DROP TABLE trips"),
        ScriptedExecutor::new(vec![]),
        Some("unused"),
    );

    let result = agent.ask("Delete everything", "t1").await;
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["route"], "sql");
    assert_eq!(json["sql_error_type"], "guard");
    assert_eq!(json["sql_error"], "Only SELECT queries are allowed.");
    assert_eq!(json["attempts"], 1);
}
