use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use taxi_sql_agent::db::QueryExecutor;
use taxi_sql_agent::error::{AgentError, Result};
use taxi_sql_agent::execution_loop::{
    ExecutionLoop, FailureKind, LoopInput, ScopedSchema, SqlSteps,
};
use taxi_sql_agent::llm::SqlGenerator;
use taxi_sql_agent::sql_guard::AllowedTables;
use taxi_sql_agent::types::{Row, SqlDraft, SqlMode, SqlRequest};

/// Replays scripted drafts and records every request it sees.
#[derive(Default)]
struct RecordingGenerator {
    replies: Mutex<VecDeque<Result<SqlDraft>>>,
    requests: Mutex<Vec<SqlRequest>>,
}

impl RecordingGenerator {
    fn new(replies: Vec<Result<SqlDraft>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<SqlRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlGenerator for RecordingGenerator {
    async fn draft(&self, request: &SqlRequest) -> Result<SqlDraft> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Llm("no scripted reply".to_string())))
    }
}

#[derive(Default)]
struct ScriptedExecutor {
    results: Mutex<VecDeque<Result<Vec<Row>>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(results: Vec<Result<Vec<Row>>>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            executed: Mutex::new(Vec::new()),
        })
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn run_query(&self, sql: &str) -> Result<Vec<Row>> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.results.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn draft(sql: &str) -> Result<SqlDraft> {
    Ok(SqlDraft {
        sql: sql.to_string(),
        reasoning: "test".to_string(),
    })
}

fn row(count: i64) -> Row {
    json!({ "trip_count": count }).as_object().unwrap().clone()
}

fn input() -> LoopInput {
    LoopInput {
        question: "How many trips started in each zone?".to_string(),
        metadata_context: "Metadata hints (pre-SQL):".to_string(),
        conversation_context: "No previous conversation context.".to_string(),
        retrieved: ScopedSchema {
            schema_context: "Table: public.trips\nColumns:\n- pu_zone_id (integer)".to_string(),
            allowed_tables: AllowedTables::new(["public.trips", "trips"]),
        },
        expanded: ScopedSchema {
            schema_context: "Table: public.trips\n...\nTable: public.zones\n...".to_string(),
            allowed_tables: AllowedTables::new(["public.trips", "trips", "public.zones", "zones"]),
        },
    }
}

fn build(
    generator: &Arc<RecordingGenerator>,
    executor: &Arc<ScriptedExecutor>,
    max_retries: u32,
) -> ExecutionLoop {
    let steps = SqlSteps::new(generator.clone(), executor.clone(), 100);
    ExecutionLoop::new(steps, max_retries)
}

#[tokio::test]
async fn test_first_try_success() {
    let generator = RecordingGenerator::new(vec![draft("```sql\nSELECT count(*) AS trip_count FROM trips;\n```")]);
    let executor = ScriptedExecutor::new(vec![Ok(vec![row(42)])]);

    let outcome = build(&generator, &executor, 1).run(&input()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.sql_query, "SELECT count(*) AS trip_count FROM trips");
    assert_eq!(outcome.attempts, 0);
    assert_eq!(outcome.rows, vec![row(42)]);
    assert_eq!(executor.executed(), vec![outcome.sql_query.clone()]);
    assert_eq!(generator.requests()[0].row_limit, 100);
}

#[tokio::test]
async fn test_allowlist_failure_expands_scope_for_repair() {
    let generator = RecordingGenerator::new(vec![
        draft("SELECT z.name, count(*) FROM trips t JOIN public.zones z ON z.id = t.pu_zone_id GROUP BY 1"),
        draft("SELECT z.name, count(*) FROM public.trips t JOIN public.zones z ON z.id = t.pu_zone_id GROUP BY 1"),
    ]);
    let executor = ScriptedExecutor::new(vec![Ok(vec![row(3)])]);

    let outcome = build(&generator, &executor, 1).run(&input()).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    assert_eq!(outcome.attempts, 1);

    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].allowed_tables, requests[1].allowed_tables);
    assert!(requests[1].allowed_tables.contains("public.zones"));
    assert_eq!(requests[1].schema_context, input().expanded.schema_context);
    match &requests[1].mode {
        SqlMode::Repair { failed_sql, sql_error } => {
            assert!(failed_sql.contains("public.zones"));
            assert_eq!(
                sql_error,
                "Query references table(s) outside allowed schema context: public.zones"
            );
        }
        other => panic!("expected a repair request, got {:?}", other),
    }
    // The rejected draft never reached the database.
    assert_eq!(executor.executed().len(), 1);
}

#[tokio::test]
async fn test_expanded_scope_is_kept_for_later_repairs() {
    let generator = RecordingGenerator::new(vec![
        draft("SELECT * FROM public.zones"),
        draft("SELECT zone_nam FROM public.zones"),
        draft("SELECT zone_name FROM public.zones"),
    ]);
    let executor = ScriptedExecutor::new(vec![
        Err(AgentError::Database(
            "column \"zone_nam\" does not exist".to_string(),
        )),
        Ok(vec![]),
    ]);

    let outcome = build(&generator, &executor, 2).run(&input()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 2);
    let requests = generator.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].allowed_tables, requests[2].allowed_tables);
    assert_eq!(requests[2].allowed_tables, input().expanded.allowed_tables);
}

#[tokio::test]
async fn test_guard_rejection_is_repaired_in_retrieved_scope() {
    let generator = RecordingGenerator::new(vec![
        draft("I am not sure."),
        draft("SELECT count(*) FROM trips"),
    ]);
    let executor = ScriptedExecutor::new(vec![Ok(vec![row(7)])]);

    let outcome = build(&generator, &executor, 1).run(&input()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 1);
    let requests = generator.requests();
    assert_eq!(requests[1].allowed_tables, input().retrieved.allowed_tables);
    assert_eq!(
        requests[1].mode,
        SqlMode::Repair {
            failed_sql: "I am not sure.".to_string(),
            sql_error: "Only SELECT queries are allowed.".to_string(),
        }
    );
}

#[tokio::test]
async fn test_generation_failure_regenerates_instead_of_repairing() {
    let generator = RecordingGenerator::new(vec![
        Err(AgentError::Llm("model overloaded".to_string())),
        draft("SELECT count(*) FROM trips"),
    ]);
    let executor = ScriptedExecutor::new(vec![Ok(vec![row(7)])]);

    let outcome = build(&generator, &executor, 1).run(&input()).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 1);
    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].mode, SqlMode::Generate);
}

#[tokio::test]
async fn test_budget_exhaustion_keeps_last_sql_and_error() {
    let generator = RecordingGenerator::new(vec![
        draft("SELECT fare FROM trips"),
        draft("SELECT fare_amt FROM trips"),
    ]);
    let executor = ScriptedExecutor::new(vec![
        Err(AgentError::Database("column \"fare\" does not exist".to_string())),
        Err(AgentError::Database("column \"fare_amt\" does not exist".to_string())),
    ]);

    let outcome = build(&generator, &executor, 1).run(&input()).await;

    assert!(!outcome.is_success());
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.sql_error_type(), Some(FailureKind::Db));
    assert_eq!(outcome.sql_error(), "column \"fare_amt\" does not exist");
    assert_eq!(outcome.sql_query, "SELECT fare_amt FROM trips");
    assert_eq!(outcome.last_failed_sql, "SELECT fare_amt FROM trips");
    assert_eq!(executor.executed().len(), 2);
}

#[tokio::test]
async fn test_zero_retries_fails_on_first_error() {
    let generator = RecordingGenerator::new(vec![draft("SELECT * FROM trips")]);
    let executor = ScriptedExecutor::new(vec![Err(AgentError::Database(
        "canceling statement due to statement timeout".to_string(),
    ))]);

    let outcome = build(&generator, &executor, 0).run(&input()).await;

    assert_eq!(outcome.sql_error_type(), Some(FailureKind::Timeout));
    assert_eq!(outcome.attempts, 0);
    assert_eq!(generator.requests().len(), 1);
}

#[tokio::test]
async fn test_provider_failure_is_not_retried() {
    let generator = RecordingGenerator::new(vec![Err(AgentError::Llm(
        "LLM API error (401 Unauthorized): invalid api key".to_string(),
    ))]);
    let executor = ScriptedExecutor::new(vec![]);

    let outcome = build(&generator, &executor, 3).run(&input()).await;

    assert_eq!(outcome.sql_error_type(), Some(FailureKind::Provider));
    assert!(outcome.sql_error().starts_with("SQL generation failed: "));
    assert_eq!(outcome.attempts, 0);
    assert_eq!(generator.requests().len(), 1);
    assert!(executor.executed().is_empty());
}

#[tokio::test]
async fn test_empty_schema_never_calls_generator() {
    let generator = RecordingGenerator::new(vec![draft("SELECT 1 FROM trips")]);
    let executor = ScriptedExecutor::new(vec![]);
    let mut question = input();
    question.retrieved = ScopedSchema::default();

    let outcome = build(&generator, &executor, 2).run(&question).await;

    assert_eq!(outcome.sql_error_type(), Some(FailureKind::SchemaContext));
    assert_eq!(outcome.sql_error(), "Schema context is empty, cannot generate SQL.");
    assert!(generator.requests().is_empty());
}
