//! SQL Agent
//!
//! Answers one question end to end: schema context, metadata hints and the
//! previous turn feed the repair loop; rows go to the answer writer and
//! successful turns are remembered per thread.

use crate::config::Settings;
use crate::db::{PostgresClient, QueryExecutor};
use crate::error::{AgentError, Result};
use crate::execution_loop::{ExecutionLoop, FailureKind, LoopInput, ScopedSchema, SqlSteps};
use crate::language;
use crate::llm::{AnswerWriter, LlmClient, SqlGenerator};
use crate::memory::{normalize_thread_id, render_previous_context, ConversationMemory};
use crate::metadata_hints::MetadataHints;
use crate::redaction::redact_sensitive_text;
use crate::schema::service::SchemaServiceConfig;
use crate::schema::{SchemaProvider, SchemaService};
use crate::types::{AgentResult, Route, SqlOutcome};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct SqlAgent {
    schema: Arc<dyn SchemaProvider>,
    answers: Arc<dyn AnswerWriter>,
    hints: MetadataHints,
    memory: ConversationMemory,
    execution_loop: ExecutionLoop,
}

impl SqlAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema: Arc<dyn SchemaProvider>,
        generator: Arc<dyn SqlGenerator>,
        executor: Arc<dyn QueryExecutor>,
        answers: Arc<dyn AnswerWriter>,
        row_limit: usize,
        max_retries: u32,
        memory_max_threads: usize,
    ) -> Self {
        let steps = SqlSteps::new(generator, executor, row_limit);
        Self {
            schema,
            answers,
            hints: MetadataHints::default(),
            memory: ConversationMemory::new(memory_max_threads),
            execution_loop: ExecutionLoop::new(steps, max_retries),
        }
    }

    /// Wire the Postgres client and the OpenRouter client from settings.
    /// No connection is opened until the first query.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let db = Arc::new(PostgresClient::from_settings(settings)?);
        let llm = Arc::new(LlmClient::from_settings(settings)?);
        let schema = Arc::new(SchemaService::new(
            db.clone(),
            SchemaServiceConfig::from_settings(settings),
        ));
        info!("Agent ready (model={}, schema={}).", llm.model(), db.default_schema());
        Ok(Self::new(
            schema,
            llm.clone(),
            db,
            llm,
            settings.query_row_limit,
            settings.max_sql_retries,
            settings.memory_max_threads,
        ))
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub async fn ask(&self, question: &str, thread_id: &str) -> AgentResult {
        let thread_id = normalize_thread_id(thread_id);
        let span = info_span!("ask", request_id = %Uuid::new_v4(), thread_id = %thread_id);
        self.ask_in_thread(question.trim(), thread_id)
            .instrument(span)
            .await
    }

    async fn ask_in_thread(&self, question: &str, thread_id: String) -> AgentResult {
        if question.is_empty() {
            warn!("Received empty question.");
            return AgentResult::unsupported(
                "",
                thread_id,
                "Empty question.",
                language::empty_question_message(),
            );
        }

        match self.answer(question, &thread_id).await {
            Ok(result) => {
                if result.route == Route::Sql
                    && result.sql_error.is_empty()
                    && !result.sql_query.is_empty()
                {
                    self.memory.remember(
                        &thread_id,
                        question,
                        &result.sql_query,
                        &result.final_answer,
                    );
                }
                result
            }
            Err(e) => internal_failure(question, &thread_id, &e),
        }
    }

    async fn answer(&self, question: &str, thread_id: &str) -> Result<AgentResult> {
        let schema = self.schema.context_for(question).await;
        if !schema.schema_error.is_empty() {
            info!("Question unsupported: {}", schema.schema_error);
            let final_answer = language::unsupported_message(question, &schema.schema_error);
            return Ok(AgentResult::unsupported(
                question,
                thread_id,
                schema.schema_error,
                final_answer,
            ));
        }

        let previous = self.memory.previous_turn(thread_id);
        let input = LoopInput {
            question: question.to_string(),
            metadata_context: self
                .hints
                .build(question, &schema.allowed_tables, &schema.schema_context),
            conversation_context: render_previous_context(previous.as_ref()),
            retrieved: ScopedSchema {
                schema_context: schema.schema_context,
                allowed_tables: schema.allowed_tables,
            },
            expanded: ScopedSchema {
                schema_context: schema.schema_context_full,
                allowed_tables: schema.all_allowed_tables,
            },
        };

        let outcome = self.execution_loop.run(&input).await;
        let final_answer = self.final_answer(question, &outcome).await?;
        Ok(AgentResult::from_outcome(question, thread_id, outcome, final_answer))
    }

    async fn final_answer(&self, question: &str, outcome: &SqlOutcome) -> Result<String> {
        if !outcome.is_success() {
            let sql = if outcome.sql_query.is_empty() {
                &outcome.last_failed_sql
            } else {
                &outcome.sql_query
            };
            return Ok(language::error_after_retry_message(
                question,
                sql,
                outcome.sql_error(),
            ));
        }
        if outcome.sql_query.is_empty() {
            return Err(AgentError::Internal(
                "SQL loop reported success without a query".to_string(),
            ));
        }

        match self
            .answers
            .write_answer(question, &outcome.sql_query, &outcome.rows)
            .await
        {
            Ok(answer) => Ok(answer),
            Err(e) => {
                warn!(
                    "Answer LLM failed, using fallback message: {}",
                    redact_sensitive_text(&e.detail())
                );
                Ok(if outcome.rows.is_empty() {
                    language::fallback_no_data_message(question)
                } else {
                    language::fallback_success_message(question, outcome.rows.len())
                })
            }
        }
    }
}

/// Result for a fault that escaped the pipeline. Credentials in the error
/// text are masked before it is logged or returned.
fn internal_failure(question: &str, thread_id: &str, e: &AgentError) -> AgentResult {
    let message = redact_sensitive_text(&e.detail());
    error!("Agent pipeline failed: {}", message);
    let mut result = AgentResult::unsupported(
        question,
        thread_id,
        format!("Internal error: {}", message),
        language::internal_error_message(question),
    );
    result.sql_error = message.clone();
    result.sql_error_type = Some(FailureKind::Internal);
    result.sql_error_message = message;
    result
}
