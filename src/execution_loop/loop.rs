//! Execution Loop
//!
//! Bounded generate / guard / execute / repair cycle for one question.
//! Repair rounds run strictly one after another because each prompt
//! carries the previous round's error.

use super::error_classifier::FailureKind;
use super::state_machine::{scope_for_repair, ContextScope, LoopState, RepairPolicy, StepOutcome};
use super::steps::{DraftInput, SqlSteps};
use crate::sql_guard::AllowedTables;
use crate::types::{Row, SqlDraft, SqlFailure, SqlOutcome};
use tracing::{info, warn};

/// Schema context and allowlist for one scope.
#[derive(Debug, Clone, Default)]
pub struct ScopedSchema {
    pub schema_context: String,
    pub allowed_tables: AllowedTables,
}

/// Inputs for one question.
#[derive(Debug, Clone, Default)]
pub struct LoopInput {
    pub question: String,
    pub metadata_context: String,
    pub conversation_context: String,
    /// Tables retrieved for this question.
    pub retrieved: ScopedSchema,
    /// Every table; used after an allowlist failure.
    pub expanded: ScopedSchema,
}

impl LoopInput {
    fn draft_input(&self, scope: ContextScope) -> DraftInput<'_> {
        let schema = match scope {
            ContextScope::Retrieved => &self.retrieved,
            ContextScope::Expanded => &self.expanded,
        };
        DraftInput {
            question: &self.question,
            schema_context: &schema.schema_context,
            allowed_tables: &schema.allowed_tables,
            metadata_context: &self.metadata_context,
            conversation_context: &self.conversation_context,
        }
    }
}

/// Execution loop with bounded retries
pub struct ExecutionLoop {
    steps: SqlSteps,
    policy: RepairPolicy,
}

/// Mutable state carried between steps of one question.
#[derive(Default)]
struct Progress {
    sql_query: String,
    sql_reasoning: String,
    rows: Vec<Row>,
    failure: Option<SqlFailure>,
    attempts: u32,
    last_failed_sql: String,
}

impl Progress {
    fn accept_draft(&mut self, drafted: Result<SqlDraft, SqlFailure>) -> StepOutcome {
        match drafted {
            Ok(draft) => {
                self.sql_query = draft.sql;
                self.sql_reasoning = draft.reasoning;
                self.failure = None;
                StepOutcome::Passed
            }
            Err(failure) => {
                self.sql_query.clear();
                self.sql_reasoning.clear();
                self.fail(failure)
            }
        }
    }

    fn fail(&mut self, failure: SqlFailure) -> StepOutcome {
        let kind = failure.kind;
        if !self.sql_query.is_empty() {
            self.last_failed_sql = self.sql_query.clone();
        }
        self.failure = Some(failure);
        StepOutcome::Failed(kind)
    }

    fn into_outcome(self) -> SqlOutcome {
        SqlOutcome {
            sql_query: self.sql_query,
            sql_reasoning: self.sql_reasoning,
            rows: self.rows,
            failure: self.failure,
            attempts: self.attempts,
            last_failed_sql: self.last_failed_sql,
        }
    }
}

impl ExecutionLoop {
    pub fn new(steps: SqlSteps, max_retries: u32) -> Self {
        Self {
            steps,
            policy: RepairPolicy::new(max_retries),
        }
    }

    pub fn policy(&self) -> RepairPolicy {
        self.policy
    }

    /// Drive the state machine until success or failure.
    pub async fn run(&self, input: &LoopInput) -> SqlOutcome {
        let mut state = LoopState::Generate;
        let mut scope = ContextScope::Retrieved;
        let mut progress = Progress::default();

        while !state.is_terminal() {
            let outcome = match state {
                LoopState::Generate => {
                    info!("Generating SQL.");
                    let drafted = self.steps.generate(input.draft_input(scope)).await;
                    progress.accept_draft(drafted)
                }
                LoopState::Guard => self.guard(input, scope, &mut progress),
                LoopState::Execute => {
                    info!("Executing SQL.");
                    match self.steps.execute(&progress.sql_query).await {
                        Ok(rows) => {
                            progress.rows = rows;
                            StepOutcome::Passed
                        }
                        Err(failure) => progress.fail(failure),
                    }
                }
                LoopState::Repair => {
                    progress.attempts += 1;
                    let failure_kind = progress
                        .failure
                        .as_ref()
                        .map(|failure| failure.kind)
                        .unwrap_or(FailureKind::Db);
                    scope = scope_for_repair(scope, failure_kind);
                    match scope {
                        ContextScope::Expanded => info!(
                            "Repair attempt={} with expanded full schema context.",
                            progress.attempts
                        ),
                        ContextScope::Retrieved => info!(
                            "Repair attempt={} with retrieved schema context.",
                            progress.attempts
                        ),
                    }
                    let drafted = self.repair(input, scope, &progress).await;
                    progress.accept_draft(drafted)
                }
                LoopState::Success | LoopState::Failed => break,
            };
            state = self.policy.next_state(state, outcome, progress.attempts);
        }

        if state == LoopState::Failed {
            warn!(
                "SQL loop failed after {} repair attempt(s): {}",
                progress.attempts,
                progress
                    .failure
                    .as_ref()
                    .map(|failure| failure.kind.as_str())
                    .unwrap_or("unknown")
            );
        }
        progress.into_outcome()
    }

    /// A draft step that already failed carries its failure through the
    /// guard untouched.
    fn guard(&self, input: &LoopInput, scope: ContextScope, progress: &mut Progress) -> StepOutcome {
        if progress.sql_query.is_empty() {
            if let Some(failure) = &progress.failure {
                return StepOutcome::Failed(failure.kind);
            }
        }
        info!("Security preflight for SQL.");
        let draft = input.draft_input(scope);
        match self.steps.preflight(&progress.sql_query, draft.allowed_tables) {
            Ok(()) => StepOutcome::Passed,
            Err(failure) => progress.fail(failure),
        }
    }

    /// Repair the failed SQL, or regenerate when there is none.
    async fn repair(
        &self,
        input: &LoopInput,
        scope: ContextScope,
        progress: &Progress,
    ) -> Result<SqlDraft, SqlFailure> {
        let draft = input.draft_input(scope);
        if progress.sql_query.trim().is_empty() {
            info!(
                "Repair attempt={} has no failed SQL; regenerating SQL.",
                progress.attempts
            );
            return self.steps.generate(draft).await;
        }

        let sql_error = progress
            .failure
            .as_ref()
            .map(|failure| failure.sql_error.as_str())
            .unwrap_or("Unknown SQL error");
        self.steps
            .repair(draft, &progress.sql_query, sql_error, progress.attempts)
            .await
    }
}
