//! Repair State Machine
//!
//! States and transitions of the generate / guard / execute / repair cycle,
//! kept free of I/O so the retry and escalation rules can be tested alone.

use super::error_classifier::FailureKind;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Generate,
    Guard,
    Execute,
    Repair,
    Success,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Success | LoopState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Passed,
    Failed(FailureKind),
}

/// Which schema context and allowlist a draft is produced against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// Tables retrieved for the question.
    Retrieved,
    /// Every table in the configured schema.
    Expanded,
}

/// Retry budget plus the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairPolicy {
    pub max_retries: u32,
}

impl RepairPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Next state after `state` finished with `outcome`, given how many
    /// repair rounds have already run.
    pub fn next_state(&self, state: LoopState, outcome: StepOutcome, attempts: u32) -> LoopState {
        match (state, outcome) {
            (LoopState::Generate, _) | (LoopState::Repair, _) => LoopState::Guard,
            (LoopState::Guard, StepOutcome::Passed) => LoopState::Execute,
            (LoopState::Execute, StepOutcome::Passed) => LoopState::Success,
            (LoopState::Guard, StepOutcome::Failed(kind))
            | (LoopState::Execute, StepOutcome::Failed(kind)) => {
                if kind.is_retryable() && attempts < self.max_retries {
                    LoopState::Repair
                } else {
                    LoopState::Failed
                }
            }
            (terminal, _) => terminal,
        }
    }
}

/// Scope for the next repair round. An allowlist failure escalates to the
/// full schema once; the escalation is never undone within a question.
pub fn scope_for_repair(current: ContextScope, failure: FailureKind) -> ContextScope {
    match failure {
        FailureKind::Allowlist => ContextScope::Expanded,
        _ => current,
    }
}
