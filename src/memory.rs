//! Conversation Memory
//!
//! Last successful turn per conversation thread, bounded by an LRU policy.
//! One mutex guards the whole map and is only held for a lookup or update.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_THREAD_ID: &str = "default";
const PROMPT_PIECE_MAX_CHARS: usize = 1200;
const ANSWER_PIECE_MAX_CHARS: usize = 800;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    pub question: String,
    pub sql_query: String,
    pub final_answer: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct Lru {
    turns: HashMap<String, ConversationTurn>,
    /// Least recently written first.
    order: VecDeque<String>,
}

pub struct ConversationMemory {
    max_threads: usize,
    inner: Mutex<Lru>,
}

/// Blank thread ids map to [`DEFAULT_THREAD_ID`].
pub fn normalize_thread_id(thread_id: &str) -> String {
    let trimmed = thread_id.trim();
    if trimmed.is_empty() {
        DEFAULT_THREAD_ID.to_string()
    } else {
        trimmed.to_string()
    }
}

impl ConversationMemory {
    pub fn new(max_threads: usize) -> Self {
        Self {
            max_threads: max_threads.max(1),
            inner: Mutex::new(Lru::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lru> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn previous_turn(&self, thread_id: &str) -> Option<ConversationTurn> {
        self.lock().turns.get(&normalize_thread_id(thread_id)).cloned()
    }

    /// Store a successful turn, making the thread most recent and evicting
    /// the least recent thread when over capacity.
    pub fn remember(&self, thread_id: &str, question: &str, sql_query: &str, final_answer: &str) {
        let thread_id = normalize_thread_id(thread_id);
        let turn = ConversationTurn {
            question: question.to_string(),
            sql_query: sql_query.to_string(),
            final_answer: final_answer.to_string(),
            recorded_at: Utc::now(),
        };

        let mut lru = self.lock();
        if lru.turns.contains_key(&thread_id) {
            lru.order.retain(|id| id != &thread_id);
        } else if lru.turns.len() >= self.max_threads {
            if let Some(oldest) = lru.order.pop_front() {
                lru.turns.remove(&oldest);
            }
        }
        lru.order.push_back(thread_id.clone());
        lru.turns.insert(thread_id, turn);
    }

    pub fn clear(&self, thread_id: &str) {
        let thread_id = normalize_thread_id(thread_id);
        let mut lru = self.lock();
        lru.turns.remove(&thread_id);
        lru.order.retain(|id| id != &thread_id);
    }

    pub fn clear_all(&self) {
        let mut lru = self.lock();
        lru.turns.clear();
        lru.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn truncate_piece(value: &str, max_chars: usize) -> String {
    crate::schema::truncate_text(value.trim(), max_chars)
}

/// Previous-turn block for prompts.
pub fn render_previous_context(turn: Option<&ConversationTurn>) -> String {
    let Some(turn) = turn else {
        return "No previous conversation context.".to_string();
    };
    let question = truncate_piece(&turn.question, PROMPT_PIECE_MAX_CHARS);
    let sql = truncate_piece(&turn.sql_query, PROMPT_PIECE_MAX_CHARS);
    let answer = truncate_piece(&turn.final_answer, ANSWER_PIECE_MAX_CHARS);
    if question.is_empty() && sql.is_empty() && answer.is_empty() {
        return "No previous conversation context.".to_string();
    }
    let or_na = |s: String| if s.is_empty() { "n/a".to_string() } else { s };
    format!(
        "Previous question: {}\nPrevious SQL: {}\nPrevious answer summary: {}",
        or_na(question),
        or_na(sql),
        or_na(answer)
    )
}
