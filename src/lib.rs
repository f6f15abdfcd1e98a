pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod execution_loop;
pub mod language;
pub mod llm;
pub mod memory;
pub mod metadata_hints;
pub mod prompts;
pub mod redaction;
pub mod schema;
pub mod sql_guard;
pub mod types;

pub use agent::SqlAgent;
pub use config::Settings;
pub use error::{AgentError, Result};
pub use execution_loop::{ExecutionLoop, FailureKind, SqlErrorClass};
pub use sql_guard::{check_readonly_sql, validate_readonly_sql, AllowedTables};
pub use types::{AgentResult, SqlOutcome};
