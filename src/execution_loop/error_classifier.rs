//! Error Classifier
//!
//! Maps an error message (guard rejection or database/provider error text)
//! onto a small taxonomy that drives the retry policy.

use serde::{Deserialize, Serialize};
use std::fmt;

const ALLOWLIST_MARKER: &str = "outside allowed schema context";

const GUARD_MARKERS: &[&str] = &[
    "only one sql statement is allowed",
    "only select queries are allowed",
    "select into is not allowed",
    "locking clauses are not allowed",
    "write or destructive sql is not allowed",
    "query must reference at least one table",
    "sql is empty",
    "sql could not be tokenized",
];

const PROVIDER_MARKERS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "user not found",
];

const CONNECTION_MARKERS: &[&str] = &[
    "connection refused",
    "could not connect",
    "connection timeout",
    "connection is lost",
    "server closed the connection unexpectedly",
    "name resolution failure",
    "failed to lookup address",
    "pool timed out",
];

/// Classification of a single error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlErrorClass {
    Allowlist,
    Guard,
    Timeout,
    Provider,
    Connection,
    Db,
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SqlErrorClass::Allowlist => "allowlist",
            SqlErrorClass::Guard => "guard",
            SqlErrorClass::Timeout => "timeout",
            SqlErrorClass::Provider => "provider",
            SqlErrorClass::Connection => "connection",
            SqlErrorClass::Db => "db",
        };
        write!(f, "{}", label)
    }
}

/// Every failure kind a question can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No tables available to query against.
    SchemaContext,
    Generation,
    Guard,
    Allowlist,
    Repair,
    Timeout,
    Provider,
    Connection,
    Db,
    Internal,
}

impl FailureKind {
    /// Whether another repair round can help. Missing schema, upstream
    /// auth failures and internal faults will not change on retry.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            FailureKind::SchemaContext | FailureKind::Provider | FailureKind::Internal
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::SchemaContext => "schema_context",
            FailureKind::Generation => "generation",
            FailureKind::Guard => "guard",
            FailureKind::Allowlist => "allowlist",
            FailureKind::Repair => "repair",
            FailureKind::Timeout => "timeout",
            FailureKind::Provider => "provider",
            FailureKind::Connection => "connection",
            FailureKind::Db => "db",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SqlErrorClass> for FailureKind {
    fn from(class: SqlErrorClass) -> Self {
        match class {
            SqlErrorClass::Allowlist => FailureKind::Allowlist,
            SqlErrorClass::Guard => FailureKind::Guard,
            SqlErrorClass::Timeout => FailureKind::Timeout,
            SqlErrorClass::Provider => FailureKind::Provider,
            SqlErrorClass::Connection => FailureKind::Connection,
            SqlErrorClass::Db => FailureKind::Db,
        }
    }
}

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Ordered substring checks; the first match wins.
    pub fn classify(&self, error_message: &str) -> SqlErrorClass {
        let lowered = error_message.to_lowercase();

        if lowered.contains(ALLOWLIST_MARKER) {
            return SqlErrorClass::Allowlist;
        }

        if GUARD_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return SqlErrorClass::Guard;
        }

        // Covers "statement timeout" and "canceling statement due to statement timeout".
        if lowered.contains("timeout") {
            return SqlErrorClass::Timeout;
        }

        if PROVIDER_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return SqlErrorClass::Provider;
        }

        if CONNECTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            return SqlErrorClass::Connection;
        }

        SqlErrorClass::Db
    }

    /// Kind for a failed LLM call: provider and connection faults are
    /// reported as such, anything else as `fallback`.
    pub fn classify_llm_failure(&self, error_message: &str, fallback: FailureKind) -> FailureKind {
        match self.classify(error_message) {
            SqlErrorClass::Provider => FailureKind::Provider,
            SqlErrorClass::Connection => FailureKind::Connection,
            _ => fallback,
        }
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience wrapper over [`ErrorClassifier::classify`].
pub fn classify_sql_error(error_message: &str) -> SqlErrorClass {
    ErrorClassifier::new().classify(error_message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_allowlist() {
        let msg = "Query references table(s) outside allowed schema context: public.other";
        assert_eq!(classify_sql_error(msg), SqlErrorClass::Allowlist);
    }

    #[test]
    fn test_classify_guard_messages() {
        for msg in [
            "SQL is empty.",
            "Only one SQL statement is allowed.",
            "Only SELECT queries are allowed.",
            "SELECT INTO is not allowed.",
            "Locking clauses are not allowed.",
            "Write or destructive SQL is not allowed.",
            "Query must reference at least one table.",
            "SQL could not be tokenized: Unterminated string literal at Line: 1, Column 8",
        ] {
            assert_eq!(classify_sql_error(msg), SqlErrorClass::Guard, "{}", msg);
        }
    }

    #[test]
    fn test_classify_timeout() {
        let msg = "canceling statement due to statement timeout";
        assert_eq!(classify_sql_error(msg), SqlErrorClass::Timeout);
    }

    #[test]
    fn test_classify_provider() {
        assert_eq!(classify_sql_error("HTTP 401 Unauthorized"), SqlErrorClass::Provider);
        assert_eq!(classify_sql_error("Error code: 403"), SqlErrorClass::Provider);
        assert_eq!(classify_sql_error("User not found."), SqlErrorClass::Provider);
    }

    #[test]
    fn test_classify_connection() {
        let msg = "could not connect to server: Connection refused";
        assert_eq!(classify_sql_error(msg), SqlErrorClass::Connection);
    }

    #[test]
    fn test_connection_timeout_is_timeout() {
        // "timeout" is checked before connection markers.
        assert_eq!(classify_sql_error("connection timeout expired"), SqlErrorClass::Timeout);
    }

    #[test]
    fn test_classify_db_default() {
        let msg = "relation \"public.trips\" does not exist";
        assert_eq!(classify_sql_error(msg), SqlErrorClass::Db);
    }

    #[test]
    fn test_llm_failure_classification() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier.classify_llm_failure("401 invalid api key", FailureKind::Generation),
            FailureKind::Provider
        );
        assert_eq!(
            classifier.classify_llm_failure("Connection refused", FailureKind::Repair),
            FailureKind::Connection
        );
        assert_eq!(
            classifier.classify_llm_failure("malformed JSON", FailureKind::Repair),
            FailureKind::Repair
        );
    }

    #[test]
    fn test_failure_kind_labels_and_retry_policy() {
        assert_eq!(serde_json::to_string(&FailureKind::SchemaContext).unwrap(), "\"schema_context\"");
        assert_eq!(FailureKind::Db.to_string(), "db");
        assert!(FailureKind::Allowlist.is_retryable());
        assert!(FailureKind::Generation.is_retryable());
        assert!(!FailureKind::Provider.is_retryable());
        assert!(!FailureKind::SchemaContext.is_retryable());
    }
}
