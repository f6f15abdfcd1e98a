//! SQL Sanitizer
//!
//! Recovers a candidate SQL string from raw model output: code fences,
//! `SQL:` style labels, leading prose and trailing semicolons are removed.
//! Never fails; an empty string means nothing was recoverable.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SQL_FENCE: Regex = Regex::new(r"(?i)```(?:sql)?\s*([\s\S]*?)\s*```").unwrap();
    static ref SQL_PREFIX: Regex = Regex::new(r"(?i)^(?:sqlquery|sql)\s*:\s*").unwrap();
    static ref SQL_START: Regex = Regex::new(r"(?i)\b(select|with)\b").unwrap();
}

/// Strip formatting noise around a single SQL statement.
pub fn sanitize_sql(raw: &str) -> String {
    let mut cleaned = raw.trim();

    if let Some(inner) = SQL_FENCE.captures(cleaned).and_then(|caps| caps.get(1)) {
        cleaned = inner.as_str().trim();
    }

    // Labels can be stacked ("SQL: SQLQuery: ...").
    while let Some(found) = SQL_PREFIX.find(cleaned) {
        cleaned = cleaned[found.end()..].trim();
    }

    if let Some(start) = SQL_START.find(cleaned) {
        if start.start() > 0 {
            cleaned = cleaned[start.start()..].trim();
        }
    }

    cleaned
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// Statement text handed to the guard and the database. Idempotent.
pub fn normalize_sql(raw: &str) -> String {
    sanitize_sql(raw)
}
