//! Readonly Guard
//!
//! Decides whether a sanitized SQL string is a single read-only `SELECT`
//! that only touches permitted tables. Checks run in a fixed order and the
//! first failing check wins. Keyword checks look at SQL words only, so a
//! forbidden word inside a string literal, a quoted identifier or a comment
//! is a mention, not a use.

use super::lexer::significant_tokens;
use super::parser::{keyword_stream, parse_tokens, ParsedSql};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

const FORBIDDEN_VERBS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "truncate", "grant", "revoke", "copy",
    "merge", "call", "execute", "create",
];

/// Why a statement was refused. `Display` is the user-facing reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardRejection {
    #[error("SQL is empty.")]
    Empty,

    /// Unterminated literal, quoted identifier or comment.
    #[error("SQL could not be tokenized: {0}")]
    Malformed(String),

    #[error("Only one SQL statement is allowed.")]
    MultipleStatements,

    #[error("Only SELECT queries are allowed.")]
    NotSelect,

    #[error("SELECT INTO is not allowed.")]
    SelectInto,

    #[error("Locking clauses are not allowed.")]
    LockingClause,

    #[error("Write or destructive SQL is not allowed.")]
    ForbiddenKeyword,

    #[error("Query must reference at least one table.")]
    NoTableReference,

    #[error("Query references table(s) outside allowed schema context: {}", .0.join(", "))]
    OutsideAllowlist(Vec<String>),
}

/// Permitted table identifiers, lower-cased. Holds both bare (`trips`) and
/// qualified (`public.trips`) forms; the schema service supplies both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedTables(BTreeSet<String>);

impl AllowedTables {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.0.contains(&identity.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowedTables {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Run every check against `sql`. An empty or missing allowlist skips the
/// allowlist check; callers that must refuse in that case do so before
/// calling the guard.
pub fn check_readonly_sql(
    sql: &str,
    allowed: Option<&AllowedTables>,
) -> Result<ParsedSql, GuardRejection> {
    if sql.trim().is_empty() {
        return Err(GuardRejection::Empty);
    }
    let tokens =
        significant_tokens(sql).map_err(|e| GuardRejection::Malformed(e.to_string()))?;

    let parsed = parse_tokens(&tokens);
    if parsed.statement_count > 1 {
        return Err(GuardRejection::MultipleStatements);
    }

    // A comment-only statement has no first word and is not a SELECT.
    let starts_select = tokens
        .first()
        .is_some_and(|first| first.is_word("select") || first.is_word("with"));
    if !starts_select {
        return Err(GuardRejection::NotSelect);
    }

    let words = keyword_stream(&tokens);
    if has_select_into(&words) {
        return Err(GuardRejection::SelectInto);
    }
    if has_locking_clause(&words) {
        return Err(GuardRejection::LockingClause);
    }
    if words.iter().any(|word| FORBIDDEN_VERBS.contains(&word.as_str())) {
        return Err(GuardRejection::ForbiddenKeyword);
    }

    if parsed.table_refs.is_empty() {
        return Err(GuardRejection::NoTableReference);
    }

    if let Some(allowed) = allowed.filter(|allowed| !allowed.is_empty()) {
        let disallowed = disallowed_tables(&parsed, allowed);
        if !disallowed.is_empty() {
            return Err(GuardRejection::OutsideAllowlist(disallowed));
        }
    }

    Ok(parsed)
}

/// `None` when the statement is accepted, otherwise the rejection reason.
pub fn validate_readonly_sql(sql: &str, allowed: Option<&AllowedTables>) -> Option<String> {
    check_readonly_sql(sql, allowed)
        .err()
        .map(|rejection| rejection.to_string())
}

/// `INTO` after a `SELECT`, with something following it.
fn has_select_into(words: &[String]) -> bool {
    let Some(select_at) = words.iter().position(|word| word == "select") else {
        return false;
    };
    words[select_at + 1..]
        .iter()
        .position(|word| word == "into")
        .is_some_and(|offset| select_at + 1 + offset + 1 < words.len())
}

fn has_locking_clause(words: &[String]) -> bool {
    const TAILS: &[&[&str]] = &[&["update"], &["share"], &["no", "key", "update"], &["key", "share"]];
    words.iter().enumerate().any(|(idx, word)| {
        word == "for"
            && TAILS.iter().any(|tail| {
                let rest = &words[idx + 1..];
                rest.len() >= tail.len() && rest.iter().zip(tail.iter()).all(|(a, b)| a == b)
            })
    })
}

/// Sorted identities not covered by the allowlist. A reference is allowed
/// when any of its identities is listed; the bare name of a qualified
/// reference is only reported when the qualified form is not reported.
fn disallowed_tables(parsed: &ParsedSql, allowed: &AllowedTables) -> Vec<String> {
    let mut disallowed = BTreeSet::new();
    for table in &parsed.table_refs {
        let permitted = match table.qualified() {
            Some(qualified) => allowed.contains(&qualified),
            None => allowed.contains(table.bare()),
        };
        if !permitted {
            disallowed.insert(table.qualified().unwrap_or_else(|| table.bare().to_string()));
        }
    }

    let qualified_bare: BTreeSet<String> = disallowed
        .iter()
        .filter_map(|name| name.rsplit_once('.').map(|(_, bare)| bare.to_string()))
        .collect();
    disallowed
        .into_iter()
        .filter(|name| name.contains('.') || !qualified_bare.contains(name))
        .collect()
}
