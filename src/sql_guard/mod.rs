//! SQL Guard
//!
//! Everything between raw model output and a statement that is safe to
//! hand to the database: sanitizing, tokenizing, structural parsing and
//! the read-only verdict. All functions here are pure and synchronous.

pub mod guard;
pub mod lexer;
pub mod parser;
pub mod sanitizer;

pub use guard::{check_readonly_sql, validate_readonly_sql, AllowedTables, GuardRejection};
pub use parser::{
    extract_cte_names, extract_referenced_tables, parse_sql, statement_count, ParsedSql, TableRef,
};
pub use sanitizer::{normalize_sql, sanitize_sql};
