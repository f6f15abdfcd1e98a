//! Metadata Hints
//!
//! Lightweight pre-SQL hints: which allowed tables the question names,
//! which schema columns it mentions and which literal filter values
//! (dates, quarters, quoted strings) it contains.

use crate::schema::truncate_text;
use crate::sql_guard::AllowedTables;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

const MAX_ENTRIES: usize = 20;
pub const DEFAULT_MAX_CHARS: usize = 3000;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*").unwrap();
    static ref DATE: Regex = Regex::new(r"\b\d{4}-\d{2}(?:-\d{2})?\b").unwrap();
    static ref QUARTER: Regex = Regex::new(r"(?i)\bq[1-4]\s*20\d{2}\b").unwrap();
    static ref YEAR_MONTH: Regex = Regex::new(r"\b(?:19|20)\d{2}[/-](?:0?[1-9]|1[0-2])\b").unwrap();
    static ref QUOTED_VALUE: Regex = Regex::new(r#"["']([^"']{1,80})["']"#).unwrap();
}

fn tokens(text: &str) -> BTreeSet<String> {
    TOKEN
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

pub struct MetadataHints {
    max_chars: usize,
}

impl MetadataHints {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn build(&self, question: &str, allowed_tables: &AllowedTables, schema_context: &str) -> String {
        let question_lower = question.to_lowercase();
        let question_tokens = tokens(&question_lower);

        let matched_tables: BTreeSet<&str> = allowed_tables
            .iter()
            .map(String::as_str)
            .filter(|name| {
                let short = name.rsplit('.').next().unwrap_or(name);
                question_lower.contains(name) || question_tokens.contains(short)
            })
            .collect();

        let schema_tokens = tokens(schema_context);
        let likely_columns: Vec<&String> = question_tokens
            .iter()
            .filter(|token| {
                schema_tokens.contains(*token) && !["select", "from", "where"].contains(&token.as_str())
            })
            .take(MAX_ENTRIES)
            .collect();

        let mut detected_values: BTreeSet<String> = BTreeSet::new();
        for pattern in [&*DATE, &*QUARTER, &*YEAR_MONTH] {
            detected_values.extend(pattern.find_iter(question).map(|m| m.as_str().to_string()));
        }
        detected_values.extend(
            QUOTED_VALUE
                .captures_iter(question)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|value| !value.is_empty()),
        );

        let mut lines = vec!["Metadata hints (pre-SQL):".to_string()];
        lines.push(if matched_tables.is_empty() {
            "- matched tables: none (fallback to schema retrieval context)".to_string()
        } else {
            format!(
                "- matched tables: {}",
                matched_tables.into_iter().take(MAX_ENTRIES).collect::<Vec<_>>().join(", ")
            )
        });
        lines.push(if likely_columns.is_empty() {
            "- likely columns: none (infer from schema context)".to_string()
        } else {
            format!(
                "- likely columns: {}",
                likely_columns.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            )
        });
        lines.push(if detected_values.is_empty() {
            "- detected filter values: none".to_string()
        } else {
            format!(
                "- detected filter values: {}",
                detected_values.into_iter().take(MAX_ENTRIES).collect::<Vec<_>>().join(", ")
            )
        });
        lines.push("- policy: read-only analytics, single statement, allowed-table only".to_string());

        truncate_text(&lines.join("\n"), self.max_chars)
    }
}

impl Default for MetadataHints {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_for_matching_question() {
        let allowed = AllowedTables::new(["public.taxi_trip_data", "taxi_trip_data"]);
        let schema = "Table: public.taxi_trip_data\nColumns:\n- fare_amount (numeric)\n- payment_type (text)";
        let hints = MetadataHints::default().build(
            "Average fare_amount in taxi_trip_data for 2024-01 and Q1 2024 paid by 'Credit card'",
            &allowed,
            schema,
        );
        assert!(hints.contains("- matched tables: public.taxi_trip_data, taxi_trip_data"));
        assert!(hints.contains("fare_amount"));
        assert!(hints.contains("2024-01"));
        assert!(hints.contains("Q1 2024"));
        assert!(hints.contains("Credit card"));
    }

    #[test]
    fn test_hints_without_matches() {
        let hints = MetadataHints::default().build("hello", &AllowedTables::default(), "");
        assert!(hints.contains("matched tables: none"));
        assert!(hints.contains("likely columns: none"));
        assert!(hints.contains("detected filter values: none"));
        assert!(hints.ends_with("allowed-table only"));
    }

    #[test]
    fn test_hints_respect_char_budget() {
        let hints = MetadataHints::new(40).build("hello", &AllowedTables::default(), "");
        assert_eq!(hints.chars().count(), 40);
        assert!(hints.ends_with("..."));
    }
}
