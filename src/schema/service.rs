//! Schema Service
//!
//! Loads table metadata through a [`TableCatalog`], caches it for a TTL and
//! picks the tables most relevant to a question by lexical ranking.

use super::{
    build_allowlist, build_schema_context, build_schema_overview, SchemaContext, SchemaProvider,
    TableSchema, NO_SCHEMA_OVERVIEW,
};
use crate::config::Settings;
use crate::db::TableCatalog;
use crate::redaction::redact_sensitive_text;
use crate::sql_guard::AllowedTables;
use async_trait::async_trait;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use strsim::jaro_winkler;
use tracing::{error, info, warn};

const OVERVIEW_MAX_TABLES: usize = 50;
const FUZZY_THRESHOLD: f64 = 0.9;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-zA-Z_][a-zA-Z0-9_]*").unwrap();
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "what", "which", "how", "many", "much", "show", "list", "give",
    "from", "per", "are", "was", "were", "all", "each", "total", "number", "select", "where",
];

#[derive(Debug, Clone)]
pub struct SchemaServiceConfig {
    pub db_schema: String,
    pub top_k_tables: usize,
    pub max_columns_per_table: usize,
    pub context_max_chars: usize,
    pub full_context_max_chars: usize,
    pub cache_ttl: Duration,
}

impl SchemaServiceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            db_schema: settings.db_schema.clone(),
            top_k_tables: settings.schema_top_k_tables,
            max_columns_per_table: settings.schema_max_columns_per_table,
            context_max_chars: settings.schema_context_max_chars,
            full_context_max_chars: settings.schema_full_context_max_chars,
            cache_ttl: Duration::from_secs(settings.schema_cache_ttl_seconds),
        }
    }
}

/// Everything derived from one catalog load.
struct CachedSchema {
    tables: Arc<Vec<TableSchema>>,
    overview: String,
    all_allowed_tables: AllowedTables,
    full_context: String,
    loaded_at: Instant,
}

pub struct SchemaService {
    catalog: Arc<dyn TableCatalog>,
    config: SchemaServiceConfig,
    cache: Mutex<Option<Arc<CachedSchema>>>,
}

impl SchemaService {
    pub fn new(catalog: Arc<dyn TableCatalog>, config: SchemaServiceConfig) -> Self {
        Self {
            catalog,
            config,
            cache: Mutex::new(None),
        }
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<Arc<CachedSchema>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh_cache(&self) -> Option<Arc<CachedSchema>> {
        self.lock_cache()
            .as_ref()
            .filter(|cached| cached.loaded_at.elapsed() < self.config.cache_ttl)
            .map(Arc::clone)
    }

    pub fn invalidate(&self) {
        *self.lock_cache() = None;
    }

    /// Cached schema, reloading through the catalog when stale. The lock is
    /// released before the catalog is queried.
    async fn load(&self) -> crate::error::Result<Arc<CachedSchema>> {
        if let Some(cached) = self.fresh_cache() {
            info!("Schema cache hit ({} tables).", cached.tables.len());
            return Ok(cached);
        }

        info!("Schema cache miss; loading from PostgreSQL.");
        let tables = self.catalog.table_schemas(&self.config.db_schema).await?;
        let cached = Arc::new(CachedSchema {
            overview: build_schema_overview(&tables, OVERVIEW_MAX_TABLES),
            all_allowed_tables: build_allowlist(&tables),
            full_context: build_schema_context(
                &tables,
                self.config.max_columns_per_table,
                self.config.full_context_max_chars,
            ),
            tables: Arc::new(tables),
            loaded_at: Instant::now(),
        });
        info!(
            "Loaded {} tables for schema '{}'.",
            cached.tables.len(),
            self.config.db_schema
        );
        *self.lock_cache() = Some(Arc::clone(&cached));
        Ok(cached)
    }

    pub async fn build_for_question(&self, question: &str) -> SchemaContext {
        let cached = match self.load().await {
            Ok(cached) => cached,
            Err(e) => {
                let safe_message = redact_sensitive_text(&e.detail());
                error!("Failed to load schema from PostgreSQL: {}", safe_message);
                return SchemaContext::failed(
                    format!("Cannot read schema from PostgreSQL: {}", safe_message),
                    NO_SCHEMA_OVERVIEW,
                );
            }
        };

        if cached.tables.is_empty() {
            return SchemaContext::failed("No tables found in configured DB schema.", "No tables found.");
        }

        let mut relevant = rank_tables(question, &cached.tables, self.config.top_k_tables);
        if relevant.is_empty() {
            warn!("Schema retrieval matched no tables; fallback to top-k tables.");
            relevant = cached
                .tables
                .iter()
                .take(self.config.top_k_tables)
                .cloned()
                .collect();
        }
        info!(
            "Schema retrieval selected {}/{} tables.",
            relevant.len(),
            cached.tables.len()
        );

        SchemaContext {
            schema_error: String::new(),
            schema_overview: cached.overview.clone(),
            schema_context: build_schema_context(
                &relevant,
                self.config.max_columns_per_table,
                self.config.context_max_chars,
            ),
            schema_context_full: cached.full_context.clone(),
            allowed_tables: build_allowlist(&relevant),
            all_allowed_tables: cached.all_allowed_tables.clone(),
        }
    }
}

#[async_trait]
impl SchemaProvider for SchemaService {
    async fn context_for(&self, question: &str) -> SchemaContext {
        self.build_for_question(question).await
    }
}

fn question_terms(question: &str) -> HashSet<String> {
    WORD.find_iter(&question.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|term| term.len() >= 3 && !STOPWORDS.contains(&term.as_str()))
        .collect()
}

/// Relevance of a table to the question terms. Exact table-name hits
/// dominate, column hits count less, near misses on table-name parts
/// (`trip` vs `trips`) count by their Jaro-Winkler similarity.
fn score_table(terms: &HashSet<String>, table: &TableSchema) -> f64 {
    let table_name = table.table_name.to_lowercase();
    let name_parts: Vec<&str> = table_name.split('_').filter(|p| !p.is_empty()).collect();
    let column_names: HashSet<String> = table
        .columns
        .iter()
        .flat_map(|c| {
            let name = c.column_name.to_lowercase();
            let mut names: Vec<String> = name.split('_').map(str::to_string).collect();
            names.push(name);
            names
        })
        .collect();

    terms
        .iter()
        .map(|term| {
            if *term == table_name || name_parts.contains(&term.as_str()) {
                3.0
            } else if column_names.contains(term) {
                1.0
            } else {
                let best = name_parts
                    .iter()
                    .map(|part| jaro_winkler(term, part))
                    .fold(0.0, f64::max);
                if best >= FUZZY_THRESHOLD {
                    best
                } else {
                    0.0
                }
            }
        })
        .sum()
}

/// Top `top_k` tables with a positive score, best first.
pub fn rank_tables(question: &str, tables: &[TableSchema], top_k: usize) -> Vec<TableSchema> {
    let terms = question_terms(question);
    tables
        .iter()
        .map(|table| (score_table(&terms, table), table))
        .filter(|(score, _)| *score > 0.0)
        .sorted_by(|(a, ta), (b, tb)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ta.full_name().cmp(&tb.full_name()))
        })
        .take(top_k)
        .map(|(_, table)| table.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, Result};
    use crate::schema::ColumnSchema;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table(name: &str, columns: &[&str]) -> TableSchema {
        TableSchema {
            table_schema: "public".to_string(),
            table_name: name.to_string(),
            columns: columns
                .iter()
                .enumerate()
                .map(|(i, c)| ColumnSchema {
                    column_name: c.to_string(),
                    data_type: "text".to_string(),
                    ordinal_position: i as i32 + 1,
                })
                .collect(),
        }
    }

    struct CountingCatalog {
        tables: Vec<TableSchema>,
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TableCatalog for CountingCatalog {
        async fn table_schemas(&self, _schema: &str) -> Result<Vec<TableSchema>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AgentError::Database(
                    "could not connect to postgresql://u:secret@db/taxi".to_string(),
                ));
            }
            Ok(self.tables.clone())
        }
    }

    fn service(tables: Vec<TableSchema>, ttl: u64, fail: bool) -> (Arc<CountingCatalog>, SchemaService) {
        let catalog = Arc::new(CountingCatalog {
            tables,
            calls: AtomicUsize::new(0),
            fail,
        });
        let config = SchemaServiceConfig {
            db_schema: "public".to_string(),
            top_k_tables: 1,
            max_columns_per_table: 40,
            context_max_chars: 12_000,
            full_context_max_chars: 30_000,
            cache_ttl: Duration::from_secs(ttl),
        };
        (catalog.clone(), SchemaService::new(catalog, config))
    }

    fn sample_tables() -> Vec<TableSchema> {
        vec![
            table("taxi_trip_data", &["fare_amount", "pickup_datetime"]),
            table("zones", &["zone_id", "borough"]),
        ]
    }

    #[test]
    fn test_rank_prefers_table_name_hits() {
        let ranked = rank_tables("Which borough has the most zones?", &sample_tables(), 5);
        assert_eq!(ranked[0].table_name, "zones");
    }

    #[test]
    fn test_rank_fuzzy_part_match() {
        let ranked = rank_tables("average fare of trips", &sample_tables(), 1);
        assert_eq!(ranked[0].table_name, "taxi_trip_data");
    }

    #[test]
    fn test_rank_no_match_is_empty() {
        assert!(rank_tables("bao nhiêu", &sample_tables(), 5).is_empty());
    }

    #[tokio::test]
    async fn test_context_uses_retrieved_subset_and_full_allowlist() {
        let (_, service) = service(sample_tables(), 300, false);
        let ctx = service.context_for("list zones by borough").await;
        assert!(ctx.schema_error.is_empty());
        assert!(ctx.allowed_tables.contains("public.zones"));
        assert!(!ctx.allowed_tables.contains("taxi_trip_data"));
        assert!(ctx.all_allowed_tables.contains("public.taxi_trip_data"));
        assert!(ctx.schema_context_full.contains("Table: public.taxi_trip_data"));
        assert_eq!(ctx.schema_overview, "public.taxi_trip_data, public.zones");
    }

    #[tokio::test]
    async fn test_fallback_to_first_tables() {
        let (_, service) = service(sample_tables(), 300, false);
        let ctx = service.context_for("hello there").await;
        assert!(ctx.allowed_tables.contains("taxi_trip_data"));
        assert_eq!(ctx.allowed_tables.len(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_and_invalidate() {
        let (catalog, service) = service(sample_tables(), 300, false);
        service.context_for("zones").await;
        service.context_for("zones").await;
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
        service.invalidate();
        service.context_for("zones").await;
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_reloads() {
        let (catalog, service) = service(sample_tables(), 0, false);
        service.context_for("zones").await;
        service.context_for("zones").await;
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_failure_is_redacted() {
        let (_, service) = service(vec![], 300, true);
        let ctx = service.context_for("zones").await;
        assert!(ctx.schema_error.starts_with("Cannot read schema from PostgreSQL: "));
        assert!(!ctx.schema_error.contains("secret"));
        assert!(ctx.allowed_tables.is_empty());
    }

    #[tokio::test]
    async fn test_empty_schema() {
        let (_, service) = service(vec![], 300, false);
        let ctx = service.context_for("zones").await;
        assert_eq!(ctx.schema_error, "No tables found in configured DB schema.");
    }
}
