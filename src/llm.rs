//! LLM Client
//!
//! OpenAI-compatible chat-completions client (OpenRouter by default). It is
//! the SQL generation collaborator and the answer writer.

use crate::config::Settings;
use crate::error::{AgentError, Result};
use crate::prompts;
use crate::types::{Row, SqlDraft, SqlRequest};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Produces candidate SQL. Output is untrusted and always guarded.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn draft(&self, request: &SqlRequest) -> Result<SqlDraft>;
}

/// Turns executed rows into a short natural-language answer.
#[async_trait]
pub trait AnswerWriter: Send + Sync {
    async fn write_answer(&self, question: &str, sql: &str, rows: &[Row]) -> Result<String>;
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    site_url: Option<String>,
    app_name: Option<String>,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, model: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            site_url: None,
            app_name: None,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let mut client = Self::new(
            settings.openrouter_api_key.clone(),
            settings.openrouter_base_url.clone(),
            settings.openrouter_model.clone(),
            Duration::from_secs(settings.llm_timeout_seconds),
        )?;
        client.site_url = settings.openrouter_site_url.clone();
        client.app_name = settings.openrouter_app_name.clone();
        Ok(client)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user}
            ],
            "temperature": 0
        });

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if let Some(site_url) = &self.site_url {
            request = request.header("HTTP-Referer", site_url);
        }
        if let Some(app_name) = &self.app_name {
            request = request.header("X-Title", app_name);
        }

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(format!("LLM API call failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl SqlGenerator for LlmClient {
    async fn draft(&self, request: &SqlRequest) -> Result<SqlDraft> {
        let system = prompts::sql_system_prompt(request);
        let user = prompts::sql_user_prompt(request);
        let content = self.call_llm(&system, &user).await?;
        debug!("SQL model output: {}", content);
        Ok(parse_draft(&content))
    }
}

#[async_trait]
impl AnswerWriter for LlmClient {
    async fn write_answer(&self, question: &str, sql: &str, rows: &[Row]) -> Result<String> {
        let user = prompts::answer_user_prompt(question, sql, rows);
        self.call_llm(prompts::ANSWER_SYSTEM_PROMPT, &user).await
    }
}

/// Read `{"sql": ..., "reasoning": ...}` from model output. Fenced JSON and
/// JSON surrounded by prose are accepted; anything else is taken as raw SQL
/// and left to the sanitizer.
pub fn parse_draft(content: &str) -> SqlDraft {
    let trimmed = content.trim();
    let unfenced = strip_json_fence(trimmed);

    if let Ok(draft) = serde_json::from_str::<SqlDraft>(unfenced) {
        return draft;
    }
    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) {
        if start < end {
            if let Ok(draft) = serde_json::from_str::<SqlDraft>(&unfenced[start..=end]) {
                return draft;
            }
        }
    }

    SqlDraft {
        sql: trimmed.to_string(),
        reasoning: String::new(),
    }
}

fn strip_json_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let draft = parse_draft(r#"{"sql": "SELECT 1 FROM t", "reasoning": "count rows"}"#);
        assert_eq!(draft.sql, "SELECT 1 FROM t");
        assert_eq!(draft.reasoning, "count rows");
    }

    #[test]
    fn test_parse_fenced_json_without_reasoning() {
        let draft = parse_draft("```json\n{\"sql\": \"SELECT * FROM t\"}\n```");
        assert_eq!(draft.sql, "SELECT * FROM t");
        assert_eq!(draft.reasoning, "");
    }

    #[test]
    fn test_parse_json_inside_prose() {
        let draft = parse_draft("Sure:\n{\"sql\": \"SELECT 2 FROM t\", \"reasoning\": \"x\"}\nDone.");
        assert_eq!(draft.sql, "SELECT 2 FROM t");
    }

    #[test]
    fn test_parse_falls_back_to_raw_sql() {
        let draft = parse_draft("```sql\nSELECT 3 FROM t;\n```");
        assert_eq!(draft.sql, "```sql\nSELECT 3 FROM t;\n```");
        assert_eq!(draft.reasoning, "");
    }
}
