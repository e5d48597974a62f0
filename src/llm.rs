//! OpenAI-compatible chat completion client and the generation agent built
//! on it.

use crate::agent::{GenerationAgent, GenerationEvent, GenerationOutput, PromptContext};
use crate::agent_prompts::build_system_prompt;
use crate::db::DatabaseKind;
use crate::error::{NlqError, Result};
use crate::schema::SchemaProvider;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

lazy_static! {
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n?(.*?)```").unwrap();
    static ref SELECT_OR_WITH: Regex = Regex::new(r"(?i)\b(select|with)\b").unwrap();
}

pub struct LlmClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion; returns the first choice's content.
    pub async fn call_llm(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.1,
        });
        // newer models only accept max_completion_tokens
        if self.model.starts_with("gpt-4") || self.model.starts_with("gpt-5") || self.model.starts_with("o1") {
            body["max_completion_tokens"] = serde_json::json!(1000);
        } else {
            body["max_tokens"] = serde_json::json!(1000);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| NlqError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NlqError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| NlqError::Llm(format!("Failed to parse LLM response: {}", e)))?;
        parse_completion(&response_json)
    }
}

fn parse_completion(response_json: &serde_json::Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        return Err(NlqError::Llm(format!("LLM API error: {}", error)));
    }
    let choice = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| NlqError::Llm("No choices in LLM response".to_string()))?;

    match choice.get("finish_reason").and_then(|r| r.as_str()) {
        Some("length") => warn!("LLM response was truncated due to length limit"),
        Some("content_filter") => {
            return Err(NlqError::Llm(
                "LLM response was filtered by content policy".to_string(),
            ))
        }
        _ => {}
    }

    let content = choice["message"]["content"]
        .as_str()
        .ok_or_else(|| NlqError::Llm("No content in LLM response".to_string()))?;
    if content.trim().is_empty() {
        return Err(NlqError::Llm("Empty content in LLM response".to_string()));
    }
    Ok(content.to_string())
}

/// Every fenced block that looks like a query, in answer order.
fn captured_events(content: &str) -> Vec<GenerationEvent> {
    FENCED_BLOCK
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|block| SELECT_OR_WITH.is_match(block))
        .map(|block| GenerationEvent::StatementCaptured {
            sql: block.to_string(),
        })
        .collect()
}

/// Generation agent backed by a single chat completion per attempt.
pub struct LlmAgent {
    client: LlmClient,
    schema: Arc<dyn SchemaProvider>,
    dialects: HashMap<String, DatabaseKind>,
}

impl LlmAgent {
    pub fn new(client: LlmClient, schema: Arc<dyn SchemaProvider>) -> Self {
        Self {
            client,
            schema,
            dialects: HashMap::new(),
        }
    }

    /// Engine per tenant, used to pick the dialect section of the prompt.
    pub fn with_dialects(mut self, dialects: HashMap<String, DatabaseKind>) -> Self {
        self.dialects = dialects;
        self
    }
}

#[async_trait]
impl GenerationAgent for LlmAgent {
    async fn generate(&self, context: &PromptContext) -> Result<GenerationOutput> {
        let snapshot = match self.schema.get_schema(&context.tenant_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Prompting without schema for {}: {}", context.tenant_id, e);
                None
            }
        };
        let system_prompt = build_system_prompt(
            self.dialects.get(&context.tenant_id).copied(),
            snapshot.as_deref(),
        );
        debug!(
            "Calling {} for attempt {} of tenant {}",
            self.client.model(),
            context.attempt_number,
            context.tenant_id
        );
        let content = self.client.call_llm(&system_prompt, &context.render()).await?;
        Ok(GenerationOutput {
            sql: None,
            events: captured_events(&content),
            free_text: content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_completion() {
        let response = json!({
            "choices": [{"message": {"content": "```sql\nSELECT 1\n```"}, "finish_reason": "stop"}]
        });
        assert_eq!(parse_completion(&response).unwrap(), "```sql\nSELECT 1\n```");
    }

    #[test]
    fn test_parse_completion_errors() {
        assert!(parse_completion(&json!({"error": {"message": "bad key"}})).is_err());
        assert!(parse_completion(&json!({"choices": []})).is_err());
        let filtered = json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "content_filter"}]
        });
        assert!(parse_completion(&filtered).is_err());
    }

    #[test]
    fn test_fenced_queries_become_captured_events() {
        let content = "First I checked:\n```sql\nSELECT COUNT(*) FROM patients\n```\nThen:\n```\nSELECT p.patient_id FROM patients p\n```\n```json\n{\"a\": 1}\n```";
        let events = captured_events(content);
        assert_eq!(
            events,
            vec![
                GenerationEvent::StatementCaptured {
                    sql: "SELECT COUNT(*) FROM patients".to_string()
                },
                GenerationEvent::StatementCaptured {
                    sql: "SELECT p.patient_id FROM patients p".to_string()
                },
            ]
        );
    }
}
