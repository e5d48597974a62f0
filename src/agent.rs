//! Generation Agent contract
//!
//! The natural-language-to-SQL step is an external collaborator. It returns
//! its whole trace as a finite list of events once it completes, so the
//! extractor consumes a plain list instead of reacting to callbacks.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything the agent gets for one attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptContext {
    pub natural_language_query: String,
    pub tenant_id: String,
    pub attempt_number: u32,
    /// Feedback from earlier attempts (errors, suggestions, zero-row notes).
    pub prior_feedback: Option<String>,
    /// Passed through untouched.
    pub conversation_context: Option<String>,
}

impl PromptContext {
    /// The query text with feedback appended, as sent to the agent.
    pub fn render(&self) -> String {
        let mut parts = vec![self.natural_language_query.clone()];
        if let Some(context) = self.conversation_context.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("Conversation so far:\n{}", context));
        }
        if let Some(feedback) = self.prior_feedback.as_deref().filter(|f| !f.is_empty()) {
            parts.push(feedback.to_string());
        }
        parts.join("\n\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// A SQL statement the agent ran or proposed while exploring.
    StatementCaptured { sql: String },
    /// A tool invocation (schema lookup, sample rows, ...).
    ToolInvoked { name: String, input: String },
    Thought { text: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// SQL produced by a chain/alternate generation path, used as-is.
    pub sql: Option<String>,
    pub free_text: String,
    pub events: Vec<GenerationEvent>,
}

impl GenerationOutput {
    pub fn from_text(free_text: impl Into<String>) -> Self {
        Self {
            free_text: free_text.into(),
            ..Self::default()
        }
    }

    /// Captured statements in the order the agent produced them.
    pub fn captured_statements(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                GenerationEvent::StatementCaptured { sql } => Some(sql.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
pub trait GenerationAgent: Send + Sync {
    async fn generate(&self, context: &PromptContext) -> Result<GenerationOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_statements_keep_order() {
        let output = GenerationOutput {
            sql: None,
            free_text: String::new(),
            events: vec![
                GenerationEvent::StatementCaptured { sql: "SELECT 1".to_string() },
                GenerationEvent::Thought { text: "checking".to_string() },
                GenerationEvent::StatementCaptured { sql: "SELECT 2".to_string() },
            ],
        };
        assert_eq!(output.captured_statements(), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_render_appends_feedback() {
        let context = PromptContext {
            natural_language_query: "show me patients".to_string(),
            prior_feedback: Some("use `patients.full_name`".to_string()),
            ..PromptContext::default()
        };
        let rendered = context.render();
        assert!(rendered.starts_with("show me patients"));
        assert!(rendered.contains("patients.full_name"));
    }
}
