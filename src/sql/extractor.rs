//! SQL Candidate Extractor
//!
//! Chooses one statement among the agent's chain SQL, the statements it
//! captured while exploring, its free-text answer, and the intent-based
//! fallback templates, then runs the completeness repair on the result.

use crate::agent::GenerationOutput;
use crate::error::{NlqError, Result};
use crate::sql::completeness::{is_complete, repair};
use crate::sql::fallback::FallbackCatalog;
use crate::sql::sanitizer::{looks_like_sql, sanitize};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

lazy_static! {
    static ref SELECT_WORD: Regex = Regex::new(r"(?i)\bselect\b").unwrap();
    static ref FROM_WORD: Regex = Regex::new(r"(?i)\bfrom\b").unwrap();
}

/// Captured statements at or below this length are ignored.
const MIN_CAPTURED_LEN: usize = 15;
/// Free-text SQL at or below this length is ignored.
const MIN_FREE_TEXT_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CandidateSource {
    Chain,
    Captured,
    FreeText,
    Fallback(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub sql: String,
    pub source: CandidateSource,
    pub repaired: bool,
}

pub struct SqlExtractor {
    catalog: FallbackCatalog,
}

impl SqlExtractor {
    pub fn new(catalog: FallbackCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &FallbackCatalog {
        &self.catalog
    }

    /// Pick, sanitize and complete one SQL statement for this attempt.
    pub fn extract(&self, output: &GenerationOutput, query: &str) -> Result<Extraction> {
        let (sql, source) = self.select_candidate(output, query);
        if sql.is_empty() {
            return Err(NlqError::Extraction(
                "no usable SQL candidate and no executable fallback template".to_string(),
            ));
        }

        if is_complete(&sql) {
            return Ok(Extraction {
                sql,
                source,
                repaired: false,
            });
        }

        let repaired = sanitize(&repair(&sql, &self.catalog));
        info!("Repaired incomplete SQL: {} -> {}", sql, repaired);
        if repaired.is_empty() {
            return Err(NlqError::Extraction(format!(
                "statement could not be completed: {}",
                sql
            )));
        }
        Ok(Extraction {
            sql: repaired,
            source,
            repaired: true,
        })
    }

    fn select_candidate(&self, output: &GenerationOutput, query: &str) -> (String, CandidateSource) {
        if let Some(chain_sql) = output.sql.as_deref() {
            let sql = sanitize(chain_sql);
            if !sql.is_empty() {
                debug!("Using chain SQL");
                return (sql, CandidateSource::Chain);
            }
        }

        // the most refined statement tends to appear latest in the trace
        let captured = output
            .captured_statements()
            .into_iter()
            .map(sanitize)
            .filter(|sql| {
                sql.len() > MIN_CAPTURED_LEN && SELECT_WORD.is_match(sql) && FROM_WORD.is_match(sql)
            })
            .last();
        if let Some(sql) = captured {
            debug!("Using last captured statement");
            return (sql, CandidateSource::Captured);
        }

        let free_text = sanitize(&output.free_text);
        // prose mentioning "from" must not pass for a statement
        if free_text.len() > MIN_FREE_TEXT_LEN && looks_like_sql(&free_text) {
            debug!("Using SQL from free-text output");
            return (free_text, CandidateSource::FreeText);
        }

        match self.catalog.select(query) {
            Some(m) => {
                info!(
                    "No SQL from agent, falling back to '{}' template ({} keyword hits)",
                    m.template.name, m.hits
                );
                (sanitize(&m.template.sql), CandidateSource::Fallback(m.template.name.clone()))
            }
            None => (String::new(), CandidateSource::Fallback(String::new())),
        }
    }
}

impl Default for SqlExtractor {
    fn default() -> Self {
        Self::new(FallbackCatalog::default())
    }
}
