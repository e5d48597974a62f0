//! Execution Logging
//!
//! Structured per-attempt log records, emitted as JSON through `tracing`.

use crate::execution_loop::attempt::{Attempt, AttemptOutcome};
use crate::execution_loop::error_classifier::DiagnosisKind;
use crate::sql::CandidateSource;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Attempt log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLog {
    pub request_id: String,
    pub tenant_id: String,
    pub user_query: String,
    pub attempt: u32,
    pub source: Option<CandidateSource>,
    pub outcome: Option<AttemptOutcome>,
    pub diagnosis: Option<DiagnosisKind>,
    pub db_error: Option<String>,
    pub sql: Option<String>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AttemptLog {
    pub fn new(request_id: &str, tenant_id: &str, user_query: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            tenant_id: tenant_id.to_string(),
            user_query: user_query.to_string(),
            attempt: 0,
            source: None,
            outcome: None,
            diagnosis: None,
            db_error: None,
            sql: None,
            row_count: 0,
            execution_time_ms: 0,
            success: false,
            timestamp: Utc::now(),
        }
    }

    pub fn with_attempt(mut self, attempt: &Attempt) -> Self {
        self.attempt = attempt.attempt_number;
        self.source = attempt.source.clone();
        self.outcome = Some(attempt.outcome);
        self.row_count = attempt.row_count;
        self.execution_time_ms = attempt.duration_ms;
        if !attempt.generated_sql.is_empty() {
            self.sql = Some(attempt.generated_sql.clone());
        }
        match &attempt.diagnosis {
            Some(diagnosis) => self.with_error(diagnosis.kind, diagnosis.raw_message.clone()),
            None => {
                self.success = attempt.is_success();
                self
            }
        }
    }

    pub fn with_error(mut self, kind: DiagnosisKind, message: String) -> Self {
        self.diagnosis = Some(kind);
        self.db_error = Some(message);
        self.success = false;
        self
    }

    /// Emit on the `nlq::attempt` target.
    pub fn emit(&self) {
        let payload = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize attempt log: {}", e);
                return;
            }
        };
        if self.success {
            info!(target: "nlq::attempt", "{}", payload);
        } else {
            warn!(target: "nlq::attempt", "{}", payload);
        }
    }
}
