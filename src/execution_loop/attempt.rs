//! Attempt records
//!
//! One closed attempt of the pipeline. Attempts are immutable once recorded
//! and only read back when building the next attempt's feedback.

use crate::execution_loop::error_classifier::ErrorDiagnosis;
use crate::sql::CandidateSource;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Executed without error but returned nothing.
    ZeroRows,
    /// Rejected by the database, or the connection failed.
    ExecutionError,
    /// No usable statement could be produced.
    ExtractionFailure,
}

/// Lifecycle of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    Extracting,
    Sanitizing,
    Executing,
    Succeeded,
    ZeroRows,
    Failed,
    Exhausted,
}

impl AttemptState {
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        use AttemptState::*;
        matches!(
            (self, next),
            (Pending, Extracting)
                | (Extracting, Sanitizing)
                | (Extracting, Failed)
                | (Sanitizing, Executing)
                | (Sanitizing, Failed)
                | (Executing, Succeeded)
                | (Executing, ZeroRows)
                | (Executing, Failed)
                | (ZeroRows, Pending)
                | (ZeroRows, Succeeded)
                | (Failed, Pending)
                | (ZeroRows, Exhausted)
                | (Failed, Exhausted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AttemptState::Succeeded | AttemptState::Exhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based.
    pub attempt_number: u32,
    /// Exact statement sent to the database; empty when extraction failed.
    pub generated_sql: String,
    pub source: Option<CandidateSource>,
    pub outcome: AttemptOutcome,
    pub diagnosis: Option<ErrorDiagnosis>,
    pub row_count: usize,
    pub duration_ms: u64,
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}
