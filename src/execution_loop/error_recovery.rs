//! Error Recovery
//!
//! Builds the feedback text handed to the agent on retries from the
//! attempts that have already failed.

use crate::execution_loop::attempt::{Attempt, AttemptOutcome};

/// Accumulates feedback across the attempts of one request.
#[derive(Debug, Clone, Default)]
pub struct ErrorRecovery {
    caller_feedback: Option<String>,
    notes: Vec<String>,
}

impl ErrorRecovery {
    /// `caller_feedback` comes from the request and is always kept first.
    pub fn new(caller_feedback: Option<String>) -> Self {
        Self {
            caller_feedback: caller_feedback.filter(|f| !f.trim().is_empty()),
            notes: Vec::new(),
        }
    }

    /// Record what went wrong in a closed attempt.
    pub fn record(&mut self, attempt: &Attempt) {
        let mut lines = Vec::new();
        match attempt.outcome {
            AttemptOutcome::Success => return,
            AttemptOutcome::ZeroRows => {
                lines.push(format!(
                    "Attempt {} returned no rows.",
                    attempt.attempt_number
                ));
                lines.push(format!("SQL: {}", attempt.generated_sql));
                lines.push(
                    "Check the filters and table choice; broaden the query if the data may be sparse."
                        .to_string(),
                );
            }
            AttemptOutcome::ExtractionFailure => {
                lines.push(format!(
                    "Attempt {} produced no usable SQL statement.",
                    attempt.attempt_number
                ));
                lines.push("Answer with a single read-only SELECT statement.".to_string());
            }
            AttemptOutcome::ExecutionError => {
                lines.push(format!("Attempt {} failed.", attempt.attempt_number));
                if !attempt.generated_sql.is_empty() {
                    lines.push(format!("SQL: {}", attempt.generated_sql));
                }
            }
        }

        if let Some(diagnosis) = &attempt.diagnosis {
            if !diagnosis.raw_message.is_empty() {
                lines.push(format!("Database error: {}", diagnosis.raw_message));
            }
            if let Some(suggestion) = &diagnosis.human_suggestion {
                lines.push(format!("Suggestion: {}", suggestion));
            }
        }
        self.notes.push(lines.join("\n"));
    }

    pub fn has_failures(&self) -> bool {
        !self.notes.is_empty()
    }

    /// Text for `PromptContext::prior_feedback`, if there is any.
    pub fn feedback(&self) -> Option<String> {
        let mut parts: Vec<String> = self.caller_feedback.iter().cloned().collect();
        if !self.notes.is_empty() {
            parts.push(format!(
                "Previous attempts failed. Fix the SQL using this feedback:\n\n{}",
                self.notes.join("\n\n")
            ));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_loop::error_classifier::{DiagnosisKind, ErrorDiagnosis};

    fn failed_attempt() -> Attempt {
        let mut diagnosis = ErrorDiagnosis::new(
            DiagnosisKind::ColumnNotFound,
            "Unknown column 'fullname' in 'field list'",
        );
        diagnosis.human_suggestion = Some("use `patients.full_name` instead of `fullname`".into());
        Attempt {
            attempt_number: 1,
            generated_sql: "SELECT fullname FROM patients;".to_string(),
            source: None,
            outcome: AttemptOutcome::ExecutionError,
            diagnosis: Some(diagnosis),
            row_count: 0,
            duration_ms: 3,
        }
    }

    #[test]
    fn test_no_feedback_before_failures() {
        assert!(ErrorRecovery::new(None).feedback().is_none());
        assert_eq!(
            ErrorRecovery::new(Some("prefer visits".into())).feedback().as_deref(),
            Some("prefer visits")
        );
    }

    #[test]
    fn test_feedback_carries_error_and_suggestion() {
        let mut recovery = ErrorRecovery::new(Some("caller note".into()));
        recovery.record(&failed_attempt());
        let feedback = recovery.feedback().unwrap();
        assert!(feedback.starts_with("caller note"));
        assert!(feedback.contains("SELECT fullname FROM patients;"));
        assert!(feedback.contains("Unknown column 'fullname'"));
        assert!(feedback.contains("full_name"));
    }

    #[test]
    fn test_zero_rows_note_and_success_ignored() {
        let mut recovery = ErrorRecovery::default();
        let mut attempt = failed_attempt();
        attempt.outcome = AttemptOutcome::Success;
        recovery.record(&attempt);
        assert!(!recovery.has_failures());

        attempt.outcome = AttemptOutcome::ZeroRows;
        attempt.diagnosis = None;
        recovery.record(&attempt);
        assert!(recovery.feedback().unwrap().contains("returned no rows"));
    }
}
