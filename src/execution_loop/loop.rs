//! Execution Loop
//!
//! Bounded whole-pipeline retries: generate, extract, guard, execute, and on
//! failure classify the error and feed it into the next attempt.

use crate::agent::{GenerationAgent, GenerationOutput, PromptContext};
use crate::db::{ColumnMeta, ConnectionLifecycleManager, ExecutionResult, Row};
use crate::execution_loop::attempt::{Attempt, AttemptOutcome, AttemptState};
use crate::execution_loop::error_classifier::{ErrorClassifier, ErrorDiagnosis};
use crate::execution_loop::error_recovery::ErrorRecovery;
use crate::observability::{AttemptLog, ProgressEvent, ProgressSink, TracingProgress};
use crate::schema::{SchemaProvider, SchemaSnapshot};
use crate::sql::{sanitize, SqlExtractor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub natural_language_query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub prior_feedback: Option<String>,
    #[serde(default)]
    pub conversation_context: Option<String>,
}

impl PipelineRequest {
    pub fn new(natural_language_query: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            natural_language_query: natural_language_query.into(),
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }
}

/// `rows`/`columns` are present iff `success`; `diagnosis` iff not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    pub success: bool,
    pub sql_final: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<ColumnMeta>>,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<ErrorDiagnosis>,
    pub processing_time_ms: u64,
    #[serde(skip)]
    pub attempts: Vec<Attempt>,
}

/// Execution loop with bounded retries
pub struct ExecutionLoop {
    agent: Arc<dyn GenerationAgent>,
    schema: Arc<dyn SchemaProvider>,
    connections: Arc<ConnectionLifecycleManager>,
    extractor: SqlExtractor,
    classifier: ErrorClassifier,
    progress: Arc<dyn ProgressSink>,
    max_attempts: u32,
    retry_on_zero_rows: bool,
}

impl ExecutionLoop {
    pub fn new(
        agent: Arc<dyn GenerationAgent>,
        schema: Arc<dyn SchemaProvider>,
        connections: Arc<ConnectionLifecycleManager>,
        extractor: SqlExtractor,
    ) -> Self {
        Self {
            agent,
            schema,
            connections,
            extractor,
            classifier: ErrorClassifier::default(),
            progress: Arc::new(TracingProgress),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_on_zero_rows: true,
        }
    }

    /// At least one attempt is always made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_retry_on_zero_rows(mut self, retry: bool) -> Self {
        self.retry_on_zero_rows = retry;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn connections(&self) -> &ConnectionLifecycleManager {
        &self.connections
    }

    /// Run one request to completion. Never fails: every error ends up in
    /// the response's diagnosis.
    pub async fn run(&self, request: &PipelineRequest) -> PipelineResponse {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut recovery = ErrorRecovery::new(request.prior_feedback.clone());
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut final_result: Option<ExecutionResult> = None;
        let mut state = AttemptState::Pending;

        for attempt_number in 1..=self.max_attempts {
            info!("Execution attempt {} of {}", attempt_number, self.max_attempts);
            let (attempt, result, attempt_state) = self
                .run_attempt(request, attempt_number, recovery.feedback())
                .await;
            state = attempt_state;
            AttemptLog::new(&request_id, &request.tenant_id, &request.natural_language_query)
                .with_attempt(&attempt)
                .emit();

            let is_last = attempt_number == self.max_attempts;
            let accept = match attempt.outcome {
                AttemptOutcome::Success => true,
                AttemptOutcome::ZeroRows => !self.retry_on_zero_rows || is_last,
                AttemptOutcome::ExecutionError | AttemptOutcome::ExtractionFailure => false,
            };

            if accept {
                if state == AttemptState::ZeroRows {
                    advance(&mut state, AttemptState::Succeeded, attempt_number);
                }
                info!("✅ Execution succeeded on attempt {}", attempt_number);
                final_result = result;
                attempts.push(attempt);
                break;
            }

            if is_last {
                advance(&mut state, AttemptState::Exhausted, attempt_number);
            } else {
                advance(&mut state, AttemptState::Pending, attempt_number);
                recovery.record(&attempt);
                self.progress.emit(ProgressEvent::RetryTriggered {
                    attempt: attempt_number,
                    next_attempt: attempt_number + 1,
                    reason: retry_reason(&attempt),
                });
            }
            attempts.push(attempt);
        }

        let response = self.build_response(attempts, final_result, start);
        debug_assert!(state.is_terminal());
        self.progress.emit(ProgressEvent::Finished {
            success: response.success,
            attempt_count: response.attempt_count,
        });
        response
    }

    async fn run_attempt(
        &self,
        request: &PipelineRequest,
        attempt_number: u32,
        prior_feedback: Option<String>,
    ) -> (Attempt, Option<ExecutionResult>, AttemptState) {
        let started = Instant::now();
        let mut state = AttemptState::Pending;
        let mut attempt = Attempt {
            attempt_number,
            generated_sql: String::new(),
            source: None,
            outcome: AttemptOutcome::ExtractionFailure,
            diagnosis: None,
            row_count: 0,
            duration_ms: 0,
        };

        advance(&mut state, AttemptState::Extracting, attempt_number);
        let context = PromptContext {
            natural_language_query: request.natural_language_query.clone(),
            tenant_id: request.tenant_id.clone(),
            attempt_number,
            prior_feedback,
            conversation_context: request.conversation_context.clone(),
        };
        let output = match self.agent.generate(&context).await {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    "Generation agent failed on attempt {}, continuing with fallback: {}",
                    attempt_number, e
                );
                GenerationOutput::default()
            }
        };

        let extraction = match self
            .extractor
            .extract(&output, &request.natural_language_query)
        {
            Ok(extraction) => extraction,
            Err(e) => {
                advance(&mut state, AttemptState::Failed, attempt_number);
                attempt.diagnosis = Some(ErrorDiagnosis::extraction_failure(e.to_string()));
                attempt.duration_ms = started.elapsed().as_millis() as u64;
                return (attempt, None, state);
            }
        };
        attempt.source = Some(extraction.source.clone());

        // last read-only guard before anything reaches the database
        advance(&mut state, AttemptState::Sanitizing, attempt_number);
        let sql = sanitize(&extraction.sql);
        if sql.is_empty() {
            advance(&mut state, AttemptState::Failed, attempt_number);
            attempt.diagnosis = Some(ErrorDiagnosis::extraction_failure(
                "statement rejected by the read-only guard",
            ));
            attempt.duration_ms = started.elapsed().as_millis() as u64;
            return (attempt, None, state);
        }
        attempt.generated_sql = sql.clone();
        self.progress.emit(ProgressEvent::ExtractionComplete {
            attempt: attempt_number,
            source: attempt.source.clone(),
            sql: sql.clone(),
        });

        advance(&mut state, AttemptState::Executing, attempt_number);
        let mut connection = match self.connections.acquire(&request.tenant_id).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Could not acquire connection for {}: {}", request.tenant_id, e);
                advance(&mut state, AttemptState::Failed, attempt_number);
                attempt.outcome = AttemptOutcome::ExecutionError;
                attempt.diagnosis = Some(ErrorDiagnosis::connection(e.to_string()));
                attempt.duration_ms = started.elapsed().as_millis() as u64;
                self.emit_execution(&attempt);
                return (attempt, None, state);
            }
        };
        let kind = connection.kind();
        let executed = connection.execute(&sql).await;
        self.connections.release(&mut connection).await;

        let result = match executed {
            Ok(result) if result.is_empty() => {
                advance(&mut state, AttemptState::ZeroRows, attempt_number);
                attempt.outcome = AttemptOutcome::ZeroRows;
                Some(result)
            }
            Ok(result) => {
                advance(&mut state, AttemptState::Succeeded, attempt_number);
                attempt.outcome = AttemptOutcome::Success;
                attempt.row_count = result.rows.len();
                Some(result)
            }
            Err(e) => {
                advance(&mut state, AttemptState::Failed, attempt_number);
                let snapshot = self.snapshot(&request.tenant_id).await;
                let diagnosis = self
                    .classifier
                    .classify(&e, kind, &sql, snapshot.as_deref());
                debug!("Attempt {} diagnosed as {}", attempt_number, diagnosis.kind);
                attempt.outcome = AttemptOutcome::ExecutionError;
                attempt.diagnosis = Some(diagnosis);
                None
            }
        };
        attempt.duration_ms = started.elapsed().as_millis() as u64;
        self.emit_execution(&attempt);
        (attempt, result, state)
    }

    /// Snapshot lookups that fail only cost us the suggestion.
    async fn snapshot(&self, tenant_id: &str) -> Option<Arc<SchemaSnapshot>> {
        match self.schema.get_schema(tenant_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Schema snapshot unavailable for {}: {}", tenant_id, e);
                None
            }
        }
    }

    fn emit_execution(&self, attempt: &Attempt) {
        self.progress.emit(ProgressEvent::ExecutionComplete {
            attempt: attempt.attempt_number,
            outcome: attempt.outcome,
            row_count: attempt.row_count,
            duration_ms: attempt.duration_ms,
        });
    }

    fn build_response(
        &self,
        attempts: Vec<Attempt>,
        final_result: Option<ExecutionResult>,
        start: Instant,
    ) -> PipelineResponse {
        let attempt_count = attempts.len() as u32;
        let success = attempts.last().map_or(false, |a| {
            matches!(a.outcome, AttemptOutcome::Success | AttemptOutcome::ZeroRows)
        });
        let sql_final = attempts
            .iter()
            .rev()
            .map(|a| a.generated_sql.as_str())
            .find(|sql| !sql.is_empty())
            .unwrap_or_default()
            .to_string();

        let (rows, columns, diagnosis) = if success {
            let result = final_result.unwrap_or_default();
            (Some(result.rows), Some(result.columns), None)
        } else {
            (None, None, best_diagnosis(&attempts))
        };

        PipelineResponse {
            success,
            sql_final,
            rows,
            columns,
            attempt_count,
            diagnosis,
            processing_time_ms: start.elapsed().as_millis() as u64,
            attempts,
        }
    }
}

fn advance(state: &mut AttemptState, next: AttemptState, attempt_number: u32) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid attempt transition {:?} -> {:?}",
        state,
        next
    );
    debug!("Attempt {}: {:?} -> {:?}", attempt_number, state, next);
    *state = next;
}

fn retry_reason(attempt: &Attempt) -> String {
    match (&attempt.outcome, &attempt.diagnosis) {
        (AttemptOutcome::ZeroRows, _) => "zero rows".to_string(),
        (_, Some(diagnosis)) => diagnosis.kind.to_string(),
        (outcome, None) => format!("{:?}", outcome),
    }
}

/// The most recent diagnosis that carries a correction, else the most
/// recent one.
fn best_diagnosis(attempts: &[Attempt]) -> Option<ErrorDiagnosis> {
    let mut diagnoses = attempts.iter().rev().filter_map(|a| a.diagnosis.as_ref());
    let latest = diagnoses.next()?;
    if latest.has_suggestion() {
        return Some(latest.clone());
    }
    Some(diagnoses.find(|d| d.has_suggestion()).unwrap_or(latest).clone())
}
