//! Request-level service: sessions around the execution loop.

use crate::execution_loop::{ExecutionLoop, PipelineRequest, PipelineResponse};
use crate::session::{SessionState, SessionStore, Turn};
use crate::sql::aliases::table_refs;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

pub struct NlqService {
    pipeline: Arc<ExecutionLoop>,
    sessions: Arc<dyn SessionStore>,
    history_turns: usize,
}

impl NlqService {
    pub fn new(pipeline: Arc<ExecutionLoop>, sessions: Arc<dyn SessionStore>, history_turns: usize) -> Self {
        Self {
            pipeline,
            sessions,
            history_turns,
        }
    }

    pub fn pipeline(&self) -> &ExecutionLoop {
        &self.pipeline
    }

    /// Answer one question. Session storage problems are logged and never
    /// fail the request.
    pub async fn ask(&self, session_id: Option<&str>, mut request: PipelineRequest) -> PipelineResponse {
        let mut session = match session_id {
            Some(id) => self.load_session(id, &request.tenant_id).await,
            None => None,
        };

        if let Some(state) = &session {
            request.natural_language_query = state.resolve_references(&request.natural_language_query);
            if request.conversation_context.is_none() {
                request.conversation_context = state.conversation_context();
            }
        }

        info!(
            "Answering for tenant {}: {}",
            request.tenant_id, request.natural_language_query
        );
        let response = self.pipeline.run(&request).await;

        if let (Some(id), Some(state)) = (session_id, session.as_mut()) {
            if response.success {
                state.last_table = self.first_table(&request.tenant_id, &response.sql_final);
                state.push_turn(
                    Turn {
                        question: request.natural_language_query.clone(),
                        sql: response.sql_final.clone(),
                        at: Utc::now(),
                    },
                    self.history_turns,
                );
                if let Err(e) = self.sessions.put(id, state.clone()).await {
                    warn!("Failed to store session {}: {}", id, e);
                }
            }
        }
        response
    }

    async fn load_session(&self, session_id: &str, tenant_id: &str) -> Option<SessionState> {
        match self.sessions.get(session_id).await {
            Ok(Some(state)) if state.tenant_id == tenant_id => Some(state),
            Ok(Some(_)) => {
                warn!("Session {} belongs to another tenant, starting fresh", session_id);
                Some(SessionState::new(tenant_id))
            }
            Ok(None) => Some(SessionState::new(tenant_id)),
            Err(e) => {
                warn!("Failed to load session {}: {}", session_id, e);
                None
            }
        }
    }

    fn first_table(&self, tenant_id: &str, sql: &str) -> Option<String> {
        let kind = self.pipeline.connections().kind_of(tenant_id)?;
        table_refs(sql, kind).into_iter().next().map(|r| r.table)
    }
}
