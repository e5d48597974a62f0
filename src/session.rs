//! Conversation sessions
//!
//! The pipeline only needs the last few turns to seed its prompts. Storage
//! sits behind `SessionStore`; expiry is driven by a sweeper task that the
//! caller spawns and owns.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub sql: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub tenant_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Table of the most recent successful query.
    #[serde(default)]
    pub last_table: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            turns: Vec::new(),
            last_table: None,
            updated_at: Utc::now(),
        }
    }

    /// Append a turn, keeping at most `max_turns`.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.updated_at = turn.at;
        self.turns.push(turn);
        if self.turns.len() > max_turns {
            let excess = self.turns.len() - max_turns;
            self.turns.drain(..excess);
        }
    }

    /// Prior turns rendered for `PromptContext::conversation_context`.
    pub fn conversation_context(&self) -> Option<String> {
        if self.turns.is_empty() {
            return None;
        }
        Some(
            self.turns
                .iter()
                .map(|t| format!("Q: {}\nSQL: {}", t.question, t.sql))
                .join("\n"),
        )
    }

    /// Replace "that table"-style references with the last table used.
    pub fn resolve_references(&self, query: &str) -> String {
        let Some(table) = &self.last_table else {
            return query.to_string();
        };
        let mut resolved = query.to_string();
        for phrase in ["that table", "this table", "the same table"] {
            resolved = resolved.replace(phrase, table);
        }
        resolved
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>>;

    async fn put(&self, session_id: &str, state: SessionState) -> Result<()>;

    /// Drop sessions not updated since `cutoff`; returns how many went.
    async fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionState>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<SessionState>> {
        Ok(self.sessions.get(session_id).map(|s| s.value().clone()))
    }

    async fn put(&self, session_id: &str, state: SessionState) -> Result<()> {
        self.sessions.insert(session_id.to_string(), state);
        Ok(())
    }

    async fn expire(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.updated_at >= cutoff);
        Ok(before.saturating_sub(self.sessions.len()))
    }
}

/// Periodically expire sessions idle for longer than `ttl`. Abort the
/// returned handle to stop sweeping.
pub fn spawn_session_sweeper(
    store: Arc<dyn SessionStore>,
    ttl: Duration,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(1));
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match store.expire(Utc::now() - ttl).await {
                Ok(0) => {}
                Ok(n) => debug!("Expired {} idle session(s)", n),
                Err(e) => warn!("Session sweep failed: {}", e),
            }
        }
    })
}
