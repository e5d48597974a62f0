#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use spyne_nlq::agent::{GenerationAgent, GenerationOutput, PromptContext};
use spyne_nlq::db::{
    ColumnMeta, ConnectionLifecycleManager, ConnectionProvider, DatabaseKind, DbConnection,
    DbError, ExecutionResult, Row,
};
use spyne_nlq::error::{NlqError, Result};
use spyne_nlq::execution_loop::ExecutionLoop;
use spyne_nlq::schema::{SchemaCache, SchemaSnapshot};
use spyne_nlq::sql::SqlExtractor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TENANT: &str = "clinic";

/// One scripted agent turn.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail,
}

/// Replays scripted replies in order and records every prompt it receives.
pub struct ScriptedAgent {
    replies: Mutex<Vec<Reply>>,
    pub prompts: Mutex<Vec<PromptContext>>,
}

impl ScriptedAgent {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| Reply::Text(t.to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<PromptContext> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationAgent for ScriptedAgent {
    async fn generate(&self, context: &PromptContext) -> Result<GenerationOutput> {
        self.prompts.lock().unwrap().push(context.clone());
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.is_empty() {
            Reply::Text(String::new())
        } else {
            replies.remove(0)
        };
        match reply {
            Reply::Text(text) => Ok(GenerationOutput::from_text(text)),
            Reply::Fail => Err(NlqError::Llm("agent unavailable".to_string())),
        }
    }
}

/// In-memory stand-in for a tenant database.
///
/// Statements mentioning `fullname` fail with the engine's unknown-column
/// message, statements mentioning `nobody` return no rows, everything else
/// returns one patient row.
pub struct MockDatabase {
    pub kind: DatabaseKind,
    pub refuse_connections: bool,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
}

impl MockDatabase {
    pub fn new(kind: DatabaseKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            refuse_connections: false,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn refusing(kind: DatabaseKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            refuse_connections: true,
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    fn respond(&self, sql: &str) -> std::result::Result<ExecutionResult, DbError> {
        if sql.contains("fullname") {
            let message = match self.kind {
                DatabaseKind::Postgres => "column p.fullname does not exist".to_string(),
                DatabaseKind::MySql => "Unknown column 'p.fullname' in 'field list'".to_string(),
            };
            return Err(DbError::query(message, None));
        }
        if sql.contains("nobody") {
            return Ok(ExecutionResult::default());
        }
        let mut row = Row::new();
        row.insert("patient_id".to_string(), json!(7));
        row.insert("full_name".to_string(), json!("Ada Lovelace"));
        Ok(ExecutionResult {
            rows: vec![row],
            columns: vec![
                ColumnMeta {
                    name: "patient_id".to_string(),
                    type_name: "INT4".to_string(),
                },
                ColumnMeta {
                    name: "full_name".to_string(),
                    type_name: "TEXT".to_string(),
                },
            ],
            duration_ms: 2,
        })
    }
}

struct MockConnection {
    db: Arc<MockDatabase>,
}

#[async_trait]
impl DbConnection for MockConnection {
    fn kind(&self) -> DatabaseKind {
        self.db.kind
    }

    async fn execute(&mut self, sql: &str) -> std::result::Result<ExecutionResult, DbError> {
        self.db.executed.lock().unwrap().push(sql.to_string());
        self.db.respond(sql)
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), DbError> {
        self.db.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider handing out connections to one shared `MockDatabase`.
pub struct MockProvider(pub Arc<MockDatabase>);

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn open(&self, tenant_id: &str) -> std::result::Result<Box<dyn DbConnection>, DbError> {
        if self.0.refuse_connections {
            return Err(DbError::connection(format!("connection refused for {}", tenant_id)));
        }
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            db: Arc::clone(&self.0),
        }))
    }

    fn kind_of(&self, _tenant_id: &str) -> Option<DatabaseKind> {
        Some(self.0.kind)
    }
}

pub fn clinic_schema() -> SchemaSnapshot {
    SchemaSnapshot::new()
        .with_table("patients", &["patient_id", "full_name", "gender", "dob", "state"])
        .with_table("visits", &["visit_id", "patient_id", "visit_date", "reason"])
}

pub fn pipeline(agent: Arc<ScriptedAgent>, db: &Arc<MockDatabase>) -> ExecutionLoop {
    let schema = SchemaCache::new(None);
    schema.insert(TENANT, clinic_schema());
    ExecutionLoop::new(
        agent,
        Arc::new(schema),
        Arc::new(ConnectionLifecycleManager::new(Arc::new(MockProvider(Arc::clone(db))))),
        SqlExtractor::default(),
    )
}
