//! Connection Lifecycle Manager
//!
//! Opens one connection per attempt and guarantees it is closed exactly once,
//! whatever the attempt's outcome. `release` is safe to call repeatedly; a
//! connection dropped without release (cancelled request, panic) is closed
//! on the runtime in the background.

use crate::db::connection::{
    ConnectionProvider, DatabaseKind, DbConnection, DbError, ExecutionResult,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ConnectionLifecycleManager {
    provider: Arc<dyn ConnectionProvider>,
    active: Arc<AtomicUsize>,
}

impl ConnectionLifecycleManager {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Engine of the tenant's database, if known.
    pub fn kind_of(&self, tenant_id: &str) -> Option<DatabaseKind> {
        self.provider.kind_of(tenant_id)
    }

    /// Connections acquired and not yet released.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn acquire(&self, tenant_id: &str) -> Result<ManagedConnection, DbError> {
        let inner = self.provider.open(tenant_id).await?;
        self.active.fetch_add(1, Ordering::SeqCst);
        debug!("Acquired connection for tenant {}", tenant_id);
        Ok(ManagedConnection {
            tenant_id: tenant_id.to_string(),
            kind: inner.kind(),
            inner: Some(inner),
            active: Arc::clone(&self.active),
        })
    }

    /// Close the connection if it is still open. Calling this again is a no-op.
    pub async fn release(&self, connection: &mut ManagedConnection) {
        let Some(inner) = connection.inner.take() else {
            return;
        };
        connection.active.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = inner.close().await {
            warn!(
                "Closing connection for tenant {} failed: {}",
                connection.tenant_id, e
            );
        } else {
            debug!("Released connection for tenant {}", connection.tenant_id);
        }
    }
}

pub struct ManagedConnection {
    tenant_id: String,
    kind: DatabaseKind,
    inner: Option<Box<dyn DbConnection>>,
    active: Arc<AtomicUsize>,
}

impl ManagedConnection {
    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub async fn execute(&mut self, sql: &str) -> Result<ExecutionResult, DbError> {
        match self.inner.as_mut() {
            Some(inner) => inner.execute(sql).await,
            None => Err(DbError::connection("connection already released")),
        }
    }
}

impl Drop for ManagedConnection {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        warn!(
            "Connection for tenant {} dropped without release, closing in background",
            self.tenant_id
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = inner.close().await {
                    warn!("Background close failed: {}", e);
                }
            });
        }
    }
}
