//! Database access for tenant databases
//!
//! Engine-neutral connection contracts, the sqlx-backed provider and the
//! per-attempt connection lifecycle.

pub mod connection;
pub mod lifecycle;
pub mod sqlx_provider;

pub use connection::{
    ColumnMeta, ConnectionProvider, DatabaseKind, DbConnection, DbError, DbErrorKind,
    ExecutionResult, Row,
};
pub use lifecycle::{ConnectionLifecycleManager, ManagedConnection};
pub use sqlx_provider::{SqlxConnectionProvider, TenantConfig, TenantRegistry};
