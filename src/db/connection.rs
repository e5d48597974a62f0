//! Connection contracts shared by every database engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect};
use std::fmt;

/// Supported engines. Engine-specific behaviour (dialect, error phrasing)
/// hangs off this enum rather than being string-switched at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mariadb")]
    MySql,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::MySql => "mysql",
        }
    }

    pub fn dialect(&self) -> Box<dyn Dialect> {
        match self {
            DatabaseKind::Postgres => Box::new(PostgreSqlDialect {}),
            DatabaseKind::MySql => Box::new(MySqlDialect {}),
        }
    }
}

impl std::str::FromStr for DatabaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            "mysql" | "mariadb" => Ok(DatabaseKind::MySql),
            other => Err(format!("unsupported database kind '{}'", other)),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbErrorKind {
    /// Could not open or keep a connection.
    Connection,
    /// The statement exceeded the per-query timeout.
    Timeout,
    /// The database rejected or failed the statement.
    Query,
}

/// Raw error reported by a connection, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbError {
    pub kind: DbErrorKind,
    pub message: String,
    pub code: Option<String>,
}

impl DbError {
    pub fn query(message: impl Into<String>, code: Option<String>) -> Self {
        Self {
            kind: DbErrorKind::Query,
            message: message.into(),
            code,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: DbErrorKind::Connection,
            message: message.into(),
            code: None,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: DbErrorKind::Timeout,
            message: message.into(),
            code: None,
        }
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DbError {}

impl From<sqlx::Error> for DbError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                DbError::query(db.message().to_string(), db.code().map(|c| c.into_owned()))
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => DbError::connection(e.to_string()),
            _ => DbError::query(e.to_string(), None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
}

pub type Row = serde_json::Map<String, serde_json::Value>;

/// Rows, column metadata and wall-clock duration of one execution.
/// `rows` is always present; an empty vector is a valid outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub columns: Vec<ColumnMeta>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One open connection. `close` consumes it, so it runs at most once.
#[async_trait]
pub trait DbConnection: Send {
    fn kind(&self) -> DatabaseKind;

    async fn execute(&mut self, sql: &str) -> Result<ExecutionResult, DbError>;

    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

/// Opens connections for a tenant.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn open(&self, tenant_id: &str) -> Result<Box<dyn DbConnection>, DbError>;

    /// Engine of the tenant's database, if the tenant is known.
    fn kind_of(&self, tenant_id: &str) -> Option<DatabaseKind>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_deserializes_aliases() {
        let kind: DatabaseKind = serde_json::from_str("\"postgresql\"").unwrap();
        assert_eq!(kind, DatabaseKind::Postgres);
        let kind: DatabaseKind = serde_json::from_str("\"mysql\"").unwrap();
        assert_eq!(kind, DatabaseKind::MySql);
        assert_eq!("PostgreSQL".parse::<DatabaseKind>(), Ok(DatabaseKind::Postgres));
        assert!("oracle".parse::<DatabaseKind>().is_err());
    }

    #[test]
    fn test_pool_timeout_is_a_connection_error() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind, DbErrorKind::Connection);
    }

    #[test]
    fn test_display_includes_code() {
        let err = DbError::query("Unknown column 'x'", Some("42S22".to_string()));
        assert_eq!(err.to_string(), "[42S22] Unknown column 'x'");
    }
}
