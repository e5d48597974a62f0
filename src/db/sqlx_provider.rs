//! sqlx-backed connections for PostgreSQL and MySQL tenants.
//!
//! Each tenant gets one bounded pool, created lazily on first use, so many
//! tenants cannot exhaust the database server between them.

use crate::db::connection::{
    ColumnMeta, ConnectionProvider, DatabaseKind, DbConnection, DbError, ExecutionResult, Row,
};
use crate::error::{NlqError, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Column, Row as _, TypeInfo};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub kind: DatabaseKind,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

/// Static tenant -> database registry, loaded from a JSON object keyed by
/// tenant id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantRegistry {
    #[serde(flatten)]
    pub tenants: HashMap<String, TenantConfig>,
}

impl TenantRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let registry: TenantRegistry = serde_json::from_str(&content)?;
        if registry.tenants.is_empty() {
            return Err(NlqError::Config(format!(
                "{} defines no tenants",
                path.display()
            )));
        }
        Ok(registry)
    }

    pub fn get(&self, tenant_id: &str) -> Option<&TenantConfig> {
        self.tenants.get(tenant_id)
    }
}

/// One pool per engine variant.
#[derive(Clone)]
enum TenantPool {
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl TenantPool {
    fn connect_lazy(config: &TenantConfig) -> std::result::Result<Self, DbError> {
        let timeout = Duration::from_secs(config.acquire_timeout_secs);
        match config.kind {
            DatabaseKind::Postgres => PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(timeout)
                .connect_lazy(&config.url)
                .map(TenantPool::Postgres)
                .map_err(|e| DbError::connection(e.to_string())),
            DatabaseKind::MySql => MySqlPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(timeout)
                .connect_lazy(&config.url)
                .map(TenantPool::MySql)
                .map_err(|e| DbError::connection(e.to_string())),
        }
    }
}

pub struct SqlxConnectionProvider {
    registry: TenantRegistry,
    pools: DashMap<String, TenantPool>,
    query_timeout: Duration,
}

impl SqlxConnectionProvider {
    pub fn new(registry: TenantRegistry, query_timeout: Duration) -> Self {
        Self {
            registry,
            pools: DashMap::new(),
            query_timeout,
        }
    }

    fn pool_for(&self, tenant_id: &str) -> std::result::Result<TenantPool, DbError> {
        if let Some(pool) = self.pools.get(tenant_id) {
            return Ok(pool.value().clone());
        }
        let config = self
            .registry
            .get(tenant_id)
            .ok_or_else(|| DbError::connection(format!("unknown tenant '{}'", tenant_id)))?;
        let pool = TenantPool::connect_lazy(config)?;
        info!(
            "Created {} pool for tenant {} (max {} connections)",
            config.kind, tenant_id, config.max_connections
        );
        Ok(self
            .pools
            .entry(tenant_id.to_string())
            .or_insert(pool)
            .value()
            .clone())
    }
}

#[async_trait]
impl ConnectionProvider for SqlxConnectionProvider {
    async fn open(&self, tenant_id: &str) -> std::result::Result<Box<dyn DbConnection>, DbError> {
        let pool = self.pool_for(tenant_id)?;
        let timeout = self.query_timeout;
        let connection: Box<dyn DbConnection> = match pool {
            TenantPool::Postgres(pool) => Box::new(SqlxConnection::Postgres {
                conn: pool.acquire().await.map_err(|e| DbError::connection(e.to_string()))?,
                timeout,
            }),
            TenantPool::MySql(pool) => Box::new(SqlxConnection::MySql {
                conn: pool.acquire().await.map_err(|e| DbError::connection(e.to_string()))?,
                timeout,
            }),
        };
        Ok(connection)
    }

    fn kind_of(&self, tenant_id: &str) -> Option<DatabaseKind> {
        self.registry.get(tenant_id).map(|c| c.kind)
    }
}

enum SqlxConnection {
    Postgres {
        conn: PoolConnection<Postgres>,
        timeout: Duration,
    },
    MySql {
        conn: PoolConnection<MySql>,
        timeout: Duration,
    },
}

#[async_trait]
impl DbConnection for SqlxConnection {
    fn kind(&self) -> DatabaseKind {
        match self {
            SqlxConnection::Postgres { .. } => DatabaseKind::Postgres,
            SqlxConnection::MySql { .. } => DatabaseKind::MySql,
        }
    }

    async fn execute(&mut self, sql: &str) -> std::result::Result<ExecutionResult, DbError> {
        let start = Instant::now();
        let (rows, columns): (Vec<Row>, Vec<ColumnMeta>) = match self {
            SqlxConnection::Postgres { conn, timeout } => {
                let fetched = tokio::time::timeout(*timeout, sqlx::query(sql).fetch_all(&mut **conn))
                    .await
                    .map_err(|_| DbError::timeout(format!("query exceeded {:?}", timeout)))??;
                let columns = fetched.first().map(pg_columns).unwrap_or_default();
                (fetched.iter().map(pg_row_to_json).collect(), columns)
            }
            SqlxConnection::MySql { conn, timeout } => {
                let fetched = tokio::time::timeout(*timeout, sqlx::query(sql).fetch_all(&mut **conn))
                    .await
                    .map_err(|_| DbError::timeout(format!("query exceeded {:?}", timeout)))??;
                let columns = fetched.first().map(mysql_columns).unwrap_or_default();
                (fetched.iter().map(mysql_row_to_json).collect(), columns)
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        debug!("Query returned {} rows in {}ms", rows.len(), duration_ms);
        Ok(ExecutionResult {
            rows,
            columns,
            duration_ms,
        })
    }

    async fn close(self: Box<Self>) -> std::result::Result<(), DbError> {
        // dropping a pooled connection hands it back to its pool
        drop(self);
        Ok(())
    }
}

fn pg_columns(row: &PgRow) -> Vec<ColumnMeta> {
    row.columns()
        .iter()
        .map(|c| ColumnMeta {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
        })
        .collect()
}

fn mysql_columns(row: &MySqlRow) -> Vec<ColumnMeta> {
    row.columns()
        .iter()
        .map(|c| ColumnMeta {
            name: c.name().to_string(),
            type_name: c.type_info().name().to_string(),
        })
        .collect()
}

/// Decode a cell by trying each supported Rust type in turn; sqlx rejects
/// incompatible types, so the first successful decode wins.
macro_rules! decode_cell {
    ($row:expr, $idx:expr, [$($ty:ty => $conv:expr),+ $(,)?]) => {{
        let mut value = Value::Null;
        let mut decoded = false;
        $(
            if !decoded {
                if let Ok(v) = $row.try_get::<Option<$ty>, _>($idx) {
                    value = v.map($conv).unwrap_or(Value::Null);
                    decoded = true;
                }
            }
        )+
        if !decoded {
            debug!("Column {} has an unsupported type, returning null", $idx);
        }
        value
    }};
}

/// NUMERIC/DECIMAL as a JSON number; the exact text when f64 cannot hold it.
fn decimal_to_json(value: BigDecimal) -> Value {
    let text = value.to_string();
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .filter(|f| f.to_string().parse::<BigDecimal>().map_or(false, |back| back == value))
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}

fn pg_row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_cell!(row, idx, [
            bool => Value::from,
            i16 => Value::from,
            i32 => Value::from,
            i64 => Value::from,
            f32 => |v: f32| Value::from(v as f64),
            f64 => Value::from,
            BigDecimal => decimal_to_json,
            String => Value::from,
            chrono::NaiveDate => |v: chrono::NaiveDate| Value::from(v.to_string()),
            chrono::NaiveDateTime => |v: chrono::NaiveDateTime| Value::from(v.to_string()),
            chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| Value::from(v.to_rfc3339()),
            uuid::Uuid => |v: uuid::Uuid| Value::from(v.to_string()),
            Value => |v: Value| v,
        ]);
        out.insert(column.name().to_string(), value);
    }
    out
}

fn mysql_row_to_json(row: &MySqlRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_cell!(row, idx, [
            i64 => Value::from,
            u64 => Value::from,
            f64 => Value::from,
            f32 => |v: f32| Value::from(v as f64),
            BigDecimal => decimal_to_json,
            bool => Value::from,
            String => Value::from,
            chrono::NaiveDate => |v: chrono::NaiveDate| Value::from(v.to_string()),
            chrono::NaiveDateTime => |v: chrono::NaiveDateTime| Value::from(v.to_string()),
            chrono::DateTime<chrono::Utc> => |v: chrono::DateTime<chrono::Utc>| Value::from(v.to_rfc3339()),
            Value => |v: Value| v,
        ]);
        out.insert(column.name().to_string(), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_parses_tenants() {
        let json = r#"{
            "acme": {"kind": "postgres", "url": "postgres://localhost/acme"},
            "globex": {"kind": "mysql", "url": "mysql://localhost/globex", "max_connections": 2}
        }"#;
        let registry: TenantRegistry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.get("acme").unwrap().kind, DatabaseKind::Postgres);
        assert_eq!(registry.get("acme").unwrap().max_connections, 5);
        assert_eq!(registry.get("globex").unwrap().max_connections, 2);
    }

    #[test]
    fn test_decimal_cells_keep_their_value() {
        let avg: BigDecimal = "42.50".parse().unwrap();
        assert_eq!(decimal_to_json(avg), serde_json::json!(42.5));
        let sum: BigDecimal = "1200".parse().unwrap();
        assert_eq!(decimal_to_json(sum), serde_json::json!(1200.0));
        let wide: BigDecimal = "12345678901234567890.123456789".parse().unwrap();
        assert_eq!(
            decimal_to_json(wide),
            Value::String("12345678901234567890.123456789".to_string())
        );
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_a_connection_error() {
        let provider = SqlxConnectionProvider::new(TenantRegistry::default(), Duration::from_secs(1));
        let err = provider.open("nobody").await.err().unwrap();
        assert_eq!(err.kind, crate::db::DbErrorKind::Connection);
        assert!(provider.kind_of("nobody").is_none());
    }
}
