//! Schema snapshots
//!
//! A read-only table/column inventory per tenant, used only to suggest
//! corrections. Lookups that fail degrade to "no snapshot".

use crate::error::{NlqError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Table names in iteration order.
    pub tables: Vec<String>,
    /// Ordered column names per table.
    #[serde(default)]
    pub columns: HashMap<String, Vec<String>>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by tests and static configs.
    pub fn with_table(mut self, table: &str, columns: &[&str]) -> Self {
        if !self.tables.iter().any(|t| t == table) {
            self.tables.push(table.to_string());
        }
        self.columns.insert(
            table.to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Find a table by case-insensitive name, returning its canonical name.
    pub fn find_table(&self, name: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.eq_ignore_ascii_case(name))
            .map(|t| t.as_str())
    }

    pub fn columns_of(&self, table: &str) -> &[String] {
        self.find_table(table)
            .and_then(|t| self.columns.get(t))
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns_of(table)
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Tables paired with their columns, in snapshot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.tables
            .iter()
            .map(move |t| (t.as_str(), self.columns_of(t)))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// `Ok(None)` when no snapshot exists for the tenant.
    async fn get_schema(&self, tenant_id: &str) -> Result<Option<Arc<SchemaSnapshot>>>;
}

/// In-process cache of snapshots loaded from `<dir>/<tenant>.json`.
pub struct SchemaCache {
    dir: Option<PathBuf>,
    snapshots: DashMap<String, Arc<SchemaSnapshot>>,
}

impl SchemaCache {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            snapshots: DashMap::new(),
        }
    }

    pub fn insert(&self, tenant_id: &str, snapshot: SchemaSnapshot) {
        self.snapshots
            .insert(tenant_id.to_string(), Arc::new(snapshot));
    }

    pub fn invalidate(&self, tenant_id: &str) {
        self.snapshots.remove(tenant_id);
    }

    pub fn load_file(path: &Path) -> Result<SchemaSnapshot> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: SchemaSnapshot = serde_json::from_str(&content)?;
        for table in snapshot.columns.keys() {
            if !snapshot.tables.contains(table) {
                return Err(NlqError::Schema(format!(
                    "{}: columns listed for unknown table '{}'",
                    path.display(),
                    table
                )));
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl SchemaProvider for SchemaCache {
    async fn get_schema(&self, tenant_id: &str) -> Result<Option<Arc<SchemaSnapshot>>> {
        if let Some(snapshot) = self.snapshots.get(tenant_id) {
            return Ok(Some(Arc::clone(snapshot.value())));
        }
        let Some(dir) = &self.dir else {
            return Ok(None);
        };

        let path = dir.join(format!("{}.json", tenant_id));
        if !path.exists() {
            debug!("No schema snapshot for tenant {} at {}", tenant_id, path.display());
            return Ok(None);
        }
        match Self::load_file(&path) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.snapshots
                    .insert(tenant_id.to_string(), Arc::clone(&snapshot));
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!("Failed to load schema snapshot {}: {}", path.display(), e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table("patients", &["patient_id", "full_name", "gender"])
            .with_table("visits", &["visit_id", "patient_id"])
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let s = snapshot();
        assert_eq!(s.find_table("PATIENTS"), Some("patients"));
        assert!(s.has_column("Patients", "FULL_NAME"));
        assert!(s.columns_of("missing").is_empty());
    }

    #[test]
    fn test_iter_follows_table_order() {
        let s = snapshot();
        let tables: Vec<&str> = s.iter().map(|(t, _)| t).collect();
        assert_eq!(tables, vec!["patients", "visits"]);
    }

    #[test]
    fn test_snapshot_deserializes_from_interface_shape() {
        let json = r#"{"tables":["patients"],"columns":{"patients":["patient_id","full_name"]}}"#;
        let s: SchemaSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(s.columns_of("patients").len(), 2);
    }

    #[tokio::test]
    async fn test_cache_without_dir_returns_inserted_snapshots() {
        let cache = SchemaCache::new(None);
        assert!(cache.get_schema("acme").await.unwrap().is_none());
        cache.insert("acme", snapshot());
        assert!(cache.get_schema("acme").await.unwrap().is_some());
        cache.invalidate("acme");
        assert!(cache.get_schema("acme").await.unwrap().is_none());
    }
}
