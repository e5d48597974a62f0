//! Intent Fallback Catalog
//!
//! An ordered table of `(keywords -> template)` used when the agent produced
//! no usable SQL. The catalog also carries the alias dictionary and default
//! table the completeness repairer relies on.

use crate::error::{NlqError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackTemplate {
    pub name: String,
    pub keywords: Vec<String>,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AliasEntry {
    pub alias: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackCatalog {
    pub templates: Vec<FallbackTemplate>,
    /// Name of the template used when no keyword matches.
    pub default_template: String,
    /// Table clause (`table alias`) appended by the repairer as a last resort.
    pub default_table: String,
    #[serde(default)]
    pub aliases: Vec<AliasEntry>,
}

/// Result of picking a template for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMatch<'a> {
    pub template: &'a FallbackTemplate,
    pub hits: usize,
}

impl FallbackCatalog {
    /// Load a catalog from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let catalog: FallbackCatalog = serde_json::from_str(&content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<()> {
        if self.templates.is_empty() {
            return Err(NlqError::Config("fallback catalog has no templates".to_string()));
        }
        if !self.templates.iter().any(|t| t.name == self.default_template) {
            return Err(NlqError::Config(format!(
                "default template '{}' is not in the catalog",
                self.default_template
            )));
        }
        Ok(())
    }

    /// The template used when nothing matches.
    pub fn default_entry(&self) -> Option<&FallbackTemplate> {
        self.templates
            .iter()
            .find(|t| t.name == self.default_template)
            .or_else(|| self.templates.first())
    }

    /// Pick the template with the most keyword hits; ties go to the earliest
    /// entry, no hits go to the default template.
    pub fn select(&self, query: &str) -> Option<TemplateMatch<'_>> {
        let query = query.to_lowercase();
        let mut best: Option<TemplateMatch<'_>> = None;

        for template in &self.templates {
            let hits = template
                .keywords
                .iter()
                .filter(|k| !k.is_empty() && query.contains(&k.to_lowercase()))
                .count();
            if hits == 0 {
                continue;
            }
            if best.as_ref().map_or(true, |b| hits > b.hits) {
                best = Some(TemplateMatch { template, hits });
            }
        }

        best.or_else(|| self.default_entry().map(|template| TemplateMatch { template, hits: 0 }))
    }

    /// Resolve a column prefix (alias or table name) to a `table alias` clause.
    pub fn table_for_prefix(&self, prefix: &str) -> Option<String> {
        let prefix = prefix.to_lowercase();
        self.aliases
            .iter()
            .find(|a| a.alias.to_lowercase() == prefix)
            .map(|a| format!("{} {}", a.table, a.alias))
            .or_else(|| {
                self.aliases
                    .iter()
                    .find(|a| a.table.to_lowercase() == prefix)
                    .map(|a| a.table.clone())
            })
    }

    /// Default catalog for the clinical sample domain.
    pub fn healthcare() -> Self {
        let template = |name: &str, keywords: &[&str], sql: &str| FallbackTemplate {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            sql: sql.to_string(),
        };
        let alias = |alias: &str, table: &str| AliasEntry {
            alias: alias.to_string(),
            table: table.to_string(),
        };

        Self {
            templates: vec![
                template(
                    "patients",
                    &["patient", "people", "gender", "state", "demographic"],
                    "SELECT p.patient_id, p.gender, p.dob, p.state FROM patients p LIMIT 10;",
                ),
                template(
                    "visits",
                    &["visit", "encounter", "appointment", "admission"],
                    "SELECT v.visit_id, v.patient_id, v.visit_date, v.visit_type FROM visits v ORDER BY v.visit_date DESC LIMIT 10;",
                ),
                template(
                    "prescriptions",
                    &["prescription", "medication", "drug", "dose"],
                    "SELECT m.prescription_id, m.patient_id, m.drug_name, m.start_date FROM prescriptions m LIMIT 10;",
                ),
                template(
                    "diagnoses",
                    &["diagnos", "condition", "icd", "disease"],
                    "SELECT d.diagnosis_id, d.patient_id, d.icd_code, d.diagnosed_on FROM diagnoses d LIMIT 10;",
                ),
                template(
                    "providers",
                    &["provider", "doctor", "physician", "clinician"],
                    "SELECT pr.provider_id, pr.full_name, pr.specialty FROM providers pr LIMIT 10;",
                ),
            ],
            default_template: "patients".to_string(),
            default_table: "patients p".to_string(),
            aliases: vec![
                alias("p", "patients"),
                alias("v", "visits"),
                alias("m", "prescriptions"),
                alias("d", "diagnoses"),
                alias("pr", "providers"),
            ],
        }
    }
}

impl Default for FallbackCatalog {
    fn default() -> Self {
        Self::healthcare()
    }
}
