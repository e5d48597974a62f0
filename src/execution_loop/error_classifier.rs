//! Error Classifier
//!
//! Turns a raw database error into a diagnosis and, when a schema snapshot
//! is available, a concrete correction for the next attempt.

use crate::db::{DatabaseKind, DbError, DbErrorKind};
use crate::fuzzy_matcher::SchemaNameMatcher;
use crate::schema::SchemaSnapshot;
use crate::sql::aliases::{resolve_qualifier, table_refs};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Diagnosis taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisKind {
    ColumnNotFound,
    TableNotFound,
    /// The column's qualifier names a table that does not exist either.
    TableAndColumnNotFound,
    GenericSqlError,
    ConnectionError,
    ExtractionFailure,
}

impl fmt::Display for DiagnosisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosisKind::ColumnNotFound => write!(f, "ColumnNotFound"),
            DiagnosisKind::TableNotFound => write!(f, "TableNotFound"),
            DiagnosisKind::TableAndColumnNotFound => write!(f, "TableAndColumnNotFound"),
            DiagnosisKind::GenericSqlError => write!(f, "GenericSqlError"),
            DiagnosisKind::ConnectionError => write!(f, "ConnectionError"),
            DiagnosisKind::ExtractionFailure => write!(f, "ExtractionFailure"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDiagnosis {
    pub kind: DiagnosisKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offending_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_suggestion: Option<String>,
    /// Database message as reported; kept out of responses.
    #[serde(skip)]
    pub raw_message: String,
}

impl ErrorDiagnosis {
    pub fn new(kind: DiagnosisKind, raw_message: impl Into<String>) -> Self {
        Self {
            kind,
            offending_identifier: None,
            suggested_identifier: None,
            suggested_table: None,
            human_suggestion: None,
            raw_message: raw_message.into(),
        }
    }

    pub fn extraction_failure(message: impl Into<String>) -> Self {
        Self::new(DiagnosisKind::ExtractionFailure, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DiagnosisKind::ConnectionError, message)
    }

    fn with_offending(mut self, identifier: &str) -> Self {
        self.offending_identifier = Some(identifier.to_string());
        self
    }

    pub fn has_suggestion(&self) -> bool {
        self.human_suggestion.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternTarget {
    Column,
    Table,
}

struct ErrorPattern {
    target: PatternTarget,
    regex: Regex,
}

impl ErrorPattern {
    fn new(target: PatternTarget, pattern: &str) -> Self {
        Self {
            target,
            regex: Regex::new(pattern).unwrap(),
        }
    }
}

lazy_static! {
    static ref MYSQL_PATTERNS: Vec<ErrorPattern> = vec![
        ErrorPattern::new(PatternTarget::Column, r"(?i)Unknown column '([^']+)'"),
        ErrorPattern::new(PatternTarget::Table, r"(?i)Table '([^']+)' doesn't exist"),
    ];
    static ref POSTGRES_PATTERNS: Vec<ErrorPattern> = vec![
        ErrorPattern::new(PatternTarget::Column, r#"(?i)column "([^"]+)" does not exist"#),
        ErrorPattern::new(PatternTarget::Column, r"(?i)column ([\w.]+) does not exist"),
        ErrorPattern::new(PatternTarget::Table, r#"(?i)relation "([^"]+)" does not exist"#),
    ];
    static ref COMMON_PATTERNS: Vec<ErrorPattern> = vec![
        ErrorPattern::new(PatternTarget::Column, r#"(?i)no such column:?\s*['"`]?([\w.]+)"#),
        ErrorPattern::new(PatternTarget::Column, r"(?i)invalid column name\s*'([^']+)'"),
        ErrorPattern::new(PatternTarget::Table, r#"(?i)no such table:?\s*['"`]?([\w.]+)"#),
        ErrorPattern::new(PatternTarget::Table, r"(?i)invalid object name\s*'([^']+)'"),
    ];
}

impl DatabaseKind {
    /// Engine-specific phrasing of missing-object errors.
    fn error_patterns(&self) -> &'static [ErrorPattern] {
        match self {
            DatabaseKind::Postgres => POSTGRES_PATTERNS.as_slice(),
            DatabaseKind::MySql => MYSQL_PATTERNS.as_slice(),
        }
    }
}

fn match_patterns(kind: DatabaseKind, message: &str) -> Option<(PatternTarget, String)> {
    kind.error_patterns()
        .iter()
        .chain(COMMON_PATTERNS.iter())
        .find_map(|p| {
            p.regex
                .captures(message)
                .and_then(|c| c.get(1))
                .map(|m| (p.target, m.as_str().trim_matches('`').to_string()))
        })
}

/// Error classifier
pub struct ErrorClassifier {
    matcher: SchemaNameMatcher,
}

impl ErrorClassifier {
    pub fn new(matcher: SchemaNameMatcher) -> Self {
        Self { matcher }
    }

    /// Classify a database error raised while executing `sql`.
    pub fn classify(
        &self,
        error: &DbError,
        kind: DatabaseKind,
        sql: &str,
        snapshot: Option<&SchemaSnapshot>,
    ) -> ErrorDiagnosis {
        if matches!(error.kind, DbErrorKind::Connection | DbErrorKind::Timeout) {
            return ErrorDiagnosis::connection(error.to_string());
        }

        let raw = error.to_string();
        let Some((target, identifier)) = match_patterns(kind, &error.message) else {
            debug!("Unrecognized {} error: {}", kind, error.message);
            return ErrorDiagnosis::new(DiagnosisKind::GenericSqlError, raw);
        };

        match target {
            PatternTarget::Table => self.diagnose_table(raw, &identifier, snapshot),
            PatternTarget::Column => self.diagnose_column(raw, &identifier, kind, sql, snapshot),
        }
    }

    fn diagnose_table(
        &self,
        raw: String,
        identifier: &str,
        snapshot: Option<&SchemaSnapshot>,
    ) -> ErrorDiagnosis {
        // MySQL reports `db.table`
        let table = identifier.rsplit('.').next().unwrap_or(identifier);
        let mut diagnosis = ErrorDiagnosis::new(DiagnosisKind::TableNotFound, raw).with_offending(table);

        if let Some(found) = snapshot.and_then(|s| self.matcher.match_table(s, table)) {
            diagnosis.human_suggestion =
                Some(format!("use table `{}` instead of `{}`", found.name, table));
            diagnosis.suggested_table = Some(found.name.clone());
            diagnosis.suggested_identifier = Some(found.name);
        }
        diagnosis
    }

    fn diagnose_column(
        &self,
        raw: String,
        identifier: &str,
        kind: DatabaseKind,
        sql: &str,
        snapshot: Option<&SchemaSnapshot>,
    ) -> ErrorDiagnosis {
        let (qualifier, column) = match identifier.rsplit_once('.') {
            Some((q, c)) => (Some(q), c),
            None => (None, identifier),
        };
        let mut diagnosis =
            ErrorDiagnosis::new(DiagnosisKind::ColumnNotFound, raw).with_offending(identifier);

        let table = match qualifier {
            Some(q) => Some(resolve_qualifier(sql, kind, q).unwrap_or_else(|| q.to_string())),
            None => {
                // an unqualified column belongs to the only table in the statement
                let refs = table_refs(sql, kind);
                match refs.as_slice() {
                    [only] => Some(only.table.clone()),
                    _ => None,
                }
            }
        };

        let Some(snapshot) = snapshot else {
            return diagnosis;
        };

        match table {
            Some(table) if snapshot.find_table(&table).is_some() => {
                if let Some(found) = self.matcher.match_column(snapshot, &table, column) {
                    diagnosis.human_suggestion = Some(format!(
                        "use `{}.{}` instead of `{}`",
                        found.table, found.column, identifier
                    ));
                    diagnosis.suggested_identifier = Some(found.column);
                    diagnosis.suggested_table = Some(found.table);
                }
            }
            Some(table) if qualifier.is_some() => {
                diagnosis.kind = DiagnosisKind::TableAndColumnNotFound;
                let Some(found_table) = self.matcher.match_table(snapshot, &table) else {
                    return diagnosis;
                };
                let suggested_column = if snapshot.has_column(&found_table.name, column) {
                    snapshot
                        .columns_of(&found_table.name)
                        .iter()
                        .find(|c| c.eq_ignore_ascii_case(column))
                        .cloned()
                } else {
                    self.matcher
                        .match_column(snapshot, &found_table.name, column)
                        .map(|m| m.column)
                };
                diagnosis.human_suggestion = Some(match &suggested_column {
                    Some(c) => format!(
                        "use `{}.{}` instead of `{}`",
                        found_table.name, c, identifier
                    ),
                    None => format!("use table `{}` instead of `{}`", found_table.name, table),
                });
                diagnosis.suggested_identifier = suggested_column;
                diagnosis.suggested_table = Some(found_table.name);
            }
            _ => {
                if let Some(found) = self.matcher.match_column_anywhere(snapshot, column) {
                    diagnosis.human_suggestion = Some(format!(
                        "use `{}.{}` instead of `{}`",
                        found.table, found.column, identifier
                    ));
                    diagnosis.suggested_identifier = Some(found.column);
                    diagnosis.suggested_table = Some(found.table);
                }
            }
        }
        diagnosis
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(SchemaNameMatcher::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .with_table("patients", &["patient_id", "full_name", "gender", "dob"])
            .with_table("visits", &["visit_id", "patient_id", "visit_date"])
    }

    #[test]
    fn test_mysql_unknown_column_with_alias() {
        let classifier = ErrorClassifier::default();
        let error = DbError::query(
            "Unknown column 'p.fullname' in 'field list'",
            Some("42S22".to_string()),
        );
        let d = classifier.classify(
            &error,
            DatabaseKind::MySql,
            "SELECT p.fullname FROM patients p;",
            Some(&snapshot()),
        );
        assert_eq!(d.kind, DiagnosisKind::ColumnNotFound);
        assert_eq!(d.suggested_table.as_deref(), Some("patients"));
        assert_eq!(d.suggested_identifier.as_deref(), Some("full_name"));
        assert_eq!(
            d.human_suggestion.as_deref(),
            Some("use `patients.full_name` instead of `p.fullname`")
        );
    }

    #[test]
    fn test_postgres_unqualified_column_single_table() {
        let classifier = ErrorClassifier::default();
        let error = DbError::query("column \"fullname\" does not exist", Some("42703".to_string()));
        let d = classifier.classify(
            &error,
            DatabaseKind::Postgres,
            "SELECT fullname FROM patients;",
            Some(&snapshot()),
        );
        assert_eq!(d.kind, DiagnosisKind::ColumnNotFound);
        assert_eq!(d.offending_identifier.as_deref(), Some("fullname"));
        assert_eq!(
            d.human_suggestion.as_deref(),
            Some("use `patients.full_name` instead of `fullname`")
        );
    }

    #[test]
    fn test_unqualified_column_searches_every_table() {
        let classifier = ErrorClassifier::default();
        let error = DbError::query("column \"visitdate\" does not exist", None);
        let d = classifier.classify(
            &error,
            DatabaseKind::Postgres,
            "SELECT visitdate FROM patients p JOIN visits v ON v.patient_id = p.patient_id;",
            Some(&snapshot()),
        );
        assert_eq!(d.suggested_table.as_deref(), Some("visits"));
        assert_eq!(d.suggested_identifier.as_deref(), Some("visit_date"));
    }

    #[test]
    fn test_table_not_found_strips_database_prefix() {
        let classifier = ErrorClassifier::default();
        let error = DbError::query("Table 'clinic.patient' doesn't exist", None);
        let d = classifier.classify(
            &error,
            DatabaseKind::MySql,
            "SELECT * FROM patient;",
            Some(&snapshot()),
        );
        assert_eq!(d.kind, DiagnosisKind::TableNotFound);
        assert_eq!(d.offending_identifier.as_deref(), Some("patient"));
        assert_eq!(d.suggested_table.as_deref(), Some("patients"));
    }

    #[test]
    fn test_unknown_qualifier_table_is_table_and_column() {
        let classifier = ErrorClassifier::default();
        let error = DbError::query("column patient.fullname does not exist", None);
        let d = classifier.classify(
            &error,
            DatabaseKind::Postgres,
            "SELECT patient.fullname FROM patient;",
            Some(&snapshot()),
        );
        assert_eq!(d.kind, DiagnosisKind::TableAndColumnNotFound);
        assert_eq!(d.suggested_table.as_deref(), Some("patients"));
        assert_eq!(d.suggested_identifier.as_deref(), Some("full_name"));
    }

    #[test]
    fn test_no_snapshot_gives_no_suggestion() {
        let classifier = ErrorClassifier::default();
        let error = DbError::query("Unknown column 'fullname' in 'field list'", None);
        let d = classifier.classify(&error, DatabaseKind::MySql, "SELECT fullname FROM patients;", None);
        assert_eq!(d.kind, DiagnosisKind::ColumnNotFound);
        assert!(!d.has_suggestion());
    }

    #[test]
    fn test_connection_and_generic_errors() {
        let classifier = ErrorClassifier::default();
        let d = classifier.classify(
            &DbError::timeout("query exceeded 30s"),
            DatabaseKind::Postgres,
            "SELECT 1;",
            None,
        );
        assert_eq!(d.kind, DiagnosisKind::ConnectionError);

        let d = classifier.classify(
            &DbError::query("syntax error at or near \"FORM\"", Some("42601".to_string())),
            DatabaseKind::Postgres,
            "SELECT * FORM patients;",
            Some(&snapshot()),
        );
        assert_eq!(d.kind, DiagnosisKind::GenericSqlError);
        assert!(d.raw_message.contains("syntax error"));
    }

    #[test]
    fn test_common_patterns_apply_to_every_engine() {
        let classifier = ErrorClassifier::default();
        let error = DbError::query("no such column: fullname", None);
        let d = classifier.classify(&error, DatabaseKind::MySql, "SELECT fullname FROM patients;", None);
        assert_eq!(d.kind, DiagnosisKind::ColumnNotFound);
    }

    #[test]
    fn test_raw_message_is_not_serialized() {
        let d = ErrorDiagnosis::new(DiagnosisKind::GenericSqlError, "secret detail");
        let json = serde_json::to_string(&d).unwrap();
        assert!(!json.contains("secret detail"));
        assert!(json.contains("generic_sql_error"));
    }
}
