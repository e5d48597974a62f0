//! Agent Prompts - system prompt for the SQL generation agent
//!
//! The prompt tells the model which engine it is writing for, which tables
//! exist, and how to format its answer so the extractor can find the SQL.

use crate::db::DatabaseKind;
use crate::schema::SchemaSnapshot;
use itertools::Itertools;

/// System prompt for SQL generation
pub const SQL_GENERATION_SYSTEM_PROMPT: &str = r#"You are a SQL generation agent for a read-only analytics service.

## Your Role

Turn the user's question into ONE SQL SELECT statement that answers it.

## Rules

1. Only SELECT (or WITH ... SELECT). Never INSERT, UPDATE, DELETE, DROP, ALTER, TRUNCATE or CREATE.
2. Use only tables and columns listed in the schema below. Do not guess column names.
3. Qualify columns with a table alias when more than one table is involved.
4. Add LIMIT 100 unless the question asks for an aggregate or a specific count.
5. Return the statement in a single ```sql fenced block. Keep any explanation short and outside the block.

## Retries

If the message contains feedback from previous attempts, the previous SQL failed or returned no rows.
Apply every suggestion literally (for example, a corrected column name) and do not repeat the failing statement."#;

/// Schema section appended to the system prompt.
pub fn schema_summary(snapshot: Option<&SchemaSnapshot>) -> String {
    let Some(snapshot) = snapshot.filter(|s| !s.is_empty()) else {
        return "## Schema\n\n(no schema snapshot available; prefer simple statements)".to_string();
    };
    let tables = snapshot
        .iter()
        .map(|(table, columns)| {
            if columns.is_empty() {
                format!("- {}", table)
            } else {
                format!("- {}({})", table, columns.iter().join(", "))
            }
        })
        .join("\n");
    format!("## Schema\n\n{}", tables)
}

pub fn build_system_prompt(kind: Option<DatabaseKind>, snapshot: Option<&SchemaSnapshot>) -> String {
    let dialect = match kind {
        Some(DatabaseKind::Postgres) => "## Dialect\n\nPostgreSQL. Quote identifiers with double quotes if needed.",
        Some(DatabaseKind::MySql) => "## Dialect\n\nMySQL. Quote identifiers with backticks if needed.",
        None => "## Dialect\n\nANSI SQL.",
    };
    format!(
        "{}\n\n{}\n\n{}",
        SQL_GENERATION_SYSTEM_PROMPT,
        dialect,
        schema_summary(snapshot)
    )
}
