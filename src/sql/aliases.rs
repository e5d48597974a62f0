//! Table alias resolution for executed statements.
//!
//! Used by the error classifier to map `p.fullname` back to `patients`.
//! Parses with `sqlparser` in the engine's dialect and falls back to a
//! FROM/JOIN scan when the statement does not parse.

use crate::db::DatabaseKind;
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement, TableFactor, TableWithJoins};
use sqlparser::parser::Parser;

lazy_static! {
    static ref TABLE_REF: Regex = Regex::new(
        r#"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_.]*|"[^"]+"|`[^`]+`)(?:\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*))?"#
    )
    .unwrap();
}

const NOT_AN_ALIAS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "ON", "GROUP", "ORDER", "LIMIT",
    "HAVING", "UNION", "OFFSET", "USING", "NATURAL", "OUTER",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
}

/// Every table referenced in FROM/JOIN clauses, in statement order.
pub fn table_refs(sql: &str, kind: DatabaseKind) -> Vec<TableRef> {
    let dialect = kind.dialect();
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => {
            let mut refs = Vec::new();
            for statement in &statements {
                if let Statement::Query(query) = statement {
                    walk_query(query, &mut refs);
                }
            }
            refs
        }
        Err(_) => scan_table_refs(sql),
    }
}

/// Resolve a column qualifier (alias or table name) to a table name.
pub fn resolve_qualifier(sql: &str, kind: DatabaseKind, qualifier: &str) -> Option<String> {
    let refs = table_refs(sql, kind);
    refs.iter()
        .find(|r| {
            r.alias
                .as_deref()
                .map_or(false, |a| a.eq_ignore_ascii_case(qualifier))
        })
        .or_else(|| refs.iter().find(|r| r.table.eq_ignore_ascii_case(qualifier)))
        .map(|r| r.table.clone())
}

fn walk_query(query: &Query, refs: &mut Vec<TableRef>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            walk_query(&cte.query, refs);
        }
    }
    walk_set_expr(&query.body, refs);
}

fn walk_set_expr(expr: &SetExpr, refs: &mut Vec<TableRef>) {
    match expr {
        SetExpr::Select(select) => {
            for from in &select.from {
                walk_table_with_joins(from, refs);
            }
        }
        SetExpr::Query(query) => walk_query(query, refs),
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr(left, refs);
            walk_set_expr(right, refs);
        }
        _ => {}
    }
}

fn walk_table_with_joins(twj: &TableWithJoins, refs: &mut Vec<TableRef>) {
    walk_table_factor(&twj.relation, refs);
    for join in &twj.joins {
        walk_table_factor(&join.relation, refs);
    }
}

fn walk_table_factor(factor: &TableFactor, refs: &mut Vec<TableRef>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            if let Some(last) = name.0.last() {
                refs.push(TableRef {
                    table: last.value.clone(),
                    alias: alias.as_ref().map(|a| a.name.value.clone()),
                });
            }
        }
        TableFactor::Derived { subquery, .. } => walk_query(subquery, refs),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => walk_table_with_joins(table_with_joins, refs),
        _ => {}
    }
}

fn scan_table_refs(sql: &str) -> Vec<TableRef> {
    TABLE_REF
        .captures_iter(sql)
        .filter_map(|c| {
            let raw = c.get(1)?.as_str();
            let table = raw
                .rsplit('.')
                .next()
                .unwrap_or(raw)
                .trim_matches(|ch| ch == '"' || ch == '`')
                .to_string();
            let alias = c
                .get(2)
                .map(|m| m.as_str().to_string())
                .filter(|a| !NOT_AN_ALIAS.contains(&a.to_uppercase().as_str()));
            Some(TableRef { table, alias })
        })
        .collect()
}
