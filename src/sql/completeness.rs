//! SQL Completeness Checker / Repairer
//!
//! Detects statements truncated by the generation agent (missing SELECT,
//! dangling FROM, no table at all) and applies a best-effort syntactic
//! completion before an execution attempt is spent on them.

use crate::sql::fallback::FallbackCatalog;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SELECT: Regex = Regex::new(r"(?i)\bSELECT\b").unwrap();
    static ref FROM: Regex = Regex::new(r"(?i)\bFROM\b").unwrap();
    static ref EMPTY_SELECT_LIST: Regex = Regex::new(r"(?i)^\s*SELECT\s*(\bFROM\b|$)").unwrap();
    static ref COLUMN_PREFIX: Regex =
        Regex::new(r#"\b([A-Za-z_][A-Za-z0-9_]*)\.(?:[A-Za-z_*"`])"#).unwrap();
    static ref NEXT_TOKEN: Regex = Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*|["`\[(])"#).unwrap();
}

const CLAUSE_KEYWORDS: &[&str] = &[
    "WHERE", "GROUP", "ORDER", "LIMIT", "HAVING", "JOIN", "INNER", "LEFT", "RIGHT", "FULL",
    "CROSS", "ON", "UNION", "OFFSET", "SELECT", "FROM",
];

/// True iff the statement has SELECT, a FROM outside any parentheses, and a
/// table after every FROM.
pub fn is_complete(sql: &str) -> bool {
    SELECT.is_match(sql) && top_level_from(sql).is_some() && dangling_from_positions(sql).is_empty()
}

/// First FROM keyword outside parentheses and quotes, so `EXTRACT(YEAR FROM x)`
/// does not count as a table clause.
fn top_level_from(sql: &str) -> Option<regex::Match<'_>> {
    FROM.find_iter(sql).find(|m| depth_at(sql, m.start()) == Some(0))
}

/// Parenthesis depth at byte offset `pos`; `None` inside a quoted literal.
fn depth_at(sql: &str, pos: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in sql.char_indices() {
        if i >= pos {
            break;
        }
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            },
        }
    }
    quote.is_none().then_some(depth)
}

/// Byte offsets just past each FROM keyword that is not followed by a table.
fn dangling_from_positions(sql: &str) -> Vec<usize> {
    FROM.find_iter(sql)
        .filter(|m| {
            let rest = sql[m.end()..].trim_end_matches(|c: char| c == ';' || c.is_whitespace());
            match NEXT_TOKEN.captures(rest).and_then(|c| c.get(1)) {
                Some(token) => {
                    let word = token.as_str().to_uppercase();
                    CLAUSE_KEYWORDS.contains(&word.as_str())
                }
                None => true,
            }
        })
        .map(|m| m.end())
        .collect()
}

/// Infers a `table alias` clause from column prefixes in the select list.
fn infer_table(sql: &str, catalog: &FallbackCatalog) -> String {
    let select_list = match (SELECT.find(sql), top_level_from(sql)) {
        (Some(s), Some(f)) if f.start() > s.end() => &sql[s.end()..f.start()],
        (Some(s), _) => &sql[s.end()..],
        _ => sql,
    };
    COLUMN_PREFIX
        .captures_iter(select_list)
        .filter_map(|c| c.get(1))
        .find_map(|prefix| catalog.table_for_prefix(prefix.as_str()))
        .unwrap_or_else(|| catalog.default_table.clone())
}

/// Best-effort completion of an incomplete statement. Applying it to its own
/// output is a no-op apart from the terminator.
pub fn repair(sql: &str, catalog: &FallbackCatalog) -> String {
    let mut body = sql.trim().trim_end_matches(';').trim_end().to_string();

    if !SELECT.is_match(&body) {
        body = match FROM.find(&body) {
            Some(m) if body[..m.start()].trim().is_empty() => {
                format!("SELECT * {}", body[m.start()..].trim_start())
            }
            _ if body.is_empty() => "SELECT *".to_string(),
            _ => format!("SELECT {}", body),
        };
    }

    if EMPTY_SELECT_LIST.is_match(&body) {
        if let Some(pos) = SELECT.find(&body).map(|m| m.end()) {
            body.insert_str(pos, " *");
        }
    }

    let table = infer_table(&body, catalog);

    if top_level_from(&body).is_none() {
        body = format!("{} FROM {}", body, table);
    } else {
        for pos in dangling_from_positions(&body).into_iter().rev() {
            body.insert_str(pos, &format!(" {}", table));
        }
    }

    format!("{};", body.trim_end())
}
