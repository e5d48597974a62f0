//! SQL Sanitizer
//!
//! Normalizes raw agent text into a single read-only SQL statement.
//! Returns an empty string when no usable statement can be produced.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FENCE: Regex = Regex::new(
        r"(?is)```[ \t]*(?:postgresql|postgres|sqlite|mysql|pgsql|plsql|psql|tsql|sql)?[ \t]*\r?\n?(.*?)```"
    )
    .unwrap();
    static ref OPEN_FENCE: Regex = Regex::new(
        r"(?is)```[ \t]*(?:postgresql|postgres|sqlite|mysql|pgsql|plsql|psql|tsql|sql)?[ \t]*\r?\n?(.*)$"
    )
    .unwrap();
    static ref INLINE_CODE: Regex = Regex::new(r"`([^`\n]+)`").unwrap();
    static ref DESTRUCTIVE: Regex =
        Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE)\b").unwrap();
    static ref STARTS_WITH_SQL: Regex = Regex::new(r"(?i)^\s*(SELECT|WITH|FROM)\b|^\s*\(").unwrap();
    static ref SELECT_KEYWORD: Regex = Regex::new(r"(?i)\bSELECT\b").unwrap();
    static ref CTE_KEYWORD: Regex =
        Regex::new(r"(?i)\bWITH\s+(RECURSIVE\s+)?[A-Za-z_][A-Za-z0-9_]*\s+AS\s*\(").unwrap();
    static ref BLANK_LINE: Regex = Regex::new(r"\n[ \t]*\n").unwrap();
    static ref LINK: Regex = Regex::new(r"\[([^\]]+)\]\(https?://[^)\s]*\)").unwrap();
    static ref TEMPLATE_TAG: Regex =
        Regex::new(r"(?i)</?sql>|<\|[^|>]*\|>|\{%.*?%\}|\{\{|\}\}").unwrap();
    static ref EMPHASIS: Regex = Regex::new(r"\*\*|~~").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Sanitize raw agent output into one terminated statement, or `""`.
pub fn sanitize(raw: &str) -> String {
    let extracted = extract_sql_text(raw);
    if extracted.trim().is_empty() || is_destructive(&extracted) {
        return String::new();
    }

    let text = drop_comment_lines(&extracted);
    let text = locate_statement(&text);
    let text = strip_decorations(&text);
    let text = first_statement(&text);
    let text = map_code(&text, |code| WHITESPACE.replace_all(code, " ").into_owned());

    let body = text.trim().trim_end_matches(';').trim_end();
    if body.is_empty() || is_destructive(body) {
        return String::new();
    }
    format!("{};", body)
}

/// True if the text contains a write/DDL keyword as a whole word.
pub fn is_destructive(text: &str) -> bool {
    DESTRUCTIVE.is_match(text)
}

/// True if the text starts like a SQL statement.
pub fn looks_like_sql(text: &str) -> bool {
    STARTS_WITH_SQL.is_match(text)
}

/// Picks the fenced block, inline code span, or raw text that carries SQL.
fn extract_sql_text(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    if let Some(pos) = text.find("SQLQuery:") {
        text = text[pos + "SQLQuery:".len()..].to_string();
    }
    for marker in ["SQLResult:", "\nAnswer:"] {
        if let Some(pos) = text.find(marker) {
            text.truncate(pos);
        }
    }

    let fences: Vec<String> = FENCE
        .captures_iter(&text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    if let Some(block) = fences
        .iter()
        .find(|b| SELECT_KEYWORD.is_match(b) || CTE_KEYWORD.is_match(b))
        .or_else(|| fences.first())
    {
        return block.trim().to_string();
    }
    if fences.is_empty() {
        // truncated agent output: an opening fence that never closes
        if let Some(block) = OPEN_FENCE.captures(&text).and_then(|c| c.get(1)) {
            return block.as_str().trim().to_string();
        }
    }

    if !looks_like_sql(&text) {
        let span = INLINE_CODE
            .captures_iter(&text)
            .filter_map(|c| c.get(1))
            .find(|m| {
                let s = m.as_str().trim_start();
                SELECT_KEYWORD.find(s).map_or(false, |k| k.start() == 0)
                    || CTE_KEYWORD.find(s).map_or(false, |k| k.start() == 0)
            });
        if let Some(span) = span {
            return span.as_str().trim().to_string();
        }
    }

    text.trim().to_string()
}

/// Removes lines that are entirely comments, so commentary mentioning
/// keywords is not mistaken for the statement start.
fn drop_comment_lines(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.starts_with("--") || t.starts_with('#'))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drops prose in front of the first SELECT (or CTE) keyword.
fn locate_statement(text: &str) -> String {
    if looks_like_sql(text) {
        return text.to_string();
    }
    let start = [SELECT_KEYWORD.find(text), CTE_KEYWORD.find(text)]
        .into_iter()
        .flatten()
        .map(|m| m.start())
        .min();
    match start {
        Some(start) => {
            let rest = &text[start..];
            // prose usually resumes after a blank line
            match BLANK_LINE.find(rest) {
                Some(m) => rest[..m.start()].to_string(),
                None => rest.to_string(),
            }
        }
        None => text.to_string(),
    }
}

/// Strips comments and markdown until neither changes the text; removing
/// emphasis can join `-**-**` into a fresh `--`.
fn strip_decorations(text: &str) -> String {
    let mut text = strip_comments(text);
    loop {
        let stripped = strip_comments(&map_code(&text, strip_markdown));
        if stripped == text {
            return text;
        }
        text = stripped;
    }
}

fn strip_markdown(code: &str) -> String {
    let code = LINK.replace_all(code, "$1");
    let code = TEMPLATE_TAG.replace_all(&code, "");
    EMPHASIS.replace_all(&code, "").into_owned()
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Removes `--`, MySQL `#` and `/* */` comments outside literals.
fn strip_comments(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut state = ScanState::Code;
    let mut line_start = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match state {
            ScanState::Code => {
                if c == '-' && next == Some('-') {
                    state = ScanState::LineComment;
                    i += 2;
                    continue;
                }
                if c == '/' && next == Some('*') {
                    state = ScanState::BlockComment;
                    out.push(' ');
                    i += 2;
                    continue;
                }
                let after_space = i == 0 || chars[i - 1].is_whitespace();
                let before_space = next.map_or(true, char::is_whitespace);
                if c == '#' && (line_start || (after_space && before_space)) {
                    state = ScanState::LineComment;
                    i += 1;
                    continue;
                }
                if matches!(c, '\'' | '"' | '`') {
                    state = ScanState::Quoted(c);
                }
                out.push(c);
                if c == '\n' {
                    line_start = true;
                } else if !c.is_whitespace() {
                    line_start = false;
                }
            }
            ScanState::Quoted(q) => {
                out.push(c);
                if c == q {
                    if next == Some(q) {
                        out.push(q);
                        i += 2;
                        continue;
                    }
                    state = ScanState::Code;
                }
            }
            ScanState::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    line_start = true;
                    state = ScanState::Code;
                }
            }
            ScanState::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = ScanState::Code;
                    i += 2;
                    continue;
                }
            }
        }
        i += 1;
    }
    out
}

/// Splits text into (is_literal, chunk) pieces.
fn split_literals(text: &str) -> Vec<(bool, String)> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            None if matches!(c, '\'' | '"' | '`') => {
                if !current.is_empty() {
                    pieces.push((false, std::mem::take(&mut current)));
                }
                current.push(c);
                quote = Some(c);
            }
            None => current.push(c),
            Some(q) => {
                current.push(c);
                if c == q {
                    if chars.peek() == Some(&q) {
                        current.push(q);
                        chars.next();
                        continue;
                    }
                    pieces.push((true, std::mem::take(&mut current)));
                    quote = None;
                }
            }
        }
    }
    if !current.is_empty() {
        pieces.push((quote.is_some(), current));
    }
    pieces
}

/// Applies `f` to the parts of `text` outside string literals.
fn map_code<F>(text: &str, f: F) -> String
where
    F: Fn(&str) -> String,
{
    split_literals(text)
        .into_iter()
        .map(|(literal, chunk)| if literal { chunk } else { f(&chunk) })
        .collect()
}

/// Keeps everything up to the first `;` outside a literal.
fn first_statement(text: &str) -> String {
    let mut out = String::new();
    for (literal, chunk) in split_literals(text) {
        if !literal {
            if let Some(pos) = chunk.find(';') {
                out.push_str(&chunk[..pos]);
                return out;
            }
        }
        out.push_str(&chunk);
    }
    out
}
