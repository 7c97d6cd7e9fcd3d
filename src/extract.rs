//! Extraction of structured artifacts from free-text model replies.
//!
//! A reply either yields exactly one SQL statement (or one review object) or a
//! typed [`ExtractionError`]. Code fences, a leading `SQL Query:` style label and
//! prose trailing the statement are stripped; nothing else is guessed.

use crate::db::Dialect;
use crate::executor::SqlCandidate;
use crate::reviewer::ReviewResult;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use thiserror::Error;

lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[^\n]*\n(.*?)```").unwrap();
    static ref LEADING_LABEL: Regex =
        Regex::new(r"(?i)^\s*(sql\s*query|corrected\s*query|sql|query)\s*:\s*").unwrap();
    static ref LEADING_COMMENTS: Regex =
        Regex::new(r"(?s)^(\s*(--[^\n]*(\n|$)|/\*.*?\*/))*\s*").unwrap();
    static ref STATEMENT_START: Regex = Regex::new(
        r"(?i)^(\(|(select|with|insert|update|delete|replace|merge|show|describe|desc|explain|create|alter|drop|truncate|call|values|table)\b)"
    )
    .unwrap();
    // Clauses that may legitimately follow a blank line inside one statement
    static ref CLAUSE_CONTINUATION: Regex = Regex::new(
        r"(?i)^([),*/+=<>|-]|(from|where|join|inner|left|right|full|cross|natural|on|using|group|order|having|limit|offset|fetch|union|intersect|except|and|or|not|as|case|when|then|else|end|set|values|returning|window|partition|over|into|lateral|straight_join|for|lock)\b)"
    )
    .unwrap();
    static ref BLANK_LINE: Regex = Regex::new(r"\n[ \t]*\r?\n").unwrap();
}

const SQL_FENCE_LANGS: &[&str] = &["", "sql", "mysql", "postgres", "postgresql", "pgsql", "psql"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("model returned an empty response")]
    Empty,

    #[error("no SQL statement found in model response: {0}")]
    NoStatement(String),

    #[error("expected exactly one SQL statement, found {0}")]
    MultipleStatements(usize),

    #[error("review response is not a valid JSON object: {0}")]
    InvalidReview(String),

    #[error("review response contains no corrected query")]
    MissingCorrection,
}

/// Extract the single SQL statement contained in `response`.
pub fn extract_sql(dialect: Dialect, response: &str) -> Result<SqlCandidate, ExtractionError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::Empty);
    }

    let body = fenced_sql(trimmed).unwrap_or_else(|| trimmed.trim_matches('`'));
    let body = LEADING_LABEL.replace(body, "");
    let body = LEADING_COMMENTS.replace(&body, "");
    let sql = body.trim();

    if sql.is_empty() || !STATEMENT_START.is_match(sql) {
        return Err(ExtractionError::NoStatement(preview(trimmed)));
    }

    leading_statement(dialect, sql).map(SqlCandidate::new)
}

/// The first statement of `sql`, with any trailing commentary dropped.
///
/// Text after the first top-level `;` is a second statement only when it starts
/// like one. Without a `;`, a blank line followed by a paragraph that neither
/// starts a statement nor continues a clause ends the statement.
fn leading_statement(dialect: Dialect, sql: &str) -> Result<&str, ExtractionError> {
    for (idx, _) in sql.match_indices(';') {
        if !is_top_level(dialect, sql, idx) {
            continue;
        }
        let rest = LEADING_COMMENTS.replace(&sql[idx + 1..], "");
        let rest = rest.trim();
        if rest.is_empty() || !STATEMENT_START.is_match(rest) {
            return Ok(&sql[..=idx]);
        }
        let extra = count_statements(dialect, rest).unwrap_or(1).max(1);
        return Err(ExtractionError::MultipleStatements(1 + extra));
    }

    for blank in BLANK_LINE.find_iter(sql) {
        let next = sql[blank.end()..].trim_start();
        if STATEMENT_START.is_match(next) || CLAUSE_CONTINUATION.is_match(next) {
            continue;
        }
        if is_top_level(dialect, sql, blank.end()) {
            return Ok(sql[..blank.start()].trim_end());
        }
    }
    Ok(sql)
}

/// Whether everything before byte offset `idx` is closed: no open string literal,
/// quoted identifier or comment.
fn is_top_level(dialect: Dialect, sql: &str, idx: usize) -> bool {
    let parser_dialect = dialect.parser_dialect();
    match Tokenizer::new(parser_dialect.as_ref(), &sql[..idx]).tokenize() {
        Ok(tokens) => !matches!(
            tokens.iter().rev().find(|t| !matches!(t, Token::EOF)),
            Some(Token::Whitespace(Whitespace::SingleLineComment { .. }))
        ),
        Err(_) => false,
    }
}

/// Parse a reviewer reply of the form `{"review": "...", "corrected_query": "..."}`.
pub fn parse_review(dialect: Dialect, response: &str) -> Result<ReviewResult, ExtractionError> {
    #[derive(Deserialize)]
    struct RawReview {
        review: Option<String>,
        corrected_query: Option<String>,
    }

    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::Empty);
    }

    let body = first_fenced_block(trimmed).unwrap_or(trimmed);

    // First complete object wins; prose around it may contain braces of its own
    let mut first_error = None;
    let mut raw = None;
    for (start, _) in body.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&body[start..]).into_iter::<RawReview>();
        match stream.next() {
            Some(Ok(parsed)) => {
                raw = Some(parsed);
                break;
            }
            Some(Err(e)) => {
                first_error.get_or_insert_with(|| format!("{} in {}", e, preview(&body[start..])));
            }
            None => {}
        }
    }
    let raw = raw.ok_or_else(|| {
        ExtractionError::InvalidReview(first_error.unwrap_or_else(|| preview(trimmed)))
    })?;

    let corrected = raw
        .corrected_query
        .filter(|q| !q.trim().is_empty())
        .ok_or(ExtractionError::MissingCorrection)?;
    let corrected_sql = extract_sql(dialect, &corrected)?;

    let narrative = raw
        .review
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "No review text provided.".to_string());

    Ok(ReviewResult {
        narrative,
        corrected_sql,
    })
}

/// Body of the first SQL-labelled (or unlabelled) fenced block.
fn fenced_sql(text: &str) -> Option<&str> {
    for caps in FENCED_BLOCK.captures_iter(text) {
        let lang = caps.get(1).map(|m| m.as_str().to_lowercase()).unwrap_or_default();
        if SQL_FENCE_LANGS.contains(&lang.as_str()) {
            return caps.get(2).map(|m| m.as_str());
        }
    }
    unterminated_fence(text).and_then(|(lang, body)| {
        SQL_FENCE_LANGS.contains(&lang.to_lowercase().as_str()).then_some(body)
    })
}

/// Language tag and body of a trailing fence that was opened but never closed,
/// as left behind by a reply cut off at the length limit.
fn unterminated_fence(text: &str) -> Option<(&str, &str)> {
    let fences: Vec<usize> = text.match_indices("```").map(|(idx, _)| idx).collect();
    if fences.len() % 2 == 0 {
        return None;
    }
    let after = &text[fences[fences.len() - 1] + 3..];
    let newline = after.find('\n')?;
    let lang = after[..newline]
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or_default();
    Some((lang, &after[newline + 1..]))
}

fn first_fenced_block(text: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
        .or_else(|| unterminated_fence(text).map(|(_, body)| body))
}

/// Number of non-empty statements, or `None` when the text cannot be tokenized.
fn count_statements(dialect: Dialect, sql: &str) -> Option<usize> {
    let parser_dialect = dialect.parser_dialect();
    let tokens = Tokenizer::new(parser_dialect.as_ref(), sql).tokenize().ok()?;

    let mut count = 0;
    let mut in_statement = false;
    for token in tokens {
        match token {
            Token::SemiColon => {
                if in_statement {
                    count += 1;
                    in_statement = false;
                }
            }
            Token::Whitespace(_) | Token::EOF => {}
            _ => in_statement = true,
        }
    }
    if in_statement {
        count += 1;
    }
    Some(count)
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let cut: String = text.chars().take(LIMIT).collect();
        format!("{}...", cut)
    }
}
